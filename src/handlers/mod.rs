mod health;
mod metadata;

pub use health::{health_check, stats};
pub use metadata::{delete_metadata, get_metadata, list_metadata, put_metadata};
