//! # EAMP Gateway
//!
//! Traffic-governance and resilience core for serving and consuming EAMP
//! (Extended Accessibility Metadata Protocol) records:
//!
//! - **Admission control**: per-client sliding-window rate limiting as a
//!   Tower layer, with `X-RateLimit-*` quota headers
//! - **Caching**: a concurrent TTL cache used by the server and the client
//! - **Client SDK**: cached, timeout-bounded fetches with a typed error
//!   taxonomy and a local update-subscription registry
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Rate Limit → Trace → CORS)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, metadata)                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TtlCache  →  MetadataStore                                 │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │  EampClient: TtlCache → Transport (reqwest) → classify      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eamp_gateway::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     state.spawn_maintenance_task();
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! RATE_LIMIT_REQUESTS_PER_MINUTE=100 RATE_LIMIT_WINDOW_SECS=60 cargo run
//! ```

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use cache::{CacheStats, EntryInfo, TtlCache};
pub use client::{ClientOptions, DispatchReport, EampClient, UpdateCallback};
pub use config::Config;
pub use error::{EampError, EampResult};
pub use ratelimit::{Admission, SlidingWindowLimiter};
pub use routes::build_router;
pub use state::AppState;
