//! Metadata CRUD endpoints.
//!
//! Reads go through the server-side TTL cache; writes and deletes invalidate
//! the cached entry so the next read sees the store.
//!
//! A read fills the cache while holding the store's lock on the record, and
//! writers invalidate only after the store has changed. A fill therefore
//! either sees the new state or is invalidated after it.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use tracing::{debug, info, instrument};

use crate::error::{EampError, EampResult};
use crate::models::{ListParams, Metadata};
use crate::state::AppState;
use crate::store::DEFAULT_LIST_LIMIT;
use crate::validation::validate_resource_id;

/// Largest page a single listing may return.
const MAX_LIST_LIMIT: usize = 1000;

/// List metadata, optionally filtered by `type`, `tags` and `hasDataPoints`.
#[instrument(skip(state))]
pub async fn list_metadata(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> EampResult<Json<Vec<Metadata>>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(EampError::validation_field(
            format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
            "limit",
        ));
    }

    let records = state
        .store
        .list(&params.filter(), limit, params.offset.unwrap_or(0));

    Ok(Json(records))
}

/// Get one record, served from the cache when fresh.
#[instrument(skip(state))]
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> EampResult<Json<Metadata>> {
    validate_resource_id(&id)?;

    if let Some(cached) = state.cache.get(&id) {
        debug!(resource_id = %id, "Served from cache");
        return Ok(Json(cached));
    }

    load_into_cache(&state, &id)
        .map(Json)
        .ok_or_else(|| EampError::NotFound(id.clone()))
}

fn load_into_cache(state: &AppState, id: &str) -> Option<Metadata> {
    state.store.read_with(id, |record| {
        state.cache.set(id.to_string(), record.clone(), None);
        record.clone()
    })
}

/// Store first, invalidate second.
fn store_record(state: &AppState, metadata: Metadata) -> (Metadata, bool) {
    let id = metadata.id.clone();
    let stored = state.store.upsert(metadata);
    state.cache.delete(&id);
    stored
}

/// Delete first, invalidate second.
fn remove_record(state: &AppState, id: &str) -> bool {
    let removed = state.store.delete(id);
    state.cache.delete(id);
    removed
}

/// Create or replace a record. The body `id` must match the path.
///
/// Returns 201 when the record was created and 200 when replaced.
#[instrument(skip(state, payload))]
pub async fn put_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<Metadata>,
) -> EampResult<(StatusCode, Json<Metadata>)> {
    validate_resource_id(&id)?;

    if payload.id != id {
        return Err(EampError::validation_field(
            format!("Body id '{}' does not match path id '{id}'", payload.id),
            "id",
        ));
    }

    let (stored, created) = store_record(&state, payload);
    info!(resource_id = %id, created, "Metadata stored");

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(stored)))
}

/// Delete a record.
#[instrument(skip(state))]
pub async fn delete_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> EampResult<StatusCode> {
    validate_resource_id(&id)?;

    if !remove_record(&state, &id) {
        return Err(EampError::NotFound(id.clone()));
    }

    info!(resource_id = %id, "Metadata deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::models::fixtures;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn state_with(id: &str) -> AppState {
        let state = AppState::new(Config::default()).unwrap();
        state.store.upsert(fixtures::chart(id));
        state
    }

    #[test]
    fn test_load_fills_cache() {
        let state = state_with("c1");

        assert!(load_into_cache(&state, "c1").is_some());
        assert!(state.cache.contains("c1"));
        assert!(load_into_cache(&state, "missing").is_none());
        assert!(!state.cache.contains("missing"));
    }

    /// A delete racing a read that already found the record must not leave
    /// the deleted record cached.
    #[test]
    fn test_delete_during_cache_fill_leaves_no_stale_entry() {
        let state = state_with("c1");
        let (done_tx, done_rx) = mpsc::channel();

        let deleter = state
            .store
            .read_with("c1", |record| {
                let remover = state.clone();
                let handle = thread::spawn(move || {
                    let removed = remove_record(&remover, "c1");
                    done_tx.send(()).unwrap();
                    removed
                });

                // The delete waits on the record lock held by this read
                assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
                state.cache.set("c1".to_string(), record.clone(), None);
                handle
            })
            .unwrap();

        assert!(deleter.join().unwrap());
        assert!(state.store.get("c1").is_none());
        assert!(state.cache.get("c1").is_none());
    }

    /// Same interleaving for a replacement: the old version must not survive
    /// in the cache.
    #[test]
    fn test_update_during_cache_fill_leaves_no_stale_entry() {
        let state = state_with("c1");
        let (done_tx, done_rx) = mpsc::channel();

        let writer = state
            .store
            .read_with("c1", |record| {
                let writer_state = state.clone();
                let handle = thread::spawn(move || {
                    let mut changed = fixtures::chart("c1");
                    changed.short_alt = "Updated".to_string();
                    store_record(&writer_state, changed);
                    done_tx.send(()).unwrap();
                });

                assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
                state.cache.set("c1".to_string(), record.clone(), None);
                handle
            })
            .unwrap();

        writer.join().unwrap();
        assert!(state.cache.get("c1").is_none());
        assert_eq!(
            load_into_cache(&state, "c1").unwrap().short_alt,
            "Updated"
        );
    }
}
