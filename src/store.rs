//! In-memory metadata store backing the server routes.

use std::collections::BTreeMap;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

use crate::models::{Metadata, MetadataFilter};

/// Default page size for listings.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Record counts reported by `/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_count: usize,
    pub by_type: BTreeMap<String, usize>,
}

/// Concurrent map of resource id to metadata.
#[derive(Debug, Default)]
pub struct MetadataStore {
    records: DashMap<String, Metadata>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Metadata> {
        self.records.get(id).map(|r| r.value().clone())
    }

    /// Run `f` on the record while holding its shard's read lock.
    ///
    /// `upsert` and `delete` of the same id wait until `f` returns.
    pub fn read_with<R>(&self, id: &str, f: impl FnOnce(&Metadata) -> R) -> Option<R> {
        self.records.get(id).map(|r| f(r.value()))
    }

    /// Insert or replace a record. Returns the stored record and whether it
    /// was newly created.
    ///
    /// `created_at` survives replacement; `updated_at` is always bumped.
    pub fn upsert(&self, mut metadata: Metadata) -> (Metadata, bool) {
        let now = Utc::now();
        let id = metadata.id.clone();

        let mut created = false;
        let mut entry = self.records.entry(id).or_insert_with(|| {
            created = true;
            metadata.clone()
        });

        metadata.created_at = entry.created_at.or(metadata.created_at).or(Some(now));
        metadata.updated_at = Some(now);
        *entry = metadata.clone();

        (metadata, created)
    }

    pub fn delete(&self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Records matching `filter`, most recently updated first.
    pub fn list(&self, filter: &MetadataFilter, limit: usize, offset: usize) -> Vec<Metadata> {
        let mut matches: Vec<Metadata> = self
            .records
            .iter()
            .filter(|r| filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        matches.into_iter().skip(offset).take(limit).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        let mut by_type = BTreeMap::new();
        for record in self.records.iter() {
            *by_type
                .entry(record.content_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        StoreStats {
            total_count: self.records.len(),
            by_type,
        }
    }
}
