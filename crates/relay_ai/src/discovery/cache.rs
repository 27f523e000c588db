//! Per-vendor model cache with a fixed time-to-live.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::Model;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub vendor: String,
    pub models: Vec<Model>,
    pub created_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() > ttl
    }
}

/// Many concurrent readers, one writer on insert, evict or clear.
#[derive(Debug)]
pub struct ModelCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh models for `vendor`. An expired entry is evicted and reported
    /// as a miss.
    pub fn get(&self, vendor: &str) -> Option<Vec<Model>> {
        {
            let entries = self.entries.read();
            match entries.get(vendor) {
                None => return None,
                Some(entry) if !entry.is_expired(self.ttl) => return Some(entry.models.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have refreshed the entry in between.
        if entries.get(vendor).is_some_and(|e| e.is_expired(self.ttl)) {
            entries.remove(vendor);
            return None;
        }
        entries.get(vendor).map(|e| e.models.clone())
    }

    pub fn insert(&self, vendor: &str, models: Vec<Model>) {
        self.entries.write().insert(
            vendor.to_string(),
            CacheEntry {
                vendor: vendor.to_string(),
                models,
                created_at: Instant::now(),
            },
        );
    }

    pub fn remove(&self, vendor: &str) -> bool {
        self.entries.write().remove(vendor).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Vendors with an entry, expired or not, sorted.
    pub fn vendors(&self) -> Vec<String> {
        let mut vendors: Vec<String> = self.entries.read().keys().cloned().collect();
        vendors.sort();
        vendors
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
