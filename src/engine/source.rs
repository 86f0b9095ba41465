// src/engine/source.rs
//
// Where job inputs come from: a provider of original source bytes keyed by
// item id, and the one-call path from an item to a queued job.

use crate::engine::job::{Job, JobCallbacks, JobHandle};
use crate::engine::pool::JobPool;
use crate::engine::protocol::JobMeta;
use crate::engine::signal::CancelSignal;
use crate::error::PoolError;
use crate::settings::{Settings, SettingsOverride};
use std::collections::HashMap;

/// Source bytes by item id.
pub trait SourceProvider {
    /// A fresh copy of the source, or `None` if the item is unknown.
    fn get_bytes(&self, id: &str) -> Option<Vec<u8>>;
}

impl SourceProvider for HashMap<String, Vec<u8>> {
    fn get_bytes(&self, id: &str) -> Option<Vec<u8>> {
        self.get(id).cloned()
    }
}

impl<P: SourceProvider + ?Sized> SourceProvider for &P {
    fn get_bytes(&self, id: &str) -> Option<Vec<u8>> {
        (**self).get_bytes(id)
    }
}

/// A caller-side item waiting to be processed.
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub meta: JobMeta,
    /// Per-item settings layered over the global defaults.
    pub overrides: Option<SettingsOverride>,
    pub signal: Option<CancelSignal>,
}

impl SourceItem {
    pub fn new(meta: JobMeta) -> Self {
        Self {
            meta,
            overrides: None,
            signal: None,
        }
    }

    pub fn with_overrides(mut self, overrides: SettingsOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_signal(mut self, signal: CancelSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Resolve settings, fetch the bytes and enqueue.
///
/// A missing source fails with `SourceNotFound` before anything is queued.
pub fn submit(
    pool: &JobPool,
    provider: &dyn SourceProvider,
    item: SourceItem,
    defaults: &Settings,
    callbacks: JobCallbacks,
) -> Result<JobHandle, PoolError> {
    let SourceItem {
        mut meta,
        overrides,
        signal,
    } = item;
    let input = provider
        .get_bytes(&meta.id)
        .ok_or_else(|| PoolError::SourceNotFound {
            id: meta.id.clone(),
        })?;
    if meta.size == 0 {
        meta.size = input.len() as u64;
    }

    let settings = Settings::resolve(defaults, overrides.as_ref());
    let mut job = Job::new(meta, settings, input).with_callbacks(callbacks);
    if let Some(signal) = signal {
        job = job.with_signal(signal);
    }
    pool.enqueue(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_provider_returns_copies() {
        let mut sources = HashMap::new();
        sources.insert("a".to_string(), vec![1u8, 2, 3]);
        assert_eq!(sources.get_bytes("a"), Some(vec![1, 2, 3]));
        assert_eq!(sources.get_bytes("b"), None);
        let by_ref: &dyn SourceProvider = &sources;
        assert_eq!(by_ref.get_bytes("a").map(|b| b.len()), Some(3));
    }
}
