//! Shares one live [`Transcoder`] across every request for the same
//! fingerprint, and bounds how many stay referenced once nothing is actively
//! serving them. Grounded on the teacher's `services::position::cache::Cache`
//! (`Mutex<Inner>` wrapping a `LinkedHashMap` for LRU order) generalized with
//! a weak-valued index - the sharing property the position cache has no need
//! for, since positions are values, not handles to an external process.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use linked_hash_map::LinkedHashMap;
use log::debug;

use super::{Transcoder, TranscodeState};

/// Capacity of the two retention lists. Defaults match spec.md's defaults:
/// one running transcode held onto beyond its own request, twenty finished
/// ones.
#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
    pub running: usize,
    pub completed: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        CacheLimits {
            running: 1,
            completed: 20,
        }
    }
}

struct Inner {
    weak_index: HashMap<String, Weak<Transcoder>>,
    running: LinkedHashMap<String, Arc<Transcoder>>,
    completed: LinkedHashMap<String, Arc<Transcoder>>,
    limits: CacheLimits,
}

fn housekeep(inner: &mut Inner) {
    let finished: Vec<String> = inner
        .running
        .iter()
        .filter(|(_, t)| t.is_finished())
        .map(|(fp, _)| fp.clone())
        .collect();
    for fp in finished {
        if let Some(t) = inner.running.remove(&fp) {
            inner.completed.insert(fp, t);
        }
    }

    while inner.running.len() > inner.limits.running {
        if let Some((fp, _)) = inner.running.pop_front() {
            debug!("dropping running transcode {} from retention (over capacity)", fp);
        }
    }
    while inner.completed.len() > inner.limits.completed {
        if let Some((fp, _)) = inner.completed.pop_front() {
            debug!("dropping completed transcode {} from retention (over capacity)", fp);
        }
    }

    inner.weak_index.retain(|fp, weak| {
        let alive = weak.upgrade().is_some();
        if !alive {
            debug!("pruning dead weak index entry for {}", fp);
        }
        alive
    });
}

/// Joins concurrent requests for the same fingerprint onto one running
/// transcode, and keeps a bounded number of transcoders alive past the
/// request that started them so a near-simultaneous repeat request (a
/// seek, a second device) can still find the output on disk.
///
/// The weak index and the two retention lists are guarded by one
/// [`std::sync::Mutex`] that is only ever held for pointer bookkeeping -
/// never across the `ffmpeg` spawn, file I/O, or a sleep. Creation itself is
/// serialized per fingerprint by a separate, short-lived `tokio::sync::Mutex`
/// so two requests racing to transcode the same file collapse into one spawn
/// without blocking unrelated fingerprints.
pub struct TranscoderCache {
    inner: Mutex<Inner>,
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TranscoderCache {
    pub fn new(limits: CacheLimits) -> Self {
        TranscoderCache {
            inner: Mutex::new(Inner {
                weak_index: HashMap::new(),
                running: LinkedHashMap::new(),
                completed: LinkedHashMap::new(),
                limits,
            }),
            creation_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, fingerprint: &str) -> Option<Arc<Transcoder>> {
        let inner = self.inner.lock().unwrap();
        inner.weak_index.get(fingerprint).and_then(Weak::upgrade)
    }

    fn creation_lock_for(&self, fingerprint: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.creation_locks
            .lock()
            .unwrap()
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Returns the live transcoder for `fingerprint`, running `create` to
    /// spawn one if none exists. `create` runs with no cache lock held, so
    /// the `ffmpeg` spawn it performs never blocks an unrelated fingerprint;
    /// concurrent callers for the *same* fingerprint still collapse onto a
    /// single spawn via the per-fingerprint creation lock.
    pub async fn get_or_create<F, Fut>(&self, fingerprint: &str, create: F) -> anyhow::Result<Arc<Transcoder>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Transcoder>>,
    {
        if let Some(existing) = self.lookup(fingerprint) {
            return Ok(existing);
        }

        let creation_lock = self.creation_lock_for(fingerprint);
        let _guard = creation_lock.lock().await;

        if let Some(existing) = self.lookup(fingerprint) {
            return Ok(existing);
        }

        let result = create().await;
        self.creation_locks.lock().unwrap().remove(fingerprint);
        let transcoder = Arc::new(result?);

        let mut inner = self.inner.lock().unwrap();
        inner
            .weak_index
            .insert(fingerprint.to_string(), Arc::downgrade(&transcoder));
        drop(inner);

        Ok(transcoder)
    }

    /// Records that `transcoder` is no longer being actively served, moving
    /// it into the running or completed retention list (by its current
    /// state) and running housekeeping.
    pub fn touch(&self, transcoder: &Arc<Transcoder>) {
        let mut inner = self.inner.lock().unwrap();
        let fp = transcoder.fingerprint.clone();
        inner.running.remove(&fp);
        inner.completed.remove(&fp);
        match transcoder.state() {
            TranscodeState::Finished => {
                inner.completed.insert(fp, transcoder.clone());
            }
            TranscodeState::Running => {
                inner.running.insert(fp, transcoder.clone());
            }
        }
        housekeep(&mut inner);
    }

    /// Migrates newly-finished running transcodes into the completed list
    /// and trims both lists back down to their configured capacity. Safe to
    /// call redundantly; [`touch`](Self::touch) already runs it.
    pub fn housekeep(&self) {
        let mut inner = self.inner.lock().unwrap();
        housekeep(&mut inner);
    }

    #[cfg(test)]
    fn running_len(&self) -> usize {
        self.inner.lock().unwrap().running.len()
    }

    #[cfg(test)]
    fn completed_len(&self) -> usize {
        self.inner.lock().unwrap().completed.len()
    }

    #[cfg(test)]
    fn weak_index_len(&self) -> usize {
        self.inner.lock().unwrap().weak_index.len()
    }

    #[cfg(test)]
    fn creation_locks_len(&self) -> usize {
        self.creation_locks.lock().unwrap().len()
    }
}
