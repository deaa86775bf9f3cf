// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Time-bounded cache of pending requests awaiting a response.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{CodeError, DmError, DmErrorKind};
use crate::pool::{Entry, EntryPool, MessageKind};

// Bound on deadlines and sweep periods, so oversized durations cannot overflow an Instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Notification that a pending request expired before it was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    /// Identifier of the expired request
    pub id: u64,
    /// Kind of the expired request
    pub kind: MessageKind,
    /// Index of the device that issued the request
    pub device_index: usize,
}

struct Slot {
    entry: Arc<Entry>,
    expires_at: Instant,
}

struct Inner {
    entries: DashMap<u64, Slot>,
    pool: EntryPool,
    expiration: Duration,
    timeout_tx: UnboundedSender<RequestTimeout>,
}

impl Inner {
    /// Returns the entry for `id` if it exists and has not expired.
    ///
    /// An expired entry found here is evicted on the spot.
    fn live_entry(&self, id: u64) -> Option<Arc<Entry>> {
        let now = Instant::now();
        let expired = match self.entries.get(&id) {
            Some(slot) if slot.expires_at > now => return Some(slot.entry.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.evict(id, now);
        }
        None
    }

    fn evict(&self, id: u64, now: Instant) {
        // remove_if hands the slot to exactly one caller when the sweep and an accessor race
        if let Some((_, slot)) = self.entries.remove_if(&id, |_, slot| slot.expires_at <= now) {
            self.expire(id, slot.entry);
        }
    }

    fn expire(&self, id: u64, entry: Arc<Entry>) {
        if entry.set_done() {
            log::warn!(
                "[cache] request @{id} ({:?}, device {}) expired without a response",
                entry.kind(),
                entry.device_index()
            );
            let event = RequestTimeout {
                id,
                kind: entry.kind(),
                device_index: entry.device_index(),
            };
            if self.timeout_tx.send(event).is_err() {
                log::debug!("[cache] timeout event for @{id} dropped, no listener");
            }
        } else {
            log::trace!("[cache] evicted completed request @{id}");
        }
        self.pool.release_shared(entry);
    }

    fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .entries
            .iter()
            .filter(|slot| slot.expires_at <= now)
            .map(|slot| *slot.key())
            .collect();
        for id in expired {
            self.evict(id, now);
        }
    }
}

/// Mapping from request identifier to the entry tracking its completion.
///
/// Entries expire after their time-to-live. Expiry of an entry that was never completed is
/// reported once through the [`RequestTimeout`] receiver returned by [`PendingRequestCache::new`].
pub struct PendingRequestCache {
    inner: Option<Arc<Inner>>,
    sweep_cancellation_token: CancellationToken,
}

impl PendingRequestCache {
    /// Create a cache whose entries live for `expiration` unless given their own TTL, swept
    /// every `cleanup_interval`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    /// * `expiration` - Default time-to-live of an entry
    /// * `cleanup_interval` - Period of the expiry sweep
    ///
    /// # Panics
    /// If `cleanup_interval` is zero.
    #[must_use]
    pub fn new(
        expiration: Duration,
        cleanup_interval: Duration,
    ) -> (Self, UnboundedReceiver<RequestTimeout>) {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            entries: DashMap::new(),
            pool: EntryPool::default(),
            expiration,
            timeout_tx,
        });
        let sweep_cancellation_token = CancellationToken::new();

        tokio::spawn({
            let inner = inner.clone();
            let cancellation_token = sweep_cancellation_token.clone();
            async move {
                let mut interval = time::interval(cleanup_interval.min(FAR_FUTURE));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // first tick completes immediately
                interval.tick().await;
                loop {
                    tokio::select! {
                        () = cancellation_token.cancelled() => break,
                        _ = interval.tick() => inner.sweep(),
                    }
                }
                log::debug!("[cache] sweep stopped");
            }
        });

        (
            Self {
                inner: Some(inner),
                sweep_cancellation_token,
            },
            timeout_rx,
        )
    }

    /// Create a cache that never holds entries, for modes without request/reply correlation.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: None,
            sweep_cancellation_token: CancellationToken::new(),
        }
    }

    /// Whether this cache tracks requests at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Register request `id` with the default time-to-live.
    pub fn insert(&self, id: u64, device_index: usize, kind: MessageKind) {
        if let Some(inner) = &self.inner {
            self.insert_with_ttl(id, device_index, kind, inner.expiration);
        }
    }

    /// Register request `id`, expiring after `ttl`.
    ///
    /// Does nothing on a disabled cache.
    pub fn insert_with_ttl(&self, id: u64, device_index: usize, kind: MessageKind, ttl: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut entry = inner.pool.acquire();
        entry.assign(kind, device_index);
        let slot = Slot {
            entry: Arc::new(entry),
            expires_at: deadline_after(ttl),
        };
        if let Some(previous) = inner.entries.insert(id, slot) {
            log::warn!("[cache] request @{id} inserted twice, replacing pending entry");
            inner.pool.release_shared(previous.entry);
        }
        log::debug!("[cache] insert @{id} ({kind:?}, device {device_index})");
    }

    /// Index of the device that issued request `id`, if it is pending.
    ///
    /// Does not affect the entry's time-to-live or completion state.
    #[must_use]
    pub fn lookup_owner(&self, id: u64) -> Option<usize> {
        self.inner
            .as_ref()?
            .live_entry(id)
            .map(|entry| entry.device_index())
    }

    /// Wait until request `id` is marked done or `timeout` elapses.
    ///
    /// Returns the completion error delivered through [`mark_done`](Self::mark_done), if any.
    /// The entry stays registered when the wait gives up.
    ///
    /// # Errors
    /// [`DmError`] of kind [`NotFound`](DmErrorKind::NotFound) if no entry exists for `id`
    ///
    /// [`DmError`] of kind [`WaitTimeout`](DmErrorKind::WaitTimeout) if `timeout` elapses first
    ///
    /// [`DmError`] of kind [`Protocol`](DmErrorKind::Protocol) if the request completed with a
    /// non-success code
    ///
    /// [`DmError`] of kind [`FeatureNotSupported`](DmErrorKind::FeatureNotSupported) if the cache is
    /// disabled
    pub async fn wait(&self, id: u64, timeout: Duration) -> Result<(), DmError> {
        let inner = self
            .inner
            .as_ref()
            .ok_or(DmErrorKind::FeatureNotSupported("request cache"))?;
        let entry = inner.live_entry(id).ok_or(DmErrorKind::NotFound)?;
        // another waiter on the same id may hold the signal, so its lock counts against the timeout
        let received = time::timeout(timeout, async {
            let mut signal = entry.signal().lock().await;
            signal.recv().await
        })
        .await;
        match received {
            Ok(Some(None)) => Ok(()),
            Ok(Some(Some(e))) => Err(DmErrorKind::Protocol(e).into()),
            // the entry owns the sender, so the channel cannot close while we hold it
            Ok(None) => Err(DmErrorKind::NotFound.into()),
            Err(_) => {
                log::debug!("[cache] wait for @{id} timed out after {timeout:?}");
                Err(DmErrorKind::WaitTimeout(timeout).into())
            }
        }
    }

    /// Mark request `id` complete with `error` (`None` for success).
    ///
    /// The first completion wins. Completing an unknown, expired or already completed request
    /// has no effect.
    pub fn mark_done(&self, id: u64, error: Option<CodeError>) {
        let Some(inner) = &self.inner else {
            return;
        };
        match inner.live_entry(id) {
            Some(entry) => {
                if entry.complete(error) {
                    log::debug!("[cache] done @{id}");
                }
            }
            None => log::trace!("[cache] done @{id} ignored, not pending"),
        }
    }

    /// Delete request `id` without reporting a timeout. Returns true if it was pending.
    pub fn remove(&self, id: u64) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };
        match inner.entries.remove(&id) {
            Some((_, slot)) => {
                inner.pool.release_shared(slot.entry);
                true
            }
            None => false,
        }
    }

    /// Number of registered entries, including expired ones not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.entries.len())
    }

    /// Returns true if no entries are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PendingRequestCache {
    fn drop(&mut self) {
        self.sweep_cancellation_token.cancel();
    }
}
