// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Reuse pool for correlation entries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use tokio::sync::{mpsc, Mutex};

use crate::error::CodeError;

/// Number of released entries kept for reuse by default.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Completion value carried by an entry's signal. `None` means success.
pub(crate) type Completion = Option<CodeError>;

/// Classification of a correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageKind {
    /// Not yet classified
    #[default]
    Unknown,
    /// `thing.event.property.post`
    PropertyPost,
    /// `thing.event.{identifier}.post`
    EventPost,
    /// `thing.event.property.pack.post`
    PropertyPackPost,
    /// `thing.deviceinfo.update`
    DeviceInfoUpdate,
    /// `thing.deviceinfo.delete`
    DeviceInfoDelete,
    /// `thing.dsltemplate.get`
    DslTemplateGet,
    /// `thing.dynamicTsl.get`
    DynamicTslGet,
    /// `thing.property.desired.get`
    DesiredPropertyGet,
    /// `thing.property.desired.delete`
    DesiredPropertyDelete,
}

/// State tracking one outstanding or recently completed request.
pub struct Entry {
    kind: MessageKind,
    device_index: usize,
    done: AtomicBool,
    tx: mpsc::Sender<Completion>,
    rx: Mutex<mpsc::Receiver<Completion>>,
}

impl Entry {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            kind: MessageKind::Unknown,
            device_index: 0,
            done: AtomicBool::new(false),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Tag the entry with the request it tracks.
    pub fn assign(&mut self, kind: MessageKind, device_index: usize) {
        self.kind = kind;
        self.device_index = device_index;
    }

    /// Kind of request the entry tracks
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Index of the device that issued the request
    #[must_use]
    pub fn device_index(&self) -> usize {
        self.device_index
    }

    /// Whether the entry has been completed or timed out
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Set the completion flag. Returns true only for the caller that flipped it.
    pub(crate) fn set_done(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    /// Flag the entry complete and offer `completion` to a waiter without blocking.
    ///
    /// Returns false if the entry was already complete, in which case nothing is delivered.
    pub(crate) fn complete(&self, completion: Completion) -> bool {
        if !self.set_done() {
            return false;
        }
        // Slot full or receiver gone: the flag alone records completion
        let _ = self.tx.try_send(completion);
        true
    }

    pub(crate) fn signal(&self) -> &Mutex<mpsc::Receiver<Completion>> {
        &self.rx
    }

    fn reset(&mut self) {
        let rx = self.rx.get_mut();
        while rx.try_recv().is_ok() {}
        self.kind = MessageKind::Unknown;
        self.device_index = 0;
        *self.done.get_mut() = false;
    }
}

/// Lock-free free-list of [`Entry`] values.
pub struct EntryPool {
    free_tx: Sender<Entry>,
    free_rx: Receiver<Entry>,
}

impl EntryPool {
    /// Create a pool retaining at most `capacity` released entries.
    ///
    /// A pool of capacity zero retains nothing.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(capacity);
        Self { free_tx, free_rx }
    }

    /// Take an entry from the pool, or create one if the pool is empty.
    ///
    /// A reused entry has its completion signal drained and its flag cleared.
    #[must_use]
    pub fn acquire(&self) -> Entry {
        match self.free_rx.try_recv() {
            Ok(mut entry) => {
                entry.reset();
                entry
            }
            Err(_) => Entry::new(),
        }
    }

    /// Return an entry for reuse. Dropped if the pool is full.
    pub fn release(&self, entry: Entry) {
        if self.free_tx.try_send(entry).is_err() {
            log::trace!("entry pool full, dropping released entry");
        }
    }

    /// Return a shared entry for reuse if no other owner remains.
    ///
    /// An entry still held elsewhere (a waiter) is dropped with its last owner rather than reused.
    pub(crate) fn release_shared(&self, entry: Arc<Entry>) {
        match Arc::try_unwrap(entry) {
            Ok(entry) => self.release(entry),
            Err(_) => log::trace!("entry still awaited, not returned to pool"),
        }
    }

    /// Number of entries available for reuse
    #[must_use]
    pub fn available(&self) -> usize {
        self.free_rx.len()
    }
}

impl Default for EntryPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
