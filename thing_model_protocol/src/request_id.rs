// Copyright (c) Thing Model SDK Contributors.
// Licensed under the MIT License.

//! Process-wide request identifier allocation.

use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_ID: AtomicU64 = AtomicU64::new(0);

/// Returns a new request identifier, larger than every identifier returned before it.
///
/// Identifiers start at 1 and wrap after `u64::MAX`.
#[must_use]
pub fn next() -> u64 {
    REQUEST_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}
