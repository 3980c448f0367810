//! Shared counter store for fixed-window accounting.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

/// Counter state for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Observations recorded in the current window
    pub count: u64,
    /// When the current window opened
    pub window_start: Instant,
    /// When the current window closes
    pub window_end: Instant,
}

impl WindowState {
    /// Open a fresh, empty window starting at `now`.
    pub fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_end: now + window,
        }
    }

    /// Whether this window has closed as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.window_end <= now
    }
}

/// Storage for per-key window counters.
///
/// This trait abstracts over the in-memory store so a shared external
/// store can be substituted without touching the limiters. Observation
/// must be atomic per key: the read-check-create-or-increment sequence
/// for one key never interleaves with another observer of that key.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one observation against `key`.
    ///
    /// Opens a fresh window (count 1) when the key is absent or its window
    /// has expired; otherwise increments in place. The count is never
    /// capped here. Admission is the limiter's decision, so a denied
    /// request still advances the counter.
    async fn observe(&self, key: &str, window: Duration, now: Instant) -> WindowState;

    /// Read the stored state for `key` without modifying it.
    async fn peek(&self, key: &str) -> Option<WindowState>;

    /// Subtract one observation from `key`, saturating at zero.
    ///
    /// Used to refund a request whose outcome exempts it from counting.
    async fn decrement(&self, key: &str);

    /// Delete the entry for `key` unconditionally.
    async fn remove(&self, key: &str);

    /// Delete every entry whose window closed at or before `now`.
    ///
    /// Returns the number of entries removed.
    async fn sweep(&self, now: Instant) -> usize;
}

/// In-memory counter store shared by all limiters in the process.
///
/// Entries are created lazily on first observation, replaced in place when
/// their window expires, and deleted by `remove` or the periodic `sweep`.
/// The map's per-shard locking gives `observe` its per-key atomicity: the
/// entry guard is held across the whole check-replace-increment sequence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<String, WindowState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Number of tracked keys, live and expired alike.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the store tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop all entries.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.windows.clear();
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn observe(&self, key: &str, window: Duration, now: Instant) -> WindowState {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState::open(now, window));

        let state = entry.value_mut();
        if state.is_expired(now) {
            trace!(key = %key, "Window expired, opening a fresh one");
            *state = WindowState::open(now, window);
        }
        state.count += 1;

        *state
    }

    async fn peek(&self, key: &str) -> Option<WindowState> {
        self.windows.get(key).map(|entry| *entry.value())
    }

    async fn decrement(&self, key: &str) {
        if let Some(mut entry) = self.windows.get_mut(key) {
            let state = entry.value_mut();
            state.count = state.count.saturating_sub(1);
        }
    }

    async fn remove(&self, key: &str) {
        self.windows.remove(key);
    }

    async fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, state| now < state.window_end);
        before.saturating_sub(self.windows.len())
    }
}
