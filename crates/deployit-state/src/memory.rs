//! In-memory state store.

use async_trait::async_trait;
use deployit_core::state::{AppliedState, StateStore};
use deployit_core::{Error, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Keeps state in process memory. Used by tests and `plan`.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<AppliedState>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: AppliedState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Make subsequent saves fail with a store error.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AppliedState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self) -> Result<AppliedState> {
        self.state
            .lock()
            .map(|s| s.clone())
            .map_err(|e| Error::Store(e.to_string()))
    }

    async fn save(&self, state: &AppliedState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::Store("memory store is read-only".to_string()));
        }
        let mut current = self
            .state
            .lock()
            .map_err(|e| Error::Store(e.to_string()))?;
        *current = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
