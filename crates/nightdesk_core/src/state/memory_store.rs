use super::{StateError, StateResult, StateSnapshot, StateStore};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;

/// Process-local state store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: RefCell<Option<StateSnapshot>>,
    saves: Cell<usize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `snapshot`, as if saved by an earlier run.
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: RefCell::new(Some(snapshot)),
            saves: Cell::new(0),
        }
    }

    /// Number of successful saves since creation.
    pub fn save_count(&self) -> usize {
        self.saves.get()
    }

    /// Last saved snapshot, if any.
    pub fn saved(&self) -> Option<StateSnapshot> {
        self.snapshot.borrow().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StateResult<StateSnapshot> {
        Ok(self.snapshot.borrow().clone().unwrap_or_default())
    }

    fn load_required(&self) -> StateResult<StateSnapshot> {
        self.snapshot
            .borrow()
            .clone()
            .ok_or_else(|| StateError::Missing(PathBuf::from("<memory>")))
    }

    fn save(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        *self.snapshot.borrow_mut() = Some(snapshot.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}
