//! The [`BufferStore`]: named buffers, their histories, and CPU mirrors.

use std::sync::Arc;

use indexmap::IndexMap;
use kairos_core::{BufferHandle, StoreError, Tensor};

use crate::history::History;

/// One registered buffer.
#[derive(Clone, Debug)]
struct Slot {
    name: String,
    current: Tensor,
    history: History,
    mirror: Option<Arc<Tensor>>,
    mirror_requested: bool,
}

impl Slot {
    fn new(name: String, current: Tensor) -> Self {
        Self {
            name,
            current,
            history: History::default(),
            mirror: None,
            mirror_requested: false,
        }
    }
}

/// Owner of every named buffer in a problem.
///
/// Buffers live in a slot arena indexed by [`BufferHandle`]. A name is
/// resolved to a handle once; registering further buffers appends slots
/// and never invalidates existing handles. The name index is an
/// `IndexMap`, so iteration (rotation, mirror refresh, checkpoints)
/// follows registration order.
#[derive(Debug, Default)]
pub struct BufferStore {
    slots: Vec<Slot>,
    index: IndexMap<String, BufferHandle>,
}

impl BufferStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an undefined (empty) buffer.
    pub fn register(&mut self, name: &str) -> Result<BufferHandle, StoreError> {
        self.register_with(name, Tensor::empty())
    }

    /// Register a buffer with an initial value.
    pub fn register_with(&mut self, name: &str, value: Tensor) -> Result<BufferHandle, StoreError> {
        if self.index.contains_key(name) {
            return Err(StoreError::DuplicateBuffer { name: name.into() });
        }
        Ok(self.insert_slot(name, value))
    }

    fn insert_slot(&mut self, name: &str, value: Tensor) -> BufferHandle {
        let handle = BufferHandle(self.slots.len() as u32);
        self.slots.push(Slot::new(name.to_owned(), value));
        self.index.insert(name.to_owned(), handle);
        tracing::trace!(buffer = name, %handle, "buffer registered");
        handle
    }

    /// Handle for a registered name, registering an empty buffer if absent.
    pub fn handle_or_register(&mut self, name: &str) -> BufferHandle {
        match self.index.get(name) {
            Some(&h) => h,
            None => self.insert_slot(name, Tensor::empty()),
        }
    }

    /// Resolve a name to its handle.
    pub fn handle(&self, name: &str) -> Result<BufferHandle, StoreError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::UnknownBuffer { name: name.into() })
    }

    /// Whether a buffer with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no buffers are registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.index.keys().map(String::as_str)
    }

    fn slot(&self, h: BufferHandle) -> Result<&Slot, StoreError> {
        self.slots
            .get(h.index())
            .ok_or(StoreError::UnknownHandle { handle: h })
    }

    fn slot_mut(&mut self, h: BufferHandle) -> Result<&mut Slot, StoreError> {
        self.slots
            .get_mut(h.index())
            .ok_or(StoreError::UnknownHandle { handle: h })
    }

    /// Name of the buffer behind a handle.
    pub fn name(&self, h: BufferHandle) -> Result<&str, StoreError> {
        self.slot(h).map(|s| s.name.as_str())
    }

    /// Mutable access to the current value of a named buffer.
    pub fn current(&mut self, name: &str) -> Result<&mut Tensor, StoreError> {
        let h = self.handle(name)?;
        self.get_mut(h)
    }

    /// Current value behind a handle.
    pub fn get(&self, h: BufferHandle) -> Result<&Tensor, StoreError> {
        self.slot(h).map(|s| &s.current)
    }

    /// Mutable current value behind a handle.
    pub fn get_mut(&mut self, h: BufferHandle) -> Result<&mut Tensor, StoreError> {
        self.slot_mut(h).map(|s| &mut s.current)
    }

    /// Replace the current value, enforcing the established shape.
    ///
    /// An undefined buffer accepts any shape.
    pub fn set(&mut self, h: BufferHandle, value: Tensor) -> Result<(), StoreError> {
        let slot = self.slot_mut(h)?;
        if slot.current.is_defined() && !slot.current.same_shape(&value) {
            return Err(StoreError::ShapeMismatch {
                name: slot.name.clone(),
                expected: slot.current.shape().to_vec(),
                actual: value.shape().to_vec(),
            });
        }
        slot.current = value;
        Ok(())
    }

    /// Borrow one buffer for reading and another for writing.
    pub fn read_write(
        &mut self,
        read: BufferHandle,
        write: BufferHandle,
    ) -> Result<(&Tensor, &mut Tensor), StoreError> {
        self.slot(read)?;
        self.slot(write)?;
        if read == write {
            return Err(StoreError::AliasedAccess {
                name: self.slots[read.index()].name.clone(),
            });
        }
        let (r, w) = (read.index(), write.index());
        if r < w {
            let (lo, hi) = self.slots.split_at_mut(w);
            Ok((&lo[r].current, &mut hi[0].current))
        } else {
            let (lo, hi) = self.slots.split_at_mut(r);
            Ok((&hi[0].current, &mut lo[w].current))
        }
    }

    /// Run `f` with the current value of `write` checked out mutably and
    /// a shared view of the rest of the store.
    ///
    /// While `f` runs, reading `write` through the store view yields an
    /// empty tensor; read the previous value through the `&mut Tensor`.
    pub fn with_output<R>(
        &mut self,
        write: BufferHandle,
        f: impl FnOnce(&mut Tensor, &BufferStore) -> R,
    ) -> Result<R, StoreError> {
        let mut out = std::mem::take(&mut self.slot_mut(write)?.current);
        let result = f(&mut out, self);
        self.slots[write.index()].current = out;
        Ok(result)
    }

    // ── History ─────────────────────────────────────────────────

    /// History of a named buffer with at least `requested_depth` capacity.
    ///
    /// Registers the buffer if it does not exist yet and grows capacity to
    /// `max(existing, requested_depth)`. Never shrinks.
    pub fn history(&mut self, name: &str, requested_depth: usize) -> &History {
        let h = self.request_history(name, requested_depth);
        &self.slots[h.index()].history
    }

    /// Handle-returning form of [`history`](Self::history), for consumers
    /// that keep the handle and read the history on every step.
    pub fn request_history(&mut self, name: &str, requested_depth: usize) -> BufferHandle {
        let h = self.handle_or_register(name);
        let slot = &mut self.slots[h.index()];
        let before = slot.history.capacity();
        let after = slot.history.grow(requested_depth);
        if after != before {
            tracing::trace!(buffer = name, from = before, to = after, "history capacity grown");
        }
        h
    }

    /// History behind a handle.
    pub fn history_of(&self, h: BufferHandle) -> Result<&History, StoreError> {
        self.slot(h).map(|s| &s.history)
    }

    /// Push the current value of a named buffer onto its history.
    pub fn rotate(&mut self, name: &str) -> Result<(), StoreError> {
        let h = self.handle(name)?;
        self.rotate_handle(h)
    }

    /// Push the current value behind a handle onto its history.
    pub fn rotate_handle(&mut self, h: BufferHandle) -> Result<(), StoreError> {
        let slot = self.slot_mut(h)?;
        let value = slot.current.clone();
        slot.history.push(value);
        Ok(())
    }

    /// Rotate every buffer with non-zero history capacity.
    ///
    /// Returns the longest resulting history.
    pub fn rotate_all(&mut self) -> usize {
        let mut longest = 0;
        for slot in &mut self.slots {
            if slot.history.capacity() == 0 {
                continue;
            }
            let value = slot.current.clone();
            slot.history.push(value);
            longest = longest.max(slot.history.len());
        }
        longest
    }

    /// Drop all committed history, keeping capacities.
    pub fn clear_histories(&mut self) {
        for slot in &mut self.slots {
            slot.history.clear();
        }
    }

    // ── Mirrors ─────────────────────────────────────────────────

    /// Read-only mirror of a named buffer, created from the current value
    /// on first request. Later refreshes happen in
    /// [`refresh_mirrors`](Self::refresh_mirrors).
    pub fn cpu_mirror(&mut self, name: &str) -> Result<Arc<Tensor>, StoreError> {
        let h = self.handle(name)?;
        self.request_mirror(h)?;
        let slot = &mut self.slots[h.index()];
        let mirror = match &slot.mirror {
            Some(m) => Arc::clone(m),
            None => {
                let m = Arc::new(slot.current.clone());
                slot.mirror = Some(Arc::clone(&m));
                m
            }
        };
        Ok(mirror)
    }

    /// Mark a buffer as mirrored without materializing the mirror yet.
    pub fn request_mirror(&mut self, h: BufferHandle) -> Result<(), StoreError> {
        self.slot_mut(h)?.mirror_requested = true;
        Ok(())
    }

    /// Latest mirror snapshot behind a handle, if one has been taken.
    pub fn mirror(&self, h: BufferHandle) -> Result<Option<Arc<Tensor>>, StoreError> {
        self.slot(h).map(|s| s.mirror.clone())
    }

    /// Snapshot every mirrored buffer. Returns how many were refreshed.
    ///
    /// Each refresh replaces the `Arc`, so readers still holding the
    /// previous snapshot keep a consistent point-in-time value.
    pub fn refresh_mirrors(&mut self) -> usize {
        let mut refreshed = 0;
        for slot in self.slots.iter_mut().filter(|s| s.mirror_requested) {
            slot.mirror = Some(Arc::new(slot.current.clone()));
            refreshed += 1;
        }
        refreshed
    }

    /// `(name, snapshot)` for every mirrored buffer with a snapshot.
    pub fn mirrors(&self) -> impl Iterator<Item = (&str, Arc<Tensor>)> + '_ {
        self.slots
            .iter()
            .filter_map(|s| s.mirror.as_ref().map(|m| (s.name.as_str(), Arc::clone(m))))
    }

    // ── Checkpoints ─────────────────────────────────────────────

    /// Capture current values and histories of all registered buffers.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            entries: self
                .slots
                .iter()
                .map(|s| (s.current.clone(), s.history.clone()))
                .collect(),
        }
    }

    /// Roll back to a checkpoint.
    ///
    /// Buffers registered after the checkpoint was taken are left as is.
    /// History capacities keep their grown values.
    pub fn restore(&mut self, checkpoint: &Checkpoint) {
        for (slot, (current, history)) in self.slots.iter_mut().zip(&checkpoint.entries) {
            slot.current.assign(current);
            let capacity = slot.history.capacity();
            slot.history = history.clone();
            slot.history.grow(capacity);
        }
    }
}

/// Saved buffer state for rolling back a failed step.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    entries: Vec<(Tensor, History)>,
}

impl Checkpoint {
    /// Number of buffers captured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the checkpoint captured no buffers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
