//! # Mirror
//! The client-local copy of a remote collection's current result set.
//!
//! State machine: `Uninitialized -> Loading -> Ready`. Every load moves the mirror back to
//! `Loading`; both success and failure end in `Ready`. A failed load keeps the last good rows.
//!
//! Loads are numbered. Only the most recently issued load may commit its rows, so an older
//! response that arrives late can never overwrite a newer one.

use im::Vector;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorState {
    Uninitialized,
    Loading,
    Ready,
}

/// The epoch of one load request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

impl std::fmt::Display for LoadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Enough information to revert one optimistic change.
#[derive(Clone, Debug)]
pub struct Undo<Row> {
    epoch: u64,
    id: String,
    index: usize,
    previous: Row,
    removed: bool,
}

#[derive(Clone)]
pub struct Mirror<Row> {
    rows: Vector<Row>,
    state: MirrorState,
    issued: u64,
    committed: u64,
    dirty: bool,
    id_of: fn(&Row) -> &str,
}

impl<Row: Clone> Mirror<Row> {
    pub fn new(id_of: fn(&Row) -> &str) -> Self {
        Self {
            rows: Vector::new(),
            state: MirrorState::Uninitialized,
            issued: 0,
            committed: 0,
            dirty: false,
            id_of,
        }
    }

    pub fn state(&self) -> MirrorState {
        self.state
    }

    /// A cheap snapshot of the current rows.
    pub fn rows(&self) -> Vector<Row> {
        self.rows.clone()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.iter().find(|row| (self.id_of)(row) == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| (self.id_of)(row) == id)
    }

    pub fn begin_load(&mut self) -> LoadTicket {
        self.issued += 1;
        if self.state != MirrorState::Loading {
            self.state = MirrorState::Loading;
            self.dirty = true;
        }
        LoadTicket(self.issued)
    }

    /// Replace the mirror wholesale, if `ticket` is still the newest load.
    pub fn commit(&mut self, ticket: LoadTicket, rows: impl IntoIterator<Item = Row>) -> bool {
        if ticket.0 != self.issued {
            log::debug!(
                "Dropping stale load {ticket}, newest is #{}",
                self.issued
            );
            return false;
        }
        self.rows = rows.into_iter().collect();
        self.committed = ticket.0;
        self.state = MirrorState::Ready;
        self.dirty = true;
        true
    }

    /// Record that a load failed. The previous rows stay in place.
    pub fn fail(&mut self, ticket: LoadTicket) -> bool {
        if ticket.0 != self.issued {
            return false;
        }
        self.state = MirrorState::Ready;
        self.dirty = true;
        true
    }

    /// Put a fully known row at the head of the mirror, replacing any row with the same id.
    pub fn insert_front(&mut self, row: Row) {
        let id = (self.id_of)(&row).to_string();
        if let Some(index) = self.position(&id) {
            self.rows.remove(index);
        }
        self.rows.push_front(row);
        self.dirty = true;
    }

    pub fn replace(&mut self, id: &str, row: Row) -> Option<Undo<Row>> {
        let index = self.position(id)?;
        let previous = self.rows.set(index, row);
        self.dirty = true;
        Some(self.undo(id, index, previous, false))
    }

    pub fn modify(&mut self, id: &str, f: impl FnOnce(&mut Row)) -> Option<Undo<Row>> {
        let index = self.position(id)?;
        let previous = self.rows.get(index)?.clone();
        if let Some(row) = self.rows.get_mut(index) {
            f(row);
        }
        self.dirty = true;
        Some(self.undo(id, index, previous, false))
    }

    pub fn remove(&mut self, id: &str) -> Option<Undo<Row>> {
        let index = self.position(id)?;
        let previous = self.rows.remove(index);
        self.dirty = true;
        Some(self.undo(id, index, previous, true))
    }

    fn undo(&self, id: &str, index: usize, previous: Row, removed: bool) -> Undo<Row> {
        Undo {
            epoch: self.committed,
            id: id.to_string(),
            index,
            previous,
            removed,
        }
    }

    /// Revert an optimistic change. Does nothing if a load has committed since the change was
    /// made, because the loaded rows are newer than anything the undo could restore.
    pub fn rollback(&mut self, undo: Undo<Row>) -> bool {
        if undo.epoch != self.committed {
            log::debug!(
                "Not rolling back `{}`: the mirror was reloaded in the meantime",
                undo.id
            );
            return false;
        }
        match (undo.removed, self.position(&undo.id)) {
            (true, None) => {
                let index = undo.index.min(self.rows.len());
                self.rows.insert(index, undo.previous);
            }
            (false, Some(index)) => {
                self.rows.set(index, undo.previous);
            }
            _ => return false,
        }
        self.dirty = true;
        true
    }

    /// Whether anything changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

impl<Row: std::fmt::Debug + Clone> std::fmt::Debug for Mirror<Row> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("state", &self.state)
            .field("issued", &self.issued)
            .field("committed", &self.committed)
            .field("rows", &self.rows)
            .finish()
    }
}
