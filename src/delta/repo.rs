use super::{Delta, DeltaId, DeltaSet};
use crate::core::{RealmError, Result};
use std::collections::{BTreeMap, HashMap};

/// Reference name that tracks the most recently applied delta
pub const HEAD_REF: &str = "HEAD";

/// Persistent store of applied deltas and named references to them
pub trait DeltaRepo: Send {
    /// Persist one delta. Ids are unique within a repository.
    fn write_delta(&mut self, delta: &Delta) -> Result<()>;

    /// Point reference `name` at an already written delta
    fn update_delta_ref(&mut self, name: &str, id: &DeltaId) -> Result<()>;

    fn get_delta_ref(&self, name: &str) -> Result<Option<DeltaId>>;

    fn load_delta(&self, id: &DeltaId) -> Result<Option<Delta>>;

    /// All written deltas, in write order
    fn history(&self) -> Result<Vec<Delta>>;

    /// Persist every delta of `deltas` and move `ref_name` to the last one.
    ///
    /// The default writes one delta at a time; repositories that can replace
    /// their state atomically override this to write the whole set at once.
    fn write_delta_set(&mut self, deltas: &DeltaSet, ref_name: &str) -> Result<()> {
        for delta in deltas {
            self.write_delta(delta)?;
        }
        if let Some(id) = deltas.head_id() {
            self.update_delta_ref(ref_name, id)?;
        }
        Ok(())
    }

    /// History up to and including the delta `ref_name` points at.
    ///
    /// Empty when the reference is unset.
    fn history_to_ref(&self, ref_name: &str) -> Result<Vec<Delta>> {
        let Some(target) = self.get_delta_ref(ref_name)? else {
            return Ok(Vec::new());
        };

        let mut history = self.history()?;
        let position = history
            .iter()
            .position(|d| d.id() == &target)
            .ok_or_else(|| {
                RealmError::DeltaRepo(format!(
                    "reference '{}' points at unknown delta '{}'",
                    ref_name, target
                ))
            })?;
        history.truncate(position + 1);
        Ok(history)
    }
}

/// Ordered delta log with named references, shared by the in-memory repo and
/// the file-backed repo's on-disk state.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeltaLog {
    deltas: Vec<Delta>,
    index: HashMap<DeltaId, usize>,
    refs: BTreeMap<String, DeltaId>,
}

impl DeltaLog {
    pub(crate) fn from_parts(deltas: Vec<Delta>, refs: BTreeMap<String, DeltaId>) -> Result<Self> {
        let mut log = Self::default();
        for delta in deltas {
            log.append(delta)?;
        }
        for (name, id) in refs {
            log.set_ref(&name, &id)?;
        }
        Ok(log)
    }

    pub(crate) fn append(&mut self, delta: Delta) -> Result<()> {
        if self.index.contains_key(delta.id()) {
            return Err(RealmError::DeltaRepo(format!(
                "delta '{}' already written",
                delta.id()
            )));
        }
        self.index.insert(delta.id().clone(), self.deltas.len());
        self.deltas.push(delta);
        Ok(())
    }

    /// Append every delta of `deltas` and move `ref_name` to the last one.
    /// Callers run this on a copy when the set must land as a whole.
    pub(crate) fn append_set(&mut self, deltas: &DeltaSet, ref_name: &str) -> Result<()> {
        for delta in deltas {
            self.append(delta.clone())?;
        }
        if let Some(id) = deltas.head_id() {
            self.set_ref(ref_name, id)?;
        }
        Ok(())
    }

    pub(crate) fn set_ref(&mut self, name: &str, id: &DeltaId) -> Result<()> {
        if !self.index.contains_key(id) {
            return Err(RealmError::NotFound(format!("delta '{}'", id)));
        }
        self.refs.insert(name.to_string(), id.clone());
        Ok(())
    }

    pub(crate) fn get_ref(&self, name: &str) -> Option<&DeltaId> {
        self.refs.get(name)
    }

    pub(crate) fn get(&self, id: &DeltaId) -> Option<&Delta> {
        self.index.get(id).map(|&pos| &self.deltas[pos])
    }

    pub(crate) fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    pub(crate) fn refs(&self) -> &BTreeMap<String, DeltaId> {
        &self.refs
    }
}

/// Delta repository kept entirely in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDeltaRepo {
    log: DeltaLog,
}

impl MemoryDeltaRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.deltas().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.deltas().is_empty()
    }
}

impl DeltaRepo for MemoryDeltaRepo {
    fn write_delta(&mut self, delta: &Delta) -> Result<()> {
        self.log.append(delta.clone())
    }

    fn update_delta_ref(&mut self, name: &str, id: &DeltaId) -> Result<()> {
        self.log.set_ref(name, id)
    }

    fn get_delta_ref(&self, name: &str) -> Result<Option<DeltaId>> {
        Ok(self.log.get_ref(name).cloned())
    }

    fn load_delta(&self, id: &DeltaId) -> Result<Option<Delta>> {
        Ok(self.log.get(id).cloned())
    }

    fn history(&self) -> Result<Vec<Delta>> {
        Ok(self.log.deltas().to_vec())
    }

    fn write_delta_set(&mut self, deltas: &DeltaSet, ref_name: &str) -> Result<()> {
        let mut next = self.log.clone();
        next.append_set(deltas, ref_name)?;
        self.log = next;
        Ok(())
    }
}
