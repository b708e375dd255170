use super::{Delta, DeltaId};
use crate::core::SchemaError;
use crate::schema::RealmMeta;
use serde::{Deserialize, Serialize};

/// Ordered group of deltas applied as one unit.
///
/// A bare `Delta` converts into a singleton set, which is how backends
/// accept either shape through one entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaSet {
    deltas: Vec<Delta>,
}

impl DeltaSet {
    pub fn new(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }

    pub fn push(&mut self, delta: Delta) {
        self.deltas.push(delta);
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Iterate in application order
    pub fn iter(&self) -> std::slice::Iter<'_, Delta> {
        self.deltas.iter()
    }

    pub fn first(&self) -> Option<&Delta> {
        self.deltas.first()
    }

    pub fn last(&self) -> Option<&Delta> {
        self.deltas.last()
    }

    /// Id the HEAD reference moves to once this set is applied
    pub fn head_id(&self) -> Option<&DeltaId> {
        self.last().map(Delta::id)
    }

    pub fn as_slice(&self) -> &[Delta] {
        &self.deltas
    }

    /// Apply every delta in order
    pub fn apply(&self, meta: &mut RealmMeta) -> Result<(), SchemaError> {
        for delta in &self.deltas {
            delta.apply(meta)?;
        }
        Ok(())
    }
}

impl From<Delta> for DeltaSet {
    fn from(delta: Delta) -> Self {
        Self {
            deltas: vec![delta],
        }
    }
}

impl From<Vec<Delta>> for DeltaSet {
    fn from(deltas: Vec<Delta>) -> Self {
        Self { deltas }
    }
}

impl FromIterator<Delta> for DeltaSet {
    fn from_iter<I: IntoIterator<Item = Delta>>(iter: I) -> Self {
        Self {
            deltas: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for DeltaSet {
    type Item = Delta;
    type IntoIter = std::vec::IntoIter<Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeltaSet {
    type Item = &'a Delta;
    type IntoIter = std::slice::Iter<'a, Delta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.iter()
    }
}
