use crate::schema::QualName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identity of a stored entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        EntityId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An instance of a concept with its attribute values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub concept: QualName,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(concept: QualName) -> Self {
        Self {
            id: EntityId::new(),
            concept,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Addresses the targets of one link on one source entity.
///
/// Used for lazy loading: the targets are only fetched when the session is
/// asked to resolve the reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRef {
    pub source: EntityId,
    pub link: QualName,
}

impl LinkRef {
    pub fn new(source: EntityId, link: QualName) -> Self {
        Self { source, link }
    }
}

/// A single source -> target edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRecord {
    pub source: EntityId,
    pub link: QualName,
    pub target: EntityId,
}

impl LinkRecord {
    pub fn new(source: EntityId, link: QualName, target: EntityId) -> Self {
        Self { source, link, target }
    }
}

/// Batch lifecycle
///
/// ```text
/// Pending ──start──> Started ──commit──> Committed
///                       │                    │
///                       └───────close────────┴──> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Started,
    Committed,
    Closed,
}

/// A group of entity and link writes submitted together
#[derive(Debug, Clone)]
pub struct Batch {
    id: Uuid,
    state: BatchState,
    pub(crate) entities: Vec<Entity>,
    pub(crate) links: Vec<LinkRecord>,
}

impl Batch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: BatchState::Pending,
            entities: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: BatchState) {
        self.state = state;
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn links(&self) -> &[LinkRecord] {
        &self.links
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.links.is_empty()
    }

    pub(crate) fn take_contents(&mut self) -> (Vec<Entity>, Vec<LinkRecord>) {
        (
            std::mem::take(&mut self.entities),
            std::mem::take(&mut self.links),
        )
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}
