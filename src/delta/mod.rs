// ============================================================================
// Schema Deltas
// ============================================================================
//
// A delta is an identified, ordered list of schema commands. Deltas are
// produced by whatever compiles schema changes, applied to a RealmMeta by a
// backend, and then handed to a DeltaRepo for persistence.
//
// ============================================================================

pub mod repo;
pub mod set;

pub use repo::{DeltaRepo, HEAD_REF, MemoryDeltaRepo};
pub use set::DeltaSet;

use crate::core::SchemaError;
use crate::schema::{ConceptDef, LinkDef, QualName, RealmMeta};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a delta
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeltaId(String);

impl DeltaId {
    pub fn new(id: impl Into<String>) -> Self {
        DeltaId(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        DeltaId(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeltaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeltaId {
    fn from(value: &str) -> Self {
        DeltaId(value.to_string())
    }
}

/// One schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaCommand {
    CreateModule { name: String },
    DeleteModule { name: String },
    CreateConcept(ConceptDef),
    DeleteConcept { name: QualName },
    AlterConceptBases { name: QualName, bases: Vec<QualName> },
    CreateLink(LinkDef),
    DeleteLink { name: QualName },
}

impl DeltaCommand {
    fn apply(&self, meta: &mut RealmMeta) -> Result<(), SchemaError> {
        match self {
            DeltaCommand::CreateModule { name } => meta.create_module(name),
            DeltaCommand::DeleteModule { name } => meta.delete_module(name),
            DeltaCommand::CreateConcept(def) => meta.create_concept(def.clone()),
            DeltaCommand::DeleteConcept { name } => meta.delete_concept(name),
            DeltaCommand::AlterConceptBases { name, bases } => {
                meta.set_concept_bases(name, bases.clone())
            }
            DeltaCommand::CreateLink(def) => meta.create_link(def.clone()),
            DeltaCommand::DeleteLink { name } => meta.delete_link(name),
        }
    }
}

/// Identified, immutable sequence of schema commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    id: DeltaId,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    commands: Vec<DeltaCommand>,
}

impl Delta {
    /// Create a delta with a generated id
    pub fn new(commands: Vec<DeltaCommand>) -> Self {
        Self::with_id(DeltaId::generate(), commands)
    }

    pub fn with_id(id: impl Into<DeltaId>, commands: Vec<DeltaCommand>) -> Self {
        Self {
            id: id.into(),
            comment: None,
            created_at: Utc::now(),
            commands,
        }
    }

    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn id(&self) -> &DeltaId {
        &self.id
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn commands(&self) -> &[DeltaCommand] {
        &self.commands
    }

    /// Apply every command in order.
    ///
    /// Stops at the first failing command; `meta` may then hold the effects
    /// of the commands before it, so callers apply to a private copy.
    pub fn apply(&self, meta: &mut RealmMeta) -> Result<(), SchemaError> {
        for command in &self.commands {
            command.apply(meta)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qn(s: &str) -> QualName {
        QualName::parse(s).unwrap()
    }

    #[test]
    fn test_apply_in_order() {
        let delta = Delta::with_id(
            "init",
            vec![
                DeltaCommand::CreateModule { name: "shop".into() },
                DeltaCommand::CreateConcept(ConceptDef::new(qn("shop.Item"))),
                DeltaCommand::CreateConcept(ConceptDef::new(qn("shop.Order"))),
                DeltaCommand::CreateLink(LinkDef::new(
                    qn("shop.items"),
                    qn("shop.Order"),
                    qn("shop.Item"),
                )),
            ],
        );

        let mut meta = RealmMeta::new(false);
        delta.apply(&mut meta).unwrap();

        assert!(meta.has_module("shop"));
        assert_eq!(meta.concepts().count(), 2);
        assert_eq!(meta.link(&qn("shop.items")).unwrap().target, qn("shop.Item"));
    }

    #[test]
    fn test_apply_reports_first_failure() {
        let delta = Delta::with_id(
            "bad",
            vec![
                DeltaCommand::CreateModule { name: "shop".into() },
                DeltaCommand::DeleteConcept { name: qn("shop.Missing") },
                DeltaCommand::CreateModule { name: "never".into() },
            ],
        );

        let mut meta = RealmMeta::new(false);
        let err = delta.apply(&mut meta).unwrap_err();

        assert_eq!(err, SchemaError::ConceptNotFound("shop.Missing".into()));
        assert!(!meta.has_module("never"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = Delta::new(Vec::new());
        let b = Delta::new(Vec::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_json_shape() {
        let delta = Delta::with_id(
            "m1",
            vec![DeltaCommand::CreateModule { name: "shop".into() }],
        )
        .with_comment("bootstrap");

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["id"], "m1");
        assert_eq!(json["comment"], "bootstrap");
        assert_eq!(json["commands"][0]["CreateModule"]["name"], "shop");
    }
}
