// ============================================================================
// Realm Metadata
// ============================================================================
//
// In-memory schema snapshot: modules, concepts and link definitions.
// Backed by persistent `im` maps so a snapshot can be cloned in O(1) and
// mutated privately before being published.
//
// ============================================================================

use super::name::{QualName, validate_identifier};
use crate::core::SchemaError;
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};

pub const BUILTIN_MODULE: &str = "std";

/// How many targets a link may have per source.
///
/// `OneToOne` and `ManyToOne` links hold at most one target per source. The
/// source side is descriptive only: any number of sources may share a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Cardinality {
    OneToOne,
    OneToMany,
    ManyToOne,
    #[default]
    ManyToMany,
}

impl Cardinality {
    /// Whether a source may hold more than one target
    pub fn many_targets(&self) -> bool {
        matches!(self, Cardinality::OneToMany | Cardinality::ManyToMany)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDef {
    pub name: QualName,
    #[serde(default)]
    pub bases: Vec<QualName>,
    #[serde(default)]
    pub is_abstract: bool,
}

impl ConceptDef {
    pub fn new(name: QualName) -> Self {
        Self {
            name,
            bases: Vec::new(),
            is_abstract: false,
        }
    }

    pub fn with_bases(mut self, bases: Vec<QualName>) -> Self {
        self.bases = bases;
        self
    }

    pub fn abstract_(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDef {
    pub name: QualName,
    pub source: QualName,
    pub target: QualName,
    #[serde(default)]
    pub cardinality: Cardinality,
}

impl LinkDef {
    pub fn new(name: QualName, source: QualName, target: QualName) -> Self {
        Self {
            name,
            source,
            target,
            cardinality: Cardinality::default(),
        }
    }

    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }
}

/// Schema snapshot of one realm
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealmMeta {
    modules: OrdSet<String>,
    concepts: OrdMap<QualName, ConceptDef>,
    links: OrdMap<QualName, LinkDef>,
    builtins_loaded: bool,
}

impl RealmMeta {
    /// Create an empty realm, optionally preloaded with the `std` definitions
    pub fn new(load_builtins: bool) -> Self {
        let mut meta = Self::default();
        if load_builtins {
            meta.load_builtins();
        }
        meta
    }

    fn load_builtins(&mut self) {
        let object = builtin("Object");
        self.modules.insert(BUILTIN_MODULE.to_string());
        self.concepts
            .insert(object.clone(), ConceptDef::new(object.clone()).abstract_());
        let related = builtin("related");
        self.links.insert(
            related.clone(),
            LinkDef::new(related, object.clone(), object),
        );
        self.builtins_loaded = true;
    }

    pub fn builtins_loaded(&self) -> bool {
        self.builtins_loaded
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty() && self.concepts.is_empty() && self.links.is_empty()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &String> {
        self.modules.iter()
    }

    pub fn concept(&self, name: &QualName) -> Option<&ConceptDef> {
        self.concepts.get(name)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &ConceptDef> {
        self.concepts.values()
    }

    pub fn link(&self, name: &QualName) -> Option<&LinkDef> {
        self.links.get(name)
    }

    pub fn links(&self) -> impl Iterator<Item = &LinkDef> {
        self.links.values()
    }

    /// Whether `concept` is `ancestor` or derives from it through its bases
    pub fn is_subconcept(&self, concept: &QualName, ancestor: &QualName) -> bool {
        let mut pending = vec![concept];
        let mut seen = OrdSet::new();

        while let Some(current) = pending.pop() {
            if current == ancestor {
                return true;
            }
            if seen.insert(current.clone()).is_some() {
                continue;
            }
            if let Some(def) = self.concepts.get(current) {
                pending.extend(def.bases.iter());
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Mutation (only reachable through delta application)
    // ------------------------------------------------------------------

    pub(crate) fn create_module(&mut self, module: &str) -> Result<(), SchemaError> {
        validate_identifier(module)?;
        if self.modules.contains(module) {
            return Err(SchemaError::ModuleExists(module.to_string()));
        }
        self.modules.insert(module.to_string());
        Ok(())
    }

    pub(crate) fn delete_module(&mut self, module: &str) -> Result<(), SchemaError> {
        if !self.modules.contains(module) {
            return Err(SchemaError::ModuleNotFound(module.to_string()));
        }

        let count = self.concepts.keys().filter(|n| n.module() == module).count()
            + self.links.keys().filter(|n| n.module() == module).count();
        if count > 0 {
            return Err(SchemaError::ModuleNotEmpty {
                module: module.to_string(),
                count,
            });
        }

        self.modules.remove(module);
        Ok(())
    }

    pub(crate) fn create_concept(&mut self, def: ConceptDef) -> Result<(), SchemaError> {
        self.require_module(&def.name)?;
        if self.concepts.contains_key(&def.name) {
            return Err(SchemaError::ConceptExists(def.name.to_string()));
        }
        for base in &def.bases {
            self.require_concept(base)?;
        }
        self.concepts.insert(def.name.clone(), def);
        Ok(())
    }

    pub(crate) fn delete_concept(&mut self, name: &QualName) -> Result<(), SchemaError> {
        self.require_concept(name)?;

        if let Some(dependent) = self
            .concepts
            .values()
            .find(|c| c.bases.contains(name))
            .map(|c| c.name.to_string())
            .or_else(|| {
                self.links
                    .values()
                    .find(|l| &l.source == name || &l.target == name)
                    .map(|l| l.name.to_string())
            })
        {
            return Err(SchemaError::ConceptInUse {
                concept: name.to_string(),
                dependent,
            });
        }

        self.concepts.remove(name);
        Ok(())
    }

    pub(crate) fn set_concept_bases(
        &mut self,
        name: &QualName,
        bases: Vec<QualName>,
    ) -> Result<(), SchemaError> {
        self.require_concept(name)?;
        for base in &bases {
            self.require_concept(base)?;
            if self.is_subconcept(base, name) {
                return Err(SchemaError::ConceptInUse {
                    concept: name.to_string(),
                    dependent: base.to_string(),
                });
            }
        }
        if let Some(def) = self.concepts.get_mut(name) {
            def.bases = bases;
        }
        Ok(())
    }

    pub(crate) fn create_link(&mut self, def: LinkDef) -> Result<(), SchemaError> {
        self.require_module(&def.name)?;
        if self.links.contains_key(&def.name) {
            return Err(SchemaError::LinkExists(def.name.to_string()));
        }
        self.require_concept(&def.source)?;
        self.require_concept(&def.target)?;
        self.links.insert(def.name.clone(), def);
        Ok(())
    }

    pub(crate) fn delete_link(&mut self, name: &QualName) -> Result<(), SchemaError> {
        self.links
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchemaError::LinkNotFound(name.to_string()))
    }

    fn require_module(&self, name: &QualName) -> Result<(), SchemaError> {
        if self.modules.contains(name.module()) {
            Ok(())
        } else {
            Err(SchemaError::ModuleNotFound(name.module().to_string()))
        }
    }

    fn require_concept(&self, name: &QualName) -> Result<(), SchemaError> {
        if self.concepts.contains_key(name) {
            Ok(())
        } else {
            Err(SchemaError::ConceptNotFound(name.to_string()))
        }
    }
}

fn builtin(name: &str) -> QualName {
    QualName::new(BUILTIN_MODULE, name).expect("builtin names are valid identifiers")
}
