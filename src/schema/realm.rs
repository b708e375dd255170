use super::meta::RealmMeta;
use crate::core::Result;
use std::sync::{Arc, RwLock};

/// Copy-on-write holder for the published schema snapshot.
///
/// Readers clone the inner `Arc` and never block a writer for longer than
/// the pointer swap.
#[derive(Debug, Clone)]
pub struct MetaCell {
    current: Arc<RwLock<Arc<RealmMeta>>>,
}

impl MetaCell {
    pub fn new(meta: RealmMeta) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(meta))),
        }
    }

    /// Current published snapshot
    pub fn snapshot(&self) -> Result<Arc<RealmMeta>> {
        Ok(self.current.read()?.clone())
    }

    /// Replace the published snapshot
    pub(crate) fn publish(&self, meta: RealmMeta) -> Result<()> {
        *self.current.write()? = Arc::new(meta);
        Ok(())
    }

    fn ptr_eq(&self, other: &MetaCell) -> bool {
        Arc::ptr_eq(&self.current, &other.current)
    }
}

/// Named handle on a schema scope.
///
/// Sessions hold a realm to validate writes against the schema that is
/// current at the time of the call.
#[derive(Debug, Clone)]
pub struct Realm {
    name: String,
    meta: MetaCell,
}

impl Realm {
    pub fn new(name: &str, meta: MetaCell) -> Self {
        Self {
            name: name.to_string(),
            meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> Result<Arc<RealmMeta>> {
        self.meta.snapshot()
    }

    /// Whether both handles observe the same schema cell
    pub fn shares_meta_with(&self, other: &Realm) -> bool {
        self.meta.ptr_eq(&other.meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_publish() {
        let cell = MetaCell::new(RealmMeta::new(false));
        let before = cell.snapshot().unwrap();

        cell.publish(RealmMeta::new(true)).unwrap();

        assert!(!before.builtins_loaded());
        assert!(cell.snapshot().unwrap().builtins_loaded());
    }

    #[test]
    fn test_realm_shares_cell() {
        let cell = MetaCell::new(RealmMeta::new(false));
        let a = Realm::new("default", cell.clone());
        let b = Realm::new("other", cell);
        let c = Realm::new("default", MetaCell::new(RealmMeta::new(false)));

        assert!(a.shares_meta_with(&b));
        assert!(!a.shares_meta_with(&c));
    }
}
