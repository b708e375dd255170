pub mod meta;
pub mod name;
pub mod realm;

pub use meta::{BUILTIN_MODULE, Cardinality, ConceptDef, LinkDef, RealmMeta};
pub use name::QualName;
pub use realm::{MetaCell, Realm};
