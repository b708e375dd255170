use thiserror::Error;

/// Schema-level failures raised while applying deltas or validating
/// entities against a realm.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Invalid name '{0}'")]
    InvalidName(String),

    #[error("Module '{0}' already exists")]
    ModuleExists(String),

    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Module '{module}' still has {count} definition(s)")]
    ModuleNotEmpty { module: String, count: usize },

    #[error("Concept '{0}' already exists")]
    ConceptExists(String),

    #[error("Concept '{0}' not found")]
    ConceptNotFound(String),

    #[error("Concept '{concept}' is still referenced by '{dependent}'")]
    ConceptInUse { concept: String, dependent: String },

    #[error("Link '{0}' already exists")]
    LinkExists(String),

    #[error("Link '{0}' not found")]
    LinkNotFound(String),

    #[error("Link '{link}' does not apply to concept '{concept}'")]
    LinkNotApplicable { link: String, concept: String },

    #[error("Concept '{0}' is abstract")]
    AbstractConcept(String),

    #[error("Link '{link}' allows a single target, got {count}")]
    TooManyTargets { link: String, count: usize },
}

#[derive(Error, Debug)]
pub enum RealmError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Capability '{capability}' is not supported by this backend")]
    Unsupported { capability: &'static str },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("commit() called with no open transaction")]
    TransactionUnderflow,

    #[error("Session closed with {depth} open transaction(s)")]
    OpenTransactionsOnClose { depth: usize },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Empty delta set")]
    EmptyDeltaSet,

    #[error("Delta repository error: {0}")]
    DeltaRepo(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RealmError {
    /// Whether this error marks a capability the backend does not provide,
    /// as opposed to a failure of a capability it does provide.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, RealmError::Unsupported { .. })
    }
}

pub type Result<T> = std::result::Result<T, RealmError>;

impl<T> From<std::sync::PoisonError<T>> for RealmError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for RealmError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
