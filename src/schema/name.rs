use crate::core::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static::lazy_static! {
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid");
    static ref QUALIFIED: Regex =
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)$")
            .expect("qualified name pattern is valid");
}

/// Check that `name` is a bare identifier usable as a module name
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidName(name.to_string()))
    }
}

/// Module-qualified schema name, written `module.Name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualName {
    module: String,
    name: String,
}

impl QualName {
    pub fn new(module: &str, name: &str) -> Result<Self, SchemaError> {
        validate_identifier(module)
            .and_then(|_| validate_identifier(name))
            .map_err(|_| SchemaError::InvalidName(format!("{}.{}", module, name)))?;

        Ok(Self {
            module: module.to_string(),
            name: name.to_string(),
        })
    }

    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let caps = QUALIFIED
            .captures(s)
            .ok_or_else(|| SchemaError::InvalidName(s.to_string()))?;

        Ok(Self {
            module: caps[1].to_string(),
            name: caps[2].to_string(),
        })
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QualName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

impl FromStr for QualName {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for QualName {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QualName> for String {
    fn from(value: QualName) -> Self {
        value.to_string()
    }
}
