use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Service ids double as directory names, so they are restricted to a
/// filesystem-safe alphabet.
static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").expect("static id pattern compiles")
});

/// The persisted record identifying one managed service.
///
/// Written to `service.json` in the service directory at install time and
/// read back at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Stable registry key (e.g. "echo")
    pub id: String,
    /// Where the build step fetches source or binaries from
    #[serde(rename = "sourceLocator", alias = "url")]
    pub source_locator: String,
    /// Install parameters handed to the service's `install` command
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, source_locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_locator: source_locator.into(),
            params: empty_params(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Reject descriptors that cannot be installed safely.
    pub fn validate(&self) -> Result<(), ControlError> {
        validate_id(&self.id)?;
        if self.source_locator.trim().is_empty() {
            return Err(ControlError::InvalidDescriptor(format!(
                "{}: source locator is empty",
                self.id
            )));
        }
        if !(self.params.is_object() || self.params.is_null()) {
            return Err(ControlError::InvalidDescriptor(format!(
                "{}: params must be a JSON object",
                self.id
            )));
        }
        Ok(())
    }
}

pub fn validate_id(id: &str) -> Result<(), ControlError> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(ControlError::InvalidDescriptor(format!(
            "invalid service id {id:?}: expected [A-Za-z0-9][A-Za-z0-9_.-]{{0,127}}"
        )))
    }
}
