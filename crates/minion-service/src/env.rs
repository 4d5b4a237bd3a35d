//! Environment variables every managed service receives, whatever the command.

use std::path::PathBuf;

use crate::error::ServiceError;

/// Identifier of the service being invoked.
pub const SERVICE_ID: &str = "SERVICE_ID";
/// Source locator the service was installed from.
pub const SERVICE_URL: &str = "SERVICE_URL";
/// Absolute path of the service directory (also the working directory).
pub const SERVICE_PATH: &str = "SERVICE_PATH";
/// Root directory of the supervisor.
pub const MINION_ROOT: &str = "MINION_ROOT";
/// Directory holding operator-provided configuration files.
pub const CONFIG_PATH: &str = "CONFIG_PATH";
/// Executable search path, augmented by the supervisor.
pub const PATH: &str = "PATH";

/// The environment contract, decoded on the managed-service side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub id: String,
    pub source_locator: String,
    pub service_path: PathBuf,
    pub root: PathBuf,
    pub config_path: PathBuf,
}

impl ServiceContext {
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the context from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let require = |key: &'static str| lookup(key).ok_or(ServiceError::MissingEnv(key));
        Ok(Self {
            id: require(SERVICE_ID)?,
            source_locator: require(SERVICE_URL)?,
            service_path: require(SERVICE_PATH)?.into(),
            root: require(MINION_ROOT)?.into(),
            config_path: require(CONFIG_PATH)?.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars() -> HashMap<&'static str, String> {
        HashMap::from([
            (SERVICE_ID, "echo".to_string()),
            (SERVICE_URL, "example/echo-service".to_string()),
            (SERVICE_PATH, "/srv/minion/svc/echo".to_string()),
            (MINION_ROOT, "/srv/minion".to_string()),
            (CONFIG_PATH, "/srv/minion/etc".to_string()),
        ])
    }

    #[test]
    fn decodes_full_contract() {
        let vars = vars();
        let ctx = ServiceContext::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(ctx.id, "echo");
        assert_eq!(ctx.source_locator, "example/echo-service");
        assert_eq!(ctx.service_path, PathBuf::from("/srv/minion/svc/echo"));
        assert_eq!(ctx.config_path, PathBuf::from("/srv/minion/etc"));
    }

    #[test]
    fn reports_missing_variable() {
        let mut vars = vars();
        vars.remove(CONFIG_PATH);
        let err = ServiceContext::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        assert!(matches!(err, ServiceError::MissingEnv(CONFIG_PATH)));
    }
}
