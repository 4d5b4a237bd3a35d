use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use minion_service::env as contract;

use crate::descriptor::ServiceDescriptor;
use crate::layout::Layout;

/// Which parts of the supervisor's own environment leak into children.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    /// Variables copied from the supervisor environment when set.
    pub inherit: Vec<String>,
    /// Directories appended to the inherited `PATH`.
    pub extra_path: Vec<PathBuf>,
    /// Fixed variables, expanded per service. `{service_path}` and `{root}`
    /// are substituted; contract variables cannot be overridden.
    pub set: BTreeMap<String, String>,
}

impl EnvPolicy {
    pub fn for_layout(layout: &Layout) -> Self {
        Self {
            inherit: default_inherit(),
            extra_path: vec![layout.tool_bin_dir()],
            set: default_set_env(),
        }
    }
}

pub fn default_inherit() -> Vec<String> {
    vec!["HOME".into(), "USER".into(), "LANG".into()]
}

/// Go toolchain workspace for the default build step: one `GOPATH` per
/// service, a shared `GOROOT` under the supervisor root.
pub fn default_set_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("GOPATH".to_string(), "{service_path}".to_string()),
        ("GOROOT".to_string(), "{root}/go".to_string()),
    ])
}

const CONTRACT_VARS: [&str; 6] = [
    contract::PATH,
    contract::SERVICE_ID,
    contract::SERVICE_URL,
    contract::SERVICE_PATH,
    contract::MINION_ROOT,
    contract::CONFIG_PATH,
];

/// The full environment of a managed process or build step.
///
/// Children start from an empty environment. The inherited allow-list is
/// applied first, then the fixed variables, then `PATH` and the contract
/// variables. Each key appears once.
pub fn service_env(
    layout: &Layout,
    policy: &EnvPolicy,
    descriptor: &ServiceDescriptor,
) -> Vec<(String, OsString)> {
    let service_dir = layout.service_dir(&descriptor.id);
    let fixed: Vec<(String, OsString)> = policy
        .set
        .iter()
        .filter(|(key, _)| !CONTRACT_VARS.contains(&key.as_str()))
        .map(|(key, template)| {
            let value = template
                .replace("{service_path}", &service_dir.to_string_lossy())
                .replace("{root}", &layout.root().to_string_lossy());
            (key.clone(), OsString::from(value))
        })
        .collect();

    let mut env: Vec<(String, OsString)> = policy
        .inherit
        .iter()
        .filter(|key| !CONTRACT_VARS.contains(&key.as_str()))
        .filter(|key| !policy.set.contains_key(key.as_str()))
        .filter_map(|key| std::env::var_os(key).map(|v| (key.clone(), v)))
        .collect();
    env.extend(fixed);

    env.push((contract::PATH.into(), search_path(policy)));
    env.push((contract::SERVICE_ID.into(), descriptor.id.clone().into()));
    env.push((
        contract::SERVICE_URL.into(),
        descriptor.source_locator.clone().into(),
    ));
    env.push((contract::SERVICE_PATH.into(), service_dir.into_os_string()));
    env.push((contract::MINION_ROOT.into(), layout.root().as_os_str().into()));
    env.push((
        contract::CONFIG_PATH.into(),
        layout.config_dir().into_os_string(),
    ));
    env
}

fn search_path(policy: &EnvPolicy) -> OsString {
    let mut path = std::env::var_os(contract::PATH).unwrap_or_default();
    for dir in &policy.extra_path {
        if !path.is_empty() {
            path.push(":");
        }
        path.push(dir.as_os_str());
    }
    path
}

/// Render the environment as a sourceable shell file.
pub fn render_env_file(env: &[(String, OsString)]) -> String {
    env.iter()
        .map(|(key, value)| format!("export {key}={}\n", shell_quote(&value.to_string_lossy())))
        .collect()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(env: &'a [(String, OsString)], key: &str) -> Option<&'a OsString> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[test]
    fn contract_variables_are_present() {
        let layout = Layout::new("/srv/minion");
        let policy = EnvPolicy::for_layout(&layout);
        let desc = ServiceDescriptor::new("echo", "example/echo-service");
        let env = service_env(&layout, &policy, &desc);

        assert_eq!(lookup(&env, "SERVICE_ID").unwrap(), "echo");
        assert_eq!(lookup(&env, "SERVICE_URL").unwrap(), "example/echo-service");
        assert_eq!(lookup(&env, "SERVICE_PATH").unwrap(), "/srv/minion/svc/echo");
        assert_eq!(lookup(&env, "MINION_ROOT").unwrap(), "/srv/minion");
        assert_eq!(lookup(&env, "CONFIG_PATH").unwrap(), "/srv/minion/etc");

        let path = lookup(&env, "PATH").unwrap().to_string_lossy().into_owned();
        assert!(path.ends_with("/srv/minion/go/bin"), "PATH was {path}");
    }

    #[test]
    fn path_is_never_inherited_twice() {
        let layout = Layout::new("/srv/minion");
        let policy = EnvPolicy {
            inherit: vec!["PATH".into()],
            extra_path: vec![],
            set: BTreeMap::new(),
        };
        let env = service_env(&layout, &policy, &ServiceDescriptor::new("echo", "x"));
        assert_eq!(env.iter().filter(|(k, _)| k == "PATH").count(), 1);
    }

    #[test]
    fn go_workspace_is_per_service() {
        let layout = Layout::new("/srv/minion");
        let policy = EnvPolicy::for_layout(&layout);
        let env = service_env(&layout, &policy, &ServiceDescriptor::new("echo", "x"));

        assert_eq!(lookup(&env, "GOPATH").unwrap(), "/srv/minion/svc/echo");
        assert_eq!(lookup(&env, "GOROOT").unwrap(), "/srv/minion/go");
    }

    #[test]
    fn fixed_variables_cannot_shadow_the_contract() {
        let layout = Layout::new("/srv/minion");
        let policy = EnvPolicy {
            inherit: vec!["HOME".into()],
            extra_path: vec![],
            set: BTreeMap::from([
                ("SERVICE_ID".to_string(), "impostor".to_string()),
                ("HOME".to_string(), "{service_path}".to_string()),
            ]),
        };
        let env = service_env(&layout, &policy, &ServiceDescriptor::new("echo", "x"));

        assert_eq!(lookup(&env, "SERVICE_ID").unwrap(), "echo");
        assert_eq!(env.iter().filter(|(k, _)| k == "SERVICE_ID").count(), 1);
        assert_eq!(env.iter().filter(|(k, _)| k == "HOME").count(), 1);
        assert_eq!(lookup(&env, "HOME").unwrap(), "/srv/minion/svc/echo");
    }

    #[test]
    fn env_file_quotes_values() {
        let env = vec![("SERVICE_URL".to_string(), OsString::from("it's/here"))];
        assert_eq!(render_env_file(&env), "export SERVICE_URL='it'\\''s/here'\n");
    }
}
