use std::sync::Arc;

use minion_core::{ControlError, ControlPlane, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error returned to callers: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: String,
    pub message: String,
}

impl RpcError {
    pub fn unknown_method(method: &str) -> Self {
        Self {
            kind: "unknown_method".into(),
            message: format!("unknown method {method:?}"),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_params".into(),
            message: message.into(),
        }
    }
}

impl From<ControlError> for RpcError {
    fn from(e: ControlError) -> Self {
        let mut message = e.to_string();
        if let Some(output) = e.output().filter(|o| !o.is_empty()) {
            message.push('\n');
            message.push_str(output);
        }
        Self {
            kind: e.kind().as_str().into(),
            message,
        }
    }
}

/// Operations exposed over RPC, one per facade call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    List,
    Install,
    Remove,
    Exists,
    Status,
    Start,
    Stop,
    Stats,
}

impl Method {
    pub const ALL: [Method; 8] = [
        Method::List,
        Method::Install,
        Method::Remove,
        Method::Exists,
        Method::Status,
        Method::Start,
        Method::Stop,
        Method::Stats,
    ];

    /// Tool name on the MCP surface.
    pub fn name(self) -> &'static str {
        match self {
            Method::List => "list",
            Method::Install => "install",
            Method::Remove => "remove",
            Method::Exists => "exists",
            Method::Status => "status",
            Method::Start => "start",
            Method::Stop => "stop",
            Method::Stats => "stats",
        }
    }

    /// Method name on the RPC surface, e.g. `Service.Install`.
    pub fn rpc_name(self) -> &'static str {
        match self {
            Method::List => "Service.List",
            Method::Install => "Service.Install",
            Method::Remove => "Service.Remove",
            Method::Exists => "Service.Exists",
            Method::Status => "Service.Status",
            Method::Start => "Service.Start",
            Method::Stop => "Service.Stop",
            Method::Stats => "Service.Stats",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Method::List => "List installed services as a map of id to descriptor.",
            Method::Install => {
                "Fetch, build and install a service from a descriptor {id, sourceLocator, params}."
            }
            Method::Remove => "Run the service's remove hook, unregister it and delete its files.",
            Method::Exists => "Whether a service with this id is installed.",
            Method::Status => "Run the service's status command and return its output.",
            Method::Start => "Run the service's start command and return its output.",
            Method::Stop => "Run the service's stop command and return its output.",
            Method::Stats => "Sample the service's statistics as a JSON object.",
        }
    }

    pub fn from_rpc_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.rpc_name() == name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    pub fn takes_id(self) -> bool {
        !matches!(self, Method::List | Method::Install)
    }
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

/// Maps RPC requests onto the control plane.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    plane: Arc<ControlPlane>,
}

impl Dispatcher {
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self { plane }
    }

    /// Dispatch by RPC method name (`Service.Install`, ...).
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let method = Method::from_rpc_name(method).ok_or_else(|| RpcError::unknown_method(method))?;
        self.invoke(method, params).await
    }

    pub async fn invoke(&self, method: Method, params: Value) -> Result<Value, RpcError> {
        tracing::debug!(method = method.rpc_name(), "Dispatching request");
        let plane = &self.plane;
        let result = match method {
            Method::List => to_value(&plane.list().await)?,
            Method::Install => {
                let descriptor: ServiceDescriptor = serde_json::from_value(params)
                    .map_err(|e| RpcError::invalid_params(format!("invalid descriptor: {e}")))?;
                Value::String(plane.install(descriptor).await?)
            }
            Method::Remove => Value::String(plane.remove(&service_id(params)?).await?),
            Method::Exists => Value::Bool(plane.exists(&service_id(params)?).await),
            Method::Status => Value::String(plane.status(&service_id(params)?).await?),
            Method::Start => Value::String(plane.start(&service_id(params)?).await?),
            Method::Stop => Value::String(plane.stop(&service_id(params)?).await?),
            Method::Stats => Value::Object(plane.stats(&service_id(params)?).await?),
        };
        Ok(result)
    }
}

/// Accepts either a bare string or `{"id": ...}`.
fn service_id(params: Value) -> Result<String, RpcError> {
    match params {
        Value::String(id) => Ok(id),
        other => serde_json::from_value::<IdParams>(other)
            .map(|p| p.id)
            .map_err(|e| RpcError::invalid_params(format!("expected a service id: {e}"))),
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::from(ControlError::from(e)))
}
