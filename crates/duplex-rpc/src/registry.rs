//! Method registry: one flat namespace of invocable names.
//!
//! A name is either implemented here ([`MethodEntry::Local`]) or delegated to
//! the other peer ([`MethodEntry::Remote`]). Registering a name again
//! replaces whatever was there, regardless of kind.

use duplex_protocol::RpcError;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// What every handler invocation produces, sync or async.
pub type HandlerFuture = BoxFuture<'static, std::result::Result<Value, RpcError>>;

/// A locally implemented method.
pub type LocalHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Wrap an async function as a [`LocalHandler`].
pub fn local_handler<F, Fut>(handler: F) -> LocalHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |params| handler(params).boxed())
}

/// Wrap a synchronous function as a [`LocalHandler`] that settles immediately.
pub fn sync_handler<F>(handler: F) -> LocalHandler
where
    F: Fn(Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
{
    Arc::new(move |params| future::ready(handler(params)).boxed())
}

/// Outbound half used by remote entries.
pub trait RemoteCaller: Send + Sync {
    fn call_remote(&self, method: &str, params: Value) -> BoxFuture<'static, crate::Result<Value>>;
}

#[derive(Clone)]
pub enum MethodEntry {
    Local(LocalHandler),
    /// Invoking this name performs a call with the same name on the other peer
    Remote(String),
}

impl MethodEntry {
    pub fn kind(&self) -> MethodKind {
        match self {
            MethodEntry::Local(_) => MethodKind::Local,
            MethodEntry::Remote(_) => MethodKind::Remote,
        }
    }
}

impl std::fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MethodEntry::Local(_) => f.write_str("Local(..)"),
            MethodEntry::Remote(name) => f.debug_tuple("Remote").field(name).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Local,
    Remote,
}

#[derive(Default)]
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, MethodEntry>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local(&self, name: impl Into<String>, handler: LocalHandler) {
        self.insert(name.into(), MethodEntry::Local(handler));
    }

    pub fn register_remote(&self, name: impl Into<String>) {
        let name = name.into();
        self.insert(name.clone(), MethodEntry::Remote(name));
    }

    pub fn register_local_methods<I, N>(&self, methods: I)
    where
        I: IntoIterator<Item = (N, LocalHandler)>,
        N: Into<String>,
    {
        for (name, handler) in methods {
            self.register_local(name, handler);
        }
    }

    pub fn register_remote_methods<I, N>(&self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        for name in names {
            self.register_remote(name);
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.methods.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<MethodEntry> {
        self.methods.read().get(name).cloned()
    }

    pub fn kind(&self, name: &str) -> Option<MethodKind> {
        self.methods.read().get(name).map(MethodEntry::kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `name` with `params`.
    ///
    /// Unknown names fail with -32601. Local handlers run inside the returned
    /// future, so a handler that panics before or after its first await is
    /// reported as -32603 instead of unwinding into the caller. Remote entries
    /// are handed to `remote`, and their failures keep the code the other side
    /// sent.
    pub fn invoke(&self, name: &str, params: Value, remote: &dyn RemoteCaller) -> HandlerFuture {
        match self.get(name) {
            None => {
                debug!(method = name, "Method not found");
                future::ready(Err(RpcError::method_not_found(name))).boxed()
            }
            Some(MethodEntry::Local(handler)) => run_local(name, handler, params),
            Some(MethodEntry::Remote(remote_name)) => {
                let call = remote.call_remote(&remote_name, params);
                async move { call.await.map_err(RpcError::from) }.boxed()
            }
        }
    }

    fn insert(&self, name: String, entry: MethodEntry) {
        let kind = entry.kind();
        if let Some(previous) = self.methods.write().insert(name.clone(), entry) {
            debug!(method = %name, ?kind, previous = ?previous.kind(), "Replaced method registration");
        }
    }
}

/// Run a local handler with panics converted to internal errors.
pub(crate) fn run_local(method: &str, handler: LocalHandler, params: Value) -> HandlerFuture {
    let method = method.to_string();
    AssertUnwindSafe(async move { handler(params).await })
        .catch_unwind()
        .map(move |outcome| match outcome {
            Ok(result) => result,
            Err(payload) => {
                let detail = panic_message(payload.as_ref());
                warn!(method = %method, panic = %detail, "Method handler panicked");
                Err(RpcError::internal(format!(
                    "Handler for '{}' panicked: {}",
                    method, detail
                )))
            }
        })
        .boxed()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerError;
    use duplex_protocol::{INTERNAL_ERROR, METHOD_NOT_FOUND};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records forwarded calls and answers with a canned outcome.
    #[derive(Default)]
    struct RecordingRemote {
        calls: Mutex<Vec<(String, Value)>>,
        fail_with: Option<RpcError>,
    }

    impl RemoteCaller for RecordingRemote {
        fn call_remote(
            &self,
            method: &str,
            params: Value,
        ) -> BoxFuture<'static, crate::Result<Value>> {
            self.calls.lock().push((method.to_string(), params));
            let outcome = match &self.fail_with {
                Some(err) => Err(PeerError::Rpc(err.clone())),
                None => Ok(json!("forwarded")),
            };
            future::ready(outcome).boxed()
        }
    }

    fn add_handler() -> LocalHandler {
        sync_handler(|params| {
            let [a, b]: [i64; 2] = serde_json::from_value(params)?;
            Ok(json!(a + b))
        })
    }

    #[tokio::test]
    async fn test_invoke_sync_local_handler() {
        let registry = MethodRegistry::new();
        registry.register_local("add", add_handler());

        let result = registry
            .invoke("add", json!([2, 3]), &RecordingRemote::default())
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_invoke_async_local_handler() {
        let registry = MethodRegistry::new();
        registry.register_local(
            "echo",
            local_handler(|params| async move {
                tokio::task::yield_now().await;
                Ok(params)
            }),
        );

        let result = registry
            .invoke("echo", json!({"a": 1}), &RecordingRemote::default())
            .await
            .unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let registry = MethodRegistry::new();
        let err = registry
            .invoke("missing", Value::Null, &RecordingRemote::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
        assert!(err.message.contains("missing"));
    }

    #[tokio::test]
    async fn test_handler_error_keeps_custom_code() {
        let registry = MethodRegistry::new();
        registry.register_local(
            "divide",
            sync_handler(|_| Err(RpcError::new(400, "div by zero"))),
        );

        let err = registry
            .invoke("divide", json!([1, 0]), &RecordingRemote::default())
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::new(400, "div by zero"));
    }

    #[tokio::test]
    async fn test_bad_params_are_invalid_params() {
        let registry = MethodRegistry::new();
        registry.register_local("add", add_handler());

        let err = registry
            .invoke("add", json!("two and three"), &RecordingRemote::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, duplex_protocol::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_sync_panic_becomes_internal_error() {
        let registry = MethodRegistry::new();
        registry.register_local("explode", sync_handler(|_| panic!("kaboom")));

        let err = registry
            .invoke("explode", Value::Null, &RecordingRemote::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_async_panic_becomes_internal_error() {
        let registry = MethodRegistry::new();
        registry.register_local(
            "explode_later",
            local_handler(|_| async move {
                tokio::task::yield_now().await;
                if true {
                    panic!("later kaboom");
                }
                Ok(Value::Null)
            }),
        );

        let err = registry
            .invoke("explode_later", Value::Null, &RecordingRemote::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("later kaboom"));
    }

    #[tokio::test]
    async fn test_remote_entry_forwards_call() {
        let registry = MethodRegistry::new();
        registry.register_remote("divide");
        let remote = RecordingRemote::default();

        let result = registry
            .invoke("divide", json!([1, 2]), &remote)
            .await
            .unwrap();
        assert_eq!(result, json!("forwarded"));
        assert_eq!(
            *remote.calls.lock(),
            vec![("divide".to_string(), json!([1, 2]))]
        );
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_code() {
        let registry = MethodRegistry::new();
        registry.register_remote("divide");
        let remote = RecordingRemote {
            fail_with: Some(RpcError::new(400, "div by zero")),
            ..Default::default()
        };

        let err = registry
            .invoke("divide", json!([1, 0]), &remote)
            .await
            .unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = MethodRegistry::new();
        registry.register_local("m", add_handler());
        registry.register_remote("m");
        assert_eq!(registry.kind("m"), Some(MethodKind::Remote));

        registry.register_local("m", add_handler());
        assert_eq!(registry.kind("m"), Some(MethodKind::Local));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_batch_registration_and_names() {
        let registry = MethodRegistry::new();
        registry.register_local_methods(vec![("add", add_handler()), ("sub", add_handler())]);
        registry.register_remote_methods(["divide", "multiply"]);

        assert_eq!(registry.names(), vec!["add", "divide", "multiply", "sub"]);
        assert!(registry.contains("divide"));
        assert!(registry.unregister("divide"));
        assert!(!registry.contains("divide"));
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_entry_debug() {
        assert_eq!(format!("{:?}", MethodEntry::Remote("x".into())), "Remote(\"x\")");
        assert_eq!(format!("{:?}", MethodEntry::Local(add_handler())), "Local(..)");
    }
}
