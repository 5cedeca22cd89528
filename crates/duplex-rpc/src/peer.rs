//! Peer facade
//!
//! A [`Peer`] is one end of a connection. It can call methods on the other
//! end, serve methods the other end calls, and exchange notifications. All of
//! it happens over one framed message stream supplied as a
//! [`MessageReader`]/[`MessageWriter`] pair.
//!
//! # Example
//!
//! ```ignore
//! let (reader, writer) = duplex_rpc::json_lines(read_half, write_half);
//! let peer = Peer::builder()
//!     .local_method_sync("add", |params| {
//!         let [a, b]: [i64; 2] = serde_json::from_value(params)?;
//!         Ok(json!(a + b))
//!     })
//!     .remote_method("divide")
//!     .connect(reader, writer);
//!
//! let quotient = peer.methods().invoke("divide", json!([6, 3])).await?;
//! peer.emit("ready", json!({}))?;
//! ```

use duplex_protocol::{Message, RpcError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::call_table::CallTable;
use crate::codec::{MessageReader, MessageWriter};
use crate::config::PeerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{PeerError, Result};
use crate::events::{ListenerId, NotificationChannel};
use crate::outbound::Outbound;
use crate::registry::{
    self, local_handler, sync_handler, LocalHandler, MethodEntry, MethodKind, MethodRegistry,
    RemoteCaller,
};

pub(crate) struct Shared {
    pub(crate) config: PeerConfig,
    pub(crate) calls: CallTable,
    pub(crate) methods: MethodRegistry,
    pub(crate) events: NotificationChannel,
    pub(crate) outbound: Outbound,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: TaskTracker,
}

/// Handle to one end of a connection. Cheap to clone.
#[derive(Clone)]
pub struct Peer {
    pub(crate) shared: Arc<Shared>,
}

impl Peer {
    pub fn builder() -> PeerBuilder {
        PeerBuilder::default()
    }

    /// Connect with default configuration and nothing registered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: MessageReader,
        W: MessageWriter,
    {
        Self::builder().connect(reader, writer)
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    /// Call `method` on the other peer and wait for its Result or Error.
    ///
    /// Fails with [`PeerError::Rpc`] when the other side reports an error,
    /// [`PeerError::ConnectionClosed`] when the connection is lost first (or
    /// already was), and [`PeerError::Timeout`] when a call timeout is
    /// configured and expires.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let shared = &self.shared;
        let (id, reply) = shared.calls.begin(method)?;
        // Removes the entry if this future is dropped or times out.
        let _guard = PendingGuard {
            calls: &shared.calls,
            id,
        };

        trace!(id, method, "Sending call");
        shared.outbound.send(Message::call(id, method, params))?;

        let Some(limit) = shared.config.call_timeout() else {
            return reply.await;
        };
        match tokio::time::timeout(limit, reply).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(id, method, ?limit, "Call timed out");
                Err(PeerError::Timeout {
                    method: method.to_string(),
                    timeout: limit,
                })
            }
        }
    }

    /// [`call`](Self::call) with typed params and result.
    pub async fn call_as<P, T>(&self, method: &str, params: &P) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub fn register_local_method<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        self.shared
            .methods
            .register_local(name, local_handler(handler));
    }

    pub fn register_local_method_sync<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.shared
            .methods
            .register_local(name, sync_handler(handler));
    }

    pub fn register_local_methods<I, N>(&self, methods: I)
    where
        I: IntoIterator<Item = (N, LocalHandler)>,
        N: Into<String>,
    {
        self.shared.methods.register_local_methods(methods);
    }

    pub fn register_remote_method(&self, name: impl Into<String>) {
        self.shared.methods.register_remote(name);
    }

    pub fn register_remote_methods<I, N>(&self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.shared.methods.register_remote_methods(names);
    }

    /// Every registered name, local or remote, as one invocable namespace.
    pub fn methods(&self) -> Methods<'_> {
        Methods { peer: self }
    }

    pub fn on<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.events.on(event, listener)
    }

    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.shared.events.remove_listener(event, id)
    }

    pub fn remove_all_listeners(&self, event: &str) -> usize {
        self.shared.events.remove_all_listeners(event)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.shared.events.listener_count(event)
    }

    /// Send a notification to the other peer. Local listeners are not run.
    pub fn emit(&self, event: &str, data: Value) -> Result<()> {
        self.shared.events.emit(event, data)
    }

    /// Number of outbound calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled() || self.shared.calls.is_closed()
    }

    /// Shut the connection down. Pending calls fail with
    /// [`PeerError::ConnectionClosed`], and so does every later call.
    pub fn close(&self) {
        let failed = self.shared.calls.fail_all("peer closed");
        self.shared.shutdown.cancel();
        info!(peer = %self.shared.config.name, failed, "Peer closed");
    }

    /// Wait until the reader and writer tasks, and any inbound invocations,
    /// have finished.
    pub async fn closed(&self) {
        self.shared.tasks.wait().await;
    }
}

impl RemoteCaller for Peer {
    fn call_remote(&self, method: &str, params: Value) -> BoxFuture<'static, Result<Value>> {
        let peer = self.clone();
        let method = method.to_string();
        async move { peer.call(&method, params).await }.boxed()
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("name", &self.shared.config.name)
            .field("pending_calls", &self.pending_calls())
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct PendingGuard<'a> {
    calls: &'a CallTable,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        // No-op once the call has settled.
        self.calls.cancel(self.id);
    }
}

/// View over the method registry that invokes names the same way whether they
/// are local or remote.
pub struct Methods<'a> {
    peer: &'a Peer,
}

impl Methods<'_> {
    /// Invoke `name` as if it were a local function.
    ///
    /// Local names run their handler in-process; remote names become a
    /// [`Peer::call`]. Unknown names fail with -32601.
    pub async fn invoke(&self, name: &str, params: Value) -> Result<Value> {
        match self.peer.shared.methods.get(name) {
            None => Err(PeerError::Rpc(RpcError::method_not_found(name))),
            Some(MethodEntry::Local(handler)) => registry::run_local(name, handler, params)
                .await
                .map_err(PeerError::Rpc),
            Some(MethodEntry::Remote(remote)) => self.peer.call(&remote, params).await,
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.peer.shared.methods.names()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peer.shared.methods.contains(name)
    }

    pub fn kind(&self, name: &str) -> Option<MethodKind> {
        self.peer.shared.methods.kind(name)
    }
}

/// Configures a peer before its connection starts, so handlers are in place
/// before the first inbound message is read.
#[derive(Default)]
pub struct PeerBuilder {
    config: PeerConfig,
    local: Vec<(String, LocalHandler)>,
    remote: Vec<String>,
}

impl PeerBuilder {
    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        self.local.push((name.into(), local_handler(handler)));
        self
    }

    pub fn local_method_sync<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.local.push((name.into(), sync_handler(handler)));
        self
    }

    pub fn local_methods<I, N>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = (N, LocalHandler)>,
        N: Into<String>,
    {
        self.local
            .extend(methods.into_iter().map(|(name, handler)| (name.into(), handler)));
        self
    }

    pub fn remote_method(mut self, name: impl Into<String>) -> Self {
        self.remote.push(name.into());
        self
    }

    pub fn remote_methods<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.remote.extend(names.into_iter().map(Into::into));
        self
    }

    /// Start serving the connection. Spawns the reader and writer tasks on
    /// the current tokio runtime.
    pub fn connect<R, W>(self, reader: R, writer: W) -> Peer
    where
        R: MessageReader,
        W: MessageWriter,
    {
        let shutdown = CancellationToken::new();
        let (outbound, queue) = Outbound::channel(shutdown.clone());

        let shared = Arc::new(Shared {
            calls: CallTable::new(self.config.initial_id),
            methods: MethodRegistry::new(),
            events: NotificationChannel::new(outbound.clone()),
            outbound,
            shutdown,
            tasks: TaskTracker::new(),
            config: self.config,
        });
        // Locals first, then remotes: a name in both lists ends up remote.
        shared.methods.register_local_methods(self.local);
        shared.methods.register_remote_methods(self.remote);

        let peer = Peer { shared };
        let span = info_span!("rpc_peer", peer = %peer.shared.config.name);

        peer.shared.tasks.spawn(
            Dispatcher::new(peer.clone())
                .run(reader)
                .instrument(span.clone()),
        );
        peer.shared
            .tasks
            .spawn(write_loop(peer.shared.clone(), queue, writer).instrument(span));
        peer.shared.tasks.close();

        info!(
            peer = %peer.shared.config.name,
            methods = peer.shared.methods.len(),
            "Peer connected"
        );
        peer
    }
}

/// Drain the outbound queue into the writer until shutdown.
///
/// Messages already queued when shutdown is requested are still written.
async fn write_loop<W: MessageWriter>(
    shared: Arc<Shared>,
    mut queue: mpsc::UnboundedReceiver<Message>,
    mut writer: W,
) {
    let failure = loop {
        tokio::select! {
            biased;
            next = queue.recv() => {
                let Some(message) = next else { break None };
                let value = match message.to_value() {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(error = %e, kind = message.kind(), "Dropping unserializable message");
                        continue;
                    }
                };
                if let Err(e) = writer.write_message(&value).await {
                    warn!(error = %e, "Write failed");
                    break Some(format!("write error: {}", e));
                }
            }
            _ = shared.shutdown.cancelled() => break None,
        }
    };

    if let Some(reason) = failure {
        shared.calls.fail_all(&reason);
    }
    shared.shutdown.cancel();
    if let Err(e) = writer.close().await {
        debug!(error = %e, "Writer close failed");
    }
}
