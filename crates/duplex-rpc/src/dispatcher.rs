//! Inbound message routing.
//!
//! Each message is classified once and handled independently, in arrival
//! order: Results and Errors settle entries in the call table, Calls go to the
//! method registry, Notifications fan out to listeners. Handlers run on their
//! own tasks so a slow invocation never holds up routing.

use duplex_protocol::{Message, RequestId};
use serde_json::Value;
use tracing::{debug, debug_span, info, trace, warn, Instrument};

use crate::codec::MessageReader;
use crate::peer::Peer;

pub(crate) struct Dispatcher {
    peer: Peer,
}

impl Dispatcher {
    pub(crate) fn new(peer: Peer) -> Self {
        Self { peer }
    }

    /// Route one raw inbound value. Never fails: anomalies are logged and
    /// dropped.
    pub(crate) fn dispatch(&self, raw: Value) {
        let message = match Message::from_value(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed message");
                return;
            }
        };

        let shared = &self.peer.shared;
        match message {
            Message::Notification { method, params } => {
                let delivered = shared
                    .events
                    .fan_out(&method, &params.unwrap_or(Value::Null));
                trace!(event = %method, delivered, "Notification received");
            }
            Message::Result { id, result } => {
                if !id.as_u64().is_some_and(|n| shared.calls.resolve(n, result)) {
                    debug!(%id, "Dropping result for unknown call id");
                }
            }
            Message::Error { id, error } => {
                if !id.as_u64().is_some_and(|n| shared.calls.reject(n, error)) {
                    debug!(%id, "Dropping error for unknown call id");
                }
            }
            Message::Call { id, method, params } => {
                self.invoke(id, method, params.unwrap_or(Value::Null));
            }
        }
    }

    /// Run the handler for an inbound call and write exactly one reply.
    ///
    /// Invocations still running at shutdown are abandoned without a reply.
    fn invoke(&self, id: RequestId, method: String, params: Value) {
        let shared = &self.peer.shared;
        let handler = shared.methods.invoke(&method, params, &self.peer);
        let outbound = shared.outbound.clone();
        let shutdown = shared.shutdown.clone();
        let span = debug_span!("rpc_invoke", %id, method = %method);

        shared.tasks.spawn(
            async move {
                let outcome = tokio::select! {
                    outcome = handler => outcome,
                    _ = shutdown.cancelled() => {
                        debug!("Invocation abandoned at shutdown");
                        return;
                    }
                };
                let reply = match outcome {
                    Ok(result) => Message::result(id, result),
                    Err(error) => {
                        debug!(code = error.code, error = %error, "Invocation failed");
                        Message::error(id, error)
                    }
                };
                if let Err(e) = outbound.send(reply) {
                    debug!(error = %e, "Reply dropped");
                }
            }
            .instrument(span),
        );
    }

    /// Read until the stream ends or the peer is closed, then fail whatever
    /// is still pending.
    pub(crate) async fn run<R: MessageReader>(self, mut reader: R) {
        let shared = self.peer.shared.clone();

        let reason = loop {
            tokio::select! {
                biased;
                _ = shared.shutdown.cancelled() => break "peer closed".to_string(),
                next = reader.read_message() => match next {
                    Ok(Some(value)) => self.dispatch(value),
                    Ok(None) => break "stream closed".to_string(),
                    Err(e) => {
                        warn!(error = %e, "Read failed");
                        break format!("stream error: {}", e);
                    }
                },
            }
        };

        let failed = shared.calls.fail_all(&reason);
        shared.shutdown.cancel();
        info!(reason = %reason, failed, "Connection closed");
    }
}
