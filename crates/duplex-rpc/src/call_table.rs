//! Outstanding outbound calls, keyed by invocation id.
//!
//! Every entry is settled exactly once: by a matching Result, a matching
//! Error, a timeout (the caller cancels it), or [`CallTable::fail_all`] when
//! the connection goes away. Settling removes the entry.

use duplex_protocol::RpcError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{PeerError, Result};

type Settlement = Result<Value>;

struct PendingCall {
    method: String,
    tx: oneshot::Sender<Settlement>,
}

struct CallTableState {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
    /// Set once by `fail_all`; new calls are refused afterwards
    closed: Option<String>,
}

pub struct CallTable {
    state: Mutex<CallTableState>,
}

impl CallTable {
    pub fn new(initial_id: u64) -> Self {
        Self {
            state: Mutex::new(CallTableState {
                next_id: initial_id,
                pending: HashMap::new(),
                closed: None,
            }),
        }
    }

    /// Allocate the next id and record a pending call for it.
    ///
    /// The returned [`PendingReply`] settles when the call does.
    pub fn begin(&self, method: &str) -> Result<(u64, PendingReply)> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(PeerError::ConnectionClosed(reason.clone()));
        }

        // Only reachable after the counter wraps: never hand out a live id.
        let mut id = state.next_id;
        while state.pending.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        state.next_id = id.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        state.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                tx,
            },
        );

        Ok((id, PendingReply { id, rx }))
    }

    /// Fulfil the call with `id`. Returns false if no such call is pending.
    pub fn resolve(&self, id: u64, result: Value) -> bool {
        self.settle(id, Ok(result))
    }

    /// Fail the call with `id` with the error payload from the other side.
    pub fn reject(&self, id: u64, error: RpcError) -> bool {
        self.settle(id, Err(PeerError::Rpc(error)))
    }

    /// Forget a pending call without settling it (timeouts, failed sends).
    pub fn cancel(&self, id: u64) -> bool {
        self.state.lock().pending.remove(&id).is_some()
    }

    /// Reject every pending call with a connection-lost error and refuse new
    /// ones. Returns how many calls were failed.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingCall)> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (id, call) in drained {
            debug!(id, method = %call.method, reason, "Failing pending call");
            let _ = call
                .tx
                .send(Err(PeerError::ConnectionClosed(reason.to_string())));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn settle(&self, id: u64, outcome: Settlement) -> bool {
        let Some(call) = self.state.lock().pending.remove(&id) else {
            return false;
        };
        // The caller may have stopped waiting; the entry is gone either way.
        let _ = call.tx.send(outcome);
        true
    }
}

/// Future half of a pending call.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PeerError::ConnectionClosed(
                "call table dropped".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}
