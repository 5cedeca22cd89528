//! Bidirectional JSON-RPC peer
//!
//! Both ends of a connection are symmetric: each can call methods on the
//! other, serve calls from the other, and exchange fire-and-forget
//! notifications, all multiplexed over a single framed message stream.
//!
//! ## Architecture
//!
//! - **Call table**: pending outbound calls keyed by invocation id
//! - **Method registry**: local handlers and remote proxies in one namespace
//! - **Dispatcher**: classifies and routes every inbound message
//! - **Notification channel**: named events with ordered listeners
//! - **Peer**: the facade tying them to a reader and a writer task
//!
//! ## Quick Start
//!
//! ```ignore
//! use duplex_rpc::{json_lines, Peer};
//! use serde_json::json;
//!
//! let (reader, writer) = json_lines(read_half, write_half);
//! let peer = Peer::builder()
//!     .local_method_sync("ping", |_| Ok(json!("pong")))
//!     .connect(reader, writer);
//!
//! let answer = peer.call("add", json!([2, 3])).await?;
//! ```

pub mod call_table;
pub mod codec;
pub mod config;
mod dispatcher;
pub mod error;
pub mod events;
pub mod memory;
mod outbound;
pub mod peer;
pub mod registry;

pub use call_table::{CallTable, PendingReply};
pub use codec::{
    json_lines, JsonLinesReader, JsonLinesWriter, MessageReader, MessageWriter,
    DEFAULT_MAX_MESSAGE_BYTES,
};
pub use config::PeerConfig;
pub use error::{PeerError, Result};
pub use events::{Listener, ListenerId, NotificationChannel};
pub use peer::{Methods, Peer, PeerBuilder};
pub use registry::{
    local_handler, sync_handler, HandlerFuture, LocalHandler, MethodEntry, MethodKind,
    MethodRegistry, RemoteCaller,
};

pub use duplex_protocol::{
    Message, MessageError, RequestId, RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
