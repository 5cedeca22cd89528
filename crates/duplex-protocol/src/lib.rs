//! Wire model shared by both ends of a duplex RPC connection.
//!
//! A connection carries four message shapes, interleaved on one channel:
//! Call, Result, Error and Notification. See [`Message`].

mod error;
mod message;

pub use error::{
    RpcError, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use message::{Message, MessageError, RequestId, JSONRPC_VERSION};
