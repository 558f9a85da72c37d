//! # waygate-rpc
//!
//! JSON-RPC 2.0 wire types for the MCP transports, the error-code
//! constants, and the [`ToolDispatcher`] contract the gateway hands
//! authenticated requests to. Tool implementations (Drive, Forms, Gmail,
//! Calendar wrappers) live behind that trait and are external
//! collaborators.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod errors;
pub mod types;
pub mod validation;

pub use dispatch::ToolDispatcher;
pub use errors::{
    FORBIDDEN, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    RATE_LIMITED, UNAUTHORIZED,
};
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
