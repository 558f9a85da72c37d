//! JSON-RPC 2.0 error codes.

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON was not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;
/// Server-defined: missing or failed authentication.
pub const UNAUTHORIZED: i64 = -32001;
/// Server-defined: authenticated but not allowed to touch this resource.
pub const FORBIDDEN: i64 = -32003;
/// Server-defined: a rate limiter rejected the call.
pub const RATE_LIMITED: i64 = -32029;
