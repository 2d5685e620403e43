//! JSON-RPC protocol error codes. Domain codes live on
//! [`morfx_core::MorfxErr::code`].

pub(crate) const PARSE_ERROR_CODE: i64 = -32700;
pub(crate) const INVALID_REQUEST_ERROR_CODE: i64 = -32600;
pub(crate) const METHOD_NOT_FOUND_ERROR_CODE: i64 = -32601;
pub(crate) const INVALID_PARAMS_ERROR_CODE: i64 = -32602;
pub(crate) const INTERNAL_ERROR_CODE: i64 = -32603;
pub(crate) const REQUEST_CANCELLED_ERROR_CODE: i64 = -32800;
