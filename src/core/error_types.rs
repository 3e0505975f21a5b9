//! Shared constants for structured API errors returned to clients.

pub const ERROR_TYPE_API: &str = "api_error";
pub const ERROR_TYPE_TIMEOUT: &str = "timeout_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_RATE_LIMIT: &str = "rate_limit_error";
pub const ERROR_TYPE_OVERLOADED: &str = "overloaded_error";
pub const ERROR_TYPE_STREAM: &str = "stream_error";

pub const ERROR_CODE_PROVIDER: &str = "provider_error";
pub const ERROR_CODE_DECODE: &str = "decode_error";
pub const ERROR_CODE_SCRIPT: &str = "script_error";
