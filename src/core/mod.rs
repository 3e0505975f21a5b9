//! Core functionality shared across the transformation pipeline:
//! - Error handling and the client-facing error envelope
//! - Logging context helpers

pub mod error;
pub mod error_types;
pub mod logging;

pub use error::{ProxyError, Result};
pub use error_types::*;
pub use logging::{generate_request_id, get_request_id, init_logging, REQUEST_ID};
