//! Transport between host and worker.
//!
//! Provides:
//! - Wire protocol (newline-delimited JSON request/response frames)
//! - `LineChannel`, a request-id correlating `RpcChannel` over any async
//!   byte stream

pub mod channel;
pub mod protocol;

pub use channel::LineChannel;
pub use protocol::{Request, RequestFrame, Response, ResponseFrame};
