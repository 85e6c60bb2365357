// Comm module - UDP request/ack/response protocol with msgpack payloads

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod types;

pub use config::CommConfig;
pub use server::Comm;
pub use types::{RequestPayload, ResponseMeta, ResponsePayload, UserRequest, UserResponse};
