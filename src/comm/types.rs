use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Message types for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Client → daemon: submit code for execution
    Request = 0x01,
    /// Daemon → client: request received, execution under way
    RequestAck = 0x02,
    /// Daemon → client: the execution result
    Response = 0x03,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::RequestAck),
            0x03 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Request payload from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    /// Language selector, e.g. "python" or "cpp"
    pub language: String,
    /// Complete source buffer
    pub source: String,
}

/// Provenance block of a response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub attempted_providers: Vec<String>,
    pub provider_used: Option<String>,
    pub elapsed_ms: u64,
}

/// Response payload to client; mirrors the normalized execution result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub status: String,
    pub output: String,
    pub diagnostic: String,
    pub exit_code: i32,
    pub meta: ResponseMeta,
}

impl ResponsePayload {
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

/// Request sent from Comm to main loop
#[derive(Debug)]
pub struct UserRequest {
    /// Language selector as received, not yet validated
    pub language: String,
    /// Source code
    pub source: String,
    /// Channel to send response back to Comm
    pub reply: oneshot::Sender<UserResponse>,
    /// Client source address
    pub source_addr: SocketAddr,
}

/// Response sent from main loop to Comm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    pub status: String,
    pub output: String,
    pub diagnostic: String,
    pub exit_code: i32,
    pub meta: ResponseMeta,
}

impl UserResponse {
    /// Failure raised by the daemon itself rather than by an execution backend
    pub fn internal_error(diagnostic: impl Into<String>) -> Self {
        let diagnostic = diagnostic.into();
        Self {
            status: "service_unavailable".to_string(),
            output: diagnostic.clone(),
            diagnostic,
            exit_code: -1,
            meta: ResponseMeta::default(),
        }
    }
}

impl From<UserResponse> for ResponsePayload {
    fn from(response: UserResponse) -> Self {
        Self {
            status: response.status,
            output: response.output,
            diagnostic: response.diagnostic,
            exit_code: response.exit_code,
            meta: response.meta,
        }
    }
}
