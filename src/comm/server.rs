use crate::comm::config::CommConfig;
use crate::comm::error::{CommError, CommInitError, Result};
use crate::comm::protocol::{
    decode_header, decode_request_payload, encode_request_ack, encode_response, HEADER_LEN,
};
use crate::comm::types::{MsgType, ResponsePayload, UserRequest, UserResponse};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Sequence deduplication entry
#[derive(Debug)]
struct DedupEntry {
    /// When this entry was created
    instant: Instant,
    /// Cached response to resend if duplicate
    cached_response: Option<Vec<u8>>,
}

type DedupTable = HashMap<SocketAddr, HashMap<u32, DedupEntry>>;

/// Comm server - handles UDP communication with clients
pub struct Comm {
    socket: UdpSocket,
    config: CommConfig,
    /// Channel sender to forward UserRequests to main loop
    loop_sender: mpsc::Sender<UserRequest>,
    /// Sequence deduplication table per client
    dedup: Arc<tokio::sync::Mutex<DedupTable>>,
}

impl Comm {
    /// Get local socket address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Create a new Comm instance and bind UDP socket
    /// Returns the comm instance and receiver for communication with main loop
    pub async fn new(
        config: CommConfig,
    ) -> std::result::Result<(Comm, mpsc::Receiver<UserRequest>), CommInitError> {
        let socket = UdpSocket::bind(config.bind_addr()?)
            .await
            .map_err(|e| CommInitError::BindFailed(e.to_string()))?;

        if let Ok(addr) = socket.local_addr() {
            info!(addr = %addr, "Comm listening");
        }

        let (tx, rx) = mpsc::channel(1024);

        Ok((
            Self {
                socket,
                config,
                loop_sender: tx,
                dedup: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            },
            rx,
        ))
    }

    /// Run the Comm server. Each packet is handled on its own task so a
    /// retry of a seq still awaiting its reply is answered with an ACK.
    pub async fn run(self) -> Result<()> {
        let comm = Arc::new(self);
        let mut buf = vec![0u8; comm.config.max_payload_bytes + 1024]; // Extra space for header
        let mut cleanup_interval = tokio::time::interval(Duration::from_secs(30));

        loop {
            tokio::select! {
                result = comm.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => {
                            let packet = buf[..len].to_vec();
                            let comm = Arc::clone(&comm);
                            tokio::spawn(async move {
                                if let Err(e) = comm.handle_packet(&packet, addr).await {
                                    warn!(addr = %addr, error = %e, "Failed to handle packet");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Recv error");
                            return Err(CommError::RecvError(e.to_string()));
                        }
                    }
                }
                _ = cleanup_interval.tick() => {
                    comm.cleanup_dedup().await;
                }
            }
        }
    }

    /// Handle incoming packet
    async fn handle_packet(&self, packet: &[u8], client_addr: SocketAddr) -> Result<()> {
        if packet.len() < HEADER_LEN {
            warn!(addr = %client_addr, len = packet.len(), "Truncated packet");
            return Err(CommError::DecodeError("Packet too short".to_string()));
        }

        let payload_len = packet.len() - HEADER_LEN;
        if payload_len > self.config.max_payload_bytes {
            warn!(addr = %client_addr, len = payload_len, "Payload too large");
            return Err(CommError::PayloadTooLarge(payload_len));
        }

        let (msg_type, seq) = decode_header(packet)?;
        let payload = &packet[HEADER_LEN..];

        debug!(addr = %client_addr, msg_type = msg_type as u8, seq = seq, "Received packet");

        match msg_type {
            MsgType::Request => self.handle_request(payload, seq, client_addr).await,
            _ => {
                warn!(addr = %client_addr, msg_type = msg_type as u8, "Unexpected message type");
                Ok(())
            }
        }
    }

    /// Handle incoming REQUEST. A repeated seq never re-executes.
    async fn handle_request(
        &self,
        payload_bytes: &[u8],
        seq: u32,
        client_addr: SocketAddr,
    ) -> Result<()> {
        let mut dedup = self.dedup.lock().await;
        let client_entries = dedup.entry(client_addr).or_default();

        if client_entries.len() >= self.config.dedup_capacity {
            let oldest_seq = client_entries
                .iter()
                .min_by_key(|(_, e)| e.instant)
                .map(|(seq, _)| *seq);
            if let Some(seq_to_remove) = oldest_seq {
                client_entries.remove(&seq_to_remove);
                debug!(seq = seq_to_remove, "Dedup table at capacity, removed oldest entry");
            }
        }

        match client_entries.entry(seq) {
            Entry::Occupied(entry) => {
                let reply = match &entry.get().cached_response {
                    Some(cached) => {
                        info!(seq = seq, addr = %client_addr, "Duplicate request, resending cached response");
                        cached.clone()
                    }
                    None => {
                        debug!(seq = seq, addr = %client_addr, "Duplicate request still in flight, sending ACK");
                        encode_request_ack(seq)?
                    }
                };
                drop(dedup);
                self.send(&reply, client_addr).await
            }
            Entry::Vacant(entry) => {
                // Registered before processing so in-flight duplicates are recognized
                entry.insert(DedupEntry {
                    instant: Instant::now(),
                    cached_response: None,
                });
                drop(dedup);

                let request_payload = match decode_request_payload(payload_bytes) {
                    Ok(payload) => payload,
                    Err(e) => {
                        self.forget(client_addr, seq).await;
                        return Err(e);
                    }
                };

                info!(
                    seq = seq,
                    addr = %client_addr,
                    language = %request_payload.language,
                    source_len = request_payload.source.len(),
                    "New request"
                );

                self.send(&encode_request_ack(seq)?, client_addr).await?;
                debug!(seq = seq, addr = %client_addr, "Sent REQUEST_ACK");

                let (reply_tx, reply_rx) = oneshot::channel::<UserResponse>();
                let user_request = UserRequest {
                    language: request_payload.language,
                    source: request_payload.source,
                    reply: reply_tx,
                    source_addr: client_addr,
                };

                if let Err(e) = self.loop_sender.send(user_request).await {
                    error!(error = %e, "Failed to send request to main loop");
                    let response = UserResponse::internal_error("Internal server error");
                    self.respond(seq, client_addr, response).await?;
                    return Err(CommError::ChannelClosed);
                }

                let wait = Duration::from_secs(self.config.response_timeout_secs);
                let response = match timeout(wait, reply_rx).await {
                    Ok(Ok(response)) => response,
                    Ok(Err(_)) => {
                        warn!(seq = seq, "Channel closed without response");
                        UserResponse::internal_error("No response from handler")
                    }
                    Err(_) => {
                        warn!(seq = seq, timeout_secs = self.config.response_timeout_secs, "Timeout waiting for response");
                        UserResponse::internal_error("Response timeout")
                    }
                };
                self.respond(seq, client_addr, response).await
            }
        }
    }

    /// Send the final RESPONSE for a seq and cache it for retries
    async fn respond(&self, seq: u32, client_addr: SocketAddr, response: UserResponse) -> Result<()> {
        let payload: ResponsePayload = response.into();
        let response_bytes = encode_response(seq, &payload)?;

        {
            let mut dedup = self.dedup.lock().await;
            dedup.entry(client_addr).or_default().insert(
                seq,
                DedupEntry {
                    instant: Instant::now(),
                    cached_response: Some(response_bytes.clone()),
                },
            );
        }

        self.send(&response_bytes, client_addr).await?;
        debug!(seq = seq, addr = %client_addr, status = %payload.status, "Sent RESPONSE");
        Ok(())
    }

    async fn send(&self, bytes: &[u8], client_addr: SocketAddr) -> Result<()> {
        self.socket
            .send_to(bytes, client_addr)
            .await
            .map(|_| ())
            .map_err(|e| CommError::SendError(e.to_string()))
    }

    /// Drop a dedup entry so a corrected resend of the same seq is processed
    async fn forget(&self, client_addr: SocketAddr, seq: u32) {
        let mut dedup = self.dedup.lock().await;
        if let Some(client_entries) = dedup.get_mut(&client_addr) {
            client_entries.remove(&seq);
        }
    }

    /// Cleanup expired entries from deduplication table
    async fn cleanup_dedup(&self) {
        let mut dedup = self.dedup.lock().await;
        let ttl = Duration::from_secs(self.config.dedup_ttl_secs);
        let now = Instant::now();

        for entries in dedup.values_mut() {
            entries.retain(|_seq, entry| now.duration_since(entry.instant) < ttl);
        }
        dedup.retain(|_addr, entries| !entries.is_empty());

        debug!(clients = dedup.len(), "Dedup table cleaned");
    }
}
