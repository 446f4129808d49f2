// Wire event loop
//
// Multiplexes command replies and asynchronous event sets over one
// connection. Generic over the transport so tests can run against an
// in-memory duplex pipe.

use crate::events::{parse_event_packet, EventSet};
use crate::protocol::{CommandPacket, ReplyPacket, WireError, WireResult, HEADER_SIZE, REPLY_FLAG};
use bytes::BytesMut;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Maximum allowed packet size (10MB). Prevents memory exhaustion from a
/// misbehaving target.
const MAX_PACKET_SIZE: usize = 10 * 1024 * 1024;

/// Request to send a command and get a reply
pub struct CommandRequest {
    pub packet: CommandPacket,
    pub reply_tx: oneshot::Sender<WireResult<ReplyPacket>>,
}

/// Handle to the event loop for sending commands and receiving events
#[derive(Clone, Debug)]
pub struct EventLoopHandle {
    command_tx: mpsc::Sender<CommandRequest>,
    event_tx: broadcast::Sender<EventSet>,
    alive_rx: watch::Receiver<bool>,
}

impl EventLoopHandle {
    /// Send a command and wait for its reply.
    pub async fn send_command(&self, packet: CommandPacket) -> WireResult<ReplyPacket> {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = CommandRequest { packet, reply_tx };

        self.command_tx
            .send(request)
            .await
            .map_err(|_| WireError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| WireError::ConnectionClosed)?
    }

    /// Subscribe to asynchronous event sets from the target.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventSet> {
        self.event_tx.subscribe()
    }

    /// A watch that flips to `false` when the connection dies.
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.alive_rx.clone()
    }

    pub fn is_alive(&self) -> bool {
        *self.alive_rx.borrow()
    }
}

/// Start the event loop task over an arbitrary split transport.
pub fn spawn_event_loop<R, W>(reader: R, writer: W) -> EventLoopHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(32);
    // Events carry breakpoint hits that parked callers wait on; size the
    // channel so bursts are not dropped.
    let (event_tx, _) = broadcast::channel(256);
    let (alive_tx, alive_rx) = watch::channel(true);

    tokio::spawn(event_loop_task(
        reader,
        writer,
        command_rx,
        event_tx.clone(),
        alive_tx,
    ));

    EventLoopHandle {
        command_tx,
        event_tx,
        alive_rx,
    }
}

async fn event_loop_task<R, W>(
    mut reader: R,
    mut writer: W,
    mut command_rx: mpsc::Receiver<CommandRequest>,
    event_tx: broadcast::Sender<EventSet>,
    alive_tx: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    info!("wire event loop started");

    let mut pending_replies: HashMap<u32, oneshot::Sender<WireResult<ReplyPacket>>> =
        HashMap::new();

    loop {
        tokio::select! {
            // Outgoing commands
            Some(cmd) = command_rx.recv() => {
                let packet_id = cmd.packet.id;
                debug!("sending command id={}", packet_id);

                let encoded = cmd.packet.encode();
                if let Err(e) = writer.write_all(&encoded).await {
                    error!("failed to write command: {}", e);
                    cmd.reply_tx.send(Err(WireError::Io(e))).ok();
                    break;
                }

                if let Err(e) = writer.flush().await {
                    error!("failed to flush command: {}", e);
                    cmd.reply_tx.send(Err(WireError::Io(e))).ok();
                    break;
                }

                pending_replies.insert(packet_id, cmd.reply_tx);
            }

            // Incoming packets
            result = read_packet(&mut reader) => {
                match result {
                    Ok((is_reply, packet_id, data)) => {
                        if is_reply {
                            debug!("received reply id={}", packet_id);

                            if let Some(tx) = pending_replies.remove(&packet_id) {
                                match ReplyPacket::decode(&data) {
                                    Ok(reply) => {
                                        tx.send(Ok(reply)).ok();
                                    }
                                    Err(e) => {
                                        warn!("failed to decode reply: {}", e);
                                        tx.send(Err(e)).ok();
                                    }
                                }
                            } else {
                                warn!("reply for unknown command id={}", packet_id);
                            }
                        } else {
                            // Event packet; data starts after the header
                            let event_data = &data[HEADER_SIZE..];

                            match parse_event_packet(event_data) {
                                Ok(event_set) => {
                                    debug!(
                                        "event set: {} events, suspend_policy={}",
                                        event_set.events.len(),
                                        event_set.suspend_policy
                                    );
                                    // Err means no live subscribers; harmless
                                    event_tx.send(event_set).ok();
                                }
                                Err(e) => {
                                    warn!("failed to parse event: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("failed to read packet: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // The connection is gone: nothing pending can ever complete.
    for (_, tx) in pending_replies.drain() {
        tx.send(Err(WireError::ConnectionClosed)).ok();
    }
    alive_tx.send(false).ok();

    info!("wire event loop shut down");
}

/// Read one packet, returning whether it is a reply, its id, and the raw
/// bytes including the header.
async fn read_packet<R>(reader: &mut R) -> WireResult<(bool, u32, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = BytesMut::with_capacity(HEADER_SIZE);
    header.resize(HEADER_SIZE, 0);

    reader.read_exact(&mut header).await.map_err(WireError::Io)?;

    let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let packet_id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let flags = header[8];

    if length < HEADER_SIZE {
        return Err(WireError::Protocol(format!(
            "invalid packet length: {}",
            length
        )));
    }

    if length > MAX_PACKET_SIZE {
        return Err(WireError::Protocol(format!(
            "packet too large: {} bytes (max: {} bytes)",
            length, MAX_PACKET_SIZE
        )));
    }

    let data_len = length - HEADER_SIZE;
    let mut full_packet = header.to_vec();

    if data_len > 0 {
        let mut data = vec![0u8; data_len];
        reader.read_exact(&mut data).await.map_err(WireError::Io)?;
        full_packet.extend_from_slice(&data);
    }

    let is_reply = flags == REPLY_FLAG;

    Ok((is_reply, packet_id, full_packet))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::REPLY_FLAG;

    fn reply_bytes(id: u32, error_code: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_SIZE + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(&id.to_be_bytes());
        out.push(REPLY_FLAG);
        out.extend_from_slice(&error_code.to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn test_reply_routing_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client);
        let handle = spawn_event_loop(reader, writer);

        let (mut srv_read, mut srv_write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move {
            // Read one command packet and answer it
            let mut header = [0u8; HEADER_SIZE];
            srv_read.read_exact(&mut header).await.unwrap();
            let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            let id = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
            let mut rest = vec![0u8; length - HEADER_SIZE];
            srv_read.read_exact(&mut rest).await.unwrap();

            srv_write.write_all(&reply_bytes(id, 0, &[1, 2, 3])).await.unwrap();
            srv_write.flush().await.unwrap();
        });

        let reply = handle
            .send_command(CommandPacket::new(7, 1, 1))
            .await
            .unwrap();
        assert_eq!(reply.id, 7);
        assert_eq!(reply.data(), &[1, 2, 3]);

        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_pending_fails_on_close() {
        let (client, server) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client);
        let handle = spawn_event_loop(reader, writer);

        let mut alive = handle.liveness();
        assert!(*alive.borrow());

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_command(CommandPacket::new(1, 1, 1)).await }
        });

        // Give the loop a chance to register the pending reply, then kill
        // the transport without answering.
        tokio::task::yield_now().await;
        drop(server);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WireError::ConnectionClosed | WireError::Io(_))));

        alive.changed().await.unwrap();
        assert!(!*alive.borrow());
    }
}
