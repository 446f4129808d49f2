// Wire connection management
//
// Handles the attach handshake and hands commands to the event loop. The
// command surface takes &self so one connection can be shared behind Arc
// across concurrent engine tasks.

use crate::eventloop::{spawn_event_loop, EventLoopHandle};
use crate::events::EventSet;
use crate::protocol::*;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct WireConnection {
    event_loop: EventLoopHandle,
    next_id: AtomicU32,
}

impl WireConnection {
    /// Attach to a target over TCP.
    pub async fn attach(host: &str, port: u16) -> WireResult<Self> {
        info!("attaching to target at {}:{}", host, port);

        let stream = TcpStream::connect((host, port)).await?;
        Self::over(stream).await
    }

    /// Attach over an arbitrary established transport. Used by tests to
    /// drive the client against an in-memory pipe.
    pub async fn over<S>(mut stream: S) -> WireResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::handshake(&mut stream).await?;

        let (reader, writer) = tokio::io::split(stream);
        let event_loop = spawn_event_loop(reader, writer);

        Ok(Self {
            event_loop,
            next_id: AtomicU32::new(1),
        })
    }

    async fn handshake<S>(stream: &mut S) -> WireResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("performing wire handshake");

        stream.write_all(HANDSHAKE).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; HANDSHAKE.len()];
        stream.read_exact(&mut buf).await?;

        if buf != HANDSHAKE {
            warn!("invalid handshake response: {:?}", buf);
            return Err(WireError::InvalidHandshake);
        }

        debug!("wire handshake successful");
        Ok(())
    }

    /// Send a command and wait for its reply.
    pub async fn send_command(&self, packet: CommandPacket) -> WireResult<ReplyPacket> {
        debug!("sending command packet id={}", packet.id);
        self.event_loop.send_command(packet).await
    }

    /// Subscribe to asynchronous events from the target.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventSet> {
        self.event_loop.subscribe_events()
    }

    /// A watch that flips to `false` when the connection dies.
    pub fn liveness(&self) -> watch::Receiver<bool> {
        self.event_loop.liveness()
    }

    pub fn is_alive(&self) -> bool {
        self.event_loop.is_alive()
    }

    /// Generate the next packet ID.
    pub fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_over_duplex() {
        let (client, server) = tokio::io::duplex(256);

        let server_task = tokio::spawn(async move {
            let mut server = server;
            let mut buf = vec![0u8; HANDSHAKE.len()];
            server.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, HANDSHAKE);
            server.write_all(HANDSHAKE).await.unwrap();
            server
        });

        let conn = WireConnection::over(client).await.unwrap();
        assert!(conn.is_alive());
        assert_eq!(conn.next_id(), 1);
        assert_eq!(conn.next_id(), 2);

        // Keep the server end alive until the assertions ran
        drop(server_task.await.unwrap());
    }

    #[tokio::test]
    async fn test_handshake_rejects_garbage() {
        let (client, server) = tokio::io::duplex(256);

        tokio::spawn(async move {
            let mut server = server;
            let mut buf = vec![0u8; HANDSHAKE.len()];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(b"NOT-A-HANDSHAKE").await.unwrap();
        });

        let result = WireConnection::over(client).await;
        assert!(matches!(result, Err(WireError::InvalidHandshake)));
    }
}
