//! Framed message transport over TCP.
//!
//! Every frame is a 4 byte big-endian length followed by one
//! bincode-encoded [`Message`]. A [`MiningConn`] is shared by reference
//! between the duties of a connection: the read and write halves are locked
//! independently so one task can block on `recv_msg` while another sends.

use std::{fmt::Display, net::SocketAddr};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::AsyncWriteExt,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
        ToSocketAddrs,
    },
    sync::Mutex,
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
    sync::CancellationToken,
};
use tracing::*;

use crate::{
    errors::{StreamError, StreamResult},
    proto::{Message, Role},
};

/// Upper limit for a single encoded message.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

type StreamReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
type StreamWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().max_frame_length(MAX_FRAME_LENGTH).new_codec()
}

pub struct MiningConn {
    role: Role,
    peer: Option<SocketAddr>,
    reader: Mutex<StreamReader>,
    // `None` once closed
    writer: Mutex<Option<StreamWriter>>,
    closed: CancellationToken,
}

impl MiningConn {
    /// Wraps an established stream; `role` is the local end.
    pub fn new(stream: TcpStream, role: Role) -> Self {
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        Self {
            role,
            peer,
            reader: Mutex::new(FramedRead::new(read_half, codec())),
            writer: Mutex::new(Some(FramedWrite::new(write_half, codec()))),
            closed: CancellationToken::new(),
        }
    }

    /// Printable peer address for log lines.
    pub fn peer(&self) -> String {
        self.peer.map(|addr| addr.to_string()).unwrap_or_else(|| "unknown".to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`MiningConn::close`] has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub async fn send_msg(&self, msg: &Message) -> StreamResult<()> {
        self.role.check_send(msg)?;
        let frame = bincode::serialize(msg)?;

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            _ = self.closed.cancelled() => return Err(StreamError::Closed),
        };
        let writer = match guard.as_mut() {
            Some(writer) if !self.closed.is_cancelled() => writer,
            _ => return Err(StreamError::Closed),
        };

        trace!("send to {}: {msg:?}", self.peer());
        // a peer that stopped reading must not keep `close` waiting on the lock
        tokio::select! {
            res = writer.send(Bytes::from(frame)) => res?,
            _ = self.closed.cancelled() => return Err(StreamError::Closed),
        }
        Ok(())
    }

    /// Waits for the next message.
    ///
    /// Fails with [`StreamError::Closed`] on end-of-stream or when
    /// [`MiningConn::close`] is called, even while already waiting.
    pub async fn recv_msg(&self) -> StreamResult<Message> {
        let mut reader = tokio::select! {
            guard = self.reader.lock() => guard,
            _ = self.closed.cancelled() => return Err(StreamError::Closed),
        };

        let frame = tokio::select! {
            frame = reader.next() => frame,
            _ = self.closed.cancelled() => return Err(StreamError::Closed),
        };

        let frame = match frame {
            Some(frame) => frame?,
            None => return Err(StreamError::Closed),
        };

        let msg: Message = bincode::deserialize(&frame)?;
        trace!("recv from {}: {msg:?}", self.peer());
        self.role.check_receive(&msg)?;
        Ok(msg)
    }

    /// Shuts the connection down. Calling it again is a no-op.
    pub async fn close(&self) {
        self.closed.cancel();
        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            debug!("closing connection to {}", self.peer());
            // skip the codec flush, a half written frame may sit in its buffer
            if let Err(err) = writer.into_inner().shutdown().await {
                debug!("shutdown of {} failed: {err}", self.peer());
            }
        }
    }
}

/// Opens a connection whose local end plays `role`.
pub async fn connect<A>(addr: A, role: Role) -> StreamResult<MiningConn>
where
    A: ToSocketAddrs + Display, {
    debug!("connect: [{addr}] as {role:?}");
    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    Ok(MiningConn::new(stream, role))
}

/// Connects to a pool as a miner and announces itself with `MinerHello`.
pub async fn connect_miner<A>(addr: A) -> StreamResult<MiningConn>
where
    A: ToSocketAddrs + Display, {
    let conn = connect(addr, Role::Miner).await?;
    conn.send_msg(&Message::miner_hello()).await?;
    Ok(conn)
}
