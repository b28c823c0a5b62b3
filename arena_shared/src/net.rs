//! Framing layer.
//!
//! Every message in both directions is a 4-byte big-endian length followed by
//! exactly that many payload bytes. This module knows nothing about payload
//! contents; see `protocol` for the codecs.

use std::{fmt, io, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
    time,
};

/// Size of the length prefix.
pub const LEN_PREFIX: usize = 4;

/// Largest command payload the server accepts from a client.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Largest server message a client accepts. The server refuses configs whose
/// worst-case room state would not fit.
pub const MAX_BROADCAST_LEN: usize = 16 * 1024 * 1024;

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a length prefix.
    Idle,
    /// Waiting for the rest of a frame.
    Frame,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Idle => write!(f, "idle read"),
            Stage::Frame => write!(f, "frame read"),
            Stage::Write => write!(f, "write"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("peer closed the connection")]
    Closed,
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            WireError::Closed
        } else {
            WireError::Io(e)
        }
    }
}

/// Prefixes `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Reads one frame of at most `max_len` payload bytes.
///
/// `idle` bounds the wait for the length prefix, `frame` bounds the wait for
/// the payload once the length is known. Short reads are retried until the
/// frame is complete; EOF at any point is `WireError::Closed`.
pub async fn read_frame<R>(
    reader: &mut R,
    idle: Duration,
    frame: Duration,
    max_len: usize,
) -> Result<Bytes, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match time::timeout(idle, reader.read_exact(&mut len_buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => return Err(WireError::from_read(e)),
        Err(_) => {
            return Err(WireError::Timeout {
                stage: Stage::Idle,
                after: idle,
            })
        }
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(WireError::FrameTooLarge { len, max: max_len });
    }

    let mut payload = BytesMut::zeroed(len);
    match time::timeout(frame, reader.read_exact(&mut payload)).await {
        Ok(Ok(_)) => Ok(payload.freeze()),
        Ok(Err(e)) => Err(WireError::from_read(e)),
        Err(_) => Err(WireError::Timeout {
            stage: Stage::Frame,
            after: frame,
        }),
    }
}

/// Writes one whole frame within `deadline`. A short write is an error.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], deadline: Duration) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(payload);
    let write = async {
        writer.write_all(&buf).await?;
        writer.flush().await
    };
    match time::timeout(deadline, write).await {
        Ok(res) => res.map_err(WireError::Io),
        Err(_) => Err(WireError::Timeout {
            stage: Stage::Write,
            after: deadline,
        }),
    }
}

/// Client side of a framed TCP connection.
#[derive(Debug)]
pub struct FramedConn {
    stream: TcpStream,
    frame_timeout: Duration,
    max_frame: usize,
}

impl FramedConn {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, WireError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            frame_timeout: Duration::from_secs(30),
            max_frame: MAX_BROADCAST_LEN,
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), WireError> {
        write_frame(&mut self.stream, payload, self.frame_timeout).await
    }

    /// Waits up to `timeout` for the next frame to start.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Bytes, WireError> {
        read_frame(&mut self.stream, timeout, self.frame_timeout, self.max_frame).await
    }

    /// Writes raw bytes without framing them.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
