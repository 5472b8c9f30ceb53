//! Length-prefixed JSON frames over any async byte stream (TCP, pipes, duplex).

use crate::message::{decode_length, decode_message, encode_message, WireMessage};
use crate::transport::{Inbound, Transport, WireError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write a framed message (4-byte length + JSON) to a stream.
pub async fn write_message<W>(writer: &mut W, msg: &WireMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = encode_message(msg)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON) from a stream.
pub async fn read_message<R>(reader: &mut R, max_frame: u32) -> Result<WireMessage, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_frame {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_frame,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}

/// A transport over a byte stream.
///
/// A background task owns the read half and pushes decoded frames into the
/// inbound channel; the stream ends on EOF, an IO error, or an oversized
/// frame. Malformed JSON frames are logged and skipped.
pub struct StreamTransport {
    peer: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
    connected: Arc<AtomicBool>,
    inbound: Mutex<Option<Inbound>>,
}

impl StreamTransport {
    /// Wrap `stream` and start its reader task. Must be called inside a
    /// tokio runtime.
    pub fn new<S>(peer_name: impl Into<String>, stream: S, max_frame: u32) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let peer = peer_name.into();
        let (mut reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&connected);
        let task_peer = peer.clone();
        tokio::spawn(async move {
            loop {
                match read_message(&mut reader, max_frame).await {
                    Ok(msg) => {
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(WireError::Json(e)) => {
                        warn!(peer = %task_peer, error = %e, "Dropping malformed frame");
                    }
                    Err(WireError::ConnectionClosed) => {
                        debug!(peer = %task_peer, "Stream closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %task_peer, error = %e, "Stream read failed");
                        break;
                    }
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Self {
            peer,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            connected,
            inbound: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl Transport for StreamTransport {
    fn peer_name(&self) -> &str {
        &self.peer
    }

    async fn send(&self, msg: WireMessage) -> Result<(), WireError> {
        if !self.is_connected() {
            return Err(WireError::NotConnected(self.peer.clone()));
        }
        let mut writer = self.writer.lock().await;
        let result = write_message(&mut **writer, &msg).await;
        if result.is_err() {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    fn take_inbound(&self) -> Option<Inbound> {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
