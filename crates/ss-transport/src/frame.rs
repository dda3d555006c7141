//! Wire frame codec.
//!
//! Every frame on a bus connection is `flags: u8` + `len: u32 BE` + payload.
//! `FLAG_MORE` chains frames into one multipart message.  `FLAG_COMMAND`
//! marks a standalone subscription-control frame whose payload is one
//! status byte (0x01 subscribe, 0x00 unsubscribe) followed by the topic
//! prefix — the classic SUB wire convention.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// More frames follow in this message.
pub const FLAG_MORE: u8 = 0x01;
/// Subscription-control frame.
pub const FLAG_COMMAND: u8 = 0x02;

/// Frames above this are a protocol error; the connection is dropped.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Message model
// ---------------------------------------------------------------------------

/// One complete unit read off a bus connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// An ordered multipart data message (frame 0 is the topic).
    Data(Vec<Vec<u8>>),
    /// Subscribe to a topic prefix.
    Subscribe(Vec<u8>),
    /// Unsubscribe from a topic prefix.
    Unsubscribe(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte cap")]
    Oversized(usize),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read one complete [`WireMessage`].
///
/// Not cancel-safe: dropping the future mid-frame desynchronizes the
/// stream.  Callers run it in a dedicated reader task and select on that
/// task's channel instead.
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut frames: Vec<Vec<u8>> = Vec::with_capacity(2);

    loop {
        let flags = reader.read_u8().await?;
        let len = reader.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(len));
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        if flags & FLAG_COMMAND != 0 {
            if !frames.is_empty() || flags & FLAG_MORE != 0 {
                return Err(FrameError::Malformed("command frame inside a multipart"));
            }
            let (&status, prefix) = payload
                .split_first()
                .ok_or(FrameError::Malformed("empty command frame"))?;
            return match status {
                0x01 => Ok(WireMessage::Subscribe(prefix.to_vec())),
                0x00 => Ok(WireMessage::Unsubscribe(prefix.to_vec())),
                _ => Err(FrameError::Malformed("unknown command status byte")),
            };
        }

        frames.push(payload);
        if flags & FLAG_MORE == 0 {
            return Ok(WireMessage::Data(frames));
        }
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write one multipart data message; the frame sequence is atomic from the
/// reader's perspective because the caller serializes writes per connection.
pub async fn write_data<W>(writer: &mut W, frames: &[Vec<u8>]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if frames.is_empty() {
        return Err(FrameError::Malformed("empty multipart"));
    }
    for (i, frame) in frames.iter().enumerate() {
        if frame.len() > MAX_FRAME_LEN {
            return Err(FrameError::Oversized(frame.len()));
        }
        let flags = if i + 1 < frames.len() { FLAG_MORE } else { 0 };
        writer.write_u8(flags).await?;
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Write a subscribe (`true`) or unsubscribe (`false`) command frame.
pub async fn write_subscription<W>(
    writer: &mut W,
    prefix: &[u8],
    subscribe: bool,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(FLAG_COMMAND).await?;
    writer.write_u32(prefix.len() as u32 + 1).await?;
    writer.write_u8(if subscribe { 0x01 } else { 0x00 }).await?;
    writer.write_all(prefix).await?;
    writer.flush().await?;
    Ok(())
}
