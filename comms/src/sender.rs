//! The sending end of the framed protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// The sending end handle of the communication.
///
/// Every message goes out as one frame: a big endian length followed by the body. The
/// body is the serialized header of the message plus, for numeric payloads, the values
/// written straight from the caller's slice.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    head: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender`.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            head: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame and flushes the writer.
    ///
    /// # Returns
    /// An `InvalidInput` error if the frame is over the limit the receiving end accepts,
    /// nothing is written in that case, or the `io::Error` of the writer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { tx, head } = self;

        head.clear();
        head.extend_from_slice(&[0; LEN_TYPE_SIZE]);

        let trailing = msg.serialize(head);
        let body_len = head.len() - LEN_TYPE_SIZE + trailing.map_or(0, <[u8]>::len);

        if body_len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {body_len} bytes exceeds the limit of {MAX_FRAME_LEN} bytes"),
            ));
        }

        head[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());
        tx.write_all(head).await?;

        if let Some(data) = trailing {
            tx.write_all(data).await?;
        }

        tx.flush().await
    }
}
