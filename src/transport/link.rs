//! Line-oriented view of a transport stream

use super::{BoxedStream, TransportError};
use carwatch_shared::codec::{self, LineDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sends and receives single text lines over one stream
pub struct LineLink<S = BoxedStream> {
    stream: S,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
}

impl<S> LineLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: LineDecoder::new(),
            read_buf: vec![0u8; 1024],
        }
    }

    /// Write `text` followed by a newline and flush
    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let frame = codec::encode_line(text)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next complete line.
    ///
    /// Fails once the peer closes the stream, even if a partial line is
    /// buffered. Cancel safe: bytes already read stay in the decoder.
    pub async fn receive(&mut self) -> Result<String, TransportError> {
        loop {
            if let Some(line) = self.decoder.decode_next()? {
                return Ok(line);
            }

            match self.stream.read(&mut self.read_buf).await? {
                0 => {
                    return Err(TransportError::Closed {
                        pending: self.decoder.pending(),
                    })
                }
                n => self.decoder.extend(&self.read_buf[..n]),
            }
        }
    }

    /// Shut the write half down and drop the stream
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
