//! Byte-stream link.
//!
//! Implements [`SerialLink`] over any `AsyncRead + AsyncWrite` stream: a
//! serial device node opened as a file, a TCP connection to a ser2net
//! bridge, or an in-memory duplex pipe in tests.

use std::io::ErrorKind;

use futures_util::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::debug;

use super::{LinkType, MAX_SENSOR_LINE, Result, SerialLink, WireCommand};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// [`SerialLink`] over a split byte stream.
///
/// Reader and writer sit behind separate `tokio::sync::Mutex` locks so a
/// pending read never blocks a command write. The async mutex is needed
/// because the locks are held across `.await` points.
///
/// Partial lines live in the codec buffer, so a read dropped by a timeout
/// loses nothing and the next read picks up where it stopped.
pub struct StreamLink {
    reader: Mutex<LineReader>,
    writer: Mutex<BoxedWriter>,
    link_type: LinkType,
}

struct LineReader {
    lines: FramedRead<BoxedReader, LinesCodec>,
    // FramedRead yields one `None` after a decode error, then resumes
    skip_next_end: bool,
}

type Decoded = std::result::Result<String, LinesCodecError>;

enum Step {
    Line(String),
    Skip,
    Eof,
}

impl LineReader {
    fn new(reader: BoxedReader) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_SENSOR_LINE)),
            skip_next_end: false,
        }
    }

    fn step(&mut self, item: Option<Decoded>) -> Result<Step> {
        match item {
            Some(Ok(line)) => Ok(Step::Line(line)),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                self.skip_next_end = true;
                debug!(limit = MAX_SENSOR_LINE, "oversized sensor line dropped");
                Ok(Step::Skip)
            }
            Some(Err(LinesCodecError::Io(e))) if e.kind() == ErrorKind::InvalidData => {
                self.skip_next_end = true;
                debug!("non-UTF-8 sensor line dropped");
                Ok(Step::Skip)
            }
            Some(Err(LinesCodecError::Io(e))) => {
                self.skip_next_end = true;
                Err(e.into())
            }
            None if self.skip_next_end => {
                self.skip_next_end = false;
                Ok(Step::Skip)
            }
            None => Ok(Step::Eof),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            let item = self.lines.next().await;
            match self.step(item)? {
                Step::Line(line) => return Ok(Some(line)),
                Step::Skip => {}
                Step::Eof => return Ok(None),
            }
        }
    }

    fn discard_buffered(&mut self) -> usize {
        let mut discarded = 0;
        while let Some(item) = self.lines.next().now_or_never() {
            match self.step(item) {
                Ok(Step::Line(_)) => discarded += 1,
                Ok(Step::Skip) => {}
                Ok(Step::Eof) | Err(_) => break,
            }
        }
        if !self.lines.read_buffer().is_empty() {
            // A partial line left over from an abandoned read
            self.lines.read_buffer_mut().clear();
            *self.lines.decoder_mut() = LinesCodec::new_with_max_length(MAX_SENSOR_LINE);
            discarded += 1;
        }
        discarded
    }
}

impl StreamLink {
    /// Wraps a bidirectional stream.
    pub fn new<S>(stream: S, link_type: LinkType) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(read_half, write_half, link_type)
    }

    /// Wraps separate read and write halves.
    pub fn from_parts<R, W>(reader: R, writer: W, link_type: LinkType) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(LineReader::new(Box::new(reader))),
            writer: Mutex::new(Box::new(writer)),
            link_type,
        }
    }
}

impl std::fmt::Debug for StreamLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLink")
            .field("link_type", &self.link_type)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl SerialLink for StreamLink {
    async fn write_command(&self, command: WireCommand) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&[command.as_byte()]).await?;
        writer.flush().await?;
        drop(writer);
        Ok(())
    }

    async fn read_line(&self) -> Result<Option<String>> {
        self.reader.lock().await.next_line().await
    }

    async fn discard_input(&self) -> usize {
        self.reader.lock().await.discard_buffered()
    }

    fn link_type(&self) -> LinkType {
        self.link_type
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_write_command_sends_single_byte() {
        let (ours, mut device) = tokio::io::duplex(64);
        let link = StreamLink::new(ours, LinkType::Stream);

        link.write_command(WireCommand::AllYellow).await.unwrap();
        link.write_command(WireCommand::RequestSensors).await.unwrap();

        let mut buf = [0u8; 2];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"29");
    }

    #[tokio::test]
    async fn test_read_line_returns_lines_then_eof() {
        let (ours, mut device) = tokio::io::duplex(64);
        let link = StreamLink::new(ours, LinkType::Stream);

        device.write_all(b"N:1,S:0,E:0,W:0\r\nN:0,S").await.unwrap();
        drop(device);

        assert_eq!(
            link.read_line().await.unwrap().as_deref(),
            Some("N:1,S:0,E:0,W:0")
        );
        // Last line without terminator is still returned
        assert_eq!(link.read_line().await.unwrap().as_deref(), Some("N:0,S"));
        assert_eq!(link.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_skips_runaway_input() {
        let mock = tokio_test::io::Builder::new()
            .read(&[b'x'; 1000])
            .read(b"\nN:0,S:0,E:0,W:1\n")
            .build();
        let link = StreamLink::from_parts(mock, tokio::io::sink(), LinkType::Stream);

        assert_eq!(
            link.read_line().await.unwrap().as_deref(),
            Some("N:0,S:0,E:0,W:1")
        );
    }

    #[tokio::test]
    async fn test_read_line_skips_invalid_utf8() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\xff\xfe\nN:1,S:1,E:0,W:0\n")
            .build();
        let link = StreamLink::from_parts(mock, tokio::io::sink(), LinkType::Stream);

        assert_eq!(
            link.read_line().await.unwrap().as_deref(),
            Some("N:1,S:1,E:0,W:0")
        );
    }

    #[tokio::test]
    async fn test_timed_out_read_keeps_partial_line() {
        let (ours, mut device) = tokio::io::duplex(64);
        let link = StreamLink::new(ours, LinkType::Stream);

        device.write_all(b"N:1,S:0").await.unwrap();
        let first = tokio::time::timeout(Duration::from_millis(50), link.read_line()).await;
        assert!(first.is_err());

        device.write_all(b",E:0,W:0\n").await.unwrap();
        assert_eq!(
            link.read_line().await.unwrap().as_deref(),
            Some("N:1,S:0,E:0,W:0")
        );
    }

    #[tokio::test]
    async fn test_discard_input_drops_stale_and_partial_lines() {
        let (ours, mut device) = tokio::io::duplex(64);
        let link = StreamLink::new(ours, LinkType::Stream);

        device.write_all(b"N:1,S:0").await.unwrap();
        let late = tokio::time::timeout(Duration::from_millis(20), link.read_line()).await;
        assert!(late.is_err());
        device.write_all(b",E:0,W:0\nN:0,S:1,E:0,W:0\nN:0").await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(link.discard_input().await, 3);
        assert_eq!(link.discard_input().await, 0);

        device.write_all(b"N:0,S:0,E:1,W:0\n").await.unwrap();
        assert_eq!(
            link.read_line().await.unwrap().as_deref(),
            Some("N:0,S:0,E:1,W:0")
        );
    }

    #[tokio::test]
    async fn test_write_to_closed_peer_fails() {
        let (ours, device) = tokio::io::duplex(64);
        drop(device);
        let link = StreamLink::new(ours, LinkType::Stream);
        assert!(link.write_command(WireCommand::AllRed).await.is_err());
    }
}
