//! Transport abstraction layer.
//!
//! Provides the [`SerialLink`] trait the actuation bridge drives, the wire
//! codec shared by every link, and the observation feed read from stdin.
//!
//! Links are chosen by address string:
//!
//! | Address            | Link                                   |
//! |--------------------|----------------------------------------|
//! | `serial:<path>`    | device node, see [`StreamLink`]        |
//! | `<path>`           | same as `serial:<path>`                |
//! | `tcp://host:port`  | serial-over-TCP bridge (e.g. ser2net)  |
//! | `emulate`          | in-process [`SignalHeadEmulator`]      |

pub mod emulator;
pub mod feed;
pub mod serial;
pub mod wire;

pub use emulator::SignalHeadEmulator;
pub use feed::{FeedApproach, FeedMessage, FeedReader};
pub use serial::StreamLink;
pub use wire::{SensorFrame, WireCommand};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::info;

use crate::config::schema::HardwareConfig;
use crate::error::TransportError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Longest sensor read-back line accepted from a link.
///
/// A well-formed frame is 16 bytes; anything far longer is line noise.
pub const MAX_SENSOR_LINE: usize = 256;

/// Async link to the signal controller.
///
/// Implementations use `&self` with interior mutability so the bridge can
/// hold the link behind a `Box<dyn SerialLink>` and still write and read
/// without exclusive access.
#[async_trait::async_trait]
pub trait SerialLink: Send + Sync {
    /// Writes one command byte and flushes it.
    async fn write_command(&self, command: WireCommand) -> Result<()>;

    /// Reads one line sent by the device, without its terminator.
    ///
    /// Returns `Ok(None)` on EOF. Must be cancel-safe: the bridge bounds
    /// every read with a timeout.
    async fn read_line(&self) -> Result<Option<String>>;

    /// Drops input that arrived before the next request, returning how
    /// many lines (complete or partial) were discarded.
    async fn discard_input(&self) -> usize {
        0
    }

    /// Returns the type of this link for logging and metrics.
    fn link_type(&self) -> LinkType;
}

/// Link type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Local serial device node
    Serial,
    /// Serial-over-TCP bridge
    Tcp,
    /// In-process emulator
    Emulated,
    /// Anything else (test doubles, custom streams)
    Stream,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
            Self::Emulated => write!(f, "emulated"),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// Parsed link address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAddress {
    /// Device node path
    Serial(PathBuf),
    /// `host:port` of a serial-over-TCP bridge
    Tcp(String),
    /// In-process emulator
    Emulate,
}

impl FromStr for LinkAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::ConnectionFailed(
                "empty link address".to_string(),
            ));
        }
        if s == "emulate" {
            return Ok(Self::Emulate);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if !addr.contains(':') {
                return Err(TransportError::ConnectionFailed(format!(
                    "tcp address '{addr}' needs host:port"
                )));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        let path = s.strip_prefix("serial:").unwrap_or(s);
        Ok(Self::Serial(PathBuf::from(path)))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "serial:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Emulate => f.write_str("emulate"),
        }
    }
}

/// Opens the link described by the hardware configuration.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionFailed`] if the address is invalid or
/// the device or bridge cannot be reached.
pub async fn open_link(config: &HardwareConfig) -> Result<Box<dyn SerialLink>> {
    let address: LinkAddress = config.port.parse()?;

    let link: Box<dyn SerialLink> = match &address {
        LinkAddress::Serial(path) => {
            let file = tokio::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .await
                .map_err(|e| {
                    TransportError::ConnectionFailed(format!("{}: {e}", path.display()))
                })?;
            Box::new(StreamLink::new(file, LinkType::Serial))
        }
        LinkAddress::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str())
                .await
                .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;
            stream.set_nodelay(true)?;
            Box::new(StreamLink::new(stream, LinkType::Tcp))
        }
        LinkAddress::Emulate => Box::new(SignalHeadEmulator::new(config.presence_threshold)),
    };

    info!(
        %address,
        link = %link.link_type(),
        baud_rate = config.baud_rate,
        "signal link opened"
    );
    Ok(link)
}
