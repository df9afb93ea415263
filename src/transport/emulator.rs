//! In-process signal-head emulator.
//!
//! Behaves like the controller firmware: each phase byte switches the lamps,
//! `'9'` answers with one sensor line, and every other byte is ignored.
//! IR sensors are modelled as analog readings; a reading above the
//! presence threshold reports `1`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use crate::intersection::{Axis, Direction};
use crate::phase::Phase;

use super::{LinkType, Result, SensorFrame, SerialLink, WireCommand};

/// Colour shown by one signal head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    /// Stop
    Red,
    /// Clearance
    Yellow,
    /// Go
    Green,
}

/// Lamp colours on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LampState {
    /// North and South heads
    pub north_south: Lamp,
    /// East and West heads
    pub east_west: Lamp,
}

impl LampState {
    /// Lamps for a phase.
    #[must_use]
    pub const fn for_phase(phase: Phase) -> Self {
        let (north_south, east_west) = match phase {
            Phase::NsGreen => (Lamp::Green, Lamp::Red),
            Phase::EwGreen => (Lamp::Red, Lamp::Green),
            Phase::AllYellow => (Lamp::Yellow, Lamp::Yellow),
            Phase::AllRed => (Lamp::Red, Lamp::Red),
        };
        Self {
            north_south,
            east_west,
        }
    }

    /// Lamp on the given axis.
    #[must_use]
    pub const fn axis(&self, axis: Axis) -> Lamp {
        match axis {
            Axis::NorthSouth => self.north_south,
            Axis::EastWest => self.east_west,
        }
    }
}

/// Bytes of receive history kept for inspection.
pub const HISTORY_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Heads {
    lamps: LampState,
    readings: [u16; 4],
    history: VecDeque<u8>,
}

#[derive(Debug)]
struct Shared {
    heads: Mutex<Heads>,
    threshold: u16,
    replies_tx: mpsc::UnboundedSender<String>,
    replies_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

/// Emulated signal controller.
///
/// Clones share the same device, so a test or operator can adjust sensor
/// readings while the bridge owns the boxed link.
#[derive(Debug, Clone)]
pub struct SignalHeadEmulator {
    shared: Arc<Shared>,
}

impl SignalHeadEmulator {
    /// Creates an emulator that powers up all-red with quiet sensors.
    #[must_use]
    pub fn new(presence_threshold: u16) -> Self {
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                heads: Mutex::new(Heads {
                    lamps: LampState::for_phase(Phase::AllRed),
                    readings: [0; 4],
                    history: VecDeque::with_capacity(HISTORY_CAPACITY),
                }),
                threshold: presence_threshold,
                replies_tx,
                replies_rx: tokio::sync::Mutex::new(replies_rx),
            }),
        }
    }

    /// Sets the analog reading of one IR sensor.
    pub fn set_reading(&self, direction: Direction, value: u16) {
        self.heads().readings[direction.index()] = value;
    }

    /// Current lamp colours.
    #[must_use]
    pub fn lamps(&self) -> LampState {
        self.heads().lamps
    }

    /// The last [`HISTORY_CAPACITY`] bytes received, including ignored ones.
    #[must_use]
    pub fn received(&self) -> Vec<u8> {
        self.heads().history.iter().copied().collect()
    }

    /// Feeds one raw byte to the emulated firmware.
    pub fn receive_byte(&self, byte: u8) {
        let mut heads = self.heads();
        if heads.history.len() == HISTORY_CAPACITY {
            heads.history.pop_front();
        }
        heads.history.push_back(byte);

        match WireCommand::from_byte(byte) {
            Some(WireCommand::RequestSensors) => {
                let frame = SensorFrame::new(heads.readings.map(|r| r > self.shared.threshold));
                drop(heads);
                // The receiver lives in `shared`, so this cannot fail
                let _ = self.shared.replies_tx.send(frame.to_line().trim_end().to_owned());
            }
            Some(command) => {
                if let Some(phase) = command.phase() {
                    heads.lamps = LampState::for_phase(phase);
                    trace!(%phase, "emulator lamps switched");
                }
            }
            None => trace!(byte, "emulator ignored byte"),
        }
    }

    fn heads(&self) -> std::sync::MutexGuard<'_, Heads> {
        self.shared
            .heads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl SerialLink for SignalHeadEmulator {
    async fn write_command(&self, command: WireCommand) -> Result<()> {
        self.receive_byte(command.as_byte());
        Ok(())
    }

    async fn read_line(&self) -> Result<Option<String>> {
        let mut rx = self.shared.replies_rx.lock().await;
        Ok(rx.recv().await)
    }

    async fn discard_input(&self) -> usize {
        let mut rx = self.shared.replies_rx.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    fn link_type(&self) -> LinkType {
        LinkType::Emulated
    }
}
