//! Signal-controller wire protocol.
//!
//! Single-byte commands from the controller, one text line back for a
//! sensor read-back:
//!
//! | Byte  | Meaning              |
//! |-------|----------------------|
//! | `'0'` | NS green, EW red     |
//! | `'1'` | EW green, NS red     |
//! | `'2'` | all yellow           |
//! | `'3'` | all red              |
//! | `'9'` | sensor read-back     |
//!
//! The read-back reply is `N:<0|1>,S:<0|1>,E:<0|1>,W:<0|1>\n`. The device
//! silently ignores any other byte.

use std::fmt;

use crate::error::SensorFrameError;
use crate::intersection::Direction;
use crate::phase::Phase;

/// A single command byte understood by the signal controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireCommand {
    /// `'0'`
    NsGreen,
    /// `'1'`
    EwGreen,
    /// `'2'`
    AllYellow,
    /// `'3'`
    AllRed,
    /// `'9'`
    RequestSensors,
}

impl WireCommand {
    /// Command that shows `phase` on the signal heads.
    #[must_use]
    pub const fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::NsGreen => Self::NsGreen,
            Phase::EwGreen => Self::EwGreen,
            Phase::AllYellow => Self::AllYellow,
            Phase::AllRed => Self::AllRed,
        }
    }

    /// The byte sent on the wire.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::NsGreen => b'0',
            Self::EwGreen => b'1',
            Self::AllYellow => b'2',
            Self::AllRed => b'3',
            Self::RequestSensors => b'9',
        }
    }

    /// Decodes a received byte; `None` for bytes the device ignores.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::NsGreen),
            b'1' => Some(Self::EwGreen),
            b'2' => Some(Self::AllYellow),
            b'3' => Some(Self::AllRed),
            b'9' => Some(Self::RequestSensors),
            _ => None,
        }
    }

    /// Phase shown after this command, or `None` for the read-back request.
    #[must_use]
    pub const fn phase(self) -> Option<Phase> {
        match self {
            Self::NsGreen => Some(Phase::NsGreen),
            Self::EwGreen => Some(Phase::EwGreen),
            Self::AllYellow => Some(Phase::AllYellow),
            Self::AllRed => Some(Phase::AllRed),
            Self::RequestSensors => None,
        }
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", char::from(self.as_byte()))
    }
}

/// Presence flags read back from the IR sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorFrame {
    present: [bool; 4],
}

impl SensorFrame {
    /// Builds a frame from flags in [`Direction::ALL`] order.
    #[must_use]
    pub const fn new(present: [bool; 4]) -> Self {
        Self { present }
    }

    /// Parses one read-back line.
    ///
    /// All four keys must appear exactly once, in any order, each with the
    /// value `0` or `1`. A trailing `\n` and/or `\r` is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`SensorFrameError::Malformed`] for anything else.
    pub fn parse(line: &str) -> Result<Self, SensorFrameError> {
        let body = line.strip_suffix('\n').unwrap_or(line);
        let body = body.strip_suffix('\r').unwrap_or(body);

        if body.is_empty() {
            return Err(SensorFrameError::malformed(line, "empty line"));
        }

        let mut seen = [false; 4];
        let mut present = [false; 4];

        for field in body.split(',') {
            let Some((key, value)) = field.split_once(':') else {
                return Err(SensorFrameError::malformed(
                    line,
                    format!("field '{field}' is not KEY:VALUE"),
                ));
            };

            let direction = match key {
                "N" => Direction::North,
                "S" => Direction::South,
                "E" => Direction::East,
                "W" => Direction::West,
                other => {
                    return Err(SensorFrameError::malformed(
                        line,
                        format!("unknown key '{other}'"),
                    ));
                }
            };

            let idx = direction.index();
            if seen[idx] {
                return Err(SensorFrameError::malformed(
                    line,
                    format!("duplicate key '{key}'"),
                ));
            }
            seen[idx] = true;

            present[idx] = match value {
                "0" => false,
                "1" => true,
                other => {
                    return Err(SensorFrameError::malformed(
                        line,
                        format!("value '{other}' for '{key}' is not 0 or 1"),
                    ));
                }
            };
        }

        if let Some(missing) = Direction::ALL.iter().find(|d| !seen[d.index()]) {
            return Err(SensorFrameError::malformed(
                line,
                format!("missing key '{}'", missing.key()),
            ));
        }

        Ok(Self { present })
    }

    /// Whether the sensor for `direction` reports presence.
    #[must_use]
    pub const fn is_present(&self, direction: Direction) -> bool {
        self.present[direction.index()]
    }

    /// Flags in [`Direction::ALL`] order.
    #[must_use]
    pub const fn flags(&self) -> [bool; 4] {
        self.present
    }

    /// Renders the frame the way the device sends it, newline included.
    #[must_use]
    pub fn to_line(&self) -> String {
        let fields: Vec<String> = Direction::ALL
            .iter()
            .map(|d| format!("{}:{}", d.key(), u8::from(self.is_present(*d))))
            .collect();
        format!("{}\n", fields.join(","))
    }
}
