//! Observation feed.
//!
//! NDJSON on stdin from the upstream simulation or sensor layer. Each line
//! is one [`FeedMessage`]. Oversized or unparsable lines are logged and
//! skipped; EOF ends the feed without stopping the controller.

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::ControlCommand;
use crate::intersection::ApproachObservation;
use crate::strategy::StrategyKind;

/// One observation-feed line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    /// Fresh observations for all four approaches
    Observations {
        /// Northern approach
        #[serde(default)]
        north: FeedApproach,
        /// Southern approach
        #[serde(default)]
        south: FeedApproach,
        /// Eastern approach
        #[serde(default)]
        east: FeedApproach,
        /// Western approach
        #[serde(default)]
        west: FeedApproach,
    },

    /// Switch the selected strategy
    SelectStrategy {
        /// Strategy to select
        strategy: StrategyKind,
    },

    /// Leave fallback and return to the selected strategy
    ResetFallback,
}

/// Observation of one approach as it appears on the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedApproach {
    /// Vehicles queued at the stop line
    pub queue_length: u32,
    /// Cumulative wait in seconds
    pub wait_secs: f64,
    /// Vehicles that have cleared the intersection
    pub vehicles_passed: u64,
    /// Emergency vehicle approaching
    pub emergency: bool,
}

impl From<FeedApproach> for ApproachObservation {
    fn from(a: FeedApproach) -> Self {
        // Negative or non-finite waits count as no wait
        let wait_time = Duration::try_from_secs_f64(a.wait_secs).unwrap_or(Duration::ZERO);
        Self {
            queue_length: a.queue_length,
            wait_time,
            vehicles_passed: a.vehicles_passed,
            emergency_vehicle_present: a.emergency,
        }
    }
}

impl FeedMessage {
    /// Converts the message into the controller command it stands for.
    #[must_use]
    pub fn into_command(self) -> ControlCommand {
        match self {
            Self::Observations {
                north,
                south,
                east,
                west,
            } => ControlCommand::Observations([
                north.into(),
                south.into(),
                east.into(),
                west.into(),
            ]),
            Self::SelectStrategy { strategy } => ControlCommand::SelectStrategy {
                kind: strategy,
                reply: None,
            },
            Self::ResetFallback => ControlCommand::ResetFallback,
        }
    }
}

/// Line-framed reader of [`FeedMessage`]s.
pub struct FeedReader<R> {
    lines: FramedRead<R, LinesCodec>,
    skipped: u64,
}

impl<R: AsyncRead + Unpin> FeedReader<R> {
    /// Wraps `reader`, rejecting lines longer than `max_line_length` bytes.
    pub fn new(reader: R, max_line_length: usize) -> Self {
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            skipped: 0,
        }
    }

    /// Number of lines skipped so far.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Returns the next valid message, or `None` at EOF.
    ///
    /// An I/O error on the underlying reader also ends the feed.
    pub async fn next_message(&mut self) -> Option<FeedMessage> {
        // FramedRead ends the stream once after a decode error, then resumes
        let mut after_error = false;
        loop {
            let Some(item) = self.lines.next().await else {
                if std::mem::take(&mut after_error) {
                    continue;
                }
                return None;
            };
            match item {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<FeedMessage>(trimmed) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            self.skipped += 1;
                            warn!(
                                error = %e,
                                line = %sanitize_for_log(trimmed, 200),
                                "invalid feed message, skipping"
                            );
                        }
                    }
                }
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    after_error = true;
                    self.skipped += 1;
                    warn!("feed line exceeds size limit, skipping");
                }
                Err(LinesCodecError::Io(e)) => {
                    warn!(error = %e, "feed read failed; closing feed");
                    return None;
                }
            }
        }
    }

    /// Forwards every message to the controller until EOF or cancellation.
    ///
    /// Uses a blocking `send`, so a slow controller applies backpressure to
    /// the feed rather than dropping observations.
    pub async fn pump(
        mut self,
        commands: mpsc::Sender<ControlCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = self.next_message() => message,
            };
            let Some(message) = message else {
                info!(skipped = self.skipped, "observation feed reached EOF");
                break;
            };
            debug!(?message, "feed message");
            if commands.send(message.into_command()).await.is_err() {
                debug!("controller gone; stopping feed");
                break;
            }
        }
    }
}

/// Truncates and strips control characters from untrusted input before logging.
fn sanitize_for_log(input: &str, max_len: usize) -> String {
    input
        .chars()
        .take(max_len)
        .map(|c| {
            if c.is_control() && c != '\t' {
                '\u{FFFD}'
            } else {
                c
            }
        })
        .collect()
}
