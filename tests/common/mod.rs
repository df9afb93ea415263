//! Shared integration-test harness: in-process controllers with captured
//! events, and a child-process wrapper for the `trafficmind` binary.

#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use trafficmind::config::schema::ControllerConfig;
use trafficmind::intersection::{ApproachObservation, Direction};
use trafficmind::observability::EventEmitter;
use trafficmind::{Controller, ControllerHandle, SafetySupervisor};

/// Default timeout for reading a single event from the binary.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Event capture
// ============================================================================

/// In-memory JSONL sink shared with an [`EventEmitter`].
#[derive(Clone, Default)]
pub struct CapturedEvents(Arc<Mutex<Vec<u8>>>);

impl CapturedEvents {
    /// Creates an emitter writing into this capture.
    pub fn emitter(&self) -> Arc<EventEmitter> {
        Arc::new(EventEmitter::new(Box::new(self.clone())))
    }

    /// All events captured so far.
    pub fn all(&self) -> Vec<Value> {
        let buf = self.0.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    /// Events with the given `type` tag.
    pub fn of_type(&self, name: &str) -> Vec<Value> {
        self.all()
            .into_iter()
            .filter(|e| e["type"] == name)
            .collect()
    }
}

impl Write for CapturedEvents {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-process controller
// ============================================================================

/// A controller driven tick by tick with explicit instants.
pub struct Harness {
    pub controller: Controller,
    pub handle: ControllerHandle,
    pub events: CapturedEvents,
    pub config: ControllerConfig,
    pub t0: Instant,
}

impl Harness {
    /// Builds a controller from `config` with every configured strategy.
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_supervisor(config, |_| {})
    }

    /// Builds a controller, letting `customize` register extra strategies.
    pub fn with_supervisor(
        config: ControllerConfig,
        customize: impl FnOnce(&mut SafetySupervisor),
    ) -> Self {
        let t0 = Instant::now();
        let events = CapturedEvents::default();
        let emitter = events.emitter();
        let mut supervisor =
            SafetySupervisor::from_config(&config, t0, Arc::clone(&emitter)).unwrap();
        customize(&mut supervisor);
        let (controller, handle) =
            Controller::new(Arc::new(config.clone()), supervisor, emitter, t0);
        Self {
            controller,
            handle,
            events,
            config,
            t0,
        }
    }

    /// Instant `offset` after start.
    pub fn at(&self, offset: Duration) -> Instant {
        self.t0 + offset
    }

    /// Brings the controller from boot all-red to North/South green and
    /// returns the instant green was entered.
    pub async fn boot_to_ns_green(&mut self) -> Instant {
        let at = self.at(self.config.timing.all_red);
        self.controller.tick(at).await;
        assert_eq!(
            self.controller.phase(),
            trafficmind::phase::Phase::NsGreen,
            "boot did not reach NS green"
        );
        at
    }

    /// Sends observations, applied on the next tick.
    pub async fn observe(&self, observations: [ApproachObservation; 4]) {
        self.handle.update_observations(observations).await.unwrap();
    }
}

/// Observations with the given queue lengths in N, S, E, W order.
pub fn queues(q: [u32; 4]) -> [ApproachObservation; 4] {
    q.map(|queue_length| ApproachObservation {
        queue_length,
        ..Default::default()
    })
}

/// Observations with an emergency vehicle on each of `directions`.
pub fn emergency(directions: &[Direction]) -> [ApproachObservation; 4] {
    let mut obs = [ApproachObservation::default(); 4];
    for d in directions {
        obs[d.index()].emergency_vehicle_present = true;
    }
    obs
}

/// Polls `condition` every millisecond until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    condition()
}

// ============================================================================
// Child process
// ============================================================================

/// A running `trafficmind run` process reading the feed from our pipe.
///
/// The child process is killed on drop via `kill_on_drop(true)`.
pub struct TrafficMindProcess {
    child: Child,
    stdin: Option<tokio::process::ChildStdin>,
    reader: BufReader<tokio::process::ChildStdout>,
}

impl TrafficMindProcess {
    /// Spawns `trafficmind run` with extra arguments.
    pub fn spawn(args: &[&str]) -> Self {
        let bin = env!("CARGO_BIN_EXE_trafficmind");
        let mut child = Command::new(bin)
            .arg("--quiet")
            .arg("run")
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn trafficmind");

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        }
    }

    /// Runs a non-interactive subcommand to completion.
    pub fn spawn_command(args: &[&str]) -> std::process::Output {
        let bin = env!("CARGO_BIN_EXE_trafficmind");
        std::process::Command::new(bin)
            .args(args)
            .output()
            .expect("failed to run trafficmind")
    }

    /// Writes one NDJSON feed line.
    pub async fn send(&mut self, message: &Value) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        let mut line = serde_json::to_string(message).unwrap();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await.unwrap();
        stdin.flush().await.unwrap();
    }

    /// Reads one JSONL event from stdout.
    ///
    /// Panics on EOF, I/O error, or if no event arrives within `timeout`.
    pub async fn read_event(&mut self, timeout: Duration) -> Value {
        let mut line = String::new();
        let result = tokio::time::timeout(timeout, async {
            loop {
                line.clear();
                let n = self
                    .reader
                    .read_line(&mut line)
                    .await
                    .expect("read_line I/O error");
                assert!(n > 0, "unexpected EOF from trafficmind");
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    return serde_json::from_str::<Value>(trimmed)
                        .unwrap_or_else(|e| panic!("invalid JSON event: {e}\nline: {line}"));
                }
            }
        })
        .await;
        result.expect("timed out waiting for event")
    }

    /// Reads events until one matches `predicate`.
    pub async fn wait_for_event(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        loop {
            let event = self.read_event(DEFAULT_TIMEOUT).await;
            if predicate(&event) {
                return event;
            }
        }
    }

    /// Kills the child.
    pub async fn kill(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Writes `yaml` to a temporary config file.
pub fn config_file(yaml: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file
}

/// Path as `&str`, for argument lists.
pub fn path_str(path: &Path) -> &str {
    path.to_str().expect("non-UTF-8 path")
}
