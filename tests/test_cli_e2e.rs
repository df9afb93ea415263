mod common;

use common::{TrafficMindProcess, config_file, path_str};
use serde_json::{Value, json};

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| panic!("{e}: {stdout}"))
}

#[test]
fn version_human_and_json() {
    let output = TrafficMindProcess::spawn_command(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("trafficmind "), "{stdout}");

    let output = TrafficMindProcess::spawn_command(&["version", "--format", "json"]);
    assert!(output.status.success());
    let value = stdout_json(&output);
    assert_eq!(value["name"], "trafficmind");
    assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn validate_accepts_valid_config() {
    let file = config_file(
        "timing:\n  min_green: 4s\n  max_green: 40s\nsupervisor:\n  initial_strategy: rule-based\n",
    );
    let output =
        TrafficMindProcess::spawn_command(&["--quiet", "validate", path_str(file.path())]);
    assert!(output.status.success(), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("valid"));
}

#[test]
fn validate_rejects_invalid_config_with_exit_2() {
    let file = config_file("timing:\n  yellow: 0s\n");
    let output = TrafficMindProcess::spawn_command(&[
        "--quiet",
        "validate",
        path_str(file.path()),
        "--format",
        "json",
    ]);
    assert_eq!(output.status.code(), Some(2));

    let value = stdout_json(&output);
    assert_eq!(value["valid"], false);
    let errors = value["errors"].as_array().unwrap();
    assert!(errors.iter().any(|e| e["path"] == "timing.yellow"), "{errors:?}");
}

#[test]
fn validate_missing_file_exits_2() {
    let output = TrafficMindProcess::spawn_command(&[
        "--quiet",
        "validate",
        "/nonexistent/trafficmind.yaml",
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn strict_validation_fails_on_warnings() {
    let file = config_file("hardware:\n  baud_rate: 115200\n");
    let path = path_str(file.path());

    let lenient = TrafficMindProcess::spawn_command(&["--quiet", "validate", path]);
    assert!(lenient.status.success());
    assert!(String::from_utf8_lossy(&lenient.stdout).contains("warning"));

    let strict = TrafficMindProcess::spawn_command(&["--quiet", "validate", path, "--strict"]);
    assert_eq!(strict.status.code(), Some(2));
}

#[test]
fn run_rejects_learned_strategy_without_model() {
    let output = TrafficMindProcess::spawn_command(&[
        "--quiet",
        "run",
        "--no-hardware",
        "--no-feed",
        "--strategy",
        "learned-policy",
    ]);
    assert_eq!(output.status.code(), Some(2));
}

#[tokio::test]
async fn run_follows_feed_commands() {
    let mut process = TrafficMindProcess::spawn(&["--no-hardware"]);

    let started = process
        .wait_for_event(|e| e["type"] == "ControllerStarted")
        .await;
    assert_eq!(started["strategy"], "timer");
    assert_eq!(started["hardware"], false);

    process
        .send(&json!({"type": "select_strategy", "strategy": "rule-based"}))
        .await;
    process
        .send(&json!({
            "type": "observations",
            "north": {"queue_length": 2},
            "south": {"queue_length": 1},
            "east": {"queue_length": 14, "wait_secs": 30.0},
            "west": {"queue_length": 9},
        }))
        .await;

    let selected = process
        .wait_for_event(|e| e["type"] == "StrategySelected" && e["strategy"] == "rule-based")
        .await;
    assert_eq!(selected["active"], "rule-based");

    // The feed lines may land on different ticks; wait for the East/West call
    let decision = process
        .wait_for_event(|e| {
            e["type"] == "DecisionChanged"
                && e["source"]["strategy"] == "rule-based"
                && e["target"] == "east_west"
        })
        .await;
    assert_eq!(decision["source"]["kind"], "strategy");

    process.kill().await;
}

#[tokio::test]
async fn run_activates_override_from_feed() {
    let mut process = TrafficMindProcess::spawn(&["--no-hardware"]);
    process
        .wait_for_event(|e| e["type"] == "ControllerStarted")
        .await;

    process
        .send(&json!({"type": "observations", "south": {"emergency": true}}))
        .await;
    let activated = process
        .wait_for_event(|e| e["type"] == "OverrideActivated")
        .await;
    assert_eq!(activated["direction"], "south");
    assert_eq!(activated["axis"], "north_south");

    process.kill().await;
}
