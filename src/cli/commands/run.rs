//! `run` command: wire up and drive the controller.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::bridge::ActuationBridge;
use crate::cli::Shutdown;
use crate::cli::args::RunArgs;
use crate::config::loader::ConfigLoader;
use crate::config::schema::ControllerConfig;
use crate::config::validation::Validator;
use crate::controller::Controller;
use crate::error::{ConfigError, TrafficMindError};
use crate::observability::events::{Event, EventEmitter};
use crate::supervisor::SafetySupervisor;
use crate::transport::{FeedReader, open_link};

/// Runs the controller until shutdown.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the policy model or
/// event file cannot be opened, or the signal link cannot be reached at
/// startup. Once running, nothing is fatal.
pub async fn run(args: &RunArgs, shutdown: Shutdown) -> Result<(), TrafficMindError> {
    if let Some(port) = args.metrics_port {
        crate::observability::init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    let config = Arc::new(resolve_config(args)?);

    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::stdout(),
    });

    let now = Instant::now();
    let supervisor = SafetySupervisor::from_config(&config, now, Arc::clone(&events))?;
    let (mut controller, handle) =
        Controller::new(Arc::clone(&config), supervisor, Arc::clone(&events), now);

    let link = if config.hardware.enabled {
        Some(open_link(&config.hardware).await?)
    } else {
        None
    };
    let bridge = ActuationBridge::new(
        link,
        &config.hardware,
        handle.subscribe_phase(),
        handle.commands(),
        Arc::clone(&events),
    );
    if config.hardware.enabled {
        controller.attach_hardware(bridge.subscribe());
    }

    let cancel = shutdown.token();
    let bridge_task = tokio::spawn(bridge.run(cancel.clone()));

    let feed_task = (!args.no_feed).then(|| {
        let feed = FeedReader::new(tokio::io::stdin(), config.feed.max_line_length);
        tokio::spawn(feed.pump(handle.commands(), cancel.clone()))
    });

    let summary = controller.run(cancel).await;

    if let Err(e) = bridge_task.await {
        warn!(error = %e, "bridge task failed");
    }
    if let Some(task) = feed_task {
        task.abort();
    }

    events.emit(Event::ControllerStopped {
        timestamp: Utc::now(),
        reason: shutdown.reason(),
        summary: Some(summary),
    });
    events.flush();
    Ok(())
}

/// Loads the configuration file, if any, and applies command-line overrides.
fn resolve_config(args: &RunArgs) -> Result<ControllerConfig, TrafficMindError> {
    let mut config = match &args.config {
        Some(path) => {
            info!(config = %path.display(), "loading configuration");
            let loaded = ConfigLoader::default().load(path)?;
            for warning in &loaded.warnings {
                warn!(
                    location = warning.location.as_deref().unwrap_or("<unknown>"),
                    "{}",
                    warning.message
                );
            }
            (*loaded.config).clone()
        }
        None => ControllerConfig::default(),
    };

    let mut overridden = false;
    if let Some(strategy) = args.strategy {
        config.supervisor.initial_strategy = strategy;
        overridden = true;
    }
    if let Some(port) = &args.port {
        config.hardware.port.clone_from(port);
        config.hardware.enabled = true;
        overridden = true;
    }
    if args.no_hardware {
        config.hardware.enabled = false;
    }

    if overridden {
        let result = Validator::new().validate(&config);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: "<command line>".to_string(),
                errors: result.errors,
            }
            .into());
        }
    }

    Ok(config)
}
