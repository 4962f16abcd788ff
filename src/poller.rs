//! Periodic group reads on independent schedules (§4.5).

use crate::config::{FetchInterval, LoggingConfig, PollingConfig};
use crate::producer::Producer;
use std::time::Duration;
use tracing::{info, warn};

/// Bus quiesce period observed before the first poll of any group.
const WARM_UP: Duration = Duration::from_secs(20);

/// Parse a schedule string like `10s`, `10m`, `10h` into a [`Duration`].
fn parse_schedule(schedule: &str) -> Option<Duration> {
    let (value, unit) = schedule.split_at(schedule.len().checked_sub(1)?);
    let value: u64 = value.parse().ok()?;
    match unit {
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

/// Spawn one task per enabled, schedulable group. Each runs independently:
/// no cross-group coordination, since bus access is already serialized by
/// the Producer's writer.
pub fn spawn_pollers(
    producer: Producer,
    polling: &PollingConfig,
    logging: &LoggingConfig,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();
    for entry in &polling.fetch_interval {
        if !entry.enable {
            continue;
        }
        let Some(points) = polling.groups.get(&entry.name).cloned() else {
            warn!(group = %entry.name, "poll schedule references unknown group, skipping");
            continue;
        };
        let Some(interval) = parse_schedule(&entry.schedule) else {
            warn!(group = %entry.name, schedule = %entry.schedule, "unparseable schedule, skipping");
            continue;
        };
        handles.push(spawn_one(
            producer.clone(),
            entry.clone(),
            points,
            interval,
            logging.poller_message_level(),
        ));
    }
    handles
}

fn spawn_one(
    producer: Producer,
    entry: FetchInterval,
    points: Vec<String>,
    interval: Duration,
    poller_message_level: tracing::Level,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(group = %entry.name, ?interval, "poller warming up");
        tokio::time::sleep(WARM_UP).await;

        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            crate::log_at!(poller_message_level, group = %entry.name, "polling group");
            if let Err(err) = producer.read(&points).await {
                warn!(group = %entry.name, %err, "poll read failed");
            }
        }
    })
}
