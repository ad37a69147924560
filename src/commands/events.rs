//! Image-pull watcher.
//!
//! Pulling an image can take arbitrarily long, so instead of a fixed attempt
//! budget the watcher follows the pod's events: a `Pulled` event ends the
//! wait successfully, a `Failed` event carrying a pull error ends it at once.
//! An optional ceiling bounds clusters that never emit either.

use std::time::Duration;

use crate::commands::exec::{run_text, CommandRunner};
use crate::commands::kubectl::{kubectl, with_namespace};
use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::models::k8s::{EventList, PodEvent};
use crate::readiness::{wait_until_ready, Interrupt, Probe, ProbeError, ReadinessCheck};

/// Message prefixes of `Failed` events that mean the image cannot be pulled.
const PULL_FAILURES: [&str; 2] = ["Failed to pull image", "Error: ErrImagePull"];

fn is_pull_failure(message: &str) -> bool {
    PULL_FAILURES.iter().any(|prefix| message.starts_with(prefix))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullState {
    /// A pull failure was reported; carries the event message.
    Failed(String),
    Pulled,
    Pending,
}

/// Classifies the events seen so far. A pull failure wins over any `Pulled`
/// event in the same batch.
pub fn classify_events(events: &[PodEvent]) -> PullState {
    if let Some(failed) = events
        .iter()
        .find(|e| e.reason == "Failed" && is_pull_failure(&e.message))
    {
        return PullState::Failed(failed.message.clone());
    }
    if events.iter().any(|e| e.reason == "Pulled") {
        return PullState::Pulled;
    }
    PullState::Pending
}

/// Events whose involved object is `pod`.
pub async fn pod_events(runner: &dyn CommandRunner, pod: &str, namespace: Option<&str>) -> Result<Vec<PodEvent>> {
    let get = kubectl()
        .args(["get", "event", "-o", "json", "--field-selector"])
        .arg(format!("involvedObject.name={pod}"))
        .level(log::Level::Trace);
    let raw = run_text(runner, &with_namespace(get, namespace)).await?;
    let list: EventList = serde_json::from_str(&raw)?;
    Ok(list.items)
}

/// Waits until the image of `pod` is pulled.
///
/// Fails with [`Error::ImagePullFailed`] as soon as the cluster reports a pull
/// failure, whatever the remaining budget.
pub async fn wait_for_image_pulled(
    runner: &dyn CommandRunner,
    pod: &str,
    namespace: Option<&str>,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<()> {
    log::info!("events: waiting for image of {pod} pod to be pulled");

    let interval = timeouts.poll_interval();
    let check = ReadinessCheck::new(format!("image pull of pod {pod}"), move || {
        pull_probe(runner, pod, namespace)
    })
    .interval(interval);
    let check = match timeouts.image_pull_ceiling() {
        Some(ceiling) => check.attempts(attempts_within(ceiling, interval)),
        None => check.unbounded(),
    };
    wait_until_ready(check, interrupt).await
}

async fn pull_probe(runner: &dyn CommandRunner, pod: &str, namespace: Option<&str>) -> Probe {
    let events = pod_events(runner, pod, namespace).await?;
    match classify_events(&events) {
        PullState::Failed(message) => Err(ProbeError::Fatal(Error::ImagePullFailed {
            pod: pod.to_string(),
            message,
        })),
        PullState::Pulled => Ok(true),
        PullState::Pending => Ok(false),
    }
}

/// Attempts fitting in `ceiling` when polling every `interval`.
fn attempts_within(ceiling: Duration, interval: Duration) -> u32 {
    let attempts = ceiling.as_millis().div_ceil(interval.as_millis().max(1));
    u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
}
