// Cluster CLI queries shared by the waits and the certificate bootstrap.
use std::sync::OnceLock;

use crate::commands::events;
use crate::commands::exec::{run_text, CommandRunner, Invocation};
use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::models::backend::Backend;
use crate::models::k8s::APP_LABEL;
use crate::readiness::{wait_until_ready, Interrupt, Probe, ReadinessCheck};

// ── helpers ───────────────────────────────────────────────────────────────────

pub fn kubectl() -> Invocation {
    Invocation::new(Backend::ClusterCli.executable())
}

/// Scopes `inv` to `namespace`, or to all namespaces when unset.
pub fn with_namespace(inv: Invocation, namespace: Option<&str>) -> Invocation {
    match namespace {
        Some(ns) => inv.args(["-n", ns]),
        None => inv.arg("-A"),
    }
}

/// Reads a JSONPath selection of one resource, trimmed.
pub async fn get_jsonpath(
    runner: &dyn CommandRunner,
    kind: &str,
    name: &str,
    namespace: &str,
    path: &str,
) -> Result<String> {
    let get = kubectl()
        .args(["get", kind, name, "-n", namespace])
        .arg(format!("-o=jsonpath={path}"))
        .level(log::Level::Trace);
    Ok(run_text(runner, &get).await?.trim().to_string())
}

/// Writes `documents` as one multi-document YAML file in a scratch directory
/// and applies it. The directory is removed whatever the outcome.
pub async fn apply_manifests(runner: &dyn CommandRunner, documents: &[String], what: &str) -> Result<()> {
    let dir = tempfile::Builder::new().prefix("podlift-").tempdir()?;
    let path = dir.path().join(format!("{what}.yaml"));
    std::fs::write(&path, documents.join("---\n"))?;

    let apply = kubectl().args(["apply", "-f"]).arg(path.to_string_lossy());
    runner.run(&apply).await?;
    log::info!("kubectl: applied {what}");
    Ok(())
}

// ── deployments ───────────────────────────────────────────────────────────────

/// True when deployment `name` has at least one ready replica.
pub async fn is_deployment_ready(runner: &dyn CommandRunner, namespace: Option<&str>, name: &str) -> Result<bool> {
    let get = kubectl()
        .args(["get", "deploy"])
        .arg(format!(
            "-o=jsonpath={{.items[?(@.metadata.name==\"{name}\")].status.readyReplicas}}"
        ))
        .level(log::Level::Trace);
    let command = get.command_line();
    let out = run_text(runner, &with_namespace(get, namespace)).await?;

    // A deployment without ready replicas has no readyReplicas field at all.
    let Some(first) = out.split_whitespace().next() else {
        return Ok(false);
    };
    let replicas: u32 = first.parse().map_err(|_| Error::UnexpectedOutput {
        command,
        output: out.clone(),
    })?;
    Ok(replicas > 0)
}

/// Waits for the pod of `app`, for its image to be pulled, then for deployment
/// `name` to have a ready replica.
pub async fn wait_for_deployment(
    runner: &dyn CommandRunner,
    namespace: Option<&str>,
    name: &str,
    app: &str,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<()> {
    let pod = find_app_pod(runner, namespace, app, timeouts, interrupt).await?;

    events::wait_for_image_pulled(runner, &pod, namespace, timeouts, interrupt).await?;

    log::info!(
        "kubectl: waiting for {name} deployment to be ready in {} namespace",
        namespace.unwrap_or("any")
    );
    let check = ReadinessCheck::new(format!("deployment {name}"), move || {
        deployment_ready_probe(runner, namespace, name)
    })
    .attempts(timeouts.deployment_attempts)
    .interval(timeouts.poll_interval());
    wait_until_ready(check, interrupt).await
}

async fn deployment_ready_probe(runner: &dyn CommandRunner, namespace: Option<&str>, name: &str) -> Probe {
    Ok(is_deployment_ready(runner, namespace, name).await?)
}

/// Name of the first pod labeled `app=<app>`, waiting for one to show up.
pub async fn find_app_pod(
    runner: &dyn CommandRunner,
    namespace: Option<&str>,
    app: &str,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<String> {
    let found = OnceLock::new();
    let slot = &found;
    let check = ReadinessCheck::new(format!("pod of {app}"), move || {
        app_pod_probe(runner, namespace, app, slot)
    })
    .attempts(timeouts.deployment_attempts)
    .interval(timeouts.poll_interval());
    wait_until_ready(check, interrupt).await?;

    found.into_inner().ok_or_else(|| Error::PodNotFound {
        selector: format!("{APP_LABEL}={app}"),
    })
}

async fn app_pod_probe(
    runner: &dyn CommandRunner,
    namespace: Option<&str>,
    app: &str,
    found: &OnceLock<String>,
) -> Probe {
    let get = kubectl().args(["get", "pod"]).arg(format!(
        "-o=jsonpath={{.items[?(@.metadata.labels.{APP_LABEL}==\"{app}\")].metadata.name}}"
    ));
    let out = run_text(runner, &with_namespace(get, namespace)).await?;
    match out.split_whitespace().next() {
        Some(pod) => {
            log::debug!("kubectl: found pod {pod} for {app}");
            // Only the first successful probe ends the wait, so the slot is empty here.
            let _ = found.set(pod.to_string());
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fake::{fail, out, FakeRunner};

    const PULLED: &str = r#"{"items":[{"reason":"Pulled","message":"Successfully pulled image"}]}"#;

    fn fast() -> Timeouts {
        Timeouts {
            deployment_attempts: 5,
            image_pull_ceiling_secs: 10,
            ..Timeouts::default()
        }
    }

    #[tokio::test]
    async fn deployment_readiness_parses_ready_replicas() {
        let runner = FakeRunner::new().on_seq(
            "get deploy",
            vec![out(""), out("0"), out("2"), out("many")],
        );
        assert!(!is_deployment_ready(&runner, Some("server"), "podlift").await.unwrap());
        assert!(!is_deployment_ready(&runner, Some("server"), "podlift").await.unwrap());
        assert!(is_deployment_ready(&runner, Some("server"), "podlift").await.unwrap());
        assert!(matches!(
            is_deployment_ready(&runner, Some("server"), "podlift").await,
            Err(Error::UnexpectedOutput { .. })
        ));
        assert!(runner.calls()[0].ends_with("-n server"));
    }

    #[tokio::test(start_paused = true)]
    async fn deployment_wait_runs_pod_pull_and_ready_steps_in_order() {
        let runner = FakeRunner::new()
            .on_seq("get pod", vec![out(""), out("podlift-7d9f podlift-x2c1")])
            .on("get event", out(PULLED))
            .on_seq("get deploy", vec![fail("not found"), out("1")]);

        wait_for_deployment(&runner, Some("server"), "podlift", "podlift", &fast(), &Interrupt::new())
            .await
            .unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 5);
        assert!(calls[2].contains("involvedObject.name=podlift-7d9f"));
        assert!(calls[3].contains("get deploy"));
    }

    #[tokio::test(start_paused = true)]
    async fn deployment_wait_stops_on_pull_failure() {
        let runner = FakeRunner::new()
            .on("get pod", out("podlift-7d9f"))
            .on(
                "get event",
                out(r#"{"items":[{"reason":"Failed","message":"Failed to pull image \"podlift:9\": not found"}]}"#),
            );

        let err = wait_for_deployment(&runner, None, "podlift", "podlift", &fast(), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ImagePullFailed { .. }));
        assert_eq!(runner.count("get deploy"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pod_times_out() {
        let runner = FakeRunner::new().on("get pod", out(""));
        let err = find_app_pod(&runner, None, "podlift", &fast(), &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadinessTimeout { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn manifests_are_applied_from_a_removed_scratch_dir() {
        let runner = FakeRunner::new().on("kubectl apply -f", out("configmap/podlift-ca created"));
        apply_manifests(&runner, &["kind: ConfigMap\n".to_string()], "ca-config")
            .await
            .unwrap();

        let call = runner.calls().remove(0);
        let path = call.trim_start_matches("kubectl apply -f ");
        assert!(path.ends_with("ca-config.yaml"));
        assert!(!std::path::Path::new(path).exists());
    }

    #[tokio::test]
    async fn failed_apply_still_removes_scratch_dir() {
        let runner = FakeRunner::new().on("kubectl apply", fail("invalid manifest"));
        let err = apply_manifests(&runner, &["kind: Nope\n".to_string()], "broken")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));

        let call = runner.calls().remove(0);
        let path = call.trim_start_matches("kubectl apply -f ");
        assert!(!std::path::Path::new(path).exists());
    }
}
