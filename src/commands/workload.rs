use std::time::Duration;

use crate::commands::cluster::{check_cluster, kubeconfig_for};
use crate::commands::exec::{is_installed, run_text, CommandRunner, Invocation};
use crate::commands::helm;
use crate::error::{Error, Result};
use crate::models::backend::{Backend, Workload, WorkloadTarget};

// ── backend resolution ────────────────────────────────────────────────────────

/// Picks the backend driving the server workload.
///
/// An explicit backend only has to be installed. Otherwise the cluster is
/// tried first and wins when a pod carries the server label; then each
/// container engine wins when the reserved container exists. As a last
/// resort an installed podman with the server's systemd unit, or a cluster
/// with the server's helm release, is accepted.
pub async fn resolve_backend(
    runner: &dyn CommandRunner,
    explicit: Option<&str>,
    target: &WorkloadTarget,
    probe_timeout: Duration,
) -> Result<Backend> {
    if let Some(name) = explicit {
        let backend: Backend = name.parse()?;
        if !is_installed(runner, backend.executable()) {
            return Err(Error::BackendNotFound {
                candidates: vec![backend.executable().to_string()],
            });
        }
        log::debug!("backend: using requested {backend}");
        return Ok(backend);
    }

    let has_kubectl = is_installed(runner, Backend::ClusterCli.executable());
    if has_kubectl && cluster_runs_workload(runner, target, probe_timeout).await {
        log::debug!("backend: found {} pods on the cluster", target.selector);
        return Ok(Backend::ClusterCli);
    }

    let mut first_engine = None;
    for engine in Backend::CONTAINER_ENGINES {
        if !is_installed(runner, engine.executable()) {
            continue;
        }
        first_engine.get_or_insert(engine);
        if container_exists(runner, engine, &target.container).await {
            log::debug!("backend: found container {} with {engine}", target.container);
            return Ok(engine);
        }
    }

    if let Some(engine) = first_engine {
        if has_service(runner, &target.service_unit).await {
            log::debug!("backend: {} installed, using {engine}", target.service_unit);
            return Ok(engine);
        }
    }
    if has_kubectl && is_installed(runner, helm::HELM) {
        let kubeconfig = match check_cluster(runner).await {
            Ok(info) => kubeconfig_for(&info),
            Err(e) => {
                log::debug!("backend: cannot inspect the cluster: {e}");
                None
            }
        };
        if helm::has_release(runner, &target.helm_release, kubeconfig.as_deref()).await {
            log::debug!("backend: helm release {} installed", target.helm_release);
            return Ok(Backend::ClusterCli);
        }
    }

    Err(Error::BackendNotFound {
        candidates: std::iter::once(Backend::ClusterCli)
            .chain(Backend::CONTAINER_ENGINES)
            .map(|b| b.executable().to_string())
            .collect(),
    })
}

/// True when the configured cluster answers within `probe_timeout` with at
/// least one pod matching the server selector.
async fn cluster_runs_workload(
    runner: &dyn CommandRunner,
    target: &WorkloadTarget,
    probe_timeout: Duration,
) -> bool {
    let query = Invocation::new(Backend::ClusterCli.executable())
        .arg(format!("--request-timeout={}s", probe_timeout.as_secs()))
        .args(["get", "pod", "-l", &target.selector, "-A"])
        .arg("-o=jsonpath={.items[*].metadata.name}")
        // kubectl may hang before its own request timeout applies, e.g. on DNS.
        .timeout(probe_timeout + Duration::from_secs(5));

    match run_text(runner, &query).await {
        Ok(out) => !out.trim().is_empty(),
        Err(e) => {
            log::info!("backend: kubectl not configured to connect to a cluster, ignoring");
            log::debug!("backend: cluster probe failed: {e}");
            false
        }
    }
}

async fn container_exists(runner: &dyn CommandRunner, engine: Backend, container: &str) -> bool {
    let inspect = Invocation::new(engine.executable()).args(["inspect", container, "--format", "{{.Name}}"]);
    runner.run(&inspect).await.is_ok()
}

/// True when systemd knows `unit`.
pub async fn has_service(runner: &dyn CommandRunner, unit: &str) -> bool {
    let query = Invocation::new("systemctl").args(["list-unit-files", unit, "--no-legend"]);
    matches!(run_text(runner, &query).await, Ok(out) if !out.trim().is_empty())
}

// ── workload location ─────────────────────────────────────────────────────────

/// Finds the running server container or pod.
pub async fn locate_workload(
    runner: &dyn CommandRunner,
    backend: Backend,
    target: &WorkloadTarget,
) -> Result<Workload> {
    match backend {
        Backend::ContainerEngine | Backend::ContainerEngineRemote => {
            let ps = Invocation::new(backend.executable())
                .args(["ps", "-q", "-f"])
                .arg(format!("name=^{}$", target.container));
            match run_text(runner, &ps).await {
                Ok(ids) if !ids.trim().is_empty() => {
                    log::trace!("workload: found container ID '{}'", ids.trim());
                    Ok(Workload {
                        name: target.container.clone(),
                        namespace: None,
                        container: None,
                    })
                }
                _ => Err(Error::ContainerNotRunning {
                    container: target.container.clone(),
                }),
            }
        }
        Backend::ClusterCli => {
            let mut get = Invocation::new(backend.executable()).args(["get", "pod", "-l", &target.selector]);
            get = match &target.namespace {
                Some(ns) => get.args(["-n", ns.as_str()]),
                None => get.arg("-A"),
            };
            // Indexing the first item makes kubectl fail when nothing matches.
            get = get.arg("-o=jsonpath={.items[0].metadata.namespace} {.items[0].metadata.name}");

            let not_found = || Error::PodNotFound {
                selector: target.selector.clone(),
            };
            let out = run_text(runner, &get).await.map_err(|e| {
                log::debug!("workload: pod lookup failed: {e}");
                not_found()
            })?;
            let (namespace, name) = out.trim().split_once(' ').ok_or_else(not_found)?;
            if name.is_empty() {
                return Err(not_found());
            }
            Ok(Workload {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
                container: target.pod_container.clone(),
            })
        }
    }
}
