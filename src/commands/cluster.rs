use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kube::config::Kubeconfig;

use crate::commands::exec::{run_text, CommandRunner};
use crate::commands::kubectl::{get_jsonpath, kubectl};
use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::models::k8s::{ClusterInfo, IngressKind};
use crate::readiness::{wait_until_ready, Interrupt, Probe, ReadinessCheck};

/// kubeconfig written by k3s for its own kubectl.
pub const K3S_KUBECONFIG: &str = "/etc/rancher/k3s/k3s.yaml";

/// Process containers of the nginx ingress controller run.
const NGINX_CONTROLLER: &str = "/nginx-ingress-controller";

/// A Traefik reinstall counts as the reload we wait for when it completed
/// this recently.
const TRAEFIK_RELOAD_WINDOW_SECS: i64 = 60;

// ── helpers ───────────────────────────────────────────────────────────────────

/// Returns the first kubeconfig file kubectl would read.
/// Respects KUBECONFIG env var (`:` on Unix, `;` on Windows), then ~/.kube/config.
fn primary_kubeconfig_path() -> Option<PathBuf> {
    let sep = if cfg!(windows) { ';' } else { ':' };

    std::env::var("KUBECONFIG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| v.split(sep).next().map(|s| PathBuf::from(s.trim())))
        .or_else(|| dirs::home_dir().map(|h| h.join(".kube").join("config")))
}

/// True when `path` holds a parseable kubeconfig.
fn is_usable_kubeconfig(path: &Path) -> bool {
    if !path.exists() {
        log::debug!("kubeconfig: skip (not found) {}", path.display());
        return false;
    }
    match Kubeconfig::read_from(path) {
        Ok(cfg) => {
            log::debug!(
                "kubeconfig: ok ({} context(s)) {}",
                cfg.contexts.len(),
                path.display()
            );
            true
        }
        Err(e) => {
            log::info!("kubeconfig: skip (parse error: {e}) {}", path.display());
            false
        }
    }
}

// ── commands ──────────────────────────────────────────────────────────────────

/// Reads the kubelet version of the first node and guesses the ingress.
pub async fn check_cluster(runner: &dyn CommandRunner) -> Result<ClusterInfo> {
    let get = kubectl()
        .args(["get", "node"])
        .arg("-o=jsonpath={.items[0].status.nodeInfo.kubeletVersion}");
    let kubelet_version = run_text(runner, &get).await?.trim().to_string();
    log::debug!("cluster: kubelet version {kubelet_version}");

    let ingress = guess_ingress(runner).await?;
    Ok(ClusterInfo {
        kubelet_version,
        ingress,
    })
}

/// Traefik when its TCP route resource is known, nginx when a pod runs its
/// controller, unknown otherwise.
pub async fn guess_ingress(runner: &dyn CommandRunner) -> Result<IngressKind> {
    let explain = kubectl().args(["explain", "ingressroutetcp"]);
    match runner.run(&explain).await {
        Ok(_) => return Ok(IngressKind::Traefik),
        Err(e) => log::debug!("cluster: no ingressroutetcp resource deployed: {e}"),
    }

    // Pod commands are the only common way to spot the nginx controller.
    let get = kubectl()
        .args(["get", "pod", "-A"])
        .arg("-o=jsonpath={range .items[*]}{.spec.containers[*].args[0]}{.spec.containers[*].command}{end}");
    let commands = run_text(runner, &get).await?;
    if commands.contains(NGINX_CONTROLLER) {
        return Ok(IngressKind::Nginx);
    }
    Ok(IngressKind::Unknown)
}

/// kubeconfig to hand to helm and kubectl, if the default one will not do.
///
/// On k3s the distribution's own file is used unless the user has a working
/// kubeconfig. Elsewhere the user's setup is assumed to be right.
pub fn kubeconfig_for(info: &ClusterInfo) -> Option<PathBuf> {
    if !info.is_k3s() {
        return None;
    }
    let user_config = std::env::var_os("KUBECONFIG").is_some_and(|v| !v.is_empty())
        && primary_kubeconfig_path().is_some_and(|p| is_usable_kubeconfig(&p));
    if user_config {
        return None;
    }
    log::debug!("kubeconfig: using k3s default {K3S_KUBECONFIG}");
    Some(PathBuf::from(K3S_KUBECONFIG))
}

/// Waits for k3s to finish reinstalling Traefik after its configuration changed.
pub async fn wait_for_traefik_reload(
    runner: &dyn CommandRunner,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<()> {
    log::info!("cluster: waiting for Traefik to be reloaded");
    let check = ReadinessCheck::new("Traefik reload", move || traefik_probe(runner))
        .attempts(timeouts.ingress_attempts)
        .interval(timeouts.poll_interval());
    wait_until_ready(check, interrupt).await
}

async fn traefik_probe(runner: &dyn CommandRunner) -> Probe {
    let completed = get_jsonpath(
        runner,
        "job",
        "helm-install-traefik",
        "kube-system",
        "{.status.completionTime}",
    )
    .await?;
    Ok(reloaded_recently(&completed, Utc::now())?)
}

/// True when the RFC 3339 `completion_time` lies within the reload window
/// before `now`. An empty value means the job has not completed.
pub fn reloaded_recently(completion_time: &str, now: DateTime<Utc>) -> Result<bool> {
    if completion_time.is_empty() {
        return Ok(false);
    }
    let completed = DateTime::parse_from_rfc3339(completion_time).map_err(|e| Error::UnexpectedOutput {
        command: "kubectl get job helm-install-traefik".to_string(),
        output: format!("{completion_time}: {e}"),
    })?;
    let age = now.signed_duration_since(completed.with_timezone(&Utc));
    Ok(age.num_seconds() < TRAEFIK_RELOAD_WINDOW_SECS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fake::{fail, out, FakeRunner};
    use chrono::TimeZone;

    #[tokio::test]
    async fn detects_k3s_with_traefik() {
        let runner = FakeRunner::new()
            .on("kubectl get node", out("v1.30.4+k3s1"))
            .on("kubectl explain ingressroutetcp", out("KIND: IngressRouteTCP"));

        let info = check_cluster(&runner).await.unwrap();
        assert!(info.is_k3s());
        assert_eq!(info.ingress, IngressKind::Traefik);
        assert_eq!(runner.count("get pod"), 0);
    }

    #[tokio::test]
    async fn detects_nginx_from_pod_commands() {
        let runner = FakeRunner::new()
            .on("kubectl explain", fail("the server doesn't have a resource type"))
            .on(
                "kubectl get pod -A",
                out("[\"/nginx-ingress-controller\",\"--election-id=ingress\"][\"coredns\"]"),
            );
        assert_eq!(guess_ingress(&runner).await.unwrap(), IngressKind::Nginx);
    }

    #[tokio::test]
    async fn unknown_ingress_and_failed_listing() {
        let runner = FakeRunner::new()
            .on("kubectl explain", fail("no such resource"))
            .on("kubectl get pod -A", out("[\"coredns\"]"));
        assert_eq!(guess_ingress(&runner).await.unwrap(), IngressKind::Unknown);

        let runner = FakeRunner::new()
            .on("kubectl explain", fail("no such resource"))
            .on("kubectl get pod", fail("forbidden"));
        assert!(matches!(
            guess_ingress(&runner).await,
            Err(Error::CommandFailed { .. })
        ));
    }

    #[test]
    fn non_k3s_clusters_keep_user_kubeconfig() {
        let info = ClusterInfo {
            kubelet_version: "v1.30.2+rke2r1".into(),
            ingress: IngressKind::Nginx,
        };
        assert_eq!(kubeconfig_for(&info), None);
    }

    #[test]
    fn reload_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert!(reloaded_recently("2026-03-01T11:59:30Z", now).unwrap());
        assert!(!reloaded_recently("2026-03-01T11:58:00Z", now).unwrap());
        assert!(!reloaded_recently("", now).unwrap());
        assert!(reloaded_recently("yesterday", now).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn traefik_wait_retries_until_recent_completion() {
        let recent = Utc::now().to_rfc3339();
        let runner = FakeRunner::new().on_seq(
            "get job helm-install-traefik -n kube-system",
            vec![fail("not found"), out(""), out(&recent)],
        );
        wait_for_traefik_reload(&runner, &Timeouts::default(), &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn traefik_wait_times_out_on_stale_job() {
        let runner = FakeRunner::new().on("get job", out("2020-01-01T00:00:00Z"));
        let timeouts = Timeouts {
            ingress_attempts: 4,
            ..Timeouts::default()
        };
        let err = wait_for_traefik_reload(&runner, &timeouts, &Interrupt::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReadinessTimeout { attempts: 4, .. }));
    }
}
