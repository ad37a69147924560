use std::path::Path;

use crate::commands::exec::{run_text, CommandRunner, Invocation};
use crate::error::Result;

pub const HELM: &str = "helm";

/// One chart installation for `helm upgrade`.
#[derive(Debug, Clone, Default)]
pub struct Release<'a> {
    pub name: &'a str,
    pub chart: &'a str,
    pub namespace: &'a str,
    /// Passed as `--repo` when set.
    pub repo: Option<&'a str>,
    /// Passed as `--version` when set.
    pub version: Option<&'a str>,
    /// Adds `--install` so a missing release is created.
    pub install: bool,
}

/// Builds the `helm upgrade` invocation for `release`. `extra` goes last.
pub fn upgrade_invocation(release: &Release<'_>, kubeconfig: Option<&Path>, extra: &[String]) -> Invocation {
    let mut inv = Invocation::new(HELM).args([
        "upgrade",
        "-n",
        release.namespace,
        "--create-namespace",
        release.name,
        release.chart,
    ]);
    if let Some(path) = kubeconfig {
        inv = inv.arg("--kubeconfig").arg(path.to_string_lossy());
    }
    if let Some(repo) = release.repo.filter(|r| !r.is_empty()) {
        inv = inv.args(["--repo", repo]);
    }
    if let Some(version) = release.version.filter(|v| !v.is_empty()) {
        inv = inv.args(["--version", version]);
    }
    if release.install {
        inv = inv.arg("--install");
    }
    inv.args(extra.iter().cloned())
}

/// Runs `helm upgrade`, installing the release when `release.install` is set.
pub async fn upgrade(
    runner: &dyn CommandRunner,
    release: &Release<'_>,
    kubeconfig: Option<&Path>,
    extra: &[String],
) -> Result<()> {
    let verb = if release.install { "install" } else { "upgrade" };
    log::info!(
        "helm: {verb} chart {} as {} in namespace {}",
        release.chart,
        release.name,
        release.namespace
    );
    runner.run(&upgrade_invocation(release, kubeconfig, extra)).await?;
    Ok(())
}

/// True when a release called `name` exists in any namespace.
pub async fn has_release(runner: &dyn CommandRunner, name: &str, kubeconfig: Option<&Path>) -> bool {
    let mut list = Invocation::new(HELM);
    if let Some(path) = kubeconfig {
        list = list.arg("--kubeconfig").arg(path.to_string_lossy());
    }
    // -f takes a regular expression.
    let list = list.args(["list", "-aA", "-o", "json", "-f"]).arg(format!("^{name}$"));

    let raw = match run_text(runner, &list).await {
        Ok(raw) => raw,
        Err(e) => {
            log::debug!("helm: cannot list releases: {e}");
            return false;
        }
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
        Ok(releases) => !releases.is_empty(),
        Err(e) => {
            log::debug!("helm: unexpected release list: {e}");
            false
        }
    }
}
