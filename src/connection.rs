use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::commands::exec::{run_text, CommandRunner, Invocation};
use crate::commands::workload::{locate_workload, resolve_backend};
use crate::config::Timeouts;
use crate::error::{Error, Result};
use crate::models::backend::{server_path, Backend, Owner, Workload, WorkloadTarget};
use crate::readiness::{wait_until_ready, Interrupt, Probe, ProbeError, ReadinessCheck};

/// CA certificate the server publishes for its clients.
pub const SERVER_CA_PATH: &str = "server:/etc/pki/trust/anchors/podlift-ca.crt";

/// Host trust anchor directories: SUSE, then Red Hat. Debian is the fallback.
const TRUST_ANCHOR_DIRS: [&str; 2] = ["/etc/pki/trust/anchors", "/etc/pki/ca-trust/source/anchors"];
const DEBIAN_TRUST_ANCHOR_DIR: &str = "/usr/local/share/ca-certificates";

/// First trust anchor directory of the host for which `exists` holds.
pub fn trust_anchor_dir(exists: impl Fn(&Path) -> bool) -> PathBuf {
    TRUST_ANCHOR_DIRS
        .iter()
        .map(Path::new)
        .find(|dir| exists(dir))
        .unwrap_or(Path::new(DEBIAN_TRUST_ANCHOR_DIR))
        .to_path_buf()
}

/// Backend and workload of one command invocation.
///
/// Both are resolved on first use and cached for the life of the value.
/// Concurrent first uses share a single resolution.
pub struct Connection {
    runner: Arc<dyn CommandRunner>,
    explicit: Option<String>,
    target: WorkloadTarget,
    probe_timeout: Duration,
    backend: OnceCell<Backend>,
    workload: OnceCell<Workload>,
}

impl Connection {
    /// `explicit` skips backend detection; `probe_timeout` bounds the cluster query.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        explicit: Option<String>,
        target: WorkloadTarget,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            explicit: explicit.filter(|b| !b.is_empty()),
            target,
            probe_timeout,
            backend: OnceCell::new(),
            workload: OnceCell::new(),
        }
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn target(&self) -> &WorkloadTarget {
        &self.target
    }

    /// The backend, resolving it on first call.
    pub async fn backend(&self) -> Result<Backend> {
        let backend = self
            .backend
            .get_or_try_init(|| {
                resolve_backend(
                    self.runner.as_ref(),
                    self.explicit.as_deref(),
                    &self.target,
                    self.probe_timeout,
                )
            })
            .await?;
        Ok(*backend)
    }

    /// The backend if it has been resolved already; `None` means unresolved.
    pub fn resolved_backend(&self) -> Option<Backend> {
        self.backend.get().copied()
    }

    /// The running server workload, locating it on first success.
    pub async fn workload(&self) -> Result<&Workload> {
        let backend = self.backend().await?;
        self.workload
            .get_or_try_init(|| locate_workload(self.runner.as_ref(), backend, &self.target))
            .await
    }

    /// Runs `command` inside the workload and returns its output.
    pub async fn exec(&self, command: &str, args: &[&str]) -> Result<String> {
        self.exec_at(command, args, log::Level::Debug).await
    }

    async fn exec_at(&self, command: &str, args: &[&str], level: log::Level) -> Result<String> {
        let backend = self.backend().await?;
        let workload = self.workload().await?;

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command.to_string());
        argv.extend(args.iter().map(|a| a.to_string()));

        let inv = Invocation::new(backend.executable())
            .args(backend.exec_args(workload, &argv))
            .level(level);
        run_text(self.runner.as_ref(), &inv).await
    }

    /// Copies between the host and the workload. Prefix workload paths with
    /// [`SERVER_PREFIX`](crate::models::backend::SERVER_PREFIX).
    ///
    /// A file copied into the workload is then given to `owner`, if any.
    pub async fn copy(&self, src: &str, dst: &str, owner: Option<Owner<'_>>) -> Result<()> {
        let backend = self.backend().await?;
        let workload = self.workload().await?;
        let inv = Invocation::new(backend.executable()).args(backend.copy_args(workload, src, dst));
        self.runner.run(&inv).await?;

        let owner = owner.filter(|o| !o.user.is_empty());
        if let (Some(owner), Some(path)) = (owner, server_path(dst)) {
            let owner = owner.to_string();
            self.exec("chown", &[owner.as_str(), path]).await?;
        }
        Ok(())
    }

    /// Installs the server CA certificate in the host trust store as
    /// `<fqdn>.crt` and returns where it was written.
    pub async fn copy_ca_certificate(&self, fqdn: &str) -> Result<PathBuf> {
        log::info!("connection: copying the server CA certificate to the host");
        let host_path = trust_anchor_dir(|dir| dir.exists()).join(format!("{fqdn}.crt"));
        self.copy(SERVER_CA_PATH, &host_path.to_string_lossy(), None).await?;

        log::info!("connection: updating host trusted certificates");
        self.runner.run(&Invocation::new("update-ca-certificates")).await?;
        Ok(host_path)
    }

    /// Waits until a command can run in the workload.
    pub async fn wait_for_container(&self, timeouts: &Timeouts, interrupt: &Interrupt) -> Result<()> {
        let check = ReadinessCheck::new(
            format!("container {}", self.target.container),
            move || self.exec_probe("true", &[]),
        )
        .attempts(timeouts.container_attempts)
        .interval(timeouts.poll_interval());
        wait_until_ready(check, interrupt).await
    }

    /// Waits until the server's systemd reached `multi-user.target`.
    pub async fn wait_for_server(&self, timeouts: &Timeouts, interrupt: &Interrupt) -> Result<()> {
        log::info!("connection: waiting for the server to start");
        let check = ReadinessCheck::new("server boot", move || {
            self.exec_probe("systemctl", &["is-active", "-q", "multi-user.target"])
        })
        .attempts(timeouts.server_attempts)
        .interval(timeouts.poll_interval());
        wait_until_ready(check, interrupt).await
    }

    async fn exec_probe(&self, command: &str, args: &[&str]) -> Probe {
        match self.exec_at(command, args, log::Level::Trace).await {
            Ok(_) => Ok(true),
            // Waiting does not make a missing tool or a bad backend name appear.
            Err(e @ (Error::BackendNotFound { .. } | Error::UnsupportedBackend(_))) => {
                Err(ProbeError::Fatal(e))
            }
            Err(e) => Err(ProbeError::Retry(e)),
        }
    }
}
