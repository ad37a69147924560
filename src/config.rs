//! podlift configuration.
//!
//! Values come from an optional YAML file; every field has a default so an
//! empty or missing file is valid. Command-line flags override file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::commands::exec::DEFAULT_CAPTURE_BYTES;
use crate::error::{Error, Result};
use crate::models::backend::WorkloadTarget;
use crate::models::certs::{CertificateBundle, ExistingChain, SelfSignedCa};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PODLIFT_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct Config {
    /// Explicit backend (`podman`, `podman-remote` or `kubectl`); guessed when unset.
    pub backend: Option<String>,
    pub target: TargetConfig,
    pub timeouts: Timeouts,
    pub capture: CaptureConfig,
    pub cert_manager: CertManagerConfig,
    pub ssl: SslConfig,
}

impl Config {
    /// Reads `path`, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            log::debug!("config: no configuration file, using defaults");
            return Ok(Self::default());
        };

        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&raw)?;
        log::info!("config: loaded {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.timeouts.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub container: String,
    pub selector: String,
    pub pod_container: String,
    pub namespace: Option<String>,
    pub service_unit: String,
    pub helm_release: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            container: "podlift-server".to_string(),
            selector: "app=podlift".to_string(),
            pod_container: "podlift".to_string(),
            namespace: None,
            service_unit: "podlift-server.service".to_string(),
            helm_release: "podlift".to_string(),
        }
    }
}

impl TargetConfig {
    pub fn workload_target(&self) -> WorkloadTarget {
        WorkloadTarget {
            container: self.container.clone(),
            selector: self.selector.clone(),
            pod_container: Some(self.pod_container.clone()).filter(|c| !c.is_empty()),
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            service_unit: self.service_unit.clone(),
            helm_release: self.helm_release.clone(),
        }
    }
}

/// Polling budgets. Durations are in seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub poll_interval_secs: u64,
    pub server_attempts: u32,
    pub container_attempts: u32,
    pub deployment_attempts: u32,
    pub issuer_attempts: u32,
    pub cert_manager_attempts: u32,
    pub ingress_attempts: u32,
    /// Upper bound on an image pull; `0` waits until the cluster reports
    /// success or failure.
    pub image_pull_ceiling_secs: u64,
    /// Request timeout of the kubectl query used to detect a cluster.
    pub cluster_probe_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            server_attempts: 60,
            container_attempts: 10,
            deployment_attempts: 60,
            issuer_attempts: 60,
            cert_manager_attempts: 60,
            ingress_attempts: 120,
            image_pull_ceiling_secs: 1800,
            cluster_probe_secs: 30,
        }
    }
}

impl Timeouts {
    /// Every wait needs at least one attempt.
    pub fn validate(&self) -> Result<()> {
        let attempts = [
            ("server_attempts", self.server_attempts),
            ("container_attempts", self.container_attempts),
            ("deployment_attempts", self.deployment_attempts),
            ("issuer_attempts", self.issuer_attempts),
            ("cert_manager_attempts", self.cert_manager_attempts),
            ("ingress_attempts", self.ingress_attempts),
        ];
        match attempts.iter().find(|(_, count)| *count == 0) {
            Some((field, _)) => Err(Error::Config(format!("timeouts.{field} must be at least 1"))),
            None => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn image_pull_ceiling(&self) -> Option<Duration> {
        (self.image_pull_ceiling_secs > 0).then(|| Duration::from_secs(self.image_pull_ceiling_secs))
    }

    pub fn cluster_probe(&self) -> Duration {
        Duration::from_secs(self.cluster_probe_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Bytes of subprocess output kept for error reports.
    pub tail_bytes: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tail_bytes: DEFAULT_CAPTURE_BYTES,
        }
    }
}

/// Where and how to install cert-manager when it is missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CertManagerConfig {
    /// Chart reference; the upstream chart is used when empty.
    pub chart: String,
    /// Repository of `chart`, if it is not a full reference.
    pub repo: String,
    pub version: String,
    pub namespace: String,
    /// Extra helm values file.
    pub values: Option<PathBuf>,
    pub pull_policy: String,
}

impl Default for CertManagerConfig {
    fn default() -> Self {
        Self {
            chart: String::new(),
            repo: String::new(),
            version: String::new(),
            namespace: "cert-manager".to_string(),
            values: None,
            pull_policy: "IfNotPresent".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SslConfig {
    /// Existing chain; takes precedence over `reuse_ca`.
    pub existing: Option<ExistingChainConfig>,
    /// CA pair handed to cert-manager. The self-signed CA is generated when
    /// neither this nor `existing` is set.
    pub reuse_ca: Option<ReusedCaConfig>,
    pub fqdn: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub org: String,
    pub org_unit: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExistingChainConfig {
    pub root_ca: PathBuf,
    pub intermediates: Vec<PathBuf>,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReusedCaConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl SslConfig {
    pub fn bundle(&self) -> CertificateBundle {
        match (&self.existing, &self.reuse_ca) {
            (Some(chain), _) => CertificateBundle::UseExisting(ExistingChain {
                root_ca: chain.root_ca.clone(),
                intermediates: chain.intermediates.clone(),
                server_cert: chain.server_cert.clone(),
                server_key: chain.server_key.clone(),
            }),
            (None, Some(ca)) => CertificateBundle::ReuseCa {
                cert: ca.cert.clone(),
                key: ca.key.clone(),
            },
            (None, None) => CertificateBundle::SelfSigned(SelfSignedCa {
                fqdn: self.fqdn.clone(),
                country: self.country.clone(),
                state: self.state.clone(),
                city: self.city.clone(),
                org: self.org.clone(),
                org_unit: self.org_unit.clone(),
                email: self.email.clone(),
                password: self.password.clone(),
            }),
        }
    }
}
