//! Certificate bootstrap.
//!
//! Either deploys a user-supplied chain, or installs cert-manager and has it
//! generate a self-signed CA. Both paths end with the CA certificate, never
//! its key, published in a ConfigMap for the components that must trust it.
//!
//! A user-supplied CA pair can also be handed to cert-manager, which then
//! signs the server certificates with it.
//!
//! ```text
//! NoCert ─┬─ UseExisting ── ChainDeployed ─────────────────────┬─ CaExtracted
//!         ├─ ReuseCaRequested ─┬─ EngineReady ── IssuerReady ───┘
//!         └─ SelfSignedRequested ┘
//! ```
//!
//! Any error moves the bootstrap to `Failed`; nothing is retried.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::commands::exec::CommandRunner;
use crate::commands::helm::{self, Release};
use crate::commands::kubectl::{apply_manifests, get_jsonpath, is_deployment_ready};
use crate::config::{CertManagerConfig, Timeouts};
use crate::error::{Error, Result};
use crate::models::certs::{CertificateBundle, ExistingChain, SelfSignedCa};
use crate::models::k8s::{self, IssuerSpec, CA_CONFIGMAP, CA_ISSUER, CA_SECRET, SELF_SIGNED_ISSUER};
use crate::readiness::{wait_until_ready, Interrupt, Probe, ReadinessCheck};
use crate::ssl;

const CERT_MANAGER: &str = "cert-manager";
const CERT_MANAGER_WEBHOOK: &str = "cert-manager-webhook";
const JETSTACK_REPO: &str = "https://charts.jetstack.io";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    NoCert,
    UseExisting,
    ChainDeployed,
    ReuseCaRequested,
    SelfSignedRequested,
    EngineReady,
    IssuerReady,
    CaExtracted,
    Failed,
}

pub struct CertificateBootstrap<'a> {
    runner: &'a dyn CommandRunner,
    namespace: String,
    bundle: CertificateBundle,
    cert_manager: &'a CertManagerConfig,
    timeouts: &'a Timeouts,
    kubeconfig: Option<PathBuf>,
    state: BootstrapState,
}

impl<'a> CertificateBootstrap<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        namespace: impl Into<String>,
        bundle: CertificateBundle,
        cert_manager: &'a CertManagerConfig,
        timeouts: &'a Timeouts,
    ) -> Self {
        Self {
            runner,
            namespace: namespace.into(),
            bundle,
            cert_manager,
            timeouts,
            kubeconfig: None,
            state: BootstrapState::NoCert,
        }
    }

    /// kubeconfig passed to helm when installing cert-manager.
    pub fn kubeconfig(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig = path;
        self
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Runs the bootstrap to completion and returns the helm arguments the
    /// server chart needs: the ingress issuer annotation when cert-manager
    /// issues the server certificate, nothing otherwise.
    ///
    /// File checks and the CA password check happen before any command runs.
    pub async fn run(&mut self, interrupt: &Interrupt) -> Result<Vec<String>> {
        self.state = BootstrapState::NoCert;
        let outcome = self.advance(interrupt).await;
        if let Err(e) = &outcome {
            log::warn!("certs: bootstrap failed in state {:?}: {e}", self.state);
            self.state = BootstrapState::Failed;
        }
        outcome
    }

    fn enter(&mut self, state: BootstrapState) {
        log::debug!("certs: {:?} -> {state:?}", self.state);
        self.state = state;
    }

    async fn advance(&mut self, interrupt: &Interrupt) -> Result<Vec<String>> {
        let helm_args = match self.bundle.clone() {
            CertificateBundle::UseExisting(chain) => {
                ssl::check_paths(&chain)?;
                self.enter(BootstrapState::UseExisting);

                self.deploy_existing(&chain).await?;
                self.enter(BootstrapState::ChainDeployed);
                Vec::new()
            }
            CertificateBundle::ReuseCa { cert, key } => {
                let ca_pem = ssl::read_ca_certificate(&cert)?;
                let ca_key = ssl::read_private_key(&key)?;
                self.enter(BootstrapState::ReuseCaRequested);

                self.ensure_cert_manager(interrupt).await?;
                self.deploy_reused_ca(&ca_pem, &ca_key, interrupt).await?;
                self.enter(BootstrapState::IssuerReady);

                create_ca_config(self.runner, &self.namespace, &ca_pem).await?;
                ingress_issuer_args()
            }
            CertificateBundle::SelfSigned(ca) => {
                if ca.password.is_empty() {
                    return Err(Error::MissingCaPassword);
                }
                self.enter(BootstrapState::SelfSignedRequested);

                self.ensure_cert_manager(interrupt).await?;
                self.deploy_generated_ca(&ca, interrupt).await?;
                self.enter(BootstrapState::IssuerReady);

                extract_ca_to_config(self.runner, &self.namespace).await?;
                ingress_issuer_args()
            }
        };
        self.enter(BootstrapState::CaExtracted);
        Ok(helm_args)
    }

    async fn ensure_cert_manager(&mut self, interrupt: &Interrupt) -> Result<()> {
        install_cert_manager(
            self.runner,
            self.cert_manager,
            self.kubeconfig.as_deref(),
            self.timeouts,
            interrupt,
        )
        .await?;
        self.enter(BootstrapState::EngineReady);
        Ok(())
    }

    async fn deploy_existing(&self, chain: &ExistingChain) -> Result<()> {
        let key = ssl::read_private_key(&chain.server_key)?;
        let ordered = ssl::order_chain(chain)?;
        let root_ca = ordered.root_ca_pem();

        log::info!("certs: creating SSL server certificate secret");
        let secret = k8s::tls_secret(
            &self.namespace,
            ordered.tls_chain_pem().as_bytes(),
            &key,
            root_ca.as_bytes(),
        );
        apply_manifests(self.runner, &[serde_yaml::to_string(&secret)?], "tls-secret").await?;

        create_ca_config(self.runner, &self.namespace, &root_ca).await
    }

    async fn deploy_generated_ca(&self, ca: &SelfSignedCa, interrupt: &Interrupt) -> Result<()> {
        log::info!("certs: creating SSL certificate issuer");
        let ns = self.namespace.as_str();
        let documents = [
            serde_yaml::to_string(&k8s::issuer(SELF_SIGNED_ISSUER, ns, IssuerSpec::self_signed()))?,
            serde_yaml::to_string(&k8s::ca_certificate(ns, ca))?,
            serde_yaml::to_string(&k8s::issuer(CA_ISSUER, ns, IssuerSpec::ca(CA_SECRET)))?,
        ];
        apply_manifests(self.runner, &documents, "issuer").await?;

        wait_for_issuer(self.runner, ns, CA_ISSUER, self.timeouts, interrupt).await
    }

    async fn deploy_reused_ca(&self, cert: &str, key: &[u8], interrupt: &Interrupt) -> Result<()> {
        log::info!("certs: creating cert-manager issuer for the existing CA");
        let ns = self.namespace.as_str();
        let documents = [
            serde_yaml::to_string(&k8s::ca_secret(ns, cert.as_bytes(), key))?,
            serde_yaml::to_string(&k8s::issuer(CA_ISSUER, ns, IssuerSpec::ca(CA_SECRET)))?,
        ];
        apply_manifests(self.runner, &documents, "issuer").await?;

        wait_for_issuer(self.runner, ns, CA_ISSUER, self.timeouts, interrupt).await
    }
}

/// Helm arguments making the server's ingress request its certificate from
/// the CA issuer.
pub fn ingress_issuer_args() -> Vec<String> {
    vec![
        "--set-json".to_string(),
        format!("ingressSSLAnnotations={{\"cert-manager.io/issuer\": \"{CA_ISSUER}\"}}"),
    ]
}

/// Installs cert-manager with helm unless it already runs, then waits for
/// its webhook.
pub async fn install_cert_manager(
    runner: &dyn CommandRunner,
    config: &CertManagerConfig,
    kubeconfig: Option<&Path>,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<()> {
    if is_deployment_ready(runner, None, CERT_MANAGER).await? {
        log::debug!("certs: cert-manager already running");
    } else {
        log::info!("certs: installing cert-manager");
        let mut extra = vec![
            "--set".to_string(),
            "crds.enabled=true".to_string(),
            "--set".to_string(),
            "crds.keep=true".to_string(),
            // Uninstall only removes what carries this label.
            "--set-json".to_string(),
            "global.commonLabels={\"installedby\": \"podlift\"}".to_string(),
            "--set".to_string(),
            format!("image.pullPolicy={}", config.pull_policy),
        ];
        if let Some(values) = &config.values {
            extra.push("-f".to_string());
            extra.push(values.to_string_lossy().into_owned());
        }

        let (repo, chart) = if config.chart.is_empty() {
            (Some(JETSTACK_REPO), CERT_MANAGER)
        } else {
            (Some(config.repo.as_str()), config.chart.as_str())
        };
        let release = Release {
            name: CERT_MANAGER,
            chart,
            namespace: &config.namespace,
            repo,
            version: Some(config.version.as_str()),
            install: true,
        };
        helm::upgrade(runner, &release, kubeconfig, &extra).await?;
    }

    let check = ReadinessCheck::new(format!("{CERT_MANAGER_WEBHOOK} deployment"), move || {
        webhook_probe(runner)
    })
    .attempts(timeouts.cert_manager_attempts)
    .interval(timeouts.poll_interval());
    wait_until_ready(check, interrupt).await
}

async fn webhook_probe(runner: &dyn CommandRunner) -> Probe {
    Ok(is_deployment_ready(runner, None, CERT_MANAGER_WEBHOOK).await?)
}

/// Waits until issuer `name` reports a `Ready` condition.
pub async fn wait_for_issuer(
    runner: &dyn CommandRunner,
    namespace: &str,
    name: &str,
    timeouts: &Timeouts,
    interrupt: &Interrupt,
) -> Result<()> {
    let check = ReadinessCheck::new(format!("issuer {name}"), move || {
        issuer_probe(runner, namespace, name)
    })
    .attempts(timeouts.issuer_attempts)
    .interval(timeouts.poll_interval());

    wait_until_ready(check, interrupt).await.map_err(|e| match e {
        interrupted @ Error::Interrupted { .. } => interrupted,
        other => Error::IssuerNotReady {
            issuer: name.to_string(),
            source: Box::new(other),
        },
    })
}

async fn issuer_probe(runner: &dyn CommandRunner, namespace: &str, name: &str) -> Probe {
    let types = get_jsonpath(runner, "issuer", name, namespace, "{.status.conditions[*].type}").await?;
    Ok(types == "Ready")
}

/// Copies the generated CA certificate into the CA ConfigMap, unless the
/// ConfigMap already holds one.
pub async fn extract_ca_to_config(runner: &dyn CommandRunner, namespace: &str) -> Result<()> {
    const CA_DATA: &str = r"{.data.ca\.crt}";

    log::info!("certs: extracting CA certificate to a configmap");
    match get_jsonpath(runner, "configmap", CA_CONFIGMAP, namespace, CA_DATA).await {
        Ok(existing) if !existing.is_empty() => {
            log::info!("certs: {CA_CONFIGMAP} configmap already exists, skipping extraction");
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => log::debug!("certs: no {CA_CONFIGMAP} configmap yet: {e}"),
    }

    let encoded = get_jsonpath(runner, "secret", CA_SECRET, namespace, CA_DATA).await?;
    let decoded = STANDARD.decode(encoded.as_bytes())?;
    let ca = String::from_utf8_lossy(&decoded);
    create_ca_config(runner, namespace, &ca).await
}

async fn create_ca_config(runner: &dyn CommandRunner, namespace: &str, ca_pem: &str) -> Result<()> {
    let config_map = k8s::ca_config_map(namespace, ca_pem);
    apply_manifests(runner, &[serde_yaml::to_string(&config_map)?], "ca-configmap").await
}
