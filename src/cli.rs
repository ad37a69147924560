use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};

use crate::commands::certs::CertificateBootstrap;
use crate::commands::cluster::{check_cluster, kubeconfig_for, wait_for_traefik_reload};
use crate::commands::events::wait_for_image_pulled;
use crate::commands::exec::{CommandRunner, SystemRunner};
use crate::commands::kubectl::wait_for_deployment;
use crate::config::{Config, CONFIG_ENV};
use crate::connection::Connection;
use crate::error::Result;
use crate::readiness::Interrupt;

#[derive(Debug, Parser)]
#[command(name = "podlift", version, about = "Inspect and wait on a podlift server running on podman or Kubernetes")]
pub struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Backend to use instead of detecting one: podman, podman-remote or kubectl.
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Namespace of the server; all namespaces are searched when unset.
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// More output: -v for debug, -vv for trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the detected backend and the server workload.
    Status,
    /// Show the cluster distribution, ingress controller and kubeconfig.
    ClusterInfo,
    /// Wait for the server container and its boot to complete.
    WaitServer,
    /// Wait for a deployment's image to be pulled and a replica to be ready.
    WaitDeployment {
        name: String,
        /// Value of the pods' app label; defaults to the deployment name.
        #[arg(long)]
        app: Option<String>,
    },
    /// Wait for the image of a pod to be pulled.
    WaitImage { pod: String },
    /// Wait for k3s to reload Traefik.
    WaitIngress,
    /// Deploy the configured certificates or generate a self-signed CA.
    /// Prints the helm arguments the server chart needs, if any.
    Certs,
    /// Install the server CA certificate in the host trust store.
    TrustCa {
        /// Server FQDN, used as the certificate file name.
        fqdn: String,
    },
}

impl Cli {
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Loads the configuration and applies the command-line overrides.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if let Some(backend) = &self.backend {
            config.backend = Some(backend.clone());
        }
        if let Some(ns) = &self.namespace {
            config.target.namespace = Some(ns.clone());
        }
        Ok(config)
    }

    pub async fn execute(&self, config: Config, interrupt: &Interrupt) -> Result<()> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new(config.capture.tail_bytes));
        let timeouts = &config.timeouts;
        let target = config.target.workload_target();
        let namespace = target.namespace.clone();

        match &self.command {
            Command::Status => {
                let conn = Connection::new(
                    runner,
                    config.backend.clone(),
                    target,
                    timeouts.cluster_probe(),
                );
                let backend = conn.backend().await?;
                println!("backend:  {backend}");
                println!("workload: {}", conn.workload().await?);
            }
            Command::ClusterInfo => {
                let info = check_cluster(runner.as_ref()).await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                if let Some(path) = kubeconfig_for(&info) {
                    println!("kubeconfig: {}", path.display());
                }
            }
            Command::WaitServer => {
                let conn = Connection::new(
                    runner,
                    config.backend.clone(),
                    target,
                    timeouts.cluster_probe(),
                );
                conn.wait_for_container(timeouts, interrupt).await?;
                conn.wait_for_server(timeouts, interrupt).await?;
                log::info!("cli: server {} is up", conn.workload().await?);
            }
            Command::WaitDeployment { name, app } => {
                let app = app.as_deref().unwrap_or(name.as_str());
                wait_for_deployment(runner.as_ref(), namespace.as_deref(), name, app, timeouts, interrupt).await?;
                log::info!("cli: deployment {name} is ready");
            }
            Command::WaitImage { pod } => {
                wait_for_image_pulled(runner.as_ref(), pod, namespace.as_deref(), timeouts, interrupt).await?;
                log::info!("cli: image of {pod} pulled");
            }
            Command::WaitIngress => {
                wait_for_traefik_reload(runner.as_ref(), timeouts, interrupt).await?;
                log::info!("cli: Traefik reloaded");
            }
            Command::Certs => {
                let kubeconfig = match check_cluster(runner.as_ref()).await {
                    Ok(info) => kubeconfig_for(&info),
                    Err(e) => {
                        log::warn!("cli: cannot inspect the cluster, using the default kubeconfig: {e}");
                        None
                    }
                };
                let namespace = namespace.unwrap_or_else(|| "default".to_string());
                let mut bootstrap = CertificateBootstrap::new(
                    runner.as_ref(),
                    namespace,
                    config.ssl.bundle(),
                    &config.cert_manager,
                    timeouts,
                )
                .kubeconfig(kubeconfig);
                let helm_args = bootstrap.run(interrupt).await?;
                log::info!("cli: certificates ready ({:?})", bootstrap.state());
                if !helm_args.is_empty() {
                    println!("{}", helm_args.join(" "));
                }
            }
            Command::TrustCa { fqdn } => {
                let conn = Connection::new(
                    runner,
                    config.backend.clone(),
                    target,
                    timeouts.cluster_probe(),
                );
                let path = conn.copy_ca_certificate(fqdn).await?;
                log::info!("cli: server CA installed as {}", path.display());
            }
        }
        Ok(())
    }
}
