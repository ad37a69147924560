//! Error types shared by every podlift operation.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while resolving a backend, waiting on workloads or
/// bootstrapping certificates. All of them abort the enclosing operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// None of the probed backends can reach the server workload.
    #[error("server is not reachable with any of: {}", candidates.join(", "))]
    BackendNotFound { candidates: Vec<String> },

    /// The requested backend name is not one podlift knows how to drive.
    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    #[error("container {container} is not running")]
    ContainerNotRunning { container: String },

    #[error("no pod labeled {selector} is running")]
    PodNotFound { selector: String },

    /// A readiness wait ran out of attempts.
    #[error("{subject} not ready after {attempts} attempt(s) ({}s elapsed)", elapsed.as_secs())]
    ReadinessTimeout {
        subject: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("failed to pull image for pod {pod}: {message}")]
    ImagePullFailed { pod: String, message: String },

    #[error("{what} file is not accessible: {}", path.display())]
    CertificateFileMissing { what: &'static str, path: PathBuf },

    #[error("issuer {issuer} did not turn ready: {source}")]
    IssuerNotReady {
        issuer: String,
        #[source]
        source: Box<Error>,
    },

    /// A subprocess exited with a non-zero status. `output_tail` holds the
    /// last captured bytes of its combined output.
    #[error("{program} failed with exit code {}: {output_tail}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    CommandFailed {
        program: String,
        exit_code: Option<i32>,
        output_tail: String,
    },

    #[error("{program} did not finish within {}s", timeout.as_secs())]
    CommandTimedOut { program: String, timeout: Duration },

    #[error("interrupted while waiting for {subject}")]
    Interrupted { subject: String },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("a CA password is required to generate a self-signed CA")]
    MissingCaPassword,

    #[error("unexpected output from {command}: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result type using the podlift [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
