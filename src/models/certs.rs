use std::path::PathBuf;

/// User-supplied certificate chain and server key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingChain {
    pub root_ca: PathBuf,
    /// Optional intermediate CA files; empty paths are skipped.
    pub intermediates: Vec<PathBuf>,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
}

/// Subject of the CA generated by the self-signed issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfSignedCa {
    pub fqdn: String,
    pub country: String,
    pub state: String,
    pub city: String,
    pub org: String,
    pub org_unit: String,
    pub email: String,
    /// Password protecting the generated CA key. May be a placeholder, but
    /// must be present.
    pub password: String,
}

/// Which certificates the server gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateBundle {
    UseExisting(ExistingChain),
    /// A user-supplied CA pair that cert-manager signs server certificates with.
    ReuseCa { cert: PathBuf, key: PathBuf },
    SelfSigned(SelfSignedCa),
}

impl CertificateBundle {
    pub fn uses_existing(&self) -> bool {
        matches!(self, CertificateBundle::UseExisting(_))
    }
}
