// Cluster-side types: facts read from the cluster, event records, and the
// manifests podlift applies.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use serde::{Deserialize, Serialize};

use crate::models::certs::SelfSignedCa;

/// Self-signed issuer bootstrapping the CA.
pub const SELF_SIGNED_ISSUER: &str = "podlift-issuer";
/// Issuer signing server certificates with the generated CA.
pub const CA_ISSUER: &str = "podlift-ca-issuer";
/// Secret holding the CA certificate and key.
pub const CA_SECRET: &str = "podlift-ca";
/// ConfigMap holding only the CA certificate.
pub const CA_CONFIGMAP: &str = "podlift-ca";
/// Secret holding the server TLS chain and key.
pub const TLS_SECRET: &str = "podlift-cert";

pub const APP_LABEL: &str = "app";
pub const APP_NAME: &str = "podlift";

// ── cluster facts ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressKind {
    Traefik,
    Nginx,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// Kubelet version of the first node, e.g. `v1.30.4+k3s1`.
    pub kubelet_version: String,
    pub ingress: IngressKind,
}

impl ClusterInfo {
    pub fn is_k3s(&self) -> bool {
        self.kubelet_version.contains("k3s")
    }

    pub fn is_rke2(&self) -> bool {
        self.kubelet_version.contains("rke2")
    }
}

// ── events ────────────────────────────────────────────────────────────────────

/// The parts of a cluster event the image-pull watcher looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PodEvent {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// `kubectl get event -o json` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub items: Vec<PodEvent>,
}

// ── manifests ─────────────────────────────────────────────────────────────────

/// A custom resource with a `spec`, serialized the way kubectl expects it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest<S> {
    pub api_version: &'static str,
    pub kind: &'static str,
    pub metadata: ObjectMeta,
    pub spec: S,
}

const CERT_MANAGER_API: &str = "cert-manager.io/v1";

/// Exactly one of the fields is set.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

impl IssuerSpec {
    pub fn self_signed() -> Self {
        Self {
            self_signed: Some(SelfSignedIssuer {}),
            ca: None,
        }
    }

    pub fn ca(secret_name: &str) -> Self {
        Self {
            self_signed: None,
            ca: Some(CaIssuer {
                secret_name: secret_name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfSignedIssuer {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    #[serde(rename = "isCA")]
    pub is_ca: bool,
    pub subject: CertificateSubject,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub email_addresses: Vec<String>,
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub secret_name: String,
    pub private_key: PrivateKeySpec,
    pub issuer_ref: IssuerRef,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSubject {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub provinces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub localities: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub organizational_units: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivateKeySpec {
    pub algorithm: &'static str,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuerRef {
    pub name: String,
    pub kind: &'static str,
    pub group: &'static str,
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(APP_LABEL.to_string(), APP_NAME.to_string())])),
        ..ObjectMeta::default()
    }
}

fn non_empty(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    }
}

pub fn issuer(name: &str, namespace: &str, spec: IssuerSpec) -> Manifest<IssuerSpec> {
    Manifest {
        api_version: CERT_MANAGER_API,
        kind: "Issuer",
        metadata: meta(name, namespace),
        spec,
    }
}

/// CA certificate issued by the self-signed issuer, stored in [`CA_SECRET`].
pub fn ca_certificate(namespace: &str, ca: &SelfSignedCa) -> Manifest<CertificateSpec> {
    Manifest {
        api_version: CERT_MANAGER_API,
        kind: "Certificate",
        metadata: meta(CA_SECRET, namespace),
        spec: CertificateSpec {
            is_ca: true,
            subject: CertificateSubject {
                countries: non_empty(&ca.country),
                provinces: non_empty(&ca.state),
                localities: non_empty(&ca.city),
                organizations: non_empty(&ca.org),
                organizational_units: non_empty(&ca.org_unit),
            },
            email_addresses: non_empty(&ca.email),
            common_name: ca.fqdn.clone(),
            dns_names: vec![ca.fqdn.clone()],
            secret_name: CA_SECRET.to_string(),
            private_key: PrivateKeySpec {
                algorithm: "ECDSA",
                size: 256,
            },
            issuer_ref: IssuerRef {
                name: SELF_SIGNED_ISSUER.to_string(),
                kind: "Issuer",
                group: "cert-manager.io",
            },
        },
    }
}

/// `kubernetes.io/tls` secret with the leaf-first chain, key and CA.
pub fn tls_secret(namespace: &str, chain: &[u8], key: &[u8], ca: &[u8]) -> Secret {
    typed_tls_secret(TLS_SECRET, namespace, chain, key, ca)
}

/// [`CA_SECRET`] holding a user-supplied CA pair for the CA issuer.
pub fn ca_secret(namespace: &str, cert: &[u8], key: &[u8]) -> Secret {
    typed_tls_secret(CA_SECRET, namespace, cert, key, cert)
}

fn typed_tls_secret(name: &str, namespace: &str, chain: &[u8], key: &[u8], ca: &[u8]) -> Secret {
    Secret {
        metadata: meta(name, namespace),
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(chain.to_vec())),
            ("tls.key".to_string(), ByteString(key.to_vec())),
            ("ca.crt".to_string(), ByteString(ca.to_vec())),
        ])),
        ..Secret::default()
    }
}

/// ConfigMap publishing the CA certificate without its key.
pub fn ca_config_map(namespace: &str, ca_pem: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(CA_CONFIGMAP, namespace),
        data: Some(BTreeMap::from([("ca.crt".to_string(), ca_pem.to_string())])),
        ..ConfigMap::default()
    }
}
