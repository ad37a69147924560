pub mod backend;
pub mod certs;
pub mod k8s;
