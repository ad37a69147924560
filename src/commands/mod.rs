pub mod certs;
pub mod cluster;
pub mod events;
pub mod exec;
pub mod helm;
pub mod kubectl;
pub mod workload;

#[cfg(test)]
pub(crate) mod fake;
