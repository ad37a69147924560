use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where the server workload runs and which executable drives it.
///
/// Resolved once per [`Connection`](crate::connection::Connection); until then
/// the connection reports no backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Local podman.
    ContainerEngine,
    /// podman-remote talking to a podman service.
    ContainerEngineRemote,
    /// A Kubernetes-compatible cluster reached with kubectl.
    ClusterCli,
}

impl Backend {
    /// Container engines, in probing order.
    pub const CONTAINER_ENGINES: [Backend; 2] =
        [Backend::ContainerEngine, Backend::ContainerEngineRemote];

    pub fn executable(self) -> &'static str {
        match self {
            Backend::ContainerEngine => "podman",
            Backend::ContainerEngineRemote => "podman-remote",
            Backend::ClusterCli => "kubectl",
        }
    }

    pub fn is_cluster(self) -> bool {
        matches!(self, Backend::ClusterCli)
    }

    /// Arguments running `command` inside `workload`.
    pub fn exec_args(self, workload: &Workload, command: &[String]) -> Vec<String> {
        let mut args = vec!["exec".to_string(), workload.name.clone()];
        if self.is_cluster() {
            if let Some(ns) = &workload.namespace {
                args.extend(["-n".to_string(), ns.clone()]);
            }
            if let Some(container) = &workload.container {
                args.extend(["-c".to_string(), container.clone()]);
            }
            args.push("--".to_string());
        }
        args.extend(command.iter().cloned());
        args
    }

    /// Arguments copying `src` to `dst`. A `server:` prefix on either side
    /// designates a path inside the workload.
    pub fn copy_args(self, workload: &Workload, src: &str, dst: &str) -> Vec<String> {
        let prefix = match (self.is_cluster(), &workload.namespace) {
            (true, Some(ns)) => format!("{ns}/{}:", workload.name),
            _ => format!("{}:", workload.name),
        };
        let expand = |path: &str| match server_path(path) {
            Some(inner) => format!("{prefix}{inner}"),
            None => path.to_string(),
        };
        let src = expand(src);
        let dst = expand(dst);

        let mut args = vec!["cp".to_string()];
        if self.is_cluster() {
            if let Some(container) = &workload.container {
                args.extend(["-c".to_string(), container.clone()]);
            }
            if let Some(ns) = &workload.namespace {
                args.extend(["-n".to_string(), ns.clone()]);
            }
        }
        args.extend([src, dst]);
        args
    }
}

/// Marks a path as living inside the server workload.
pub const SERVER_PREFIX: &str = "server:";

/// The in-workload part of `path` when it carries [`SERVER_PREFIX`].
pub fn server_path(path: &str) -> Option<&str> {
    path.strip_prefix(SERVER_PREFIX)
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "podman" => Ok(Backend::ContainerEngine),
            "podman-remote" => Ok(Backend::ContainerEngineRemote),
            "kubectl" => Ok(Backend::ClusterCli),
            other => Err(Error::UnsupportedBackend(other.to_string())),
        }
    }
}

/// Owner given to a file copied into the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner<'a> {
    pub user: &'a str,
    pub group: Option<&'a str>,
}

impl fmt::Display for Owner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group.filter(|g| !g.is_empty()) {
            Some(group) => write!(f, "{}:{group}", self.user),
            None => f.write_str(self.user),
        }
    }
}

/// What to look for when locating the server workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadTarget {
    /// Reserved container name on container engines.
    pub container: String,
    /// Label selector matching the server pods, e.g. `app=podlift`.
    pub selector: String,
    /// Container inside the pod to exec into.
    pub pod_container: Option<String>,
    /// Namespace to search; all namespaces when unset.
    pub namespace: Option<String>,
    /// systemd unit installed alongside a podman deployment.
    pub service_unit: String,
    /// helm release installed alongside a cluster deployment.
    pub helm_release: String,
}

/// The located server workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Container name or pod name.
    pub name: String,
    pub namespace: Option<String>,
    pub container: Option<String>,
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod() -> Workload {
        Workload {
            name: "podlift-7d9f".into(),
            namespace: Some("podlift".into()),
            container: Some("podlift".into()),
        }
    }

    fn container() -> Workload {
        Workload {
            name: "podlift-server".into(),
            namespace: None,
            container: None,
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_known_backends() {
        assert_eq!("podman".parse::<Backend>().unwrap(), Backend::ContainerEngine);
        assert_eq!(
            "podman-remote".parse::<Backend>().unwrap(),
            Backend::ContainerEngineRemote
        );
        assert_eq!("kubectl".parse::<Backend>().unwrap(), Backend::ClusterCli);
        assert!(matches!(
            "docker".parse::<Backend>(),
            Err(Error::UnsupportedBackend(name)) if name == "docker"
        ));
    }

    #[test]
    fn exec_args_per_backend() {
        let cmd = strings(&["systemctl", "is-active", "-q", "multi-user.target"]);
        assert_eq!(
            Backend::ContainerEngine.exec_args(&container(), &cmd),
            strings(&["exec", "podlift-server", "systemctl", "is-active", "-q", "multi-user.target"])
        );
        assert_eq!(
            Backend::ClusterCli.exec_args(&pod(), &cmd),
            strings(&[
                "exec", "podlift-7d9f", "-n", "podlift", "-c", "podlift", "--", "systemctl",
                "is-active", "-q", "multi-user.target"
            ])
        );
    }

    #[test]
    fn copy_args_expand_server_prefix() {
        assert_eq!(
            Backend::ContainerEngineRemote.copy_args(&container(), "server:/etc/ca.crt", "/tmp/ca.crt"),
            strings(&["cp", "podlift-server:/etc/ca.crt", "/tmp/ca.crt"])
        );
        assert_eq!(
            Backend::ClusterCli.copy_args(&pod(), "/tmp/dump.sql", "server:/var/lib/dump.sql"),
            strings(&[
                "cp",
                "-c",
                "podlift",
                "-n",
                "podlift",
                "/tmp/dump.sql",
                "podlift/podlift-7d9f:/var/lib/dump.sql"
            ])
        );
    }

    #[test]
    fn only_a_leading_server_prefix_is_expanded() {
        assert_eq!(
            Backend::ContainerEngine.copy_args(&container(), "/tmp/myserver:bak", "server:/tmp/myserver:bak"),
            strings(&["cp", "/tmp/myserver:bak", "podlift-server:/tmp/myserver:bak"])
        );
    }

    #[test]
    fn server_path_strips_prefix() {
        assert_eq!(server_path("server:/etc/pki/ca.crt"), Some("/etc/pki/ca.crt"));
        assert_eq!(server_path("/tmp/myserver:bak"), None);
    }

    #[test]
    fn owner_display() {
        let user_only = Owner {
            user: "root",
            group: None,
        };
        assert_eq!(user_only.to_string(), "root");
        let with_group = Owner {
            user: "wwwrun",
            group: Some("www"),
        };
        assert_eq!(with_group.to_string(), "wwwrun:www");
    }

    #[test]
    fn workload_display_includes_namespace() {
        assert_eq!(pod().to_string(), "podlift/podlift-7d9f");
        assert_eq!(container().to_string(), "podlift-server");
    }
}
