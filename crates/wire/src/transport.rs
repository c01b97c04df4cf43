use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Transport address of a tier endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "address")]
pub enum Transport {
    /// Unix domain socket, for whole stacks running on one host.
    Ipc(String),

    /// TCP, for a federation spread across hosts.
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// An IPC transport. The name becomes a path component under
    /// `/tmp/kosmos/`.
    pub fn ipc(name: &str) -> Self {
        Self::Ipc(name.to_string())
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// The ZeroMQ endpoint address string.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Ipc(name) => format!("ipc:///tmp/kosmos/{name}.sock"),
            Self::Tcp { host, port } => format!("tcp://{host}:{port}"),
        }
    }

    /// For IPC transports, create the socket directory if missing.
    ///
    /// ZeroMQ needs the directory to exist before binding an IPC socket.
    /// No-op for TCP.
    pub fn ensure_ipc_dir(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Remove an IPC socket file left over from a previous run.
    ///
    /// A stale `.sock` file causes `EADDRINUSE` on the next bind. No-op for
    /// TCP or when no file exists.
    pub fn remove_stale_socket(&self) -> std::io::Result<()> {
        if let Self::Ipc(_) = self {
            let endpoint = self.endpoint();
            let path = endpoint.strip_prefix("ipc://").unwrap_or(&endpoint);
            match std::fs::remove_file(path) {
                Ok(()) => {
                    tracing::debug!(path, "removed stale IPC socket");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.endpoint())
    }
}

/// Accepts `tcp://host:port`, `ipc://name`, bare `host:port`, or a bare
/// socket name for IPC. Used by the CLI flags naming peers.
impl FromStr for Transport {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix("ipc://") {
            if name.is_empty() {
                return Err(WireError::Endpoint(s.to_string()));
            }
            return Ok(Self::ipc(name));
        }
        let rest = s.strip_prefix("tcp://").unwrap_or(s);
        match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse()
                    .map_err(|_| WireError::Endpoint(s.to_string()))?;
                if host.is_empty() {
                    return Err(WireError::Endpoint(s.to_string()));
                }
                Ok(Self::tcp(host, port))
            }
            None if rest.is_empty() || s.starts_with("tcp://") => {
                Err(WireError::Endpoint(s.to_string()))
            }
            None => Ok(Self::ipc(rest)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipc_endpoint() {
        let t = Transport::ipc("universe");
        assert_eq!(t.endpoint(), "ipc:///tmp/kosmos/universe.sock");
    }

    #[test]
    fn tcp_endpoint() {
        let t = Transport::tcp("127.0.0.1", 7001);
        assert_eq!(t.endpoint(), "tcp://127.0.0.1:7001");
    }

    #[test]
    fn display_matches_endpoint() {
        let t = Transport::tcp("localhost", 7002);
        assert_eq!(t.to_string(), t.endpoint());
    }

    #[test]
    fn parses_flag_shorthands() {
        assert_eq!(
            "tcp://10.0.0.5:7001".parse::<Transport>().unwrap(),
            Transport::tcp("10.0.0.5", 7001)
        );
        assert_eq!(
            "10.0.0.5:7001".parse::<Transport>().unwrap(),
            Transport::tcp("10.0.0.5", 7001)
        );
        assert_eq!(
            "ipc://space-1".parse::<Transport>().unwrap(),
            Transport::ipc("space-1")
        );
        assert_eq!(
            "space-1".parse::<Transport>().unwrap(),
            Transport::ipc("space-1")
        );
    }

    #[test]
    fn rejects_malformed_endpoints() {
        assert!("tcp://".parse::<Transport>().is_err());
        assert!("tcp://host".parse::<Transport>().is_err());
        assert!("host:notaport".parse::<Transport>().is_err());
        assert!(":7001".parse::<Transport>().is_err());
        assert!("ipc://".parse::<Transport>().is_err());
    }
}
