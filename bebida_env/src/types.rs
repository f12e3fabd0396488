//! Common types for the Bebida environment abstraction.

use serde::{Deserialize, Serialize};

/// Identifies one of the broker's peer links.
///
/// Both halves of a link report the same `PeerId`, so a scheduler-side
/// responder for System A also says `SystemA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerId {
    /// The discrete-event simulator (Batsim)
    Simulator,

    /// First scheduler (HPC side, resource consumer in the prolog)
    SystemA,

    /// Second scheduler (Big Data side, resource donor)
    SystemB,
}

impl PeerId {
    /// Returns the short label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            PeerId::Simulator => "simulator",
            PeerId::SystemA => "system-a",
            PeerId::SystemB => "system-b",
        }
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A TCP endpoint (`host:port`) for a socket transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the ZeroMQ-style address, e.g. `tcp://127.0.0.1:28000`.
    pub fn tcp_address(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_address() {
        let endpoint = Endpoint::new("127.0.0.1", 28000);
        assert_eq!(endpoint.tcp_address(), "tcp://127.0.0.1:28000");
        assert_eq!(endpoint.to_string(), "127.0.0.1:28000");
    }

    #[test]
    fn test_peer_labels() {
        assert_eq!(PeerId::Simulator.to_string(), "simulator");
        assert_eq!(PeerId::SystemA.to_string(), "system-a");
        assert_eq!(PeerId::SystemB.to_string(), "system-b");
    }
}
