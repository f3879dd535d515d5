mod file;

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use log::debug;

use crate::error::{RdeError, Result};
use crate::rib::DecisionFlags;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub router_id: Ipv4Addr,
    pub default_as: u32,
    pub fib_update: bool,
    pub decision: DecisionFlags,
    pub peers: Vec<PeerConfig>,
}

/// In-Memory Server representation of a Peer config
///   Has missing PeerConfigSpec items defaulted to Server values
#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub id: u32,
    pub remote_ip: IpAddr,
    pub remote_as: u32,
    pub local_as: u32,
    pub router_id: Ipv4Addr,
}

impl PeerConfig {
    // Is this an eBGP session
    pub fn is_ebgp(&self) -> bool {
        self.remote_as != self.local_as
    }
}

impl ServerConfig {
    /// Parse a TOML config file and return a ServerConfig
    pub fn from_file(path: &str) -> Result<Self> {
        let spec = file::ServerConfigSpec::from_file(path)?;
        let config = Self::from_spec(spec)?;
        debug!("Found {} peers in {}", config.peers.len(), path);
        Ok(config)
    }

    fn from_spec(spec: file::ServerConfigSpec) -> Result<Self> {
        let peers = spec
            .peers
            .iter()
            .map(|p| {
                let router_id = match (p.router_id, p.remote_ip) {
                    (Some(router_id), _) => router_id,
                    (None, IpAddr::V4(addr)) => addr,
                    (None, IpAddr::V6(addr)) => {
                        return Err(RdeError::Config(format!(
                            "Peer {} ({}) needs a router_id",
                            p.id, addr
                        )))
                    }
                };
                Ok(PeerConfig {
                    id: p.id,
                    remote_ip: p.remote_ip,
                    remote_as: p.remote_as,
                    local_as: p.local_as.unwrap_or(spec.default_as),
                    router_id,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            router_id: spec.router_id,
            default_as: spec.default_as,
            fib_update: spec.fib_update,
            decision: spec.decision,
            peers,
        })
    }
}

impl FromStr for ServerConfig {
    type Err = RdeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_spec(file::ServerConfigSpec::from_toml(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_defaults() {
        let config: ServerConfig = r#"
            router_id = "192.0.2.254"
            default_as = 65000

            [decision]
            always_compare_med = true

            [[peers]]
            id = 1
            remote_ip = "192.0.2.1"
            remote_as = 65001

            [[peers]]
            id = 2
            remote_ip = "192.0.2.2"
            remote_as = 65000
            local_as = 65000
            router_id = "10.0.0.2"
        "#
        .parse()
        .unwrap();
        assert!(config.decision.always_compare_med);
        assert!(!config.decision.route_age);
        let first = &config.peers[0];
        assert_eq!(first.local_as, 65000);
        assert_eq!(first.router_id, Ipv4Addr::new(192, 0, 2, 1));
        assert!(first.is_ebgp());
        assert!(!config.peers[1].is_ebgp());
        assert_eq!(config.peers[1].router_id, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_v6_peer_needs_router_id() {
        let result: Result<ServerConfig> = r#"
            router_id = "192.0.2.254"
            default_as = 65000

            [[peers]]
            id = 1
            remote_ip = "2001:db8::1"
            remote_as = 65001
        "#
        .parse();
        assert!(matches!(result, Err(RdeError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let path = format!("{}/demos/rde.toml", env!("CARGO_MANIFEST_DIR"));
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.peers.len(), 4);
        assert!(config.peers.iter().all(|p| p.local_as == 65000));
        assert!(ServerConfig::from_file("/nonexistent/rde.toml").is_err());
    }
}
