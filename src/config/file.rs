use std::fs::File;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;
use toml;

use crate::error::RdeError;
use crate::rib::DecisionFlags;

struct Defaults {}

impl Defaults {
    fn fib_update() -> bool {
        true
    }
}

/// Config (toml) representation of a Peer Config
#[derive(Clone, Debug, Deserialize)]
pub(super) struct PeerConfigSpec {
    // Session id the session layer uses for this peer
    pub(super) id: u32,
    // Peer connection details
    pub(super) remote_ip: IpAddr,
    pub(super) remote_as: u32,
    // Will defer to server config if not provided
    pub(super) local_as: Option<u32>,
    // BGP identifier of the peer, defaults to an IPv4 remote_ip
    pub(super) router_id: Option<Ipv4Addr>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerConfigSpec {
    // Global Router-ID
    pub(super) router_id: Ipv4Addr,
    // Global ASN (can be overriden per-peer in peer config)
    pub(super) default_as: u32,
    // Send forwarding changes to the kernel sync stage
    #[serde(default = "Defaults::fib_update")]
    pub(super) fib_update: bool,
    #[serde(default)]
    pub(super) decision: DecisionFlags,
    #[serde(default = "Vec::new")]
    pub(super) peers: Vec<PeerConfigSpec>,
}

impl ServerConfigSpec {
    pub(super) fn from_file(path: &str) -> Result<Self, RdeError> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_toml(&contents)
    }

    pub(super) fn from_toml(contents: &str) -> Result<Self, RdeError> {
        toml::from_str(contents).map_err(|err| RdeError::Config(err.to_string()))
    }
}
