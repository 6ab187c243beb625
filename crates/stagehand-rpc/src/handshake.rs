use std::{fmt, net::SocketAddr};

use crate::error::RpcError;

pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable the master sets when spawning a plugin.
pub const COOKIE_KEY: &str = "STAGEHAND_PLUGIN_COOKIE";
pub const COOKIE_VALUE: &str = "c2b1e9f4d6a8437fa1b3e5d7c9f0a2b4";

/// The single line a plugin prints on stdout once it is serving:
/// `<protocol-version>|tcp|<addr>|grpc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub version: u32,
    pub addr: SocketAddr,
}

impl Handshake {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            addr,
        }
    }

    pub fn parse(line: &str) -> Result<Self, RpcError> {
        let bad = || RpcError::Handshake(format!("malformed handshake line: {line:?}"));

        let mut parts = line.trim().split('|');
        let (Some(version), Some(network), Some(addr), Some(protocol), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(bad());
        };

        let version: u32 = version.parse().map_err(|_| bad())?;
        if version != PROTOCOL_VERSION {
            return Err(RpcError::Handshake(format!(
                "incompatible protocol version {version}, expected {PROTOCOL_VERSION}"
            )));
        }
        if network != "tcp" || protocol != "grpc" {
            return Err(RpcError::Handshake(format!(
                "unsupported transport {network}/{protocol}"
            )));
        }
        let addr = addr.parse().map_err(|_| bad())?;
        Ok(Self { version, addr })
    }

    /// Endpoint URI for a tonic channel.
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|tcp|{}|grpc", self.version, self.addr)
    }
}

/// Check that this process was started by a master.
pub fn verify_cookie() -> Result<(), RpcError> {
    match std::env::var(COOKIE_KEY) {
        Ok(v) if v == COOKIE_VALUE => Ok(()),
        _ => Err(RpcError::Handshake(
            "this binary is a plugin and must be launched by the stagehand master".into(),
        )),
    }
}
