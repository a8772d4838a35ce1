use std::fmt;

use super::ConnectError;

/// Remote consumer address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, `[v6]:port`, or `tcp://host:port`.
    pub fn parse(addr: &str) -> Result<Self, ConnectError> {
        let invalid = |reason: &str| ConnectError::InvalidEndpoint(format!("{}: {}", addr, reason));
        let mut remainder = addr.trim();

        if let Some((scheme, rest)) = remainder.split_once("://") {
            if scheme != "tcp" {
                return Err(invalid("unsupported scheme"));
            }
            remainder = rest;
        }

        // IPv6 addresses in brackets: [::1]:4040
        let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or_else(|| invalid("unclosed bracket"))?;
            let port = rest.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
            (host, port)
        } else {
            remainder.rsplit_once(':').ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
        if port == 0 {
            return Err(invalid("port must be greater than zero"));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
