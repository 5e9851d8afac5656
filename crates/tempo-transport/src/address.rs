//! Coordinator address parsing
//!
//! Accepted forms: `host`, `host:port`, `user@host`, `user@host:port`.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use tempo_core::{TempoError, TempoResult};

/// Port the coordinator listens on when none is given
pub const DEFAULT_RTI_PORT: u16 = 15045;

/// Where to find the coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtiAddress {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl RtiAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        RtiAddress {
            user: None,
            host: host.into(),
            port,
        }
    }

    /// Resolve to the first socket address
    pub fn resolve(&self) -> TempoResult<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TempoError::TransportError(format!("cannot resolve {}: {}", self, e)))?
            .next()
            .ok_or_else(|| TempoError::TransportError(format!("no address for {}", self)))
    }
}

impl Default for RtiAddress {
    fn default() -> Self {
        RtiAddress::new("localhost", DEFAULT_RTI_PORT)
    }
}

impl FromStr for RtiAddress {
    type Err = TempoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| TempoError::InvalidConfig(format!("bad RTI address '{}': {}", s, why));
        let (user, rest) = match s.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some(_) => return Err(invalid("empty user")),
            None => (None, s),
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("port"))?),
            None => (rest, DEFAULT_RTI_PORT),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        Ok(RtiAddress {
            user,
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for RtiAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "alice@rti.local:2000".parse::<RtiAddress>().unwrap(),
            RtiAddress {
                user: Some("alice".into()),
                host: "rti.local".into(),
                port: 2000
            }
        );
        assert_eq!(
            "rti.local".parse::<RtiAddress>().unwrap(),
            RtiAddress::new("rti.local", DEFAULT_RTI_PORT)
        );
        assert_eq!("h:1".parse::<RtiAddress>().unwrap().port, 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!("@host".parse::<RtiAddress>().is_err());
        assert!("host:notaport".parse::<RtiAddress>().is_err());
        assert!(":80".parse::<RtiAddress>().is_err());
    }

    #[test]
    fn test_resolve_loopback() {
        let addr = RtiAddress::new("127.0.0.1", 9).resolve().unwrap();
        assert_eq!(addr.port(), 9);
    }
}
