//! Client identities used to index learned keys and breaker state

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Who a key or a breaker record belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    /// Peer address without port
    Address(IpAddr),
    /// Normalized account name
    Username(String),
}

impl Identity {
    pub fn address(ip: IpAddr) -> Self {
        Identity::Address(ip)
    }

    pub fn username(name: &str) -> Self {
        Identity::Username(name.trim().to_lowercase())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Address(ip) => write!(f, "addr:{}", ip),
            Identity::Username(name) => write!(f, "user:{}", name),
        }
    }
}

impl FromStr for Identity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("addr:") {
            return rest
                .parse()
                .map(Identity::Address)
                .map_err(|e| format!("invalid address identity {:?}: {}", s, e));
        }
        if let Some(rest) = s.strip_prefix("user:") {
            if rest.is_empty() {
                return Err("empty username identity".to_string());
            }
            return Ok(Identity::username(rest));
        }
        // Bare addresses are accepted for convenience
        s.parse()
            .map(Identity::Address)
            .map_err(|_| format!("unrecognized identity {:?}", s))
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_text_forms() {
        let addr: Identity = "addr:10.1.2.3".parse().unwrap();
        assert_eq!(addr, Identity::Address("10.1.2.3".parse().unwrap()));
        assert_eq!(addr.to_string(), "addr:10.1.2.3");

        let bare: Identity = "10.1.2.3".parse().unwrap();
        assert_eq!(bare, addr);

        let user: Identity = "user:Tester_3".parse().unwrap();
        assert_eq!(user, Identity::username("tester_3"));
        assert_eq!(user.to_string(), "user:tester_3");

        assert!("user:".parse::<Identity>().is_err());
        assert!("addr:nope".parse::<Identity>().is_err());
        assert!("something".parse::<Identity>().is_err());
    }
}
