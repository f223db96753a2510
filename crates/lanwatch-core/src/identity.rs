//! Hardware identity for tracked hosts
//!
//! A host is keyed by its hardware (MAC) address in canonical form:
//! lowercase, colon separated, two hex digits per octet. Parsing accepts any
//! case and single-digit octets (`A:b:0c` becomes `0a:0b:0c`) and does not
//! insist on six octets, so the same normalizer serves EUI-48, EUI-64 and
//! the short test identities used throughout the crate.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Empty hardware address")]
    Empty,
    #[error("Invalid octet {token:?} in hardware address {raw:?}")]
    InvalidOctet { raw: String, token: String },
}

/// Canonical hardware address uniquely naming a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(String);

impl Identity {
    /// Parse and canonicalize a raw hardware address
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::Empty);
        }

        let mut octets = Vec::new();
        for token in trimmed.split(':') {
            octets.push(parse_octet(token).ok_or_else(|| IdentityError::InvalidOctet {
                raw: raw.to_string(),
                token: token.to_string(),
            })?);
        }

        let canonical = octets
            .iter()
            .map(|octet| format!("{:02x}", octet))
            .collect::<Vec<_>>()
            .join(":");

        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parse a raw hardware address, treating malformed input as "no identity"
pub fn normalize(raw: &str) -> Option<Identity> {
    Identity::parse(raw).ok()
}

fn parse_octet(token: &str) -> Option<u8> {
    // from_str_radix would also accept a leading '+'
    if token.is_empty() || token.len() > 2 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

impl FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
