//! XMPP addresses (`local@domain/resource`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length in bytes of each JID part (RFC 7622 Section 3).
const MAX_PART_LEN: usize = 1023;

/// Errors produced while parsing a JID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JidError {
    /// Input was empty
    #[error("empty JID")]
    Empty,
    /// Domain part missing
    #[error("JID has an empty domain")]
    EmptyDomain,
    /// `@` present with nothing before it
    #[error("JID has an empty localpart")]
    EmptyLocal,
    /// `/` present with nothing after it
    #[error("JID has an empty resource")]
    EmptyResource,
    /// Forbidden character in a part
    #[error("forbidden character {ch:?} in JID {part}")]
    ForbiddenChar {
        /// Which part (local or domain)
        part: &'static str,
        /// Offending character
        ch: char,
    },
    /// Part exceeds 1023 bytes
    #[error("JID {0} is too long")]
    TooLong(&'static str),
}

/// An XMPP address.
///
/// Empty local or resource parts mean the part is absent. Equality is full
/// equality; use [`Jid::bare_eq`] to compare while ignoring the resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    local: String,
    domain: String,
    resource: String,
}

impl Jid {
    /// Build a JID from its parts, validating each of them.
    pub fn new(local: &str, domain: &str, resource: &str) -> Result<Self, JidError> {
        validate_local(local)?;
        validate_domain(domain)?;
        if resource.len() > MAX_PART_LEN {
            return Err(JidError::TooLong("resource"));
        }
        Ok(Self {
            local: local.to_string(),
            domain: domain.to_string(),
            resource: resource.to_string(),
        })
    }

    /// Parse `local@domain/resource`.
    ///
    /// The resource is everything after the first `/` and may itself contain
    /// `@` or `/`.
    pub fn parse(s: &str) -> Result<Self, JidError> {
        if s.is_empty() {
            return Err(JidError::Empty);
        }

        let (address, resource) = match s.split_once('/') {
            Some((_, "")) => return Err(JidError::EmptyResource),
            Some((address, resource)) => (address, resource),
            None => (s, ""),
        };

        let (local, domain) = match address.split_once('@') {
            Some(("", _)) => return Err(JidError::EmptyLocal),
            Some((local, domain)) => (local, domain),
            None => ("", address),
        };

        Self::new(local, domain, resource)
    }

    /// Localpart, if present.
    pub fn local(&self) -> Option<&str> {
        (!self.local.is_empty()).then_some(self.local.as_str())
    }

    /// Domainpart.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Resourcepart, if present.
    pub fn resource(&self) -> Option<&str> {
        (!self.resource.is_empty()).then_some(self.resource.as_str())
    }

    /// Whether this JID has no resource.
    pub fn is_bare(&self) -> bool {
        self.resource.is_empty()
    }

    /// Copy of this JID without the resource.
    pub fn bare(&self) -> Jid {
        Self {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: String::new(),
        }
    }

    /// Copy of this JID with the given resource.
    pub fn with_resource(&self, resource: &str) -> Result<Jid, JidError> {
        Self::new(&self.local, &self.domain, resource)
    }

    /// Compare two JIDs ignoring their resources.
    pub fn bare_eq(&self, other: &Jid) -> bool {
        self.local == other.local && self.domain == other.domain
    }
}

fn validate_local(local: &str) -> Result<(), JidError> {
    if local.len() > MAX_PART_LEN {
        return Err(JidError::TooLong("local"));
    }
    if let Some(ch) = local
        .chars()
        .find(|c| matches!(c, '@' | '/' | '\'' | '"' | ':' | '<' | '>') || c.is_whitespace())
    {
        return Err(JidError::ForbiddenChar { part: "local", ch });
    }
    Ok(())
}

fn validate_domain(domain: &str) -> Result<(), JidError> {
    if domain.is_empty() {
        return Err(JidError::EmptyDomain);
    }
    if domain.len() > MAX_PART_LEN {
        return Err(JidError::TooLong("domain"));
    }
    if let Some(ch) = domain
        .chars()
        .find(|c| matches!(c, '@' | '/') || c.is_whitespace())
    {
        return Err(JidError::ForbiddenChar { part: "domain", ch });
    }
    Ok(())
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.local.is_empty() {
            write!(f, "{}@", self.local)?;
        }
        f.write_str(&self.domain)?;
        if !self.resource.is_empty() {
            write!(f, "/{}", self.resource)?;
        }
        Ok(())
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_jid() {
        let jid: Jid = "test@localhost/test".parse().unwrap();
        assert_eq!(jid.local(), Some("test"));
        assert_eq!(jid.domain(), "localhost");
        assert_eq!(jid.resource(), Some("test"));
        assert!(!jid.is_bare());
    }

    #[test]
    fn test_parse_domain_only() {
        let jid: Jid = "service.localhost".parse().unwrap();
        assert_eq!(jid.local(), None);
        assert_eq!(jid.domain(), "service.localhost");
        assert!(jid.is_bare());
    }

    #[test]
    fn test_resource_may_contain_separators() {
        let jid: Jid = "room@muc.example.com/nick/with@signs".parse().unwrap();
        assert_eq!(jid.resource(), Some("nick/with@signs"));
        assert_eq!(jid.to_string(), "room@muc.example.com/nick/with@signs");
    }

    #[test]
    fn test_parse_render_identity() {
        for input in [
            "a@b/c",
            "b",
            "b/c",
            "a@b",
            "juliet@capulet.example/balcony",
            "user@example.com/resource with spaces",
        ] {
            let jid = Jid::parse(input).unwrap();
            let reparsed = Jid::parse(&jid.to_string()).unwrap();
            assert_eq!(jid, reparsed, "round trip of {input}");
            assert_eq!(jid.to_string(), input);
        }
    }

    #[test]
    fn test_forbidden_local_characters() {
        for input in ["a'b@c", "a\"b@c", "a:b@c", "a<b@c", "a>b@c", "a b@c"] {
            assert!(
                matches!(Jid::parse(input), Err(JidError::ForbiddenChar { part: "local", .. })),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn test_forbidden_domain_characters() {
        assert!(matches!(
            Jid::parse("a@b@c"),
            Err(JidError::ForbiddenChar { part: "domain", ch: '@' })
        ));
        assert!(matches!(
            Jid::parse("a@exa mple.com"),
            Err(JidError::ForbiddenChar { part: "domain", .. })
        ));
    }

    #[test]
    fn test_empty_parts() {
        assert_eq!(Jid::parse(""), Err(JidError::Empty));
        assert_eq!(Jid::parse("@domain"), Err(JidError::EmptyLocal));
        assert_eq!(Jid::parse("user@"), Err(JidError::EmptyDomain));
        assert_eq!(Jid::parse("user@domain/"), Err(JidError::EmptyResource));
    }

    #[test]
    fn test_too_long() {
        let local = "a".repeat(MAX_PART_LEN + 1);
        assert_eq!(
            Jid::parse(&format!("{local}@example.com")),
            Err(JidError::TooLong("local"))
        );
    }

    #[test]
    fn test_bare_equality_ignores_resource() {
        let a: Jid = "user@example.com/phone".parse().unwrap();
        let b: Jid = "user@example.com/laptop".parse().unwrap();
        assert_ne!(a, b);
        assert!(a.bare_eq(&b));
        assert_eq!(a.bare(), b.bare());
        assert_eq!(a.bare().to_string(), "user@example.com");
    }

    #[test]
    fn test_with_resource() {
        let bare: Jid = "user@example.com".parse().unwrap();
        let full = bare.with_resource("desk").unwrap();
        assert_eq!(full.to_string(), "user@example.com/desk");
    }

    #[test]
    fn test_serde_as_string() {
        let jid: Jid = "user@example.com/desk".parse().unwrap();
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"user@example.com/desk\"");
        let back: Jid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
        assert!(serde_json::from_str::<Jid>("\"@bad\"").is_err());
    }
}
