use std::fmt;

use thiserror::Error;

/// Response header carrying the server's semantic version.
pub const SERVER_VERSION_HEADER: &str = "X-Server-Version";

/// Header value a server reports when it does not know its own version.
/// Exempt from minimum-version gating.
pub const UNVERSIONED: &str = "0.0.0";

/// Default minimum server version commands require unless they declare
/// their own.
pub const MIN_SERVER_VERSION: ServerVersion = ServerVersion(1, 0, 0);

/// Ordered `major.minor.patch` triple reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion(pub u32, pub u32, pub u32);

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Error reported when a version string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid server version '{0}'")]
pub struct VersionParseError(pub String);

/// Parse the leading `digits.digits.digits` run of a version string,
/// ignoring any build-metadata or pre-release suffix: `"1.2.3+abc"` and
/// `"1.2.3a1"` both parse to `1.2.3`. Strings without three leading
/// dot-separated numeric components are rejected.
pub fn parse_version(value: &str) -> Result<ServerVersion, VersionParseError> {
    let invalid = || VersionParseError(value.to_owned());
    let mut rest = value;
    let mut parts = [0u32; 3];
    for (index, part) in parts.iter_mut().enumerate() {
        let digits = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid());
        }
        *part = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];
        if index < 2 {
            rest = rest.strip_prefix('.').ok_or_else(invalid)?;
        }
    }
    Ok(ServerVersion(parts[0], parts[1], parts[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_triples_parse() {
        assert_eq!(parse_version("1.2.3").unwrap(), ServerVersion(1, 2, 3));
        assert_eq!(parse_version("0.9.2").unwrap(), ServerVersion(0, 9, 2));
        assert_eq!(
            parse_version("12.34.56").unwrap(),
            ServerVersion(12, 34, 56)
        );
    }

    #[test]
    fn suffixes_are_ignored() {
        assert_eq!(
            parse_version("1.2.3+abc").unwrap(),
            ServerVersion(1, 2, 3)
        );
        assert_eq!(parse_version("1.2.3a1").unwrap(), ServerVersion(1, 2, 3));
        assert_eq!(
            parse_version("1.2.3-rc.1").unwrap(),
            ServerVersion(1, 2, 3)
        );
        assert_eq!(parse_version("1.2.3.4").unwrap(), ServerVersion(1, 2, 3));
    }

    #[test]
    fn short_and_non_numeric_strings_are_rejected() {
        for raw in ["", "1", "1.2", "a.b.c", "1!2.3", "1.x.3", "..", "1.2."] {
            assert!(parse_version(raw).is_err(), "expected {raw:?} to fail");
        }
    }

    #[test]
    fn overflowing_components_are_rejected() {
        assert!(parse_version("99999999999.0.0").is_err());
    }

    #[test]
    fn ordering_follows_components() {
        assert!(parse_version("1.2.3").unwrap() < parse_version("1.2.4").unwrap());
        assert!(parse_version("1.10.0").unwrap() > parse_version("1.9.9").unwrap());
        assert!(parse_version("2.0.0").unwrap() > parse_version("1.99.99").unwrap());
    }

    #[test]
    fn display_round_trips() {
        assert_eq!(ServerVersion(1, 2, 3).to_string(), "1.2.3");
    }
}
