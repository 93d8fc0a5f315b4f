//! Relay endpoint URL validation
//!
//! The relay URL is operator-supplied, so the baseline check only enforces an
//! HTTP(S) scheme and a host. Deployments that relay to public services can
//! additionally refuse private, loopback and cloud-metadata targets.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Address classes refused when private targets are blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedAddress {
    Private,
    Loopback,
    LinkLocal,
    CloudMetadata,
    Multicast,
    Broadcast,
    Unspecified,
}

impl fmt::Display for BlockedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Private => "private",
            Self::Loopback => "loopback",
            Self::LinkLocal => "link-local",
            Self::CloudMetadata => "cloud metadata",
            Self::Multicast => "multicast",
            Self::Broadcast => "broadcast",
            Self::Unspecified => "unspecified",
        };
        f.write_str(label)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(String),

    #[error("URL scheme must be HTTP or HTTPS, got '{0}'")]
    InvalidScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("Relay target is a {0} address")]
    BlockedTarget(BlockedAddress),
}

/// Parses and validates the relay endpoint URL.
///
/// With `block_private_targets` set, IP literals in private, loopback,
/// link-local, metadata, multicast, broadcast or unspecified ranges are
/// rejected, as is `localhost`. Domain names are not resolved here.
///
/// ```
/// use formrelay_core::url_validation::validate_relay_url;
///
/// assert!(validate_relay_url("https://intake.example.com/uploadfiles/", true).is_ok());
/// assert!(validate_relay_url("http://127.0.0.1:8000/uploadfiles/", false).is_ok());
/// assert!(validate_relay_url("http://127.0.0.1:8000/uploadfiles/", true).is_err());
/// assert!(validate_relay_url("ftp://example.com", false).is_err());
/// ```
pub fn validate_relay_url(
    raw: &str,
    block_private_targets: bool,
) -> Result<Url, UrlValidationError> {
    let parsed =
        Url::parse(raw.trim()).map_err(|e| UrlValidationError::InvalidFormat(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlValidationError::InvalidScheme(parsed.scheme().to_string()));
    }

    let host = parsed.host().ok_or(UrlValidationError::MissingHost)?;

    if block_private_targets {
        let blocked = match host {
            Host::Ipv4(ip) => classify_ipv4(&ip),
            Host::Ipv6(ip) => classify_ipv6(&ip),
            Host::Domain(domain) => {
                let domain = domain.trim_end_matches('.').to_ascii_lowercase();
                (domain == "localhost" || domain.ends_with(".localhost"))
                    .then_some(BlockedAddress::Loopback)
            }
        };
        if let Some(class) = blocked {
            return Err(UrlValidationError::BlockedTarget(class));
        }
    }

    Ok(parsed)
}

/// Returns the blocked class of an IPv4 address, if any
pub fn classify_ipv4(ip: &Ipv4Addr) -> Option<BlockedAddress> {
    // 169.254.169.254 (AWS/Azure/GCP) and 100.100.100.200 (Alibaba)
    let octets = ip.octets();
    if octets == [169, 254, 169, 254] || octets == [100, 100, 100, 200] {
        return Some(BlockedAddress::CloudMetadata);
    }

    if ip.is_private() {
        Some(BlockedAddress::Private)
    } else if ip.is_loopback() {
        Some(BlockedAddress::Loopback)
    } else if ip.is_link_local() {
        Some(BlockedAddress::LinkLocal)
    } else if ip.is_multicast() {
        Some(BlockedAddress::Multicast)
    } else if ip.is_broadcast() {
        Some(BlockedAddress::Broadcast)
    } else if ip.is_unspecified() {
        Some(BlockedAddress::Unspecified)
    } else {
        None
    }
}

/// Returns the blocked class of an IPv6 address, if any
pub fn classify_ipv6(ip: &Ipv6Addr) -> Option<BlockedAddress> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return classify_ipv4(&v4);
    }

    let segments = ip.segments();

    // fd00:ec2::254
    if segments[0] == 0xfd00
        && segments[1] == 0x0ec2
        && segments[2..7].iter().all(|&s| s == 0)
        && segments[7] == 0x0254
    {
        return Some(BlockedAddress::CloudMetadata);
    }

    if ip.is_loopback() {
        Some(BlockedAddress::Loopback)
    } else if (segments[0] & 0xffc0) == 0xfe80 {
        Some(BlockedAddress::LinkLocal)
    } else if (segments[0] & 0xfe00) == 0xfc00 {
        Some(BlockedAddress::Private)
    } else if ip.is_multicast() {
        Some(BlockedAddress::Multicast)
    } else if ip.is_unspecified() {
        Some(BlockedAddress::Unspecified)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_http_and_https() {
        assert!(validate_relay_url("https://example.com/uploadfiles/", false).is_ok());
        assert!(validate_relay_url("http://example.com:8000/uploadfiles/", true).is_ok());
    }

    #[test]
    fn test_trims_surrounding_whitespace() {
        let url = validate_relay_url("  https://example.com/upload  ", false).unwrap();
        assert_eq!(url.as_str(), "https://example.com/upload");
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert_eq!(
            validate_relay_url("ftp://example.com", false),
            Err(UrlValidationError::InvalidScheme("ftp".to_string()))
        );
        assert!(validate_relay_url("file:///etc/passwd", false).is_err());
        assert!(validate_relay_url("javascript:alert(1)", false).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            validate_relay_url("not a url", false),
            Err(UrlValidationError::InvalidFormat(_))
        ));
        assert!(validate_relay_url("", false).is_err());
    }

    #[test]
    fn test_private_targets_allowed_by_default() {
        assert!(validate_relay_url("http://127.0.0.1:8000/uploadfiles/", false).is_ok());
        assert!(validate_relay_url("http://192.168.1.20/uploadfiles/", false).is_ok());
        assert!(validate_relay_url("http://localhost:8000/", false).is_ok());
    }

    #[test]
    fn test_blocks_private_targets_when_asked() {
        assert_eq!(
            validate_relay_url("http://10.0.0.1", true),
            Err(UrlValidationError::BlockedTarget(BlockedAddress::Private))
        );
        assert_eq!(
            validate_relay_url("http://localhost:8000", true),
            Err(UrlValidationError::BlockedTarget(BlockedAddress::Loopback))
        );
        assert_eq!(
            validate_relay_url("http://169.254.169.254/latest/meta-data", true),
            Err(UrlValidationError::BlockedTarget(BlockedAddress::CloudMetadata))
        );
        assert_eq!(
            validate_relay_url("http://[::1]:8000", true),
            Err(UrlValidationError::BlockedTarget(BlockedAddress::Loopback))
        );
    }

    #[test]
    fn test_classify_ipv4() {
        assert_eq!(classify_ipv4(&Ipv4Addr::new(8, 8, 8, 8)), None);
        assert_eq!(
            classify_ipv4(&Ipv4Addr::new(172, 16, 0, 1)),
            Some(BlockedAddress::Private)
        );
        assert_eq!(
            classify_ipv4(&Ipv4Addr::new(169, 254, 1, 1)),
            Some(BlockedAddress::LinkLocal)
        );
        assert_eq!(
            classify_ipv4(&Ipv4Addr::new(100, 100, 100, 200)),
            Some(BlockedAddress::CloudMetadata)
        );
        assert_eq!(
            classify_ipv4(&Ipv4Addr::BROADCAST),
            Some(BlockedAddress::Broadcast)
        );
        assert_eq!(
            classify_ipv4(&Ipv4Addr::UNSPECIFIED),
            Some(BlockedAddress::Unspecified)
        );
    }

    #[test]
    fn test_classify_ipv6() {
        let public: Ipv6Addr = "2001:4860:4860::8888".parse().unwrap();
        assert_eq!(classify_ipv6(&public), None);

        let link_local: Ipv6Addr = "fe80::1".parse().unwrap();
        assert_eq!(classify_ipv6(&link_local), Some(BlockedAddress::LinkLocal));

        let unique_local: Ipv6Addr = "fd12::1".parse().unwrap();
        assert_eq!(classify_ipv6(&unique_local), Some(BlockedAddress::Private));

        let metadata: Ipv6Addr = "fd00:ec2::254".parse().unwrap();
        assert_eq!(classify_ipv6(&metadata), Some(BlockedAddress::CloudMetadata));

        let mapped: Ipv6Addr = "::ffff:192.168.0.1".parse().unwrap();
        assert_eq!(classify_ipv6(&mapped), Some(BlockedAddress::Private));
    }
}
