// crates/strix-core/src/core/target.rs
// ============================================================================
// Module: Strix Target Classifier
// Description: Deterministic classification of scan target strings.
// Purpose: Map raw user input to a typed target and normalized seed value.
// Dependencies: serde, regex, thiserror
// ============================================================================

//! ## Overview
//! Classification is a pure function over a priority-ordered regex table:
//! netblocks are tried before bare addresses, addresses before hostnames, and
//! email addresses before hostnames, so ambiguous inputs resolve the same way
//! every time. Normalization lowercases hostnames, canonicalizes IPv6
//! compression, and strips the quoting used for person and account names.
//! Private-only IP input is rejected; scanning RFC 1918 space is an explicit
//! operator decision made outside the classifier.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::net::Ipv4Addr;
use std::net::Ipv6Addr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::event::event_types;

// ============================================================================
// SECTION: Target Kinds
// ============================================================================

/// Closed set of classifiable target kinds.
///
/// # Invariants
/// - Variants are stable for serialization and adapter matching.
/// - `as_event_type` values are members of the event type taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    /// IPv4 address.
    #[serde(rename = "IP_ADDRESS")]
    IpAddress,
    /// IPv6 address.
    #[serde(rename = "IPV6_ADDRESS")]
    Ipv6Address,
    /// IPv4 CIDR netblock.
    #[serde(rename = "NETBLOCK")]
    Netblock,
    /// Registered domain name.
    #[serde(rename = "DOMAIN_NAME")]
    DomainName,
    /// Hostname below a registered domain.
    #[serde(rename = "INTERNET_NAME")]
    InternetName,
    /// Email address.
    #[serde(rename = "EMAILADDR")]
    EmailAddr,
    /// Account or handle name, written in double quotes without spaces.
    #[serde(rename = "USERNAME")]
    Username,
    /// Person name, written in double quotes with at least one space.
    #[serde(rename = "HUMAN_NAME")]
    HumanName,
    /// Phone number in E.164 form.
    #[serde(rename = "PHONE_NUMBER")]
    PhoneNumber,
    /// Bitcoin wallet address.
    #[serde(rename = "BITCOIN_ADDRESS")]
    BitcoinAddress,
    /// Ethereum wallet address.
    #[serde(rename = "ETHEREUM_ADDRESS")]
    EthereumAddress,
    /// Autonomous system number.
    #[serde(rename = "ASN")]
    Asn,
}

impl TargetKind {
    /// Returns the stable wire label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IpAddress => "IP_ADDRESS",
            Self::Ipv6Address => "IPV6_ADDRESS",
            Self::Netblock => "NETBLOCK",
            Self::DomainName => "DOMAIN_NAME",
            Self::InternetName => "INTERNET_NAME",
            Self::EmailAddr => "EMAILADDR",
            Self::Username => "USERNAME",
            Self::HumanName => "HUMAN_NAME",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::BitcoinAddress => "BITCOIN_ADDRESS",
            Self::EthereumAddress => "ETHEREUM_ADDRESS",
            Self::Asn => "ASN",
        }
    }

    /// Returns the event type emitted for seeds of this kind.
    #[must_use]
    pub const fn as_event_type(self) -> &'static str {
        match self {
            Self::IpAddress => event_types::IP_ADDRESS,
            Self::Ipv6Address => event_types::IPV6_ADDRESS,
            Self::Netblock => event_types::NETBLOCK,
            Self::DomainName => event_types::DOMAIN_NAME,
            Self::InternetName => event_types::INTERNET_NAME,
            Self::EmailAddr => event_types::EMAILADDR,
            Self::Username => event_types::USERNAME,
            Self::HumanName => event_types::HUMAN_NAME,
            Self::PhoneNumber => event_types::PHONE_NUMBER,
            Self::BitcoinAddress => event_types::BITCOIN_ADDRESS,
            Self::EthereumAddress => event_types::ETHEREUM_ADDRESS,
            Self::Asn => event_types::ASN,
        }
    }

    /// Parses a wire label into a kind.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::UnknownKind`] for labels outside the closed set.
    pub fn parse(label: &str) -> Result<Self, TargetError> {
        match label {
            "IP_ADDRESS" => Ok(Self::IpAddress),
            "IPV6_ADDRESS" => Ok(Self::Ipv6Address),
            "NETBLOCK" => Ok(Self::Netblock),
            "DOMAIN_NAME" => Ok(Self::DomainName),
            "INTERNET_NAME" => Ok(Self::InternetName),
            "EMAILADDR" => Ok(Self::EmailAddr),
            "USERNAME" => Ok(Self::Username),
            "HUMAN_NAME" => Ok(Self::HumanName),
            "PHONE_NUMBER" => Ok(Self::PhoneNumber),
            "BITCOIN_ADDRESS" => Ok(Self::BitcoinAddress),
            "ETHEREUM_ADDRESS" => Ok(Self::EthereumAddress),
            "ASN" => Ok(Self::Asn),
            other => Err(TargetError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised by target classification.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    /// Input matched no classification rule.
    #[error("unclassifiable target: {0}")]
    Unclassifiable(String),
    /// Kind label outside the closed set.
    #[error("unknown target kind: {0}")]
    UnknownKind(String),
    /// Input did not validate under an explicitly requested kind.
    #[error("target {value} is not a valid {kind}")]
    KindMismatch {
        /// Requested kind label.
        kind: String,
        /// Offending input.
        value: String,
    },
    /// Private, loopback, or link-local address space.
    #[error("refusing private address target: {0}")]
    PrivateAddress(String),
}

// ============================================================================
// SECTION: Regex Table
// ============================================================================

/// IPv4 dotted-quad shape; octet ranges are validated by the parser.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static IPV4_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());

/// IPv4 CIDR netblock shape.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static NETBLOCK_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}/\d{1,2}$").unwrap());

/// Autonomous system number.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static ASN_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)AS(\d{1,10})$").unwrap());

/// Email address, checked before hostnames.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static EMAIL_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

/// Hostname (domain or subdomain).
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static HOSTNAME_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)+$").unwrap());

/// E.164 phone number.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static PHONE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+\d{6,15}$").unwrap());

/// Legacy or bech32 bitcoin address.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static BITCOIN_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([13][a-km-zA-HJ-NP-Z1-9]{25,34}|bc1[a-z0-9]{11,71})$").unwrap());

/// Hex-encoded ethereum address.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static ETHEREUM_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap());

/// Quoted person name: letters with at least one internal space.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static HUMAN_NAME_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"[A-Za-z][A-Za-z.'-]* [A-Za-z][A-Za-z .'-]*"$"#).unwrap());

/// Quoted account name: no spaces.
#[allow(clippy::unwrap_used, reason = "Pattern is a compile-time constant.")]
static USERNAME_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"[A-Za-z0-9_.@-]{2,64}"$"#).unwrap());

// ============================================================================
// SECTION: Target
// ============================================================================

/// Classified scan target.
///
/// # Invariants
/// - `value` is normalized for its kind (lowercase hostnames, canonical IPv6
///   compression, quotes stripped from names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Classified kind.
    pub kind: TargetKind,
    /// Normalized target value.
    pub value: String,
}

impl Target {
    /// Classifies a raw target string.
    ///
    /// The rule table is priority ordered: netblock before address, address
    /// before hostname, email before hostname.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Unclassifiable`] when no rule matches and
    /// [`TargetError::PrivateAddress`] for private-only IP space.
    pub fn classify(raw: &str) -> Result<Self, TargetError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TargetError::Unclassifiable(raw.to_string()));
        }
        if NETBLOCK_SHAPE.is_match(trimmed) {
            return classify_netblock(trimmed);
        }
        if IPV4_SHAPE.is_match(trimmed) {
            return classify_ipv4(trimmed);
        }
        if trimmed.contains(':')
            && let Ok(addr) = trimmed.parse::<Ipv6Addr>()
        {
            return classify_ipv6(trimmed, addr);
        }
        if let Some(caps) = ASN_SHAPE.captures(trimmed) {
            let digits = caps.get(1).map_or("", |m| m.as_str());
            return Ok(Self {
                kind: TargetKind::Asn,
                value: format!("AS{digits}"),
            });
        }
        if EMAIL_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::EmailAddr,
                value: trimmed.to_ascii_lowercase(),
            });
        }
        if BITCOIN_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::BitcoinAddress,
                value: trimmed.to_string(),
            });
        }
        if ETHEREUM_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::EthereumAddress,
                value: trimmed.to_ascii_lowercase(),
            });
        }
        if PHONE_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::PhoneNumber,
                value: trimmed.to_string(),
            });
        }
        if HUMAN_NAME_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::HumanName,
                value: strip_quotes(trimmed),
            });
        }
        if USERNAME_SHAPE.is_match(trimmed) {
            return Ok(Self {
                kind: TargetKind::Username,
                value: strip_quotes(trimmed),
            });
        }
        if HOSTNAME_SHAPE.is_match(trimmed) {
            let host = trimmed.to_ascii_lowercase();
            // Two labels read as a registrable domain; deeper names as hosts.
            let kind = if host.split('.').count() == 2 {
                TargetKind::DomainName
            } else {
                TargetKind::InternetName
            };
            return Ok(Self {
                kind,
                value: host,
            });
        }
        Err(TargetError::Unclassifiable(raw.to_string()))
    }

    /// Validates a raw string under an explicitly requested kind.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::KindMismatch`] when the input does not classify
    /// to the requested kind, except that the domain/host split is accepted
    /// in either direction when the caller forces one of the two.
    pub fn with_kind(kind: TargetKind, raw: &str) -> Result<Self, TargetError> {
        let classified = Self::classify(raw)?;
        let host_family = matches!(kind, TargetKind::DomainName | TargetKind::InternetName)
            && matches!(classified.kind, TargetKind::DomainName | TargetKind::InternetName);
        if classified.kind == kind || host_family {
            Ok(Self {
                kind,
                value: classified.value,
            })
        } else {
            Err(TargetError::KindMismatch {
                kind: kind.as_str().to_string(),
                value: raw.to_string(),
            })
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.kind)
    }
}

// ============================================================================
// SECTION: Classification Helpers
// ============================================================================

/// Strips the surrounding double quotes from a matched name form.
fn strip_quotes(raw: &str) -> String {
    raw.trim_matches('"').to_string()
}

/// Returns true for address space the classifier refuses to seed.
fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
}

/// Classifies a dotted-quad string, rejecting private space.
fn classify_ipv4(raw: &str) -> Result<Target, TargetError> {
    let addr: Ipv4Addr = raw
        .parse()
        .map_err(|_| TargetError::Unclassifiable(raw.to_string()))?;
    if is_private_ipv4(addr) {
        return Err(TargetError::PrivateAddress(raw.to_string()));
    }
    Ok(Target {
        kind: TargetKind::IpAddress,
        value: addr.to_string(),
    })
}

/// Classifies a parsed IPv6 address, rejecting private space.
fn classify_ipv6(raw: &str, addr: Ipv6Addr) -> Result<Target, TargetError> {
    if addr.is_loopback() || addr.is_unspecified() || (addr.segments()[0] & 0xfe00) == 0xfc00 {
        return Err(TargetError::PrivateAddress(raw.to_string()));
    }
    Ok(Target {
        kind: TargetKind::Ipv6Address,
        // Display form canonicalizes zero-run compression.
        value: addr.to_string(),
    })
}

/// Classifies an IPv4 CIDR netblock, rejecting private space.
fn classify_netblock(raw: &str) -> Result<Target, TargetError> {
    let (addr_part, prefix_part) = raw
        .split_once('/')
        .ok_or_else(|| TargetError::Unclassifiable(raw.to_string()))?;
    let addr: Ipv4Addr = addr_part
        .parse()
        .map_err(|_| TargetError::Unclassifiable(raw.to_string()))?;
    let prefix: u8 = prefix_part
        .parse()
        .map_err(|_| TargetError::Unclassifiable(raw.to_string()))?;
    if prefix > 32 {
        return Err(TargetError::Unclassifiable(raw.to_string()));
    }
    if is_private_ipv4(addr) {
        return Err(TargetError::PrivateAddress(raw.to_string()));
    }
    Ok(Target {
        kind: TargetKind::Netblock,
        value: format!("{addr}/{prefix}"),
    })
}
