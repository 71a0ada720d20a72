// crates/strix-core/tests/target_classifier.rs
// ============================================================================
// Module: Target Classifier Tests
// Description: Verifies priority ordering and normalization of classification.
// ============================================================================
//! ## Overview
//! Ensures the classifier resolves ambiguous inputs deterministically,
//! normalizes values, and rejects private address space and garbage.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use strix_core::Target;
use strix_core::TargetError;
use strix_core::TargetKind;

#[test]
fn ipv4_classifies_before_hostname() {
    let target = Target::classify("8.8.8.8").expect("classify");
    assert_eq!(target.kind, TargetKind::IpAddress);
    assert_eq!(target.value, "8.8.8.8");
}

#[test]
fn netblock_classifies_before_ip() {
    let target = Target::classify("8.8.8.0/24").expect("classify");
    assert_eq!(target.kind, TargetKind::Netblock);
    assert_eq!(target.value, "8.8.8.0/24");
}

#[test]
fn email_classifies_before_hostname() {
    let target = Target::classify("admin@example.com").expect("classify");
    assert_eq!(target.kind, TargetKind::EmailAddr);
}

#[test]
fn email_is_lowercased() {
    let target = Target::classify("Admin@Example.COM").expect("classify");
    assert_eq!(target.value, "admin@example.com");
}

#[test]
fn two_label_host_is_domain() {
    let target = Target::classify("Example.COM").expect("classify");
    assert_eq!(target.kind, TargetKind::DomainName);
    assert_eq!(target.value, "example.com");
}

#[test]
fn deeper_host_is_internet_name() {
    let target = Target::classify("www.example.com").expect("classify");
    assert_eq!(target.kind, TargetKind::InternetName);
}

#[test]
fn ipv6_is_canonically_compressed() {
    let target = Target::classify("2001:0db8:0000:0000:0000:0000:0000:0001").expect("classify");
    assert_eq!(target.kind, TargetKind::Ipv6Address);
    assert_eq!(target.value, "2001:db8::1");
}

#[test]
fn asn_is_uppercased() {
    let target = Target::classify("as15169").expect("classify");
    assert_eq!(target.kind, TargetKind::Asn);
    assert_eq!(target.value, "AS15169");
}

#[test]
fn quoted_name_with_space_is_human() {
    let target = Target::classify("\"John Smith\"").expect("classify");
    assert_eq!(target.kind, TargetKind::HumanName);
    assert_eq!(target.value, "John Smith");
}

#[test]
fn quoted_name_without_space_is_username() {
    let target = Target::classify("\"jsmith42\"").expect("classify");
    assert_eq!(target.kind, TargetKind::Username);
    assert_eq!(target.value, "jsmith42");
}

#[test]
fn phone_requires_plus_prefix() {
    let target = Target::classify("+14155552671").expect("classify");
    assert_eq!(target.kind, TargetKind::PhoneNumber);
}

#[test]
fn bitcoin_address_classifies() {
    let target = Target::classify("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").expect("classify");
    assert_eq!(target.kind, TargetKind::BitcoinAddress);
}

#[test]
fn ethereum_address_classifies_and_lowercases() {
    let target =
        Target::classify("0x52908400098527886E0F7030069857D2E4169EE7").expect("classify");
    assert_eq!(target.kind, TargetKind::EthereumAddress);
    assert_eq!(target.value, "0x52908400098527886e0f7030069857d2e4169ee7");
}

#[test]
fn private_ipv4_is_rejected() {
    let err = Target::classify("192.168.1.1").unwrap_err();
    assert!(matches!(err, TargetError::PrivateAddress(_)));
}

#[test]
fn loopback_is_rejected() {
    let err = Target::classify("127.0.0.1").unwrap_err();
    assert!(matches!(err, TargetError::PrivateAddress(_)));
}

#[test]
fn private_netblock_is_rejected() {
    let err = Target::classify("10.0.0.0/8").unwrap_err();
    assert!(matches!(err, TargetError::PrivateAddress(_)));
}

#[test]
fn out_of_range_octets_are_unclassifiable() {
    let err = Target::classify("999.1.2.3").unwrap_err();
    assert!(matches!(err, TargetError::Unclassifiable(_)));
}

#[test]
fn empty_input_is_unclassifiable() {
    assert!(matches!(Target::classify("  "), Err(TargetError::Unclassifiable(_))));
}

#[test]
fn with_kind_enforces_match() {
    let err = Target::with_kind(TargetKind::IpAddress, "example.com").unwrap_err();
    assert!(matches!(err, TargetError::KindMismatch { .. }));
}

#[test]
fn with_kind_allows_domain_host_family() {
    let target = Target::with_kind(TargetKind::InternetName, "example.com").expect("classify");
    assert_eq!(target.kind, TargetKind::InternetName);
}
