// crates/strix-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Argument Tests
// Description: Argument parsing and module selection coverage.
// ============================================================================
//! ## Overview
//! Verifies the preserved CLI surface: `-s`, `-t`, `-m`, optional `-o`, and
//! the use-case/module-list split in `-m`.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use clap::Parser;
use strix_core::ModuleSelection;
use strix_core::UseCase;

use super::Args;
use super::OutputFormat;
use super::parse_selection;

#[test]
fn required_flags_parse() {
    let args =
        Args::try_parse_from(["strix", "-s", "example.com", "-t", "DOMAIN_NAME", "-m", "All"])
            .expect("parse");
    assert_eq!(args.target, "example.com");
    assert_eq!(args.target_type, "DOMAIN_NAME");
    assert_eq!(args.output, OutputFormat::Csv);
}

#[test]
fn output_flag_selects_json() {
    let args = Args::try_parse_from([
        "strix", "-s", "example.com", "-t", "DOMAIN_NAME", "-m", "All", "-o", "json",
    ])
    .expect("parse");
    assert_eq!(args.output, OutputFormat::Json);
}

#[test]
fn missing_target_is_an_argument_error() {
    assert!(Args::try_parse_from(["strix", "-t", "DOMAIN_NAME", "-m", "All"]).is_err());
}

#[test]
fn unknown_output_format_is_an_argument_error() {
    assert!(Args::try_parse_from([
        "strix", "-s", "example.com", "-t", "DOMAIN_NAME", "-m", "All", "-o", "xml",
    ])
    .is_err());
}

#[test]
fn selection_accepts_use_case_tag() {
    let selection = parse_selection("Passive").expect("selection");
    assert_eq!(selection, ModuleSelection::ByUseCase(UseCase::Passive));
}

#[test]
fn selection_accepts_module_list() {
    let selection = parse_selection("sfp_dnsresolve,sfp_names").expect("selection");
    match selection {
        ModuleSelection::Names(names) => {
            assert_eq!(names.len(), 2);
            assert_eq!(names[0].as_str(), "sfp_dnsresolve");
        }
        ModuleSelection::ByUseCase(_) => panic!("expected explicit names"),
    }
}

#[test]
fn selection_rejects_bad_module_name() {
    assert!(parse_selection("sfp-dash-name").is_err());
}

#[test]
fn selection_rejects_empty_list() {
    assert!(parse_selection(" , ").is_err());
}
