// crates/strix-core/tests/proptest_hashing.rs
// ============================================================================
// Module: Hashing Property Tests
// Description: Property coverage for content-addressed event hashing.
// ============================================================================
//! ## Overview
//! Event hashes must be stable across reruns, sensitive to every input field,
//! and immune to field-boundary ambiguity.

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

use proptest::prelude::*;
use strix_core::Event;
use strix_core::EventDraft;
use strix_core::ModuleName;
use strix_core::event_types;

proptest! {
    #[test]
    fn hash_is_stable_across_reruns(data in "[a-zA-Z0-9 .:-]{1,64}") {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let first = EventDraft::new(event_types::RAW_DATA, data.clone())
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        let second = EventDraft::new(event_types::RAW_DATA, data)
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        prop_assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn hash_ignores_producing_module(data in "[a-zA-Z0-9 .:-]{1,64}") {
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let first = EventDraft::new(event_types::RAW_DATA, data.clone())
            .into_event(ModuleName::from_static("sfp_one"), &seed.hash);
        let second = EventDraft::new(event_types::RAW_DATA, data)
            .into_event(ModuleName::from_static("sfp_two"), &seed.hash);
        prop_assert_eq!(first.hash, second.hash);
    }

    #[test]
    fn hash_separates_type_and_data(
        left in "[a-z]{1,16}",
        right in "[a-z]{1,16}",
    ) {
        // Moving a boundary character between type and data must change the
        // hash unless the fields are genuinely identical.
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let joined = format!("{left}{right}");
        let first = EventDraft::new(joined.clone(), right.clone())
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        let second = EventDraft::new(left.clone(), format!("{right}{right}"))
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        if joined != left {
            prop_assert_ne!(first.hash, second.hash);
        }
    }

    #[test]
    fn distinct_data_distinct_hash(
        first_data in "[a-z]{1,32}",
        second_data in "[a-z]{1,32}",
    ) {
        prop_assume!(first_data != second_data);
        let seed = Event::seed(event_types::DOMAIN_NAME, "example.com");
        let first = EventDraft::new(event_types::RAW_DATA, first_data)
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        let second = EventDraft::new(event_types::RAW_DATA, second_data)
            .into_event(ModuleName::from_static("sfp_stub"), &seed.hash);
        prop_assert_ne!(first.hash, second.hash);
    }
}
