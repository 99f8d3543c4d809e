//! Property-based tests for the data generator
//!
//! 1. Section count and needle placement
//! 2. Non-needle strings are distinct from the needle and each other
//! 3. Referential integrity across Sections, Supports, Attachments, Spans

use proptest::prelude::*;
use std::collections::HashSet;
use storebench_datagen::*;

// ============================================================================
// Strategies
// ============================================================================

fn needle_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9]{1,40}"
}

fn count_strategy() -> impl Strategy<Value = usize> {
    0usize..=450
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_count_and_needle_placement(
        seed in any::<u64>(),
        count in count_strategy(),
        needle in needle_strategy(),
    ) {
        let dataset = DataGenerator::seeded(seed).generate(count, &needle);

        prop_assert_eq!(dataset.len(), count);
        prop_assert_eq!(dataset.supports.len(), count);
        prop_assert_eq!(dataset.spans.len(), count);
        prop_assert_eq!(dataset.needle_count(&needle), expected_needle_count(count));

        for (i, section) in dataset.sections.iter().enumerate() {
            prop_assert_eq!(section.search_string == needle, is_needle_index(i));
        }
    }

    #[test]
    fn prop_filler_strings_distinct(seed in any::<u64>(), needle in needle_strategy()) {
        let dataset = DataGenerator::seeded(seed).generate(250, &needle);

        let fillers: Vec<&str> = dataset
            .sections
            .iter()
            .enumerate()
            .filter(|(i, _)| !is_needle_index(*i))
            .map(|(_, s)| s.search_string.as_str())
            .collect();
        let unique: HashSet<&str> = fillers.iter().copied().collect();

        prop_assert_eq!(unique.len(), fillers.len());
        prop_assert!(fillers.iter().all(|s| s.len() == SEARCH_STRING_LEN));
    }

    #[test]
    fn prop_referential_integrity(seed in any::<u64>(), count in 1usize..=120) {
        let dataset = DataGenerator::seeded(seed).generate(count, "needle");

        let mut support_ids = HashSet::new();
        let mut span_ids = HashSet::new();

        for (section, supports, spans) in dataset.groups() {
            let own_supports: Vec<&String> = supports.iter().map(|s| &s.support_id).collect();
            let own_spans: Vec<&String> = spans.iter().map(|s| &s.span_id).collect();
            prop_assert_eq!(section.support_ids.iter().collect::<Vec<_>>(), own_supports);
            prop_assert_eq!(section.span_ids.iter().collect::<Vec<_>>(), own_spans);

            for support in supports {
                prop_assert_eq!(&support.section_id, &section.section_id);
                prop_assert_eq!(&support.attachment_id, &support.attachment.attachment_id);
                prop_assert!(support_ids.insert(support.support_id.clone()));
            }
            for span in spans {
                prop_assert_eq!(span.order_key, span.number);
                prop_assert!(span_ids.insert(span.span_id.clone()));
            }
        }

        prop_assert_eq!(support_ids.len(), dataset.support_count());
        prop_assert_eq!(span_ids.len(), dataset.span_count());
    }
}

#[test]
fn test_payload_estimate_grows_with_count() {
    let small = DataGenerator::seeded(1).generate(10, "n").approx_payload_bytes();
    let large = DataGenerator::seeded(1).generate(100, "n").approx_payload_bytes();
    assert!(small > 10 * SEARCH_STRING_LEN / 2);
    assert!(large > small);
}

#[test]
fn test_dataset_serializes_to_json() {
    let dataset = DataGenerator::seeded(2).generate(3, "n");
    let json = serde_json::to_string(&dataset).unwrap();
    assert!(json.contains("\"search_string\":\"n\""));
}
