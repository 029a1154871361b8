//! Property tests for consensus extraction.

mod common;

use std::collections::BTreeSet;

use greenlight::domain::models::{EntityType, RawCandidate};
use greenlight::services::{AgreementPolicy, AttemptOutput, ConsensusOptions, ExtractionConsensus};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

const NAMES: &[&str] = &[
    "Mei",
    "MEI",
    "mei",
    "Wang Jun",
    "Wang-Jun",
    "Jade Palace",
    "the Jade Palace",
    "Lotus Lantern",
    "Captain Hu",
    "Old Harbor",
];

fn candidate(name: usize, kind: usize) -> RawCandidate {
    RawCandidate::new(NAMES[name], EntityType::ALL[kind])
}

fn attempts_strategy() -> impl Strategy<Value = Vec<AttemptOutput>> {
    prop::collection::vec(
        prop::collection::vec((0..NAMES.len(), 0..EntityType::ALL.len()), 0..6),
        2..=5,
    )
    .prop_map(|attempts| {
        attempts
            .into_iter()
            .enumerate()
            .map(|(i, names)| {
                AttemptOutput::new(i, names.into_iter().map(|(n, k)| candidate(n, k)).collect())
            })
            .collect()
    })
}

fn consensus(attempts: usize, policy: AgreementPolicy) -> Result<ExtractionConsensus, TestCaseError> {
    ExtractionConsensus::new(ConsensusOptions {
        attempts,
        policy,
        ..ConsensusOptions::default()
    })
    .map_err(|e| TestCaseError::fail(e.to_string()))
}

proptest! {
    /// Property: the order attempts arrive in does not change the result
    #[test]
    fn prop_merge_ignores_arrival_order(
        (outputs, shuffled) in attempts_strategy()
            .prop_flat_map(|outputs| (Just(outputs.clone()), Just(outputs).prop_shuffle()))
    ) {
        let k = outputs.len();
        let merger = consensus(k, AgreementPolicy::MinAgreement(2))?;

        let a = merger.merge(&outputs, k).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let b = merger.merge(&shuffled, k).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(a, b);
    }

    /// Property: kept entities meet the threshold and rejected ones do not
    #[test]
    fn prop_threshold_splits_entities(outputs in attempts_strategy(), min in 1usize..=5) {
        let k = outputs.len();
        let merger = consensus(k, AgreementPolicy::MinAgreement(min))?;
        let result = merger.merge(&outputs, k).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(result.threshold, min.clamp(1, k));
        for entity in &result.entities {
            prop_assert!(entity.source_attempts.len() >= result.threshold);
            let expected = entity.source_attempts.len() as f64 / k as f64;
            prop_assert!((entity.confidence - expected).abs() < 1e-9);
            prop_assert!(entity.confidence > 0.0 && entity.confidence <= 1.0);
        }
        for entity in &result.rejected {
            prop_assert!(entity.source_attempts.len() < result.threshold);
        }
    }

    /// Property: every reported spelling lands in exactly one entity
    #[test]
    fn prop_every_spelling_is_accounted_for(outputs in attempts_strategy()) {
        let k = outputs.len();
        let merger = consensus(k, AgreementPolicy::Unanimous)?;
        let result = merger.merge(&outputs, k).map_err(|e| TestCaseError::fail(e.to_string()))?;

        let spellings: BTreeSet<&str> = outputs
            .iter()
            .flat_map(|o| o.candidates.iter().map(|c| c.name.as_str()))
            .collect();
        for spelling in spellings {
            let owners = result
                .entities
                .iter()
                .chain(&result.rejected)
                .filter(|e| e.variants.iter().any(|v| v == spelling))
                .count();
            prop_assert_eq!(owners, 1, "{} owned by {} entities", spelling, owners);
        }
    }

    /// Property: raising the agreement requirement never adds entities
    #[test]
    fn prop_stricter_policy_keeps_a_subset(outputs in attempts_strategy()) {
        let k = outputs.len();
        let lenient = consensus(k, AgreementPolicy::MinAgreement(1))?
            .merge(&outputs, k)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let strict = consensus(k, AgreementPolicy::Unanimous)?
            .merge(&outputs, k)
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let lenient_names: BTreeSet<&str> = lenient.entities.iter().map(|e| e.name.as_str()).collect();
        for entity in &strict.entities {
            prop_assert!(lenient_names.contains(entity.name.as_str()));
        }
        prop_assert!(lenient.rejected.is_empty());
    }
}

#[test]
fn test_spelling_variants_merge_under_unanimous_policy() {
    let outputs = vec![
        AttemptOutput::new(0, common::characters(&["Mei", "MEI", "Wang Jun"])),
        AttemptOutput::new(1, common::characters(&["Mei", "Wang-Jun"])),
        AttemptOutput::new(2, common::characters(&["mei"])),
    ];
    let result = consensus(3, AgreementPolicy::Unanimous)
        .unwrap()
        .merge(&outputs, 3)
        .unwrap();

    let kept: Vec<&str> = result.entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(kept, vec!["Mei"]);
    assert_eq!(result.rejected[0].variants, vec!["Wang Jun", "Wang-Jun"]);
}

#[test]
fn test_missing_attempt_lowers_threshold_to_survivors() {
    let outputs = vec![
        AttemptOutput::new(0, common::characters(&["Mei", "Captain Hu"])),
        AttemptOutput::new(2, common::characters(&["Mei"])),
    ];
    let result = consensus(3, AgreementPolicy::Unanimous)
        .unwrap()
        .merge(&outputs, 3)
        .unwrap();

    assert_eq!(result.threshold, 2);
    assert_eq!(result.failed_attempts, vec![1]);
    assert!(result.is_degraded());
    assert_eq!(result.entities.len(), 1);
    assert!((result.entities[0].confidence - 2.0 / 3.0).abs() < 1e-9);
}
