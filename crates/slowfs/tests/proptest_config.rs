//! Property-based tests for delay models and the configuration store
//!
//! Run with: cargo test --test proptest_config

use proptest::prelude::*;
use slowfs::{ConfigStore, ConfigTable, DelayModel, ErrorCode, OperationCategory};
use std::time::Duration;

fn category_strategy() -> impl Strategy<Value = OperationCategory> {
    (0..OperationCategory::COUNT).prop_map(|i| OperationCategory::ALL[i])
}

fn error_code_strategy() -> impl Strategy<Value = ErrorCode> {
    prop_oneof![
        Just(ErrorCode::Io),
        Just(ErrorCode::NoSpace),
        Just(ErrorCode::Access),
        Just(ErrorCode::NotFound),
        Just(ErrorCode::ReadOnly),
        Just(ErrorCode::Busy),
        Just(ErrorCode::TimedOut),
    ]
}

// Valid by construction: 0 <= min <= max, p in [0, 1], code present.
fn valid_model_strategy() -> impl Strategy<Value = DelayModel> {
    (0.0..50.0f64, 0.0..50.0f64, 0.0..=1.0f64, error_code_strategy()).prop_map(
        |(a, b, p, code)| DelayModel::range(a.min(b), a.max(b)).with_failure(p, code),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Sampled delays always land inside the configured range
    #[test]
    fn delay_stays_within_bounds(model in valid_model_strategy(), u in 0.0..1.0f64) {
        prop_assert!(model.validate().is_ok());
        let delay = model.delay_for(u);
        let min = Duration::from_secs_f64(model.min_delay_seconds);
        let max = Duration::from_secs_f64(model.max_delay_seconds);
        // Float to Duration conversion may round by a nanosecond.
        let slack = Duration::from_nanos(1);
        prop_assert!(delay + slack >= min, "{delay:?} < {min:?}");
        prop_assert!(delay <= max + slack, "{delay:?} > {max:?}");
    }

    /// An inverted range is rejected and never reaches the store
    #[test]
    fn inverted_range_is_rejected(
        category in category_strategy(),
        min in 0.001..50.0f64,
        shrink in 0.0..1.0f64,
    ) {
        let store = ConfigStore::new();
        let model = DelayModel::range(min, min * shrink * 0.999);
        prop_assert!(store.set_category(category, model).is_err());
        prop_assert_eq!(*store.snapshot(), ConfigTable::default());
    }

    /// Out-of-range probabilities are rejected
    #[test]
    fn probability_outside_unit_interval_is_rejected(p in prop_oneof![-10.0..-0.0001f64, 1.0001..10.0f64]) {
        let model = DelayModel::new().with_failure(p, ErrorCode::Io);
        prop_assert!(model.validate().is_err());
    }

    /// The store ends up with the last model written per category
    #[test]
    fn last_write_wins_per_category(
        updates in prop::collection::vec((category_strategy(), valid_model_strategy()), 1..40)
    ) {
        let store = ConfigStore::new();
        let mut expected = ConfigTable::default();
        for (category, model) in &updates {
            store.set_category(*category, *model).unwrap();
            expected.set(*category, *model);
        }
        prop_assert_eq!(*store.snapshot(), expected);
    }

    /// Any valid table survives the JSON wire format
    #[test]
    fn table_json_is_lossless(
        updates in prop::collection::vec((category_strategy(), valid_model_strategy()), 0..10)
    ) {
        let mut table = ConfigTable::default();
        for (category, model) in updates {
            table.set(category, model);
        }
        let json = serde_json::to_string(&table).unwrap();
        prop_assert_eq!(ConfigTable::from_json(&json).unwrap(), table);
    }
}
