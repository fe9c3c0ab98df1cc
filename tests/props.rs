use std::collections::BTreeMap;

use proptest::prelude::*;
use survey_pipeline::dataset::{Column, Dataset};
use survey_pipeline::numeric::round_to;
use survey_pipeline::quality::{self, ImputeConfig, ImputeStrategy, OutlierReport};
use survey_pipeline::weighted;
use survey_pipeline::workflow::{StageStatus, progress, seed_stage_records};
use uuid::Uuid;

fn weighted_sample() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    (2usize..40).prop_flat_map(|len| {
        (
            proptest::collection::vec(-1.0e6..1.0e6f64, len),
            proptest::collection::vec(0.1..50.0f64, len),
        )
    })
}

fn category_sample() -> impl Strategy<Value = (Vec<String>, Vec<f64>)> {
    (1usize..40).prop_flat_map(|len| {
        (
            proptest::collection::vec(prop_oneof!["a", "b", "c"], len),
            proptest::collection::vec(0.1..20.0f64, len),
        )
    })
}

fn gappy_sample() -> impl Strategy<Value = Vec<Option<f64>>> {
    proptest::collection::vec(proptest::option::weighted(0.8, -1.0e4..1.0e4f64), 3..40)
        .prop_filter("needs at least one present value", |cells| {
            cells.iter().any(Option::is_some)
        })
}

fn numeric_dataset(values: &[f64], weights: &[f64]) -> Dataset {
    Dataset::new(vec![
        Column::numeric("x", values.iter().copied().map(Some).collect()),
        Column::numeric("w", weights.iter().copied().map(Some).collect()),
    ])
    .unwrap()
}

fn single_column(values: &[f64]) -> Dataset {
    Dataset::new(vec![Column::numeric(
        "x",
        values.iter().copied().map(Some).collect(),
    )])
    .unwrap()
}

fn outlier_signature(report: &OutlierReport) -> Option<(usize, f64, f64)> {
    report
        .columns
        .get("x")
        .map(|entry| (entry.count, entry.lower_bound, entry.upper_bound))
}

proptest! {
    #[test]
    fn weighted_means_stay_inside_the_sample_range((values, weights) in weighted_sample()) {
        let dataset = numeric_dataset(&values, &weights);
        let est = weighted::weighted_mean(&dataset, "x", Some("w")).unwrap();

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(est.mean >= min - 1e-3 && est.mean <= max + 1e-3);
        prop_assert!(est.ci_lower <= est.mean && est.mean <= est.ci_upper);
    }

    #[test]
    fn unit_weights_reproduce_the_plain_mean(values in proptest::collection::vec(-1.0e6..1.0e6f64, 2..40)) {
        let unit = vec![1.0; values.len()];
        let weighted = weighted::weighted_mean(&numeric_dataset(&values, &unit), "x", Some("w")).unwrap();
        let plain = weighted::weighted_mean(&single_column(&values), "x", None).unwrap();

        prop_assert_eq!(weighted.mean, plain.mean);
        prop_assert_eq!(weighted.se, plain.se);
        prop_assert_eq!(weighted.ci_lower, plain.ci_lower);
        prop_assert_eq!(weighted.ci_upper, plain.ci_upper);
        prop_assert_eq!(weighted.n_effective, weighted.n as f64);
    }

    #[test]
    fn effective_sample_sizes_are_bounded((values, weights) in weighted_sample()) {
        let dataset = numeric_dataset(&values, &weights);
        let est = weighted::weighted_mean(&dataset, "x", Some("w")).unwrap();

        // Kish: 1 <= n_eff <= n for positive weights
        prop_assert!(est.n_effective >= 0.99);
        prop_assert!(est.n_effective <= est.n as f64 + 0.01);
    }

    #[test]
    fn proportions_are_probabilities((groups, weights) in category_sample()) {
        let dataset = Dataset::new(vec![
            Column::categorical("group", groups.into_iter().map(Some).collect()),
            Column::numeric("w", weights.iter().copied().map(Some).collect()),
        ])
        .unwrap();
        let est = weighted::weighted_proportion(&dataset, "group", "a", Some("w")).unwrap();

        prop_assert!((0.0..=1.0).contains(&est.proportion));
        prop_assert!(est.ci_lower >= 0.0);
        prop_assert!(est.ci_upper <= 1.0);
        prop_assert!(est.ci_lower <= est.ci_upper);
        prop_assert!((est.percentage - est.proportion * 100.0).abs() < 0.02);
    }

    #[test]
    fn outlier_detection_ignores_row_order(
        (values, split) in (5usize..60).prop_flat_map(|len| {
            (proptest::collection::vec(-1.0e4..1.0e4f64, len), 0..len)
        })
    ) {
        let mut rotated = values.clone();
        rotated.rotate_left(split);

        let original = quality::detect_outliers(&single_column(&values));
        let reordered = quality::detect_outliers(&single_column(&rotated));
        prop_assert_eq!(outlier_signature(&original), outlier_signature(&reordered));
    }

    #[test]
    fn mean_imputation_is_idempotent(cells in gappy_sample()) {
        let dataset = Dataset::new(vec![Column::numeric("x", cells)]).unwrap();
        let mut columns = BTreeMap::new();
        columns.insert("x".to_string(), ImputeStrategy::Mean);
        let config = ImputeConfig { columns };

        let (once, first) = quality::impute(&dataset, &config);
        prop_assert_eq!(once.column("x").unwrap().missing_count(), 0);
        prop_assert_eq!(first.columns["x"].remaining_missing, 0);

        let (twice, second) = quality::impute(&once, &config);
        prop_assert_eq!(second.columns["x"].filled, 0);
        prop_assert_eq!(once.column("x").unwrap(), twice.column("x").unwrap());
    }

    #[test]
    fn progress_is_the_completed_share_of_seven(flags in proptest::collection::vec(any::<bool>(), 7)) {
        let mut records = seed_stage_records(Uuid::new_v4());
        let mut completed = 0usize;
        for (record, done) in records.iter_mut().zip(&flags) {
            if *done {
                record.status = StageStatus::Completed;
                completed += 1;
            }
        }
        prop_assert_eq!(progress(&records), round_to(completed as f64 * 100.0 / 7.0, 2));
    }
}

#[test]
fn in_range_duplicates_leave_the_tukey_fences_alone() {
    let base = [10.0, 12.0, 11.0, 13.0, 1000.0];
    let padded = [10.0, 12.0, 11.0, 13.0, 1000.0, 11.0, 12.0, 13.0];

    let lean = quality::detect_outliers(&single_column(&base));
    let fat = quality::detect_outliers(&single_column(&padded));

    assert_eq!(outlier_signature(&lean), Some((1, 8.0, 16.0)));
    assert_eq!(outlier_signature(&lean), outlier_signature(&fat));
}
