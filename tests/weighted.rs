use survey_pipeline::dataset::Dataset;
use survey_pipeline::error::PipelineError;
use survey_pipeline::ingest;
use survey_pipeline::weighted::{self, EstimateConfig, TestKind, VariableEstimate};

/// Eight respondents with a design weight, two regions, and a binary
/// opinion column. Income is age plus twenty, so the pair is perfectly
/// collinear.
fn weighted_csv() -> String {
    concat!(
        "age,income,weight,region,level\n",
        "30,50,2,west,high\n",
        "40,60,1,east,low\n",
        "50,70,1,west,high\n",
        "20,40,1,east,low\n",
        "60,80,2,west,high\n",
        "35,55,1,east,high\n",
        "45,65,1,west,low\n",
        "25,45,1,east,high\n",
    )
    .to_string()
}

fn fixture() -> Dataset {
    ingest::parse_dataset(&weighted_csv(), b',').unwrap()
}

fn full_config() -> EstimateConfig {
    let yaml = concat!(
        "weight: weight\n",
        "proportions:\n",
        "  - variable: region\n",
        "    category: west\n",
        "crosstabs:\n",
        "  - row: region\n",
        "    col: level\n",
        "subgroups:\n",
        "  - target: age\n",
        "    group_by: region\n",
        "population:\n",
        "  size: 1000\n",
        "  variables: [age, level]\n",
        "tests:\n",
        "  - variable_1: age\n",
        "    variable_2: region\n",
        "  - variable_1: age\n",
        "    variable_2: income\n",
    );
    serde_yaml::from_str(yaml).unwrap()
}

#[test]
fn weighted_means_cover_every_numeric_column_by_default() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();

    // age and income, but never the weight column itself
    assert_eq!(report.means.len(), 2);
    let age = &report.means["age"];
    assert_eq!(age.n, 8);
    assert_eq!(age.n_effective, 7.14);
    assert_eq!(age.mean, 39.5);
    assert!(age.se > 0.0);
    assert!(age.ci_lower < 39.5 && 39.5 < age.ci_upper);
    assert_eq!(report.means["income"].mean, 59.5);
    assert!(report.errors.is_empty());
}

#[test]
fn proportion_estimates_use_the_design_weights() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();

    let west = &report.proportions[0];
    assert_eq!(west.variable, "region");
    assert_eq!(west.category, "west");
    assert_eq!(west.n, 8);
    // six of ten weight units sit in the west
    assert_eq!(west.proportion, 0.6);
    assert_eq!(west.percentage, 60.0);
    assert!(west.ci_lower >= 0.0 && west.ci_upper <= 1.0);
    assert!(west.ci_lower < 0.6 && 0.6 < west.ci_upper);
}

#[test]
fn crosstab_weights_cells_but_tests_unweighted_counts() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();

    let tab = &report.crosstabs[0];
    assert_eq!(tab.n, 8);
    assert_eq!(tab.table["west"]["high"], 5.0);
    assert_eq!(tab.table["west"]["low"], 1.0);
    assert_eq!(tab.table["east"]["high"], 2.0);
    assert_eq!(tab.table["east"]["low"], 2.0);
    assert_eq!(tab.proportions["west"]["high"], 0.5);
    assert_eq!(tab.percentages["west"]["high"], 50.0);

    // observed 3/1 vs 2/2 against expected 2.5/1.5 leaves nothing once
    // the continuity correction takes its half count
    let chi = tab.chi_square.as_ref().unwrap();
    assert_eq!(chi.statistic, 0.0);
    assert_eq!(chi.p_value, 1.0);
    assert_eq!(chi.dof, 1);
    assert!(chi.yates_correction);
    assert!(!chi.significant);
}

#[test]
fn subgroups_report_each_region_separately() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();

    let sub = &report.subgroups[0];
    assert_eq!(sub.target, "age");
    assert_eq!(sub.group_by, "region");
    assert_eq!(
        sub.groups.keys().cloned().collect::<Vec<_>>(),
        vec!["east".to_string(), "west".to_string()]
    );
    let east = &sub.groups["east"];
    assert_eq!(east.n, 4);
    assert_eq!(east.mean, 30.0);
    assert_eq!(east.n_effective, 4.0);
    let west = &sub.groups["west"];
    assert_eq!(west.mean, 45.8333);
    assert_eq!(west.n_effective, 3.6);
    assert!(sub.failures.is_empty());
}

#[test]
fn population_projection_scales_by_the_weight_total() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();

    let pop = report.population.as_ref().unwrap();
    assert_eq!(pop.population_size, 1000.0);
    assert_eq!(pop.weight_variable, "weight");
    assert_eq!(pop.sum_of_weights, 10.0);
    assert_eq!(pop.scaling_factor, 100.0);

    match &pop.variables["age"] {
        VariableEstimate::Continuous {
            mean,
            estimated_total,
            total_ci_lower,
            total_ci_upper,
            ..
        } => {
            assert_eq!(*mean, 39.5);
            assert_eq!(*estimated_total, 39500.0);
            assert!(*total_ci_lower < 39500.0 && 39500.0 < *total_ci_upper);
        }
        other => panic!("age should be continuous, got {other:?}"),
    }
    match &pop.variables["level"] {
        VariableEstimate::Categorical { n, categories } => {
            assert_eq!(*n, 8);
            let high = &categories["high"];
            assert_eq!(high.proportion, 0.7);
            assert_eq!(high.percentage, 70.0);
            assert_eq!(high.estimated_count, 700.0);
            assert_eq!(categories["low"].estimated_count, 300.0);
        }
        other => panic!("level should be categorical, got {other:?}"),
    }
}

#[test]
fn hypothesis_tests_pick_the_family_from_the_column_types() {
    let report = weighted::run_estimates(&fixture(), &full_config()).unwrap();
    assert_eq!(report.tests.len(), 2);

    // numeric against a two-level grouping runs a t-test, numeric
    // variable first regardless of how the pair was written
    let ttest = &report.tests[0];
    assert_eq!(ttest.test, TestKind::TTest);
    assert_eq!(ttest.variable_1, "age");
    assert_eq!(ttest.variable_2, "region");
    assert_eq!(ttest.dof, Some(6.0));
    let groups = ttest.groups.as_ref().unwrap();
    assert_eq!(groups[0].group, "west");
    assert_eq!(groups[0].mean, 46.25);
    assert_eq!(groups[1].group, "east");
    assert_eq!(groups[1].mean, 30.0);
    assert!(ttest.statistic.unwrap() > 0.0);
    assert!(ttest.p_value > 0.05);
    assert!(!ttest.significant);

    // two numeric columns correlate; this pair is perfectly collinear,
    // so the t statistic degenerates and only the p-value is reported
    let corr = &report.tests[1];
    assert_eq!(corr.test, TestKind::Correlation);
    assert_eq!(corr.correlation, Some(1.0));
    assert!(corr.statistic.is_none());
    assert_eq!(corr.p_value, 0.0);
    assert!(corr.significant);
    assert_eq!(corr.dof, Some(6.0));
}

#[test]
fn three_group_comparison_switches_to_anova() {
    let csv = concat!(
        "score,arm\n",
        "10,a\n12,a\n11,a\n",
        "20,b\n22,b\n21,b\n",
        "30,c\n31,c\n29,c\n",
    );
    let dataset = ingest::parse_dataset(csv, b',').unwrap();
    let result = weighted::hypothesis_test(&dataset, "score", "arm", None).unwrap();
    assert_eq!(result.test, TestKind::Anova);
    assert_eq!(result.dof_between, Some(2.0));
    assert_eq!(result.dof_within, Some(6.0));
    assert!(result.statistic.unwrap() > 1.0);
    assert!(result.significant);
    let groups = result.groups.as_ref().unwrap();
    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].group, "a");
    assert_eq!(groups[0].mean, 11.0);
}

#[test]
fn unknown_analysis_columns_are_collected_not_fatal() {
    let config: EstimateConfig = serde_yaml::from_str(concat!(
        "weight: weight\n",
        "variables: [age, flibber]\n",
        "proportions:\n",
        "  - variable: ghost\n",
        "    category: x\n",
    ))
    .unwrap();
    let report = weighted::run_estimates(&fixture(), &config).unwrap();

    assert_eq!(report.means.len(), 1);
    assert!(report.means.contains_key("age"));
    assert!(report.proportions.is_empty());
    let failed: Vec<&str> = report.errors.iter().map(|e| e.column.as_str()).collect();
    assert!(failed.contains(&"flibber"));
    assert!(failed.contains(&"ghost"));
}

#[test]
fn missing_weight_column_fails_the_whole_run() {
    let config: EstimateConfig = serde_yaml::from_str("weight: wt\n").unwrap();
    let err = weighted::run_estimates(&fixture(), &config).unwrap_err();
    assert!(matches!(err, PipelineError::ColumnNotFound { column } if column == "wt"));
}

#[test]
fn unweighted_run_falls_back_to_unit_weights() {
    let config = EstimateConfig::default();
    let report = weighted::run_estimates(&fixture(), &config).unwrap();

    // with unit weights the effective n equals n; weight becomes an
    // ordinary numeric column and is analysed too
    assert_eq!(report.means.len(), 3);
    let age = &report.means["age"];
    assert_eq!(age.n, 8);
    assert_eq!(age.n_effective, 8.0);
    assert_eq!(age.mean, 38.125);
    assert!(report.population.is_none());
}
