use std::fmt::Write as _;

use survey_pipeline::dataset::Dataset;
use survey_pipeline::discover::{self, VariableType};
use survey_pipeline::ingest;

/// One hundred rows covering every variable role: a Likert item, a
/// pair of perfectly correlated scores with shared gaps, a 0/1 flag,
/// a three-level group, free text, a boolean, and a date.
fn discovery_fixture() -> Dataset {
    let mut text = String::from("likert,score,double_score,flag,group,city,active,day\n");
    for i in 0..100 {
        let (score, double_score) = if i % 17 == 0 {
            (String::new(), String::new())
        } else {
            (i.to_string(), (2 * i).to_string())
        };
        let group = match i % 3 {
            0 => "a",
            1 => "b",
            _ => "c",
        };
        let active = if i % 2 == 0 { "true" } else { "false" };
        writeln!(
            text,
            "{},{score},{double_score},{},{group},city{i},{active},2024-01-{:02}",
            i % 4 + 1,
            i % 2,
            i % 28 + 1,
        )
        .expect("build fixture");
    }
    ingest::parse_dataset(&text, b',').expect("parse fixture")
}

#[test]
fn classification_assigns_every_role() {
    let report = discover::discover(&discovery_fixture());
    let kinds = &report.classifications;

    assert_eq!(kinds["likert"].variable_type, VariableType::Ordinal);
    assert_eq!(kinds["likert"].distinct, 4);

    assert_eq!(kinds["score"].variable_type, VariableType::Continuous);
    assert_eq!(kinds["score"].range, Some([1.0, 99.0]));

    assert_eq!(kinds["flag"].variable_type, VariableType::BinaryNumeric);
    assert_eq!(
        kinds["flag"].values.as_deref(),
        Some(["0".to_string(), "1".to_string()].as_slice())
    );

    assert_eq!(kinds["group"].variable_type, VariableType::Categorical);
    let counts = kinds["group"].value_counts.as_ref().expect("group counts");
    assert_eq!(counts["a"], 34);
    assert_eq!(counts["b"], 33);
    assert_eq!(counts["c"], 33);

    assert_eq!(kinds["city"].variable_type, VariableType::Text);
    assert_eq!(kinds["city"].distinct, 100);

    assert_eq!(kinds["active"].variable_type, VariableType::Binary);
    assert_eq!(kinds["day"].variable_type, VariableType::DateTime);
    assert_eq!(kinds["day"].distinct, 28);
}

#[test]
fn descriptive_statistics_cover_numeric_columns_only() {
    let report = discover::discover(&discovery_fixture());
    let likert = &report.descriptive["likert"];
    assert_eq!(likert.count, 100);
    assert_eq!(likert.mean, 2.5);
    assert_eq!(likert.median, 2.5);
    assert_eq!(likert.min, 1.0);
    assert_eq!(likert.max, 4.0);

    assert!(report.descriptive.contains_key("score"));
    assert!(!report.descriptive.contains_key("group"));
    assert!(!report.descriptive.contains_key("day"));
}

#[test]
fn perfectly_correlated_scores_form_the_only_strong_pair() {
    let report = discover::discover(&discovery_fixture());
    let correlations = &report.correlations;

    assert_eq!(correlations.matrix["score"]["double_score"], 1.0);
    assert_eq!(correlations.matrix["double_score"]["score"], 1.0);
    assert_eq!(correlations.matrix["score"]["score"], 1.0);

    assert_eq!(correlations.strong_pairs.len(), 1);
    let pair = &correlations.strong_pairs[0];
    assert_eq!(pair.variable_1, "score");
    assert_eq!(pair.variable_2, "double_score");
    assert_eq!(pair.correlation, 1.0);
    assert_eq!(pair.strength, "strong");
}

#[test]
fn key_variables_use_completeness_first_then_correlation() {
    let report = discover::discover(&discovery_fixture());
    let reason_of = |name: &str| {
        report
            .key_variables
            .iter()
            .find(|k| k.variable == name)
            .map(|k| k.reason.clone())
    };

    // fully observed columns are keyed by completeness
    assert_eq!(reason_of("likert").as_deref(), Some("completeness 100%"));
    assert_eq!(reason_of("group").as_deref(), Some("completeness 100%"));
    // the gappy scores miss the completeness bar but ride the strong pair
    assert_eq!(
        reason_of("score").as_deref(),
        Some("correlation 1 with double_score")
    );
    assert_eq!(
        reason_of("double_score").as_deref(),
        Some("correlation 1 with score")
    );
}

#[test]
fn shared_gaps_show_up_as_co_occurring_missingness() {
    let report = discover::discover(&discovery_fixture());
    assert_eq!(report.missing_co_occurrence.len(), 1);
    let pair = &report.missing_co_occurrence[0];
    assert_eq!(pair.columns[0], "score");
    assert_eq!(pair.columns[1], "double_score");
    assert_eq!(pair.count, 6);
    assert_eq!(pair.percentage, 6.0);
}

#[test]
fn key_statistics_render_as_csv() {
    let report = discover::discover(&discovery_fixture());
    let bytes = discover::key_statistics_csv(&report.descriptive);
    let text = String::from_utf8(bytes).expect("csv utf8");
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("variable,count,mean,std,min,q1,median,q3,max,skewness,kurtosis")
    );
    assert!(text.contains("likert,100,2.5"));
}
