use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use survey_pipeline::dataset::{Column, Dataset};
use survey_pipeline::quality::{self, ImputeConfig, ImputeStrategy};
use survey_pipeline::weighted::{
    self, EstimateConfig, PopulationSpec, ProportionSpec, SubgroupSpec, TestSpec,
};

fn generate_responses(rows: usize) -> Dataset {
    let mut age = Vec::with_capacity(rows);
    let mut income = Vec::with_capacity(rows);
    let mut weight = Vec::with_capacity(rows);
    let mut region = Vec::with_capacity(rows);
    for i in 0..rows {
        age.push(Some(18.0 + (i % 60) as f64));
        income.push(Some(30_000.0 + ((i * 37) % 90_000) as f64));
        weight.push(Some(0.5 + (i % 8) as f64 * 0.25));
        let name = match i % 4 {
            0 => "north",
            1 => "south",
            2 => "east",
            _ => "west",
        };
        region.push(Some(name.to_string()));
    }
    Dataset::new(vec![
        Column::numeric("age", age),
        Column::numeric("income", income),
        Column::numeric("weight", weight),
        Column::categorical("region", region),
    ])
    .expect("dataset")
}

fn generate_gappy(rows: usize) -> Dataset {
    let mut score = Vec::with_capacity(rows);
    let mut anchor = Vec::with_capacity(rows);
    for i in 0..rows {
        // Roughly one gap every twenty rows.
        if i % 20 == 7 {
            score.push(None);
        } else {
            score.push(Some(((i * 13) % 100) as f64));
        }
        anchor.push(Some((i % 50) as f64));
    }
    Dataset::new(vec![
        Column::numeric("score", score),
        Column::numeric("anchor", anchor),
    ])
    .expect("dataset")
}

fn weighted_config() -> EstimateConfig {
    EstimateConfig {
        weight: Some("weight".to_string()),
        variables: vec!["age".to_string(), "income".to_string()],
        proportions: vec![ProportionSpec {
            variable: "region".to_string(),
            category: "north".to_string(),
        }],
        subgroups: vec![SubgroupSpec {
            target: "income".to_string(),
            group_by: "region".to_string(),
        }],
        population: Some(PopulationSpec {
            size: 250_000.0,
            variables: vec!["age".to_string()],
        }),
        tests: vec![TestSpec {
            variable_1: "income".to_string(),
            variable_2: "region".to_string(),
            test: None,
        }],
        ..EstimateConfig::default()
    }
}

fn impute_config(strategy: ImputeStrategy) -> ImputeConfig {
    let mut columns = BTreeMap::new();
    columns.insert("score".to_string(), strategy);
    ImputeConfig { columns }
}

fn bench_run_estimates(c: &mut Criterion) {
    let dataset = generate_responses(10_000);
    let weighted = weighted_config();
    let unweighted = EstimateConfig {
        variables: vec!["age".to_string(), "income".to_string()],
        ..EstimateConfig::default()
    };

    let mut group = c.benchmark_group("run_estimates");

    group.bench_function("weighted_10k", |b| {
        b.iter_batched(
            || (),
            |_| weighted::run_estimates(&dataset, &weighted).expect("estimates"),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("unweighted_10k", |b| {
        b.iter_batched(
            || (),
            |_| weighted::run_estimates(&dataset, &unweighted).expect("estimates"),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_impute(c: &mut Criterion) {
    let dataset = generate_gappy(500);
    let median = impute_config(ImputeStrategy::Median);
    let knn = impute_config(ImputeStrategy::Knn { k: 5 });

    let mut group = c.benchmark_group("impute");

    group.bench_function("median_500", |b| {
        b.iter_batched(
            || (),
            |_| quality::impute(&dataset, &median),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("knn_500", |b| {
        b.iter_batched(
            || (),
            |_| quality::impute(&dataset, &knn),
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_run_estimates, bench_impute);
criterion_main!(benches);
