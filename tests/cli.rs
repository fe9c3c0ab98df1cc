mod common;

use assert_cmd::Command;
use predicates::str::contains;

fn pipeline_cmd(workspace: &common::TestWorkspace) -> Command {
    let mut command = Command::cargo_bin("survey-pipeline").expect("binary exists");
    command.arg("--data-dir").arg(workspace.data_dir());
    command
}

#[test]
fn ingest_reports_the_upload_profile() {
    let workspace = common::TestWorkspace::new();
    let input = workspace.write("survey.csv", &common::survey_csv());

    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("workflow:"))
        .stdout(contains("document:"))
        .stdout(contains("respondent_id"))
        .stdout(contains("numeric"));
}

#[test]
fn the_whole_pipeline_runs_through_the_binary() {
    let workspace = common::TestWorkspace::new();
    let input = workspace.write("survey.csv", &common::survey_csv());
    let impute = workspace.write("impute.yaml", &common::impute_yaml());
    let estimate = workspace.write("estimate.yaml", &common::estimate_yaml());
    let selection = workspace.write("selection.yaml", &common::selection_yaml());

    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("workflow:"));

    pipeline_cmd(&workspace)
        .args(["status"])
        .assert()
        .success()
        .stdout(contains("Raw Data Upload"))
        .stdout(contains("progress: 14.29%"));

    pipeline_cmd(&workspace)
        .args(["quality"])
        .assert()
        .success()
        .stdout(contains("rows: 10  columns: 8"))
        .stdout(contains("MAR"));

    pipeline_cmd(&workspace)
        .args(["impute", "-c", impute.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("median"));

    pipeline_cmd(&workspace)
        .args(["advance"])
        .assert()
        .success()
        .stdout(contains("stage 2 is now completed"));

    pipeline_cmd(&workspace)
        .args(["discover"])
        .assert()
        .success()
        .stdout(contains("region"))
        .stdout(contains("categorical"));

    pipeline_cmd(&workspace).args(["advance"]).assert().success();

    pipeline_cmd(&workspace)
        .args(["estimate", "-c", estimate.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("age x income"))
        .stdout(contains("correlation"));

    pipeline_cmd(&workspace).args(["advance"]).assert().success();

    pipeline_cmd(&workspace)
        .args(["propose"])
        .assert()
        .success()
        .stdout(contains("standard_survey"))
        .stdout(contains("default template: standard_survey"));

    pipeline_cmd(&workspace).args(["advance"]).assert().success();

    pipeline_cmd(&workspace)
        .args(["confirm", "-s", selection.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("confirmed: standard_survey, executive_summary"));

    pipeline_cmd(&workspace)
        .args(["report"])
        .assert()
        .success()
        .stdout(contains("final reports written"))
        .stdout(contains("Overall data completeness"));

    pipeline_cmd(&workspace)
        .args(["status", "--audit"])
        .assert()
        .success()
        .stdout(contains("progress: 100.00%"))
        .stdout(contains("workflow_completed"));
}

#[test]
fn semicolon_delimited_files_need_the_flag() {
    let workspace = common::TestWorkspace::new();
    let semicolon = common::survey_csv().replace(',', ";");
    let input = workspace.write("survey.csv", &semicolon);

    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap(), "--delimiter", ";"])
        .assert()
        .success()
        .stdout(contains("satisfaction"));
}

#[test]
fn stage_gates_surface_as_command_failures() {
    let workspace = common::TestWorkspace::new();
    let input = workspace.write("survey.csv", &common::survey_csv());
    let estimate = workspace.write("estimate.yaml", &common::estimate_yaml());

    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap()])
        .assert()
        .success();

    pipeline_cmd(&workspace)
        .args(["estimate", "-c", estimate.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("stage 3 must be completed"));
}

#[test]
fn status_without_any_workflow_fails_cleanly() {
    let workspace = common::TestWorkspace::new();
    pipeline_cmd(&workspace)
        .args(["status"])
        .assert()
        .failure()
        .stderr(contains("workflow not found"));
}

#[test]
fn preview_prints_the_snapshot_head() {
    let workspace = common::TestWorkspace::new();
    let input = workspace.write("survey.csv", &common::survey_csv());
    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap()])
        .assert()
        .success();

    pipeline_cmd(&workspace)
        .args(["preview", "--rows", "2"])
        .assert()
        .success()
        .stdout(contains("respondent_id"))
        .stdout(contains("north"));
}

#[test]
fn navigation_reports_editability() {
    let workspace = common::TestWorkspace::new();
    let input = workspace.write("survey.csv", &common::survey_csv());
    pipeline_cmd(&workspace)
        .args(["ingest", "-i", input.to_str().unwrap()])
        .assert()
        .success();

    pipeline_cmd(&workspace)
        .args(["navigate", "-s", "1"])
        .assert()
        .success()
        .stdout(contains("Raw Data Upload"))
        .stdout(contains("editable: false"));

    pipeline_cmd(&workspace)
        .args(["navigate", "-s", "6"])
        .assert()
        .failure()
        .stderr(contains("ahead of the current stage"));
}
