//! Tests for the `train-ranker` binary

use serde_json::Value;
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_train-ranker"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("MLFLOW_TRACKING_URI")
        .output()
        .expect("binary runs")
}

fn minimal_csv(dir: &TempDir) -> String {
    let mut csv = String::from("race_id,horse_id,rank,speed\n");
    for race in 0..6 {
        for rank in 1..=4 {
            csv.push_str(&format!("{race},{race}-{rank},{rank},{}\n", 50 - rank * 5));
        }
    }
    let path = dir.path().join("train.csv");
    fs::write(&path, csv).expect("write csv");
    path.display().to_string()
}

#[test]
fn missing_argument_exits_1() {
    let output = run(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
    assert!(output.stdout.is_empty());
}

#[test]
fn help_names_the_model_file() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let help = String::from_utf8_lossy(&output.stdout);
    assert!(help.contains("ranker_model.json"));
    assert!(help.contains("ranker_model.hash"));
}

#[test]
fn unreadable_data_path_fails_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let config = serde_json::json!({
        "dataPath": dir.path().join("nope.csv"),
        "outputPath": dir.path().join("out"),
        "tracking": { "enabled": false },
    });

    let output = run(&[&config.to_string()]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.csv"));
}

#[test]
fn invalid_config_is_rejected() {
    let output = run(&[r#"{"testSize": "big"}"#]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid configuration"));
}

#[test]
fn minimal_dataset_prints_result_json() {
    let dir = TempDir::new().unwrap();
    let config = serde_json::json!({
        "dataPath": minimal_csv(&dir),
        "outputPath": dir.path().join("a/b/models"),
        "hyperparameters": { "iterations": 5, "depth": 2, "verbose": 1 },
        "tracking": { "uri": dir.path().join("mlruns") },
    });

    let output = run(&[&config.to_string()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.lines().count(), 1, "stdout carries only the result");
    let result: Value = serde_json::from_str(stdout.trim()).unwrap();
    for key in ["modelPath", "metrics", "timestamp", "hyperparameters", "featureImportance"] {
        assert!(result.get(key).is_some(), "missing {key}");
    }
    for key in ["ndcg4", "ndcg3", "ndcg2", "accuracy", "precision", "recall", "calibrationError", "inferenceLatency"] {
        assert!(result["metrics"].get(key).is_some(), "missing metrics.{key}");
    }
    assert!(dir.path().join("a/b/models/ranker_model.json").is_file());
}

#[test]
fn config_can_be_read_from_file() {
    let dir = TempDir::new().unwrap();
    let config = serde_json::json!({
        "dataPath": minimal_csv(&dir),
        "outputPath": dir.path().join("out"),
        "hyperparameters": { "iterations": 3, "verbose": 0 },
        "tracking": { "enabled": false },
    });
    let config_path = dir.path().join("config.json");
    fs::write(&config_path, config.to_string()).unwrap();

    let output = run(&[&format!("@{}", config_path.display())]);
    assert!(output.status.success());
}

#[test]
fn single_race_dataset_still_trains() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("one_race.csv");
    fs::write(&path, "race_id,horse_id,rank,speed\n1,a,1,40\n1,b,2,35\n1,c,3,30\n1,d,4,25\n").unwrap();
    let config = serde_json::json!({
        "dataPath": path,
        "outputPath": dir.path().join("out"),
        "hyperparameters": { "iterations": 5, "verbose": 0 },
        "tracking": { "enabled": false },
    });

    let output = run(&[&config.to_string()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(result["modelPath"].as_str().unwrap().ends_with("ranker_model.json"));
}
