//! Integration tests for the phototree binary

use std::path::Path;
use std::process::{Command, Output};

use phototree_cas::testing::ExifFixture;
use tempfile::TempDir;

/// Run phototree with an isolated HOME and working directory.
fn phototree(home: &Path, args: &[&str]) -> Output {
    phototree_with_env(home, args, &[])
}

fn phototree_with_env(home: &Path, args: &[&str], vars: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_phototree"));
    cmd.args(args)
        .current_dir(home)
        .env("HOME", home)
        .env_remove("PHOTOTREE_ROOT")
        .env_remove("PHOTOTREE_MAX_BLOB_BYTES")
        .env_remove("PHOTOTREE_THREADS")
        .env_remove("PHOTOTREE_DATE_FALLBACK")
        .env("PHOTOTREE_LOG", "off");
    for (key, value) in vars {
        cmd.env(key, value);
    }
    cmd.output().expect("Failed to execute phototree")
}

fn json_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_ingest_then_duplicate() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("store");
    let photo = temp.path().join("beach.JPG");
    std::fs::write(
        &photo,
        ExifFixture::new().original("2016:08:15 12:00:00").to_jpeg(),
    )
    .unwrap();
    let photo_arg = photo.to_str().unwrap();
    let root_arg = root.to_str().unwrap();

    let first = phototree(
        temp.path(),
        &["--json", "--root", root_arg, "ingest", "--as", "carol", photo_arg],
    );
    assert!(first.status.success(), "{:?}", first);
    let lines = json_lines(&first);
    assert_eq!(lines[0]["outcome"], "stored");
    assert_eq!(lines[0]["uploaded_by"], "carol");
    let stored_path = lines[0]["path"].as_str().unwrap().to_string();
    assert!(stored_path.starts_with("2016/08/15/"));
    assert!(stored_path.ends_with(".jpg"));
    assert!(root.join(&stored_path).is_file());
    assert_eq!(lines[1]["summary"]["stored"], 1);

    let second = phototree(temp.path(), &["--json", "--root", root_arg, "ingest", photo_arg]);
    assert!(second.status.success());
    let lines = json_lines(&second);
    assert_eq!(lines[0]["outcome"], "duplicate");
    assert_eq!(lines[0]["path"], stored_path.as_str());
}

#[test]
fn test_missing_file_fails_the_run() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("store");
    let good = temp.path().join("ok.png");
    std::fs::write(&good, b"fine").unwrap();
    let missing = temp.path().join("missing.png");

    let output = phototree(
        temp.path(),
        &[
            "--json",
            "--root",
            root.to_str().unwrap(),
            "ingest",
            good.to_str().unwrap(),
            missing.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["outcome"], "stored");
    assert_eq!(lines[1]["outcome"], "failed");
    assert_eq!(lines[2]["summary"]["failed"], 1);
}

#[test]
fn test_oversized_file_refused_before_reading() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("store");
    let small = temp.path().join("small.png");
    let big = temp.path().join("big.png");
    std::fs::write(&small, b"tiny").unwrap();
    std::fs::write(&big, b"far too large").unwrap();

    let output = phototree_with_env(
        temp.path(),
        &[
            "--json",
            "--root",
            root.to_str().unwrap(),
            "ingest",
            small.to_str().unwrap(),
            big.to_str().unwrap(),
        ],
        &[("PHOTOTREE_MAX_BLOB_BYTES", "4")],
    );
    assert!(!output.status.success());
    let lines = json_lines(&output);
    assert_eq!(lines[0]["outcome"], "stored");
    assert_eq!(lines[1]["outcome"], "failed");
    assert!(lines[1]["error"].as_str().unwrap().contains("big.png"));
    assert_eq!(lines[2]["summary"]["failed"], 1);
}

#[test]
fn test_rebuild_reports_existing_blobs() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("store");
    std::fs::create_dir_all(root.join("unknown")).unwrap();
    std::fs::write(root.join("unknown/1-aaaaaaaa.jpg"), b"one").unwrap();
    std::fs::write(root.join("unknown/2-bbbbbbbb.jpg"), b"one").unwrap();

    let output = phototree(
        temp.path(),
        &["--json", "--root", root.to_str().unwrap(), "rebuild"],
    );
    assert!(output.status.success());
    let report = &json_lines(&output)[0];
    assert_eq!(report["files"], 2);
    assert_eq!(report["indexed"], 1);
    assert_eq!(report["duplicates"][0]["kept"], "unknown/2-bbbbbbbb.jpg");
}

#[test]
fn test_inspect_writes_nothing() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("store");
    let photo = temp.path().join("old.jpg");
    std::fs::write(
        &photo,
        ExifFixture::new().digitized("2001:02:03 04:05:06").to_jpeg(),
    )
    .unwrap();

    let output = phototree(
        temp.path(),
        &[
            "--json",
            "--root",
            root.to_str().unwrap(),
            "inspect",
            photo.to_str().unwrap(),
        ],
    );
    assert!(output.status.success());
    let line = &json_lines(&output)[0];
    assert_eq!(line["partition"], "2001/02/03");
    assert_eq!(line["date_source"], "digitized");
    assert!(line["stored_at"].is_null());
    assert!(line["rejected"].is_null());
    assert_eq!(line["limit"], phototree_cas::DEFAULT_MAX_BLOB_BYTES);
    assert!(!root.join("2001").exists());
}

#[test]
fn test_config_init_and_show() {
    let temp = TempDir::new().unwrap();

    let init = phototree(temp.path(), &["config", "init"]);
    assert!(init.status.success());
    assert!(temp.path().join(".phototree/config.toml").is_file());

    let again = phototree(temp.path(), &["config", "init"]);
    assert!(!again.status.success());

    let show = phototree(temp.path(), &["config", "show"]);
    let stdout = String::from_utf8_lossy(&show.stdout);
    assert!(show.status.success());
    assert!(stdout.contains("[storage]"));
    assert!(stdout.contains("[ingest]"));
    assert!(stdout.contains("[log]"));
}
