use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, path::PathBuf};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

#[test]
fn check_config_merges_file_over_defaults() -> Result<(), Box<dyn Error>> {
    let path = workspace_root().join("test_data/obp.toml");
    let output = cargo_bin_cmd!("obp")
        .args(["--config", path.to_str().expect("utf8 path"), "check-config"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let cfg: Value = serde_json::from_slice(&output)?;
    assert_eq!(cfg["settings"]["ratio_sbp"], 0.55);
    assert_eq!(cfg["settings"]["min_nbr_peaks"], 12);
    assert_eq!(cfg["filter"]["order"], 4);
    assert_eq!(cfg["filter"]["reset_on_start"], true);
    assert_eq!(cfg["filter"]["lowpass_hz"], 10.0);
    assert_eq!(cfg["acquisition"]["safety_floor_mmhg"], 25.0);
    assert_eq!(cfg["detection"]["prominence"], 0.1);
    Ok(())
}

#[test]
fn check_config_defaults_without_file() -> Result<(), Box<dyn Error>> {
    let output = cargo_bin_cmd!("obp")
        .arg("check-config")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let cfg: Value = serde_json::from_slice(&output)?;
    assert_eq!(cfg["settings"]["ratio_dbp"], 0.75);
    assert_eq!(cfg["settings"]["pump_up_mmhg"], 160.0);
    Ok(())
}

#[test]
fn out_of_range_ratio_is_rejected() {
    let path = workspace_root().join("test_data/bad_ratio.toml");
    let assert = cargo_bin_cmd!("obp")
        .args(["--config", path.to_str().expect("utf8 path"), "check-config"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("DBP ratio 0.95"), "{stderr}");
}
