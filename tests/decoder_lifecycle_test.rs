//! End-to-end lifecycle tests against the real [`ProcessSupervisor`] API,
//! using `/bin/sh` fixture scripts as stand-in decoder tools instead of
//! mocking the supervisor — the same "test against the real subprocess
//! boundary with a stand-in binary" approach `sgrams-trx-rs`'s
//! `wsprd_wrapper.rs` tests take for `is_available()`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::json;

use valentine_rf::config::{ModeOverride, ServerConfig};
use valentine_rf::decoder::{self, DecoderRegistry, InstanceStatus, ModeId};
use valentine_rf::error::CoreError;

/// A small shell script marked executable, standing in for a real decoder
/// binary. `body` is the script body after the shebang line.
fn write_fixture(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn long_running_fixture(dir: &Path) -> PathBuf {
    write_fixture(
        dir,
        "long_running.sh",
        "while true; do printf '%s\\n' '{\"mmsi\":\"123456789\",\"status\":\"ok\"}'; sleep 0.05; done",
    )
}

fn fast_fail_fixture(dir: &Path) -> PathBuf {
    write_fixture(dir, "fast_fail.sh", "echo 'device not found' 1>&2\nexit 1")
}

fn registry_with_overrides(overrides: &[(&str, PathBuf)]) -> (DecoderRegistry, tempfile::TempDir) {
    let work_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.fast_fail_window_ms = 80;
    config.termination_grace_ms = 100;
    config.working_dir = Some(work_dir.path().to_path_buf());
    for (mode, tool_path) in overrides {
        config.mode_overrides.insert(
            mode.to_string(),
            ModeOverride {
                tool_paths: vec![tool_path.to_string_lossy().into_owned()],
                ttl_seconds: None,
            },
        );
    }
    (DecoderRegistry::new(config), work_dir)
}

#[tokio::test]
async fn device_conflict_rejects_second_claim_on_same_device() {
    let fixtures = tempfile::tempdir().unwrap();
    let fixture = long_running_fixture(fixtures.path());
    let (registry, _work) = registry_with_overrides(&[
        ("ais", fixture.clone()),
        ("dsc", fixture.clone()),
    ]);
    let registry = std::sync::Arc::new(registry);

    let ais_params = json!({"device": 0}).as_object().unwrap().clone();
    decoder::start(&registry, ModeId::Ais, &ais_params).await.unwrap();
    assert_eq!(decoder::status(&registry, ModeId::Ais).status, InstanceStatus::Running);

    let dsc_params = json!({"device": 0}).as_object().unwrap().clone();
    let err = decoder::start(&registry, ModeId::Dsc, &dsc_params).await.unwrap_err();
    assert!(matches!(err, CoreError::DeviceBusy { .. }));

    // Ais keeps running; the rejected claim did not disturb it.
    assert_eq!(decoder::status(&registry, ModeId::Ais).status, InstanceStatus::Running);

    decoder::stop(&registry, ModeId::Ais).await.unwrap();
}

#[tokio::test]
async fn fast_fail_exit_surfaces_stderr_and_releases_the_device() {
    let fixtures = tempfile::tempdir().unwrap();
    let failing = fast_fail_fixture(fixtures.path());
    let long_running = long_running_fixture(fixtures.path());
    let (registry, _work) = registry_with_overrides(&[
        ("ais", failing),
        ("dsc", long_running),
    ]);
    let registry = std::sync::Arc::new(registry);

    let params = json!({"device": 9}).as_object().unwrap().clone();
    let err = decoder::start(&registry, ModeId::Ais, &params).await.unwrap_err();
    match err {
        CoreError::FastFailExit { stderr_tail } => {
            assert!(stderr_tail.contains("device not found"));
        }
        other => panic!("expected FastFailExit, got {other:?}"),
    }
    assert_eq!(decoder::status(&registry, ModeId::Ais).status, InstanceStatus::Idle);

    // Device 9 was released on failure, so a different mode can claim it.
    let dsc_params = json!({"device": 9}).as_object().unwrap().clone();
    decoder::start(&registry, ModeId::Dsc, &dsc_params).await.unwrap();
    assert_eq!(decoder::status(&registry, ModeId::Dsc).status, InstanceStatus::Running);
    decoder::stop(&registry, ModeId::Dsc).await.unwrap();
}

#[tokio::test]
async fn killall_stops_every_running_mode_and_clears_the_arbiter() {
    let fixtures = tempfile::tempdir().unwrap();
    let fixture = long_running_fixture(fixtures.path());
    let (registry, _work) = registry_with_overrides(&[
        ("ais", fixture.clone()),
        ("dsc", fixture.clone()),
    ]);
    let registry = std::sync::Arc::new(registry);

    decoder::start(&registry, ModeId::Ais, &json!({"device": 0}).as_object().unwrap().clone())
        .await
        .unwrap();
    decoder::start(&registry, ModeId::Dsc, &json!({"device": 1}).as_object().unwrap().clone())
        .await
        .unwrap();

    let stopped = decoder::killall(&registry).await;
    assert_eq!(stopped.len(), 2);
    assert!(stopped.contains(&ModeId::Ais));
    assert!(stopped.contains(&ModeId::Dsc));

    assert_eq!(decoder::status(&registry, ModeId::Ais).status, InstanceStatus::Idle);
    assert_eq!(decoder::status(&registry, ModeId::Dsc).status, InstanceStatus::Idle);
    assert!(registry.arbiter.snapshot().is_empty());
}

fn registry_with_uat_pipeline_override(
    dump978: PathBuf,
    uat2json: PathBuf,
) -> (DecoderRegistry, tempfile::TempDir) {
    let work_dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig::default();
    config.fast_fail_window_ms = 80;
    config.termination_grace_ms = 100;
    config.working_dir = Some(work_dir.path().to_path_buf());
    config.mode_overrides.insert(
        ModeId::AdsbUat.as_str().to_string(),
        ModeOverride {
            tool_paths: vec![
                dump978.to_string_lossy().into_owned(),
                uat2json.to_string_lossy().into_owned(),
            ],
            ttl_seconds: None,
        },
    );
    (DecoderRegistry::new(config), work_dir)
}

/// Reproduces the spec's worked UAT scenario end to end: a real two-stage
/// `dump978-fa | uat2json` pipeline (stand-in fixtures, wired through the
/// actual [`ProcessSupervisor::spawn_pipeline`]) feeding `uat2json`'s nested
/// wire shape into the parser, and asserts the normalized record lands in
/// the shared `adsb` store under `icao` rather than being dropped as
/// malformed.
#[tokio::test]
async fn uat_pipeline_normalizes_nested_wire_shape_into_canonical_adsb_record() {
    let fixtures = tempfile::tempdir().unwrap();
    let dump978 = write_fixture(
        fixtures.path(),
        "dump978-fa.sh",
        "while true; do printf 'RAW\\n'; sleep 0.05; done",
    );
    let uat2json = write_fixture(
        fixtures.path(),
        "uat2json.sh",
        "while true; do printf '%s\\n' '{\"address\":\"A0B1C2\",\"callsign\":\"N54321\",\"altitude\":{\"baro\":4500},\"position\":{\"lat\":40.6892,\"lon\":-74.0445},\"velocity\":{\"groundspeed\":95,\"heading\":180}}'; sleep 0.05; done",
    );
    let (registry, _work) = registry_with_uat_pipeline_override(dump978, uat2json);
    let registry = std::sync::Arc::new(registry);

    let params = json!({"device": 0}).as_object().unwrap().clone();
    decoder::start(&registry, ModeId::AdsbUat, &params).await.unwrap();
    assert_eq!(decoder::status(&registry, ModeId::AdsbUat).status, InstanceStatus::Running);

    // Give the pipeline and parser task a few ticks to push at least one
    // line through both stages.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let store = registry.store_for(ModeId::AdsbUat);
    let record = store.get("A0B1C2").expect("UAT's address should normalize into the icao key");
    assert_eq!(record.fields.get("altitude_ft"), Some(&json!(4500)));
    assert_eq!(record.fields.get("lat"), Some(&json!(40.6892)));
    assert_eq!(record.fields.get("speed_kt"), Some(&json!(95)));
    assert_eq!(record.fields.get("source"), Some(&json!("uat")));

    decoder::stop(&registry, ModeId::AdsbUat).await.unwrap();
}

#[tokio::test]
async fn merge_preservation_across_two_upserts() {
    let fixtures = tempfile::tempdir().unwrap();
    let fixture = long_running_fixture(fixtures.path());
    let (registry, _work) = registry_with_overrides(&[("ais", fixture)]);
    let registry = std::sync::Arc::new(registry);

    decoder::start(&registry, ModeId::Ais, &json!({"device": 0}).as_object().unwrap().clone())
        .await
        .unwrap();

    // The fixture emits the same MMSI repeatedly; give the parser task a
    // couple of ticks to normalize at least one record into the store.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let store = registry.store_for(ModeId::Ais);
    let record = store.get("123456789").expect("record should be upserted by now");
    assert_eq!(record.fields.get("status").and_then(|v| v.as_str()), Some("ok"));

    decoder::stop(&registry, ModeId::Ais).await.unwrap();
}
