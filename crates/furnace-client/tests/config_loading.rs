use std::fs;
use std::time::Duration;

use furnace_client::config::{self, FurnaceConfig};
use furnace_client::selection::ColorScheme;
use furnace_client::session::ArtifactOnStart;

#[test]
fn extends_and_imports_layer_in_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(
        tmp.path().join("base.toml"),
        r#"
[client]
base_url = "http://base:8080"
status_poll_ms = 1000
max_poll_failures = 5

[recording]
colors = "java"
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("keep.toml"),
        r#"
[client]
artifact_on_start = "keep"
max_poll_failures = 7
"#,
    )
    .unwrap();
    let top = tmp.path().join("furnace.toml");
    fs::write(
        &top,
        r#"
extends = "base.toml"
imports = ["keep.toml"]

[client]
base_url = "http://staging:8080"

[recording]
inverted = false
viewport_width = 1600
"#,
    )
    .unwrap();

    let cfg = FurnaceConfig::from_doc(&config::load(&top).unwrap()).unwrap();
    assert_eq!(cfg.client.base_url, "http://staging:8080");
    assert_eq!(cfg.client.status_poll_ms, 1000);
    assert_eq!(cfg.client.max_poll_failures, 7);
    assert_eq!(cfg.client.artifact_on_start, ArtifactOnStart::Keep);
    assert_eq!(cfg.client.registry_refresh_ms, 10_000);
    assert_eq!(cfg.recording.colors, ColorScheme::Java);
    assert!(!cfg.recording.inverted);
    assert_eq!(cfg.recording.viewport_width, 1600);

    let settings = cfg.session_settings();
    assert_eq!(settings.status_poll, Duration::from_secs(1));
    assert_eq!(settings.max_poll_failures, 7);
    let opts = cfg.options();
    assert_eq!(opts.colors, ColorScheme::Java);
    assert!(!opts.inverted);
}

#[test]
fn unknown_keys_are_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("furnace.toml");
    fs::write(&path, "[client]\npoll_every = 3\n").unwrap();
    let err = FurnaceConfig::from_doc(&config::load(&path).unwrap()).unwrap_err();
    assert!(err.to_string().contains("poll_every"), "{err}");

    fs::write(&path, "[server]\nport = 1\n").unwrap();
    let err = FurnaceConfig::from_doc(&config::load(&path).unwrap()).unwrap_err();
    assert!(err.to_string().contains("server"), "{err}");
}

#[test]
fn bad_color_scheme_is_rejected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("furnace.toml");
    fs::write(&path, "[recording]\ncolors = \"plaid\"\n").unwrap();
    assert!(FurnaceConfig::from_doc(&config::load(&path).unwrap()).is_err());
}

#[test]
fn extends_cycle_is_detected() {
    let tmp = tempfile::tempdir().expect("tempdir");
    fs::write(tmp.path().join("a.toml"), "extends = \"b.toml\"\n").unwrap();
    fs::write(tmp.path().join("b.toml"), "extends = \"a.toml\"\n").unwrap();
    let err = config::load(&tmp.path().join("a.toml")).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn explicit_missing_file_is_an_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let missing = tmp.path().join("nope.toml");
    assert!(FurnaceConfig::resolve(Some(&missing)).is_err());
}

#[test]
fn zero_timeout_fails_validation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("furnace.toml");
    fs::write(&path, "[client]\nrequest_timeout_secs = 0\n").unwrap();
    let err = FurnaceConfig::from_doc(&config::load(&path).unwrap()).unwrap_err();
    assert!(err.to_string().contains("request_timeout_secs"), "{err}");
}
