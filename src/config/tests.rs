use std::io::Write;

use serial_test::serial;

use super::*;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn sources_for(file: &tempfile::NamedTempFile) -> ConfigSources {
    ConfigSources {
        config_file: Some(file.path().to_path_buf()),
        overrides: Overrides::default(),
    }
}

#[test]
fn defaults_match_documented_values() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.preview.debounce, Duration::from_millis(1500));
    assert_eq!(settings.preview.cache_capacity, 10);
    assert_eq!(settings.preview.busy_poll_interval, Duration::from_millis(100));
    assert!(settings.preview.auto_preview);
    assert_eq!(settings.queue.max_size, 20);
    assert_eq!(settings.engine.memory_warning_percent, 80.0);
    assert_eq!(settings.engine.memory_query_timeout, Duration::from_secs(5));
    assert_eq!(settings.engine.timeout_grace, Duration::from_secs(2));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.logging.engine_level, None);

    let preview = settings.quality.preview();
    assert_eq!(preview.max_fn, Some(32));
    assert_eq!(preview.timeout_ms, 30_000);
    let full = settings.quality.full();
    assert_eq!(full.max_fn, None);
    assert_eq!(full.min_fs, 0.4);
    assert_eq!(full.timeout_ms, 120_000);
}

#[test]
fn overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.queue.max_size = Some(8);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        max_queue_size: Some(3),
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.queue.max_size, 3);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn zero_capacity_is_rejected() {
    let mut raw = RawSettings::default();
    raw.preview.cache_capacity = Some(0);

    let err = Settings::from_raw(raw).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { ref key, .. } if key == "preview.cache_capacity"));
}

#[test]
fn invalid_log_level_is_rejected() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());

    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { ref key, .. }) if key == "logging.level"
    ));
}

#[test]
#[serial]
fn file_settings_are_loaded() {
    let file = write_config(
        r#"
[logging]
engine_level = "warn"

[engine]
command = "/opt/engine/bin/run"
args = ["--worker"]
timeout_grace_ms = 500

[preview]
debounce_ms = 250
color_params = ["color", " accent "]

[queue]
max_size = 5
"#,
    );

    let settings = load(&sources_for(&file)).expect("valid settings");

    assert_eq!(settings.engine.command, "/opt/engine/bin/run");
    assert_eq!(settings.engine.args, vec!["--worker".to_string()]);
    assert_eq!(settings.engine.timeout_grace, Duration::from_millis(500));
    assert_eq!(settings.preview.debounce, Duration::from_millis(250));
    assert_eq!(
        settings.preview.color_params,
        vec!["color".to_string(), "accent".to_string()]
    );
    assert_eq!(settings.queue.max_size, 5);
    assert_eq!(settings.logging.engine_level, Some(LevelFilter::WARN));
}

#[test]
#[serial]
fn quality_tiers_merge_over_builtins() {
    let file = write_config(
        r#"
[quality.preview]
timeout_ms = 10000

[quality.draft]
max_fn = 16
min_fa = 24.0
min_fs = 4.0
force_fn = true
"#,
    );

    let settings = load(&sources_for(&file)).expect("valid settings");

    let preview = settings.quality.preview();
    assert_eq!(preview.timeout_ms, 10_000);
    assert_eq!(preview.max_fn, Some(32));

    let draft_tier = QualityTier::from_name("draft");
    assert!(settings.quality.contains(&draft_tier));
    let draft = settings.quality.get(&draft_tier);
    assert_eq!(draft.max_fn, Some(16));
    assert!(draft.force_fn);
    assert_eq!(draft.timeout_ms, 120_000);
}

#[test]
#[serial]
fn force_fn_without_cap_is_rejected() {
    let file = write_config(
        r#"
[quality.full]
force_fn = true
"#,
    );

    let err = load(&sources_for(&file)).unwrap_err();
    assert!(matches!(err, LoadError::Invalid { ref key, .. } if key == "quality.full.force_fn"));
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_config(
        r#"
[queue]
max_size = 5
"#,
    );

    // SAFETY: serialised with every other test that touches the environment.
    unsafe {
        std::env::set_var("TESSERA__QUEUE__MAX_SIZE", "7");
        std::env::set_var("TESSERA__PREVIEW__AUTO_PREVIEW", "false");
    }
    let result = load(&sources_for(&file));
    unsafe {
        std::env::remove_var("TESSERA__QUEUE__MAX_SIZE");
        std::env::remove_var("TESSERA__PREVIEW__AUTO_PREVIEW");
    }

    let settings = result.expect("valid settings");
    assert_eq!(settings.queue.max_size, 7);
    assert!(!settings.preview.auto_preview);
}

#[test]
#[serial]
fn missing_explicit_file_fails() {
    let sources = ConfigSources {
        config_file: Some(PathBuf::from("/nonexistent/tessera.toml")),
        overrides: Overrides::default(),
    };
    assert!(matches!(load(&sources), Err(LoadError::Build(_))));
}
