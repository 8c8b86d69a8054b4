use super::*;

#[test]
fn empty_document_is_all_defaults() {
    let c = EngineConfig::from_json_str("{}").unwrap();
    assert_eq!(c, EngineConfig::default());
    assert_eq!(c.scheduler.parallelism, 2);
    assert_eq!(c.cache.memory_threshold, 0.75);
}

#[test]
fn partial_sections_keep_other_defaults() {
    let c = EngineConfig::from_json_str(
        r#"{ "scheduler": { "parallelism": 8 }, "cache": { "memory_capacity": 1024 } }"#,
    )
    .unwrap();
    assert_eq!(c.scheduler.parallelism, 8);
    assert!(c.scheduler.track_status);
    assert_eq!(c.cache.memory_capacity, 1024);
    assert_eq!(c.factory, TileFactoryOpts::default());
}

#[test]
fn spill_dir_is_optional() {
    assert_eq!(EngineConfig::default().cache.spill_dir, None);
    let c = EngineConfig::from_json_str(r#"{ "cache": { "spill_dir": "/var/tmp/tiles" } }"#)
        .unwrap();
    assert_eq!(c.cache.spill_dir, Some(std::path::PathBuf::from("/var/tmp/tiles")));
}

#[test]
fn round_trips_through_json() {
    let mut c = EngineConfig::default();
    c.scheduler.track_status = false;
    c.cache.memory_threshold = 0.5;
    let back = EngineConfig::from_json_str(&c.to_json_pretty().unwrap()).unwrap();
    assert_eq!(back, c);
}

#[test]
fn invalid_values_are_config_errors() {
    for doc in [
        r#"{ "cache": { "memory_threshold": 0 } }"#,
        r#"{ "cache": { "memory_threshold": 2.0 } }"#,
        r#"{ "scheduler": { "parallelism": 100000 } }"#,
        r#"{ "factory": { "max_buffers_per_bucket": 0 } }"#,
        r#"{ "scheduler": { "threads": 2 } }"#,
        r#"{ "cache": { "spill_dir": "" } }"#,
        "not json",
    ] {
        let err = EngineConfig::from_json_str(doc).unwrap_err();
        assert!(matches!(err, TileError::Config(_)), "{doc}: {err}");
    }
}

#[test]
fn reads_files() {
    let path = std::env::temp_dir().join(format!("tilecore-config-{}.json", std::process::id()));
    std::fs::write(&path, r#"{ "scheduler": { "prefetch_parallelism": 0 } }"#).unwrap();
    let c = EngineConfig::from_json_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(c.scheduler.prefetch_parallelism, 0);

    let err = EngineConfig::from_json_file(&path).unwrap_err();
    assert!(matches!(err, TileError::Config(_)));
}
