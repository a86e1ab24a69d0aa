use archetype_assets::prelude::*;
use archetype_assets::{ErrorKind, Verification};

#[test]
fn test_runtime_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("assets.json");
    std::fs::write(
        &path,
        r#"{
            "streaming_pool_size": 2,
            "allow_file_upgrade": true,
            "verification": "off",
            "streaming_group_textures_budget_bytes": 4096,
            "streaming_group_meshes_budget_bytes": 100
        }"#,
    )
    .unwrap();

    let config = AssetConfig::from_file(&path).unwrap();
    assert_eq!(config.verification, Verification::Off);

    let runtime = AssetRuntime::init(config, Backends::headless()).unwrap();
    let engine = runtime.engine();
    assert_eq!(engine.group("textures").unwrap().budget_bytes(), 4096);
    assert_eq!(engine.group("audio").unwrap().budget_bytes(), u64::MAX);
    // budgets for groups the engine does not know are skipped
    assert!(engine.group("meshes").is_none());
    assert_eq!(runtime.config().streaming_pool_size, 2);

    assert_eq!(runtime.shutdown(), 0);
    assert!(runtime.is_shut_down());
}

#[test]
fn test_invalid_config_rejected() {
    let err = AssetRuntime::init(AssetConfig::default().with_pool_size(0), Backends::headless())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = AssetConfig::from_json_str(r#"{ "streaming_group_textures_budget_bytes": -5 }"#)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    let err = AssetConfig::from_json_str(r#"{ "verification": "paranoid" }"#).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = AssetConfig::default()
        .with_pool_size(6)
        .with_group_budget("audio", 1 << 20);
    let json = config.to_json_string().unwrap();
    assert!(json.contains("streaming_group_audio_budget_bytes"));
    assert_eq!(AssetConfig::from_json_str(&json).unwrap(), config);
}
