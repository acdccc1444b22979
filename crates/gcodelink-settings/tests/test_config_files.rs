use gcodelink_communication::FirmwareProtocol;
use gcodelink_settings::{Config, SettingsError};
use tempfile::TempDir;

#[test]
fn test_toml_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::new();
    config.session.protocol = FirmwareProtocol::Marlin;
    config.session.initialize = true;
    config.relay.command = Some(vec!["socat".to_string(), "-".to_string(), "/dev/ttyUSB0".to_string()]);
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("protocol = \"marlin\""));

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::new();
    config.connection.host = "bridge.local".to_string();
    config.connection.port = 2323;
    config.logging.json = true;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.connection.host, "bridge.local");
    assert_eq!(loaded.connection.port, 2323);
    assert!(loaded.logging.json);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "connection: {}").unwrap();

    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::UnsupportedFormat(_))
    ));
    assert!(Config::new().save_to_file(&path).is_err());
}

#[test]
fn test_invalid_file_contents_are_rejected() {
    let dir = TempDir::new().unwrap();

    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[session]\nprotocol = \"tinyg\"\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::TomlError(_))
    ));

    let path = dir.path().join("zero.toml");
    std::fs::write(&path, "[relay]\nchunk_size = 0\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::InvalidSetting { .. })
    ));
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    assert!(matches!(
        Config::load_or_default(Some(&path)),
        Err(SettingsError::LoadError { .. })
    ));
}
