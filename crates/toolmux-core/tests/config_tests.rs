//! Configuration loading and saving tests

use std::fs;

use tempfile::TempDir;

use toolmux_core::config::DEFAULT_PROVIDER_TIMEOUT_SECS;
use toolmux_core::{Config, ConfigManager, ProviderConfig};

#[test]
fn test_missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::with_path(dir.path().join("config.toml")).unwrap();

    assert!(manager.config().providers.is_empty());
    assert_eq!(manager.config().model.max_tokens, 4096);
}

#[test]
fn test_load_providers_in_order() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[model]
model = "claude-3-5-haiku-20241022"
max_tokens = 2048

[agent]
max_iterations = 4

[[providers]]
name = "files"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]

[[providers]]
name = "weather"
command = "python"
args = ["weather.py"]
enabled = false
timeout_secs = 5

[providers.env]
API_TOKEN = "abc"
"#,
    )
    .unwrap();

    let config = ConfigManager::with_path(path).unwrap().into_config();
    config.validate().unwrap();

    assert_eq!(config.model.model, "claude-3-5-haiku-20241022");
    assert_eq!(config.model.max_tokens, 2048);
    // Unset fields keep their defaults
    assert_eq!(config.model.temperature, 0.7);
    assert_eq!(config.agent.max_iterations, 4);

    let names: Vec<&str> = config.providers.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["files", "weather"]);

    let files = &config.providers[0];
    assert!(files.enabled);
    assert_eq!(files.timeout_secs, DEFAULT_PROVIDER_TIMEOUT_SECS);
    assert_eq!(files.args.len(), 3);

    let weather = config.get_provider("weather").unwrap();
    assert!(!weather.enabled);
    assert_eq!(weather.timeout_secs, 5);
    assert_eq!(weather.env.get("API_TOKEN").map(String::as_str), Some("abc"));

    let enabled: Vec<String> = config.enabled_providers().into_iter().map(|p| p.name).collect();
    assert_eq!(enabled, vec!["files"]);
}

#[test]
fn test_invalid_toml_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[[providers]\nname = ").unwrap();

    let err = ConfigManager::with_path(path).err().unwrap();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_save_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut manager = ConfigManager::with_path(path.clone()).unwrap();
    manager.set_provider(
        ProviderConfig::new("alpha", "alpha-server").with_args(vec!["--stdio".to_string()]),
    );
    manager.set_provider(ProviderConfig::new("beta", "beta-server").with_env("DEBUG", "1"));
    manager.config_mut().agent.max_iterations = 7;
    manager.save().unwrap();
    assert!(path.exists());

    let reloaded = ConfigManager::with_path(path).unwrap();
    let config = reloaded.config();
    assert_eq!(config.providers.len(), 2);
    assert_eq!(config.providers[0].args, vec!["--stdio"]);
    assert_eq!(config.providers[1].env.get("DEBUG").map(String::as_str), Some("1"));
    assert_eq!(config.agent.max_iterations, 7);
}

#[test]
fn test_set_provider_replaces_in_place() {
    let dir = TempDir::new().unwrap();
    let mut manager = ConfigManager::with_path(dir.path().join("config.toml")).unwrap();

    manager.set_provider(ProviderConfig::new("alpha", "one"));
    manager.set_provider(ProviderConfig::new("beta", "two"));
    manager.set_provider(ProviderConfig::new("alpha", "three"));

    let config: &Config = manager.config();
    assert_eq!(config.providers[0].command, "three");
    assert_eq!(config.providers.len(), 2);

    assert!(manager.remove_provider("alpha"));
    assert!(!manager.remove_provider("alpha"));
    assert_eq!(manager.config().providers[0].name, "beta");
}
