//! Integration tests for termagent-config crate
//!
//! These tests verify the complete workflow of configuration management.

use termagent_config::{paths::ensure_dir, Config, ConfigError};
use tempfile::TempDir;

/// Full workflow: Create, save, load, modify, save again, verify
#[tokio::test]
async fn test_full_config_workflow() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("workflow_config.json");

    // Step 1: Create custom config
    let mut config = Config::default();
    config.set_default_provider("openai").unwrap();
    config.set_model("gpt-4o");
    config.agent.max_tokens = 1200;
    config.agent.max_iterations = 4;
    config.toolkit.unix.confirm = false;
    config.toolkit.websearch.max_results = 3;
    config.set_mcp_file_path("~/servers.json");

    // Step 2: Save
    config.save_to(&config_path).await.expect("Failed to save");
    assert!(config_path.exists());

    // Step 3: Load and verify
    let loaded = Config::load_from(&config_path)
        .await
        .expect("Failed to load");
    assert_eq!(loaded, config);
    assert_eq!(loaded.default_model(), "gpt-4o");
    assert_eq!(loaded.model_for("google"), "gemini-2.0-flash-lite");

    // Step 4: Modify and save again
    let mut loaded = loaded;
    loaded.set_default_provider("ollama").unwrap();
    loaded.save_to(&config_path).await.unwrap();

    let reloaded = Config::load_from(&config_path).await.unwrap();
    assert_eq!(reloaded.default_provider, "ollama");
    assert_eq!(reloaded.default_model(), "llama3.2");
}

#[tokio::test]
async fn test_save_creates_parent_directories() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("a").join("b").join("config.json");

    Config::default().save_to(&path).await.unwrap();
    assert!(path.exists());
}

#[tokio::test]
async fn test_load_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load_from(&temp_dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(config, Config::default());
}

#[tokio::test]
async fn test_load_corrupted_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.json");
    tokio::fs::write(&path, "{not json").await.unwrap();

    let err = Config::load_from(&path).await.unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)));
}

#[tokio::test]
async fn test_capability_servers_from_configured_file() {
    let temp_dir = TempDir::new().unwrap();
    let servers_path = temp_dir.path().join("mcp.json");
    tokio::fs::write(
        &servers_path,
        r#"{"servers":{"echo":{"command":"echo-server","args":["--stdio"]}}}"#,
    )
    .await
    .unwrap();

    let mut config = Config::default();
    config.set_mcp_file_path(servers_path.to_str().unwrap());

    let servers = config.capability_servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers.servers["echo"].args, vec!["--stdio"]);
}

#[tokio::test]
async fn test_capability_servers_missing_file_is_empty() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.set_mcp_file_path(temp_dir.path().join("nope.json").to_str().unwrap());

    let servers = config.capability_servers().await.unwrap();
    assert!(servers.is_empty());
}

#[tokio::test]
async fn test_capability_servers_unconfigured_is_empty() {
    let servers = Config::default().capability_servers().await.unwrap();
    assert!(servers.is_empty());
}

#[tokio::test]
async fn test_capability_servers_malformed_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let servers_path = temp_dir.path().join("mcp.json");
    tokio::fs::write(&servers_path, r#"{"servers":[1,2]}"#).await.unwrap();

    let mut config = Config::default();
    config.set_mcp_file_path(servers_path.to_str().unwrap());
    assert!(config.capability_servers().await.is_err());
}

#[tokio::test]
async fn test_ensure_dir_nested() {
    let temp_dir = TempDir::new().unwrap();
    let nested = temp_dir.path().join("x").join("y");
    ensure_dir(&nested).await.unwrap();
    assert!(nested.is_dir());
}
