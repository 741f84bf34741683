//! Isolated home directory for CLI runs
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

pub struct TestEnv {
    pub home: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            home: tempdir().expect("temp home"),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.home.path().join(".termagent")
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir().join("config.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir().join("history.jsonl")
    }

    pub fn write_config(&self, json: &str) {
        std::fs::create_dir_all(self.data_dir()).expect("data dir");
        std::fs::write(self.config_file(), json).expect("config file");
    }

    /// Binary with HOME pointed at the temp dir and no provider credentials
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_termagent"));
        cmd.env("HOME", self.home.path());
        for var in [
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "GEMINI_API_KEY",
            "PERPLEXITY_KEY",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "AWS_SESSION_TOKEN",
            "OLLAMA_HOST",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }
}
