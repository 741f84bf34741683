//! Unix command tool

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use termagent_config::{paths::expand_home, UnixToolConfig};

use super::{Tool, ToolContext, ToolError, ToolResult};

/// First words accepted by the tool
pub const ALLOWED_COMMANDS: &[&str] = &[
    "ls", "pwd", "date", "sort", "grep", "awk", "sed", "find",
    "cat", "head", "tail", "wc", "uniq", "cut", "tr", "tee",
    "xargs", "diff", "patch", "tar", "gzip", "gunzip", "zip", "unzip",
    "curl", "wget", "ssh", "scp", "rsync", "chmod", "chown", "chgrp",
    "useradd", "usermod", "groupadd", "groupmod", "chsh", "chfn", "chage", "crontab",
    "at", "ps", "top", "free", "df", "du", "mount",
    "umount", "lsblk", "fdisk", "mkfs", "fsck", "dd", "parted", "lsof",
    "netstat", "ping", "traceroute", "dig", "host", "nslookup", "ifconfig", "ip",
    "route", "arp", "tcpdump", "wireshark", "iptables", "firewalld", "journalctl", "dmesg",
    "uname", "hostname", "uptime", "init", "systemd", "systemctl", "service",
];

const MAX_OUTPUT: usize = 10_000;

/// Runs allow-listed commands through `bash -c`
pub struct UnixTool {
    confirm: bool,
    timeout_secs: u64,
    working_dir: Option<PathBuf>,
}

impl UnixTool {
    pub fn new(confirm: bool, timeout_secs: u64, working_dir: Option<PathBuf>) -> Self {
        Self {
            confirm,
            timeout_secs,
            working_dir,
        }
    }

    pub fn from_config(config: &UnixToolConfig) -> Self {
        Self::new(
            config.confirm,
            config.timeout_secs,
            config.working_dir.as_deref().map(expand_home),
        )
    }
}

/// Refuse `sudo` anywhere and anything whose first word is not allow-listed.
pub fn check_command(command: &str) -> ToolResult<()> {
    if command.contains("sudo") {
        return Err(ToolError::InvalidArguments(
            "command requires sudo which is not allowed".to_string(),
        ));
    }
    let first = command.split_whitespace().next().unwrap_or_default();
    if !ALLOWED_COMMANDS.contains(&first) {
        return Err(ToolError::InvalidArguments(format!(
            "'{}' is not an allowed Unix command",
            first
        )));
    }
    Ok(())
}

fn truncate_output(output: String) -> String {
    if output.len() <= MAX_OUTPUT {
        return output;
    }
    let mut cut = MAX_OUTPUT;
    while !output.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n[OUTPUT TRUNCATED: {} BYTES REMAINING]",
        &output[..cut],
        output.len() - cut
    )
}

#[async_trait]
impl Tool for UnixTool {
    fn name(&self) -> &str {
        "unix"
    }

    fn description(&self) -> &str {
        "Execute Unix commands. Use for file inspection, directory navigation, \
         system information and other read-mostly terminal tasks."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The Unix command to execute." }
            },
            "required": ["command"]
        })
    }

    async fn run(&self, args: Map<String, Value>, ctx: &ToolContext) -> ToolResult<String> {
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments("command is empty".to_string()));
        }
        check_command(&command)?;

        if self.confirm {
            let prompt = format!("Execute the following Unix command? {}", command);
            if !ctx.operator.confirm(&prompt).await? {
                return Err(ToolError::Execution("execution cancelled by user".to_string()));
            }
        }

        info!(command = %command, "executing unix command");
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        let child = cmd.spawn()?;

        // Dropping the child future kills the process.
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            result = tokio::time::timeout(Duration::from_secs(self.timeout_secs), child.wait_with_output()) => {
                match result {
                    Ok(output) => output?,
                    Err(_) => return Err(ToolError::Timeout(self.timeout_secs)),
                }
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();
        debug!(status = ?output.status.code(), bytes = combined.len(), "unix command finished");

        if !output.status.success() {
            return Err(ToolError::Execution(format!(
                "failed to execute Unix command ({}): {}",
                output.status,
                truncate_output(combined)
            )));
        }
        Ok(truncate_output(combined))
    }
}
