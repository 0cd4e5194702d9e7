//! STDIO transport: MCP servers as child processes
//!
//! Launches the resolved command with the resolved arguments. The
//! child environment is the hub's own environment, overlaid with the
//! optional `MCP_ENV_VARS` JSON mapping, overlaid with the resolved
//! `env` (highest precedence). Stderr is captured and forwarded as
//! warn-level log events on the supervisor channel.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use mcphub_core::{LogLevel, ResolvedServerConfig, SupervisorEvent};

use super::ConnectOutcome;
use crate::client::HubClientHandler;

/// Environment variable holding a JSON map merged into every stdio
/// child's environment, below the server's own resolved `env`.
pub const MCP_ENV_VARS: &str = "MCP_ENV_VARS";

/// Place the child in its own process group on Unix so terminal
/// signals sent to the hub do not propagate to MCP servers.
fn configure_child_process_platform(cmd: &mut Command) {
    #[cfg(unix)]
    {
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}

/// Parse the `MCP_ENV_VARS` overlay from the hub's own environment.
fn global_env_overlay() -> BTreeMap<String, String> {
    match std::env::var(MCP_ENV_VARS) {
        Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed {} value", MCP_ENV_VARS);
                BTreeMap::new()
            }
        },
        Err(_) => BTreeMap::new(),
    }
}

/// Child-process transport for one stdio server.
pub struct StdioTransport {
    server: String,
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    connect_timeout: Duration,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl StdioTransport {
    pub fn new(
        config: &ResolvedServerConfig,
        connect_timeout: Duration,
        event_tx: broadcast::Sender<SupervisorEvent>,
    ) -> Self {
        Self {
            server: config.name.clone(),
            command: config.command.clone().unwrap_or_default(),
            args: config.args.clone(),
            env: config.env.clone(),
            connect_timeout,
            event_tx,
        }
    }

    /// Final child environment overlay: global vars below resolved env.
    fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = global_env_overlay();
        env.extend(self.env.clone());
        env
    }

    pub async fn connect(&self) -> ConnectOutcome {
        info!(
            server = %self.server,
            command = %self.command,
            "Connecting to STDIO server"
        );

        // Resolve the executable up front for a clearer failure.
        let command_path = match which::which(&self.command) {
            Ok(path) => path,
            Err(_) => {
                let err = format!(
                    "Command not found: {}. Ensure it's installed and in PATH.",
                    self.command
                );
                error!(server = %self.server, "{}", err);
                return ConnectOutcome::Failed(err);
            }
        };

        debug!(server = %self.server, path = ?command_path, "Found command");

        let args = self.args.clone();
        let env = self.child_env();

        let spawn_result = TokioChildProcess::builder(Command::new(&command_path).configure(
            move |cmd| {
                cmd.args(&args).envs(&env).kill_on_drop(true);
                configure_child_process_platform(cmd);
            },
        ))
        .stderr(Stdio::piped())
        .spawn();

        let (transport, stderr) = match spawn_result {
            Ok(pair) => pair,
            Err(e) => {
                let err = format!("Failed to spawn process: {}", e);
                error!(server = %self.server, "{}", err);
                return ConnectOutcome::Failed(err);
            }
        };

        if let Some(stderr) = stderr {
            self.spawn_stderr_forwarder(stderr);
        }

        let handler = HubClientHandler::new(&self.server, self.event_tx.clone());
        let connect_future = handler.serve(transport);
        match tokio::time::timeout(self.connect_timeout, connect_future).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "STDIO server connected");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => {
                let err = format!("MCP handshake failed: {}", e);
                error!(server = %self.server, "{}", err);
                ConnectOutcome::Failed(err)
            }
            Err(_) => {
                let err = format!("Connection timeout ({:?})", self.connect_timeout);
                error!(server = %self.server, "{}", err);
                ConnectOutcome::Failed(err)
            }
        }
    }

    /// Warn-log each stderr line and mirror it onto the event channel.
    /// The task ends when the child closes its stderr.
    fn spawn_stderr_forwarder(&self, stderr: tokio::process::ChildStderr) {
        let server = self.server.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                warn!(server = %server, "stderr: {}", line);
                let _ = event_tx.send(SupervisorEvent::Log {
                    server: server.clone(),
                    level: LogLevel::Warn,
                    message: line,
                });
            }
            debug!(server = %server, "stderr stream closed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(command: &str, env: &[(&str, &str)]) -> ResolvedServerConfig {
        ResolvedServerConfig {
            name: "test".into(),
            command: Some(command.into()),
            args: vec![],
            env: env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            url: None,
            headers: BTreeMap::new(),
            disabled: false,
            dev: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn missing_command_fails_cleanly() {
        let (tx, _rx) = broadcast::channel(8);
        let transport = StdioTransport::new(
            &resolved("definitely-not-a-real-binary-xyz", &[]),
            Duration::from_secs(5),
            tx,
        );
        match transport.connect().await {
            ConnectOutcome::Failed(err) => assert!(err.contains("Command not found")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn resolved_env_wins_over_global_overlay() {
        let (tx, _rx) = broadcast::channel(8);
        let transport = StdioTransport::new(
            &resolved("true", &[("TOKEN", "from-config")]),
            Duration::from_secs(5),
            tx,
        );
        let env = transport.child_env();
        assert_eq!(env.get("TOKEN").map(String::as_str), Some("from-config"));
    }
}
