//! Spawning the control-plane child process

use crate::config::{ResolvedConfig, TransportKind};
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tooling::logging::RotatingLog;
use tracing::{debug, warn};

/// What to run and where to probe it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// Liveness endpoint of the child's network binding
    pub health_url: String,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, health_url: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            health_url: health_url.into(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Relaunch the current executable as an event-stream server
    ///
    /// The stream binding cannot be probed while its stdout is captured, so
    /// the child always runs the event-stream binding.
    pub fn for_config(config: &ResolvedConfig) -> io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, format!("{}/healthz", config.base_url()))
            .with_args(["serve"])
            .with_env(config.to_env_overrides(TransportKind::Sse)))
    }

    /// Spawn the child with output captured into `log`
    pub fn spawn(&self, log: &RotatingLog) -> io::Result<Spawned> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture(stdout, log.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture(stderr, log.clone(), "stderr"));
        }
        let stdin = child.stdin.take();

        Ok(Spawned { child, stdin })
    }
}

/// A running child and the write end of its stdin
///
/// Dropping `stdin` is the graceful stop request.
#[derive(Debug)]
pub struct Spawned {
    pub child: Child,
    pub stdin: Option<ChildStdin>,
}

async fn capture<R>(reader: R, log: RotatingLog, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = log.append_line(&line) {
                    warn!(stream, error = %e, "Failed to write child output to log");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(stream, error = %e, "Child output closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_for_config() {
        let config = crate::config::resolve(
            &Default::default(),
            &Default::default(),
            &crate::config::SettingsLayer::defaults_in("/tmp/certmcp"),
        )
        .unwrap();
        let spec = LaunchSpec::for_config(&config).unwrap();
        assert_eq!(spec.args, vec!["serve".to_string()]);
        assert_eq!(spec.health_url, "http://127.0.0.1:8000/healthz");
        assert!(spec
            .env
            .iter()
            .any(|(k, v)| k == "CERT_MCP_TRANSPORT" && v == "sse"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let log = RotatingLog::open(dir.path().join("mcp_server.log")).unwrap();

        let spec = LaunchSpec::new("sh", "http://127.0.0.1:1/healthz")
            .with_args(["-c", "echo out-line; echo err-line >&2"]);
        let mut spawned = spec.spawn(&log).unwrap();
        drop(spawned.stdin.take());
        assert!(spawned.child.wait().await.unwrap().success());

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("out-line"));
        assert!(text.contains("err-line"));
    }
}
