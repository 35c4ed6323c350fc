//! Configuration resolution
//!
//! Three layers feed one [`ResolvedConfig`]: environment overrides (prefix
//! `CERT_MCP_`), the desktop application's persisted `settings` table, and
//! built-in defaults. Resolution is a pure function of those layers and runs
//! once at startup; the resulting [`PolicySnapshot`] is handed to every
//! component explicitly.

mod settings;

pub use settings::{load_persisted, persisted_to_layer_keys};

use crate::error::ConfigError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tooling::config::{collect_prefixed, parse_bool, ConfigBuilder};
use tooling::runtime::{BindHost, PolicySnapshot};
use tracing::warn;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CERT_MCP_";

/// Marks a child launched by the supervisor
pub const SUPERVISED_ENV: &str = "CERT_MCP_SUPERVISED";

/// Smallest accepted response byte cap
pub const MIN_MAX_BYTES: u64 = 1024;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_WEB_PORT: u16 = 7860;
pub const DEFAULT_WEB_USERNAME: &str = "local";

/// Transport binding chosen at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Framed request/response over stdin/stdout
    Stdio,
    /// Event-stream binding (`GET /sse` + `POST /messages`)
    Sse,
    /// Single-shot HTTP binding (`POST /mcp`)
    StreamableHttp,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// Whether this binding opens a network listener
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::Stdio)
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" | "streamable_http" | "http" => Ok(Self::StreamableHttp),
            other => Err(format!(
                "unknown transport `{}` (expected stdio, sse or streamable-http)",
                other
            )),
        }
    }
}

/// One partial configuration layer
///
/// Every field is optional; unset fields fall through to lower layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsLayer {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub allow_write: Option<bool>,
    pub redact_pii: Option<bool>,
    pub max_bytes: Option<u64>,
    pub debug: Option<bool>,
    pub auto_start: Option<bool>,
    pub web_host: Option<String>,
    pub web_port: Option<u16>,
    pub web_username: Option<String>,
    pub web_password: Option<String>,
    pub db_path: Option<PathBuf>,
    pub attachments_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub docs_dir: Option<PathBuf>,
}

impl SettingsLayer {
    /// Parse a layer from raw `key -> value` pairs
    ///
    /// Keys are the lowercase names without prefix (`max_bytes`). Unknown
    /// keys are ignored; malformed values fail with the key and layer named.
    pub fn parse(layer: &'static str, raw: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut out = Self::default();
        for (key, value) in raw {
            out.apply(layer, key, value)?;
        }
        Ok(out)
    }

    /// Like [`parse`](Self::parse), but a malformed value is logged and
    /// skipped so the key falls through to the lower layers
    pub fn parse_lenient(layer: &'static str, raw: &BTreeMap<String, String>) -> Self {
        let mut out = Self::default();
        for (key, value) in raw {
            if let Err(err) = out.apply(layer, key, value) {
                warn!(error = %err, "Ignoring malformed setting");
            }
        }
        out
    }

    fn apply(&mut self, layer: &'static str, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        let invalid = |reason: String| ConfigError::InvalidValue {
            key: display_key(layer, key),
            layer,
            value: value.to_string(),
            reason,
        };
        let flag = || parse_bool(value).ok_or_else(|| invalid("expected a boolean".into()));

        match key {
            "transport" => self.transport = Some(value.parse().map_err(invalid)?),
            "host" => self.host = Some(value.to_string()),
            "port" => self.port = Some(parse_port(value).map_err(invalid)?),
            "allow_write" => self.allow_write = Some(flag()?),
            "redact_pii" => self.redact_pii = Some(flag()?),
            "max_bytes" => {
                self.max_bytes = Some(value.parse::<u64>().map_err(|e| invalid(e.to_string()))?)
            }
            "debug" => self.debug = Some(flag()?),
            "auto_start" => self.auto_start = Some(flag()?),
            "web_host" => self.web_host = Some(value.to_string()),
            "web_port" => self.web_port = Some(parse_port(value).map_err(invalid)?),
            "web_username" => self.web_username = Some(value.to_string()),
            "web_password" => self.web_password = Some(value.to_string()),
            "db_path" => self.db_path = Some(PathBuf::from(value)),
            "attachments_dir" => self.attachments_dir = Some(PathBuf::from(value)),
            "log_dir" => self.log_dir = Some(PathBuf::from(value)),
            "docs_dir" => self.docs_dir = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    /// Built-in defaults rooted at `data_dir`
    pub fn defaults_in(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let policy = PolicySnapshot::default();
        Self {
            transport: Some(TransportKind::Stdio),
            host: Some(policy.bind_host.as_str().to_string()),
            port: Some(DEFAULT_PORT),
            allow_write: Some(policy.allow_write),
            redact_pii: Some(policy.redact_pii),
            max_bytes: Some(policy.max_bytes),
            debug: Some(false),
            auto_start: Some(false),
            web_host: Some(BindHost::LoopbackV4.as_str().to_string()),
            web_port: Some(DEFAULT_WEB_PORT),
            web_username: Some(DEFAULT_WEB_USERNAME.to_string()),
            web_password: None,
            db_path: Some(data_dir.join("certificates.db")),
            attachments_dir: Some(data_dir.join("attachments")),
            log_dir: Some(data_dir.join("logs")),
            docs_dir: Some(data_dir.join("docs")),
        }
    }

    /// Defaults rooted at the platform data directory
    pub fn defaults() -> Self {
        let base = dirs::data_dir()
            .map(|d| d.join("certmcp"))
            .unwrap_or_else(|| PathBuf::from("data"));
        Self::defaults_in(base)
    }
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) => Err("port must be between 1 and 65535".into()),
        Ok(port) => Ok(port),
        Err(e) => Err(e.to_string()),
    }
}

fn display_key(layer: &str, key: &str) -> String {
    match layer {
        "environment" => tooling::config::build_env_key(ENV_PREFIX, key),
        "persisted settings" => format!("mcp_{}", key),
        _ => key.to_string(),
    }
}

impl ConfigBuilder for SettingsLayer {
    type Error = ConfigError;

    fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::parse("environment", &collect_prefixed(prefix))
    }

    fn merge(&mut self, higher: Self) -> &mut Self {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if higher.$field.is_some() { self.$field = higher.$field; })*
            };
        }
        take!(
            transport,
            host,
            port,
            allow_write,
            redact_pii,
            max_bytes,
            debug,
            auto_start,
            web_host,
            web_port,
            web_username,
            web_password,
            db_path,
            attachments_dir,
            log_dir,
            docs_dir,
        );
        self
    }
}

/// Filesystem locations of the external collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paths {
    pub db_path: PathBuf,
    pub attachments_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Holds `README.md` and `AGENTS.md` served as `docs://` resources
    pub docs_dir: PathBuf,
}

/// Debug console settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(serialize_with = "mask_secret")]
    pub password: Option<String>,
}

impl ConsoleConfig {
    /// Loopback host the console listens on
    pub fn bind_host(&self) -> Result<BindHost, ConfigError> {
        self.host
            .parse::<BindHost>()
            .map_err(|_| ConfigError::NonLoopbackBind {
                transport: "console".into(),
                host: self.host.clone(),
            })
    }
}

fn mask_secret<S: serde::Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => s.serialize_str("********"),
        None => s.serialize_none(),
    }
}

/// Effective configuration for one process lifetime
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub transport: TransportKind,
    pub port: u16,
    pub policy: PolicySnapshot,
    pub debug: bool,
    pub auto_start: bool,
    pub console: ConsoleConfig,
    pub paths: Paths,
}

impl ResolvedConfig {
    /// Resolve from process environment, persisted settings and defaults
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_with(SettingsLayer::default()).await
    }

    /// Like [`load`](Self::load), with command-line values above the environment
    pub async fn load_with(overrides: SettingsLayer) -> Result<Self, ConfigError> {
        let mut env = SettingsLayer::from_env(ENV_PREFIX)?;
        env.merge(overrides);
        let defaults = SettingsLayer::defaults();
        let db_path = env
            .db_path
            .clone()
            .or_else(|| defaults.db_path.clone())
            .unwrap_or_else(|| PathBuf::from("certificates.db"));
        // The desktop app owns these rows; a bad value must not stop startup
        let persisted = SettingsLayer::parse_lenient(
            "persisted settings",
            &persisted_to_layer_keys(load_persisted(&db_path).await?),
        );
        resolve(&env, &persisted, &defaults)
    }

    /// Socket address for network bindings
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.policy.bind_host.ip(), self.port)
    }

    /// Base URL a local client uses to reach the network binding
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.policy.bind_host.url_host(), self.port)
    }

    /// Environment overrides that reproduce this configuration in a child
    ///
    /// The transport is replaced by `transport`, since a supervised child
    /// must be reachable by the liveness probe.
    pub fn to_env_overrides(&self, transport: TransportKind) -> Vec<(String, String)> {
        let key = |name: &str| tooling::config::build_env_key(ENV_PREFIX, name);
        let mut vars = vec![
            (key("transport"), transport.as_str().to_string()),
            (key("host"), self.policy.bind_host.as_str().to_string()),
            (key("port"), self.port.to_string()),
            (key("allow_write"), self.policy.allow_write.to_string()),
            (key("redact_pii"), self.policy.redact_pii.to_string()),
            (key("max_bytes"), self.policy.max_bytes.to_string()),
            (key("debug"), self.debug.to_string()),
            (key("db_path"), self.paths.db_path.display().to_string()),
            (
                key("attachments_dir"),
                self.paths.attachments_dir.display().to_string(),
            ),
            (key("log_dir"), self.paths.log_dir.display().to_string()),
            (key("docs_dir"), self.paths.docs_dir.display().to_string()),
        ];
        vars.push((SUPERVISED_ENV.to_string(), "1".to_string()));
        vars
    }
}

/// Resolve the effective configuration from three explicit layers
///
/// Precedence is `env` over `persisted` over `defaults`. A network transport
/// with a non-loopback host is refused; with the stdio transport the host is
/// unused and a bad value only logs a warning.
pub fn resolve(
    env: &SettingsLayer,
    persisted: &SettingsLayer,
    defaults: &SettingsLayer,
) -> Result<ResolvedConfig, ConfigError> {
    let merged = SettingsLayer::build_layered([defaults.clone(), persisted.clone(), env.clone()])?;
    let fallback = SettingsLayer::defaults_in("data");

    let transport = merged.transport.unwrap_or(TransportKind::Stdio);
    let host = merged
        .host
        .unwrap_or_else(|| BindHost::default().as_str().to_string());

    let bind_host = match host.parse::<BindHost>() {
        Ok(bind_host) => bind_host,
        Err(_) if transport.is_network() => {
            return Err(ConfigError::NonLoopbackBind {
                transport: transport.as_str().to_string(),
                host,
            })
        }
        Err(err) => {
            warn!(host = %host, "{}; ignored for stdio transport", err);
            BindHost::default()
        }
    };

    let policy = PolicySnapshot::default()
        .with_allow_write(merged.allow_write.unwrap_or(false))
        .with_redact_pii(merged.redact_pii.unwrap_or(true))
        .with_max_bytes(
            merged
                .max_bytes
                .unwrap_or(tooling::runtime::policy::DEFAULT_MAX_BYTES)
                .max(MIN_MAX_BYTES),
        )
        .with_bind_host(bind_host);

    let pick = |value: Option<PathBuf>, default: Option<PathBuf>| {
        value.or(default).unwrap_or_default()
    };

    Ok(ResolvedConfig {
        transport,
        port: merged.port.unwrap_or(DEFAULT_PORT),
        policy,
        debug: merged.debug.unwrap_or(false),
        auto_start: merged.auto_start.unwrap_or(false),
        console: ConsoleConfig {
            host: merged
                .web_host
                .unwrap_or_else(|| BindHost::default().as_str().to_string()),
            port: merged.web_port.unwrap_or(DEFAULT_WEB_PORT),
            username: merged
                .web_username
                .unwrap_or_else(|| DEFAULT_WEB_USERNAME.to_string()),
            password: merged.web_password,
        },
        paths: Paths {
            db_path: pick(merged.db_path, fallback.db_path),
            attachments_dir: pick(merged.attachments_dir, fallback.attachments_dir),
            log_dir: pick(merged.log_dir, fallback.log_dir),
            docs_dir: pick(merged.docs_dir, fallback.docs_dir),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn env(pairs: &[(&str, &str)]) -> SettingsLayer {
        SettingsLayer::parse("environment", &raw(pairs)).unwrap()
    }

    fn defaults() -> SettingsLayer {
        SettingsLayer::defaults_in("/srv/certs")
    }

    #[test]
    fn test_defaults_are_read_only_and_loopback() {
        let config = resolve(&SettingsLayer::default(), &SettingsLayer::default(), &defaults())
            .unwrap();
        assert_eq!(config.transport, TransportKind::Stdio);
        assert!(!config.policy.allow_write);
        assert!(config.policy.redact_pii);
        assert_eq!(config.policy.max_bytes, 1_048_576);
        assert_eq!(config.policy.bind_host, BindHost::LoopbackV4);
        assert_eq!(config.port, 8000);
        assert_eq!(config.console.port, 7860);
        assert_eq!(config.console.username, "local");
        assert_eq!(config.paths.db_path, PathBuf::from("/srv/certs/certificates.db"));
    }

    #[test]
    fn test_env_overrides_persisted() {
        let persisted = SettingsLayer::parse(
            "persisted settings",
            &raw(&[("allow_write", "1"), ("port", "9001"), ("max_bytes", "4096")]),
        )
        .unwrap();
        let env = env(&[("allow_write", "false"), ("transport", "sse")]);

        let config = resolve(&env, &persisted, &defaults()).unwrap();
        assert!(!config.policy.allow_write);
        assert_eq!(config.port, 9001);
        assert_eq!(config.policy.max_bytes, 4096);
        assert_eq!(config.transport, TransportKind::Sse);
    }

    #[test]
    fn test_max_bytes_floor() {
        let config = resolve(&env(&[("max_bytes", "10")]), &SettingsLayer::default(), &defaults())
            .unwrap();
        assert_eq!(config.policy.max_bytes, MIN_MAX_BYTES);
    }

    #[test]
    fn test_non_loopback_network_bind_refused() {
        let err = resolve(
            &env(&[("transport", "sse"), ("host", "0.0.0.0")]),
            &SettingsLayer::default(),
            &defaults(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NonLoopbackBind { .. }));
    }

    #[test]
    fn test_non_loopback_host_ignored_for_stdio() {
        let config = resolve(
            &env(&[("host", "192.168.0.5")]),
            &SettingsLayer::default(),
            &defaults(),
        )
        .unwrap();
        assert_eq!(config.policy.bind_host, BindHost::LoopbackV4);
    }

    #[test]
    fn test_localhost_binds_ipv4_loopback() {
        let config = resolve(
            &env(&[("transport", "streamable-http"), ("host", "localhost"), ("port", "8123")]),
            &SettingsLayer::default(),
            &defaults(),
        )
        .unwrap();
        assert_eq!(config.policy.bind_host, BindHost::LocalhostName);
        assert_eq!(config.bind_addr().to_string(), "127.0.0.1:8123");
        assert_eq!(config.base_url(), "http://localhost:8123");
    }

    #[test]
    fn test_malformed_persisted_values_fall_back() {
        let persisted = SettingsLayer::parse_lenient(
            "persisted settings",
            &raw(&[
                ("port", "abc"),
                ("transport", "carrier-pigeon"),
                ("max_bytes", "lots"),
                ("allow_write", "true"),
            ]),
        );
        assert_eq!(persisted.port, None);
        assert_eq!(persisted.transport, None);
        assert_eq!(persisted.allow_write, Some(true));

        let config = resolve(&SettingsLayer::default(), &persisted, &defaults()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.policy.max_bytes, 1_048_576);
        assert!(config.policy.allow_write);
    }

    #[test]
    fn test_docs_dir_defaults_under_data_dir() {
        let config = resolve(&SettingsLayer::default(), &SettingsLayer::default(), &defaults())
            .unwrap();
        assert_eq!(config.paths.docs_dir, PathBuf::from("/srv/certs/docs"));

        let config = resolve(
            &env(&[("docs_dir", "/opt/certmcp/docs")]),
            &SettingsLayer::default(),
            &defaults(),
        )
        .unwrap();
        assert_eq!(config.paths.docs_dir, PathBuf::from("/opt/certmcp/docs"));
    }

    #[test]
    fn test_invalid_values_name_key_and_layer() {
        let err = SettingsLayer::parse("environment", &raw(&[("allow_write", "maybe")]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CERT_MCP_ALLOW_WRITE"));
        assert!(message.contains("environment"));

        let err = SettingsLayer::parse("persisted settings", &raw(&[("port", "0")])).unwrap_err();
        assert!(err.to_string().contains("mcp_port"));

        assert!(SettingsLayer::parse("environment", &raw(&[("transport", "ws")])).is_err());
    }

    #[test]
    fn test_child_env_forces_transport() {
        let config = resolve(&env(&[("allow_write", "yes")]), &SettingsLayer::default(), &defaults())
            .unwrap();
        let vars: BTreeMap<_, _> = config
            .to_env_overrides(TransportKind::Sse)
            .into_iter()
            .collect();
        assert_eq!(vars["CERT_MCP_TRANSPORT"], "sse");
        assert_eq!(vars["CERT_MCP_ALLOW_WRITE"], "true");
        assert_eq!(vars[SUPERVISED_ENV], "1");
    }

    #[test]
    fn test_console_password_masked_in_output() {
        let config = resolve(
            &env(&[("web_password", "hunter2")]),
            &SettingsLayer::default(),
            &defaults(),
        )
        .unwrap();
        let rendered = serde_json::to_string(&config).unwrap();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_console_bind_host() {
        let mut console = ConsoleConfig {
            host: "::1".into(),
            port: 7860,
            username: "local".into(),
            password: None,
        };
        assert_eq!(console.bind_host().unwrap(), BindHost::LoopbackV6);
        console.host = "10.0.0.2".into();
        assert!(console.bind_host().is_err());
    }
}
