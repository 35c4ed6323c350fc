//! Security policy engine
//!
//! Pure decision functions over a [`PolicySnapshot`]: whether a mutation is
//! allowed, how a result is redacted, and how many attachment bytes may be
//! returned. Nothing in here performs I/O.
//!
//! Redaction rules are keyed by field name, not by tool. Any field anywhere
//! in a result tree whose name matches a sensitive pattern is masked, so new
//! handlers are covered without opting in.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

/// Default response byte cap (1 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

/// Rule reported when a mutating tool is called while writes are disabled
pub const RULE_WRITE_DISABLED: &str = "write.disabled";

/// Character used to mask sensitive values
pub const MASK_CHAR: char = '*';

/// Loopback host a network binding is allowed to listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindHost {
    /// `127.0.0.1`
    LoopbackV4,
    /// `::1`
    LoopbackV6,
    /// `localhost`, bound as `127.0.0.1`
    LocalhostName,
}

impl BindHost {
    /// Address the listener binds to
    pub fn ip(&self) -> IpAddr {
        match self {
            Self::LoopbackV4 | Self::LocalhostName => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Self::LoopbackV6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }

    /// Host text as a client should use it in a URL
    pub fn url_host(&self) -> &'static str {
        match self {
            Self::LoopbackV4 => "127.0.0.1",
            Self::LoopbackV6 => "[::1]",
            Self::LocalhostName => "localhost",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoopbackV4 => "127.0.0.1",
            Self::LoopbackV6 => "::1",
            Self::LocalhostName => "localhost",
        }
    }
}

impl Default for BindHost {
    fn default() -> Self {
        Self::LoopbackV4
    }
}

impl std::fmt::Display for BindHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host text that does not name a loopback interface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("bind host `{0}` is not a loopback address (allowed: 127.0.0.1, ::1, localhost)")]
pub struct NonLoopbackHost(pub String);

impl FromStr for BindHost {
    type Err = NonLoopbackHost;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "127.0.0.1" => Ok(Self::LoopbackV4),
            "::1" | "[::1]" => Ok(Self::LoopbackV6),
            "localhost" => Ok(Self::LocalhostName),
            _ => Err(NonLoopbackHost(s.trim().to_string())),
        }
    }
}

/// Policy in force for the lifetime of one control-plane process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    /// Mutating tools may run
    pub allow_write: bool,

    /// Sensitive fields are masked in results
    pub redact_pii: bool,

    /// Maximum attachment bytes returned by one call (always > 0)
    pub max_bytes: u64,

    /// Loopback host for network bindings
    pub bind_host: BindHost,
}

impl Default for PolicySnapshot {
    fn default() -> Self {
        Self {
            allow_write: false,
            redact_pii: true,
            max_bytes: DEFAULT_MAX_BYTES,
            bind_host: BindHost::LoopbackV4,
        }
    }
}

impl PolicySnapshot {
    /// Create the default read-only snapshot
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allow_write(mut self, allow: bool) -> Self {
        self.allow_write = allow;
        self
    }

    pub fn with_redact_pii(mut self, redact: bool) -> Self {
        self.redact_pii = redact;
        self
    }

    /// Set the byte cap; zero is raised to one so a positive cap always holds
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes.max(1);
        self
    }

    pub fn with_bind_host(mut self, host: BindHost) -> Self {
        self.bind_host = host;
        self
    }

    /// Whether mutating tools may run under this snapshot
    pub fn allows_mutation(&self) -> bool {
        self.allow_write
    }

    /// Gate a mutating tool
    pub fn authorize_mutation(&self, tool: &str) -> Result<(), PolicyViolation> {
        if self.allow_write {
            Ok(())
        } else {
            Err(PolicyViolation::new(
                RULE_WRITE_DISABLED,
                format!("tool `{}` modifies data and writes are disabled", tool),
            ))
        }
    }

    /// Cap a requested byte length
    ///
    /// Returns the allowed length and whether it is shorter than requested.
    pub fn cap_bytes(&self, requested: u64) -> (u64, bool) {
        let allowed = requested.min(self.max_bytes);
        (allowed, allowed < requested)
    }

    /// Apply redaction to a result payload when enabled
    pub fn redact(&self, payload: Map<String, Value>) -> Map<String, Value> {
        if !self.redact_pii {
            return payload;
        }
        redact_map(payload)
    }

    /// Apply redaction to an arbitrary value when enabled
    pub fn redact_value(&self, value: Value) -> Value {
        if !self.redact_pii {
            return value;
        }
        redact_value(value)
    }
}

/// Policy violation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Policy violation: {rule} - {message}")]
pub struct PolicyViolation {
    /// Rule that was violated
    pub rule: String,

    /// Human-readable violation message
    pub message: String,
}

impl PolicyViolation {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// How a matching field is masked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskStyle {
    /// Keep a fixed prefix and suffix, mask the middle
    KeepEnds { prefix: usize, suffix: usize },
    /// Keep only the trailing characters
    KeepLast(usize),
}

/// A static field-name redaction rule
#[derive(Debug)]
pub struct RedactionRule {
    pub name: &'static str,
    pub field: Regex,
    pub style: MaskStyle,
}

/// Field-name rules, checked in order
pub static REDACTION_RULES: LazyLock<Vec<RedactionRule>> = LazyLock::new(|| {
    vec![
        RedactionRule {
            name: "pii.identity_number",
            field: Regex::new(
                r"(?i)^(?:.*_)?(?:id_?card|id_?no|id_?number|identity(?:_?(?:card|no|number))?|passport(?:_?(?:no|number))?)$",
            )
            .expect("static regex"),
            style: MaskStyle::KeepEnds {
                prefix: 6,
                suffix: 4,
            },
        },
        RedactionRule {
            name: "pii.phone_number",
            field: Regex::new(
                r"(?i)^(?:.*_)?(?:phone|mobile|tel|telephone|cellphone)(?:_?(?:no|number))?$",
            )
            .expect("static regex"),
            style: MaskStyle::KeepLast(4),
        },
    ]
});

/// Find the rule covering a field name
pub fn rule_for_field(field: &str) -> Option<&'static RedactionRule> {
    REDACTION_RULES.iter().find(|rule| rule.field.is_match(field))
}

/// Mask one scalar string with the given style
///
/// Values too short to keep both ends are masked entirely, so the masked
/// form never exposes the whole raw value.
pub fn mask(raw: &str, style: MaskStyle) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let len = chars.len();
    let (keep_front, keep_back) = match style {
        MaskStyle::KeepEnds { prefix, suffix } => (prefix, suffix),
        MaskStyle::KeepLast(n) => (0, n),
    };

    if len <= keep_front + keep_back {
        return MASK_CHAR.to_string().repeat(len.max(1));
    }

    let mut out = String::with_capacity(raw.len());
    out.extend(&chars[..keep_front]);
    out.extend(std::iter::repeat(MASK_CHAR).take(len - keep_front - keep_back));
    out.extend(&chars[len - keep_back..]);
    out
}

fn redact_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let value = match rule_for_field(&key) {
                Some(rule) => mask_value(value, rule.style),
                None => redact_value(value),
            };
            (key, value)
        })
        .collect()
}

fn redact_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        other => other,
    }
}

/// Mask the value under a sensitive key
fn mask_value(value: Value, style: MaskStyle) -> Value {
    match value {
        Value::String(s) if s.is_empty() => Value::String(s),
        Value::String(s) => Value::String(mask(&s, style)),
        Value::Number(n) => Value::String(mask(&n.to_string(), style)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| mask_value(item, style))
                .collect(),
        ),
        Value::Object(map) => Value::Object(redact_map(map)),
        other => other,
    }
}
