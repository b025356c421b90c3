//! Belay core types: the operation envelope, resource addressing and errors.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A named operation plus its (still untyped) argument object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl OperationRequest {
    pub fn new(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self { name: name.into(), args }
    }
}

/// Uniform result envelope returned by every operation handler.
///
/// `error` is non-empty iff `success` is false; `outputs` carries
/// operation-specific string values (e.g. a created namespace name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), outputs: None, error: None }
    }

    pub fn ok_with_outputs(message: impl Into<String>, outputs: BTreeMap<String, String>) -> Self {
        Self { success: true, message: message.into(), outputs: Some(outputs), error: None }
    }

    pub fn fail(err: impl fmt::Display) -> Self {
        let msg = err.to_string();
        Self { success: false, message: msg.clone(), outputs: None, error: Some(msg) }
    }

    /// Failure that still surfaces outputs (e.g. the raw `allowed` value of
    /// a permission probe whose expectation did not match).
    pub fn fail_with_outputs(err: impl fmt::Display, outputs: BTreeMap<String, String>) -> Self {
        let mut r = Self::fail(err);
        r.outputs = Some(outputs);
        r
    }
}

/// Group/version/kind triple addressing a resource type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindRef {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl KindRef {
    /// Split an `apiVersion` string (`v1` or `apps/v1`) into group/version.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        Self { group, version, kind: kind.to_string() }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The core v1 Namespace kind.
    pub fn namespace() -> Self {
        Self { group: String::new(), version: "v1".into(), kind: "Namespace".into() }
    }
}

impl fmt::Display for KindRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// A single resource instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: KindRef,
    pub name: String,
    pub namespace: Option<String>,
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A "can subject X perform verb Y on resource Z" query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessQuery {
    pub verb: String,
    pub resource: String,
    /// User or service account the check is evaluated for.
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

/// Errors suitable for transport; every variant maps to a failed
/// [`OperationResult`] at the dispatch boundary.
#[derive(Debug, thiserror::Error, Serialize, Deserialize)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("kubernetes client not initialized")]
    ClientUninitialized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream: {0}")]
    Upstream(String),
    #[error("timed out: {0}")]
    TimedOut(String),
    #[error("canceled: {0}")]
    Canceled(String),
    #[error("id generation: {0}")]
    IdGeneration(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Not-found is the one failure class callers absorb (delete cleanup,
    /// wait polling); everything else is surfaced.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parse a human duration string: `250ms`, `60s`, `5m`, `1h`, or bare
/// seconds. Rejects zero and anything unparseable.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid duration: {s:?}")))?;
    let dur = match unit {
        "ms" => Duration::from_millis(n),
        "s" | "" => Duration::from_secs(n),
        "m" => Duration::from_secs(n * 60),
        "h" => Duration::from_secs(n * 3600),
        _ => return Err(Error::InvalidArgument(format!("invalid duration: {s:?}"))),
    };
    if dur.is_zero() {
        return Err(Error::InvalidArgument(format!("duration must be positive: {s:?}")));
    }
    Ok(dur)
}
