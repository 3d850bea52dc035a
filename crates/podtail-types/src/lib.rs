//! Shared types for podtail
//!
//! This crate contains data structures used across multiple podtail crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Kubernetes Resource Types
// ============================================================================

/// Namespace used when a path carries no namespace component
pub const DEFAULT_NAMESPACE: &str = "default";

/// A `namespace/name` resource identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    pub namespace: String,
    pub name: String,
}

impl ResourcePath {
    /// Parse `namespace/name`, or a bare `name` in the default namespace
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.trim();
        let (namespace, name) = match path.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, path),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub ready: bool,
    pub restart_count: i32,
}

impl ContainerInfo {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ready: false,
            restart_count: 0,
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Where a line came from, for multi-source tailing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineSource {
    pub pod: String,
    pub container: String,
}

/// A single captured log line
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    /// Line body without trailing newline
    bytes: Arc<[u8]>,

    /// Source pod/container (set when tailing several containers)
    source: Option<LineSource>,

    /// Timestamp prefix split off the raw line (if any)
    timestamp: Option<DateTime<Utc>>,
}

impl LogLine {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            source: None,
            timestamp: None,
        }
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(s.into().into_bytes())
    }

    /// Parse a raw line as delivered by the pod log API.
    ///
    /// A leading RFC3339 timestamp (`2024-01-15T10:30:00.123456789Z body`)
    /// is split off; anything else is kept verbatim.
    pub fn parse(raw: &[u8]) -> Self {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match split_timestamp(raw) {
            Some((ts, body)) => Self {
                bytes: body.into(),
                source: None,
                timestamp: Some(ts),
            },
            None => Self::new(raw),
        }
    }

    pub fn with_source(mut self, pod: impl Into<String>, container: impl Into<String>) -> Self {
        self.source = Some(LineSource {
            pod: pod.into(),
            container: container.into(),
        });
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn source(&self) -> Option<&LineSource> {
        self.source.as_ref()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Render the line for display.
    ///
    /// Untagged lines without a requested timestamp come back byte-identical.
    pub fn render(&self, show_timestamp: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes.len() + 64);
        if show_timestamp
            && let Some(ts) = self.timestamp
        {
            out.extend_from_slice(ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string().as_bytes());
            out.push(b' ');
        }
        if let Some(src) = &self.source {
            out.extend_from_slice(src.pod.as_bytes());
            out.push(b' ');
            out.extend_from_slice(src.container.as_bytes());
            out.push(b' ');
        }
        out.extend_from_slice(&self.bytes);
        out
    }
}

/// Split a leading RFC3339 timestamp off a raw log line
fn split_timestamp(raw: &[u8]) -> Option<(DateTime<Utc>, &[u8])> {
    // K8s timestamps are at most 35 bytes: 2024-01-15T10:30:00.123456789+00:00
    if raw.len() < 20 {
        return None;
    }
    let search_end = raw.len().min(36);
    let space = raw[..search_end].iter().position(|b| *b == b' ')?;
    let ts_str = std::str::from_utf8(&raw[..space]).ok()?;
    let ts = DateTime::parse_from_rfc3339(ts_str).ok()?;
    Some((ts.with_timezone(&Utc), &raw[space + 1..]))
}

/// Parameters for opening a log stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRequest {
    pub path: ResourcePath,

    /// Container to tail; `None` means every container of the pod
    pub container: Option<String>,

    /// Historical lines to fetch before following
    pub tail_lines: Option<i64>,

    /// Only lines newer than this many seconds (wins over `tail_lines`)
    pub since_seconds: Option<i64>,

    /// Logs of the previous container instance
    pub previous: bool,

    /// Ask the API to prefix lines with timestamps
    pub timestamps: bool,

    pub follow: bool,
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Default buffered line count
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default flush cadence
pub const DEFAULT_NOTIFICATION_INTERVAL: Duration = Duration::from_millis(300);

/// Configuration for one log session
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionOptions {
    /// Resource identifier (`namespace/pod`)
    pub path: String,

    /// Explicit container name
    pub container: String,

    /// Fallback when `container` is empty
    pub default_container: String,

    /// Maximum buffered lines
    pub capacity: usize,

    /// Time between flush checks
    #[serde(rename = "notification_interval_ms", deserialize_with = "duration_from_millis")]
    pub notification_interval: Duration,

    pub since_seconds: Option<i64>,
    pub show_timestamps: bool,
    pub case_insensitive: bool,
    pub previous: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            path: String::new(),
            container: String::new(),
            default_container: String::new(),
            capacity: DEFAULT_CAPACITY,
            notification_interval: DEFAULT_NOTIFICATION_INTERVAL,
            since_seconds: None,
            show_timestamps: false,
            case_insensitive: false,
            previous: false,
        }
    }
}

impl SessionOptions {
    pub fn new(path: impl Into<String>, container: impl Into<String>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            container: container.into(),
            capacity,
            ..Default::default()
        }
    }

    /// Effective container: explicit one, else the configured default
    pub fn resolved_container(&self) -> &str {
        if self.container.is_empty() {
            &self.default_container
        } else {
            &self.container
        }
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_path() {
        let p = ResourcePath::parse("kube-system/coredns-abc").unwrap();
        assert_eq!(p.namespace, "kube-system");
        assert_eq!(p.name, "coredns-abc");

        let p = ResourcePath::parse("fred").unwrap();
        assert_eq!(p.namespace, DEFAULT_NAMESPACE);
        assert_eq!(p.to_string(), "default/fred");

        assert!(ResourcePath::parse("").is_none());
        assert!(ResourcePath::parse("ns/").is_none());
        assert!(ResourcePath::parse("a/b/c").is_none());
    }

    #[test]
    fn test_parse_line_with_timestamp() {
        let line = LogLine::parse(b"2024-01-15T10:30:00.123456789Z some log message\n");
        assert!(line.timestamp().is_some());
        assert_eq!(line.bytes(), b"some log message");
        assert_eq!(line.render(false), b"some log message");
        assert_eq!(
            line.render(true),
            b"2024-01-15T10:30:00.123Z some log message".to_vec()
        );
    }

    #[test]
    fn test_parse_line_without_timestamp() {
        let line = LogLine::parse("─────── not a timestamp ───────".as_bytes());
        assert!(line.timestamp().is_none());
        assert_eq!(line.bytes(), "─────── not a timestamp ───────".as_bytes());
        assert_eq!(line.render(true), line.bytes().to_vec());
    }

    #[test]
    fn test_render_tagged_line() {
        let line = LogLine::from_string("hello").with_source("pod-a", "nginx");
        assert_eq!(line.render(true), b"pod-a nginx hello".to_vec());
    }

    #[test]
    fn test_resolved_container() {
        let mut opts = SessionOptions::new("fred", "", 10);
        opts.default_container = "duh".into();
        assert_eq!(opts.resolved_container(), "duh");
        opts.container = "blee".into();
        assert_eq!(opts.resolved_container(), "blee");
    }
}
