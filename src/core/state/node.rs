// src/core/state/node.rs

//! The media-node model: identity, capabilities, load, and output templates.

use crate::core::protocol::{Capabilities, GeoLocation, LoadMetrics, OperationalMode, StorageInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Instant;

/// The 16-byte binary form of a node or viewer host. IPv4 addresses are
/// v4-mapped with the `0xFF, 0xFF` marker at bytes 10-11; this byte layout is
/// a wire contract shared with sibling implementations, not a runtime detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BinaryHost(pub [u8; 16]);

impl BinaryHost {
    pub const UNSPECIFIED: BinaryHost = BinaryHost([0u8; 16]);

    /// Parses a textual IP into its canonical 16-byte form. Accepts a bare
    /// address or a socket address (`host:port`, `[v6]:port`).
    pub fn parse(addr: &str) -> Option<Self> {
        let host = if let Some(rest) = addr.strip_prefix('[') {
            rest.split_once(']').map(|(h, _)| h).unwrap_or(rest)
        } else {
            addr.rsplit_once(':')
                .filter(|(h, p)| !h.contains(':') && p.chars().all(|c| c.is_ascii_digit()))
                .map(|(h, _)| h)
                .unwrap_or(addr)
        };
        match host.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => {
                let mut bytes = [0u8; 16];
                bytes[10] = 0xFF;
                bytes[11] = 0xFF;
                bytes[12..].copy_from_slice(&v4.octets());
                Some(BinaryHost(bytes))
            }
            IpAddr::V6(v6) => Some(BinaryHost(v6.octets())),
        }
    }

    pub fn is_unspecified(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for BinaryHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        std::net::Ipv6Addr::from(self.0).fmt(f)
    }
}

/// A protocol output template advertised by a node. Historically a free-form
/// JSON map, so a value is a single template, a list of them, or something an
/// output plugin invented.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTemplate {
    Single(String),
    List(Vec<String>),
    Other(serde_json::Value),
}

impl OutputTemplate {
    /// The usable template string, if any: a single value directly, or the
    /// first entry of a list.
    pub fn template(&self) -> Option<&str> {
        match self {
            OutputTemplate::Single(s) => Some(s),
            OutputTemplate::List(items) => items.first().map(String::as_str),
            OutputTemplate::Other(_) => None,
        }
    }
}

/// Parses the raw `outputs_json` map a node reports into typed templates.
pub fn parse_outputs(raw: &str) -> HashMap<String, OutputTemplate> {
    let Ok(map) = serde_json::from_str::<HashMap<String, serde_json::Value>>(raw) else {
        return HashMap::new();
    };
    map.into_iter()
        .map(|(proto, value)| {
            let template = match value {
                serde_json::Value::String(s) => OutputTemplate::Single(s),
                serde_json::Value::Array(items) => {
                    let strings: Vec<String> = items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect();
                    if strings.len() == items.len() {
                        OutputTemplate::List(strings)
                    } else {
                        OutputTemplate::Other(serde_json::Value::Array(items))
                    }
                }
                other => OutputTemplate::Other(other),
            };
            (proto, template)
        })
        .collect()
}

/// Expands an output template: `$` is the wire stream name, `HOST` is the
/// node's advertise host.
pub fn resolve_template_url(template: &OutputTemplate, host: &str, stream: &str) -> Option<String> {
    let raw = template.template()?;
    Some(raw.replace("HOST", host).replace('$', stream))
}

/// One media node as tracked by the state store.
#[derive(Debug, Clone)]
pub struct MediaNode {
    /// Canonical node id, stable across reconnects.
    pub id: String,
    /// Scheme + host:port; empty until the first `NodeUpdate`.
    pub base_url: String,
    /// Binary host for same-host filtering.
    pub host: BinaryHost,
    pub mode: OperationalMode,
    pub capabilities: Capabilities,
    pub location: Option<GeoLocation>,
    pub metrics: LoadMetrics,
    pub storage: Option<StorageInfo>,
    pub tags: Vec<String>,
    /// Allow-list of configured stream names (supports wildcard templates).
    pub configured_streams: Vec<String>,
    /// Tenant binding; `None` means shared infrastructure.
    pub tenant_id: Option<String>,
    pub cluster_id: Option<String>,
    pub labels: Vec<String>,
    pub outputs_raw: String,
    pub outputs: HashMap<String, OutputTemplate>,
    /// Admission-control penalty in bytes/s, decayed on every metrics update
    /// and grown on every selection.
    pub add_bandwidth: u64,
    /// Set on the first update; staleness thresholds only apply afterwards.
    pub last_update: Option<Instant>,
    pub is_healthy: bool,
    pub is_active: bool,
}

impl MediaNode {
    pub fn new(id: String) -> Self {
        Self {
            id,
            base_url: String::new(),
            host: BinaryHost::UNSPECIFIED,
            mode: OperationalMode::Normal,
            capabilities: Capabilities::default(),
            location: None,
            metrics: LoadMetrics::default(),
            storage: None,
            tags: Vec::new(),
            configured_streams: Vec::new(),
            tenant_id: None,
            cluster_id: None,
            labels: Vec::new(),
            outputs_raw: String::new(),
            outputs: HashMap::new(),
            add_bandwidth: 0,
            last_update: None,
            is_healthy: false,
            is_active: false,
        }
    }

    /// The host part used in generated URLs: the base URL's authority when
    /// known, otherwise the binary host rendered textually.
    pub fn advertise_host(&self) -> String {
        if let Some(rest) = self
            .base_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .filter(|r| !r.is_empty())
        {
            return rest.split('/').next().unwrap_or(rest).to_string();
        }
        if !self.host.is_unspecified() {
            return self.host.to_string();
        }
        String::new()
    }

    /// Expands this node's output template for `protocol` against a stream's
    /// wire name.
    pub fn output_url(&self, protocol: &str, stream: &str) -> Option<String> {
        let template = self.outputs.get(protocol)?;
        resolve_template_url(template, &self.advertise_host(), stream)
    }

    /// A stream name passes the allow-list when it equals a configured entry
    /// or extends one as a wildcard (`entry+...` or `entry ...`).
    pub fn allows_stream(&self, stream: &str) -> bool {
        if self.configured_streams.is_empty() {
            return true;
        }
        self.configured_streams.iter().any(|entry| {
            stream == entry
                || stream
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with('+') || rest.starts_with(' '))
        })
    }

    /// Bandwidth headroom check: the advertised limit must clear both the
    /// measured up speed and the admission penalty on top of it.
    pub fn has_bandwidth_headroom(&self) -> bool {
        self.metrics.bw_limit > 0
            && self.metrics.up_speed < self.metrics.bw_limit
            && self.metrics.up_speed + self.add_bandwidth < self.metrics.bw_limit
    }
}
