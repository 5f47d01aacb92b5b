//! Server configuration – `config.toml` next to the binary by default.
//!
//! ```toml
//! web_port = 8080
//! subscriber_capacity = 20
//! zenoh_locator = "tcp/192.168.0.10:7447"
//!
//! [bridge]
//! heartbeat_rate = 5.0
//! state_push_interval = 0.05
//! station_timeout = 2.0
//! supervisor_tick = 0.01
//!
//! [video]
//! enabled = true
//! ingest = "stream"    # or "latest"
//! backlog = 8
//! pace = 0.033
//! ice_servers = []
//! ```

use std::fs;
use std::path::Path;

use nev_runtime::BridgeConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PATH: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP/WebSocket port of the cockpit.
    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Snapshots buffered per browser before it starts missing some.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Zenoh router to connect to.  Unset means auto-discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zenoh_locator: Option<String>,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub video: VideoConfig,
}

/// Which ingestion adapter feeds the decode worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Every camera unit, through a bounded backlog.
    #[default]
    Stream,
    /// Only the newest unit, pulled once per `pace`.
    Latest,
}

impl std::str::FromStr for IngestMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(IngestMode::Stream),
            "latest" => Ok(IngestMode::Latest),
            other => Err(format!("unknown ingest mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Decode and relay the vehicle camera.  Needs the `ffmpeg` build.
    pub enabled: bool,
    pub ingest: IngestMode,
    /// Undecoded units the stream adapter holds before dropping.
    pub backlog: usize,
    /// Pull interval of the latest-only adapter, in seconds.
    pub pace: f64,
    /// STUN/TURN URLs offered to viewers.  Empty: host candidates only.
    pub ice_servers: Vec<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ingest: IngestMode::Stream,
            backlog: 8,
            pace: 1.0 / 30.0,
            ice_servers: Vec::new(),
        }
    }
}

fn default_web_port() -> u16 {
    8080
}

fn default_subscriber_capacity() -> usize {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            web_port: default_web_port(),
            subscriber_capacity: default_subscriber_capacity(),
            zenoh_locator: None,
            bridge: BridgeConfig::default(),
            video: VideoConfig::default(),
        }
    }
}

/// Load `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<ServerConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `NEV_*` environment overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `NEV_WEB_PORT` | `web_port` |
/// | `NEV_ZENOH_LOCATOR` | `zenoh_locator` (empty clears it) |
/// | `NEV_STATION_TIMEOUT` | `bridge.station_timeout` |
/// | `NEV_HEARTBEAT_RATE` | `bridge.heartbeat_rate` |
/// | `NEV_VIDEO_INGEST` | `video.ingest` (`stream` or `latest`) |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut ServerConfig) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(cfg: &mut ServerConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(port) = var("NEV_WEB_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.web_port = port;
    }
    if let Some(locator) = var("NEV_ZENOH_LOCATOR") {
        let locator = locator.trim();
        cfg.zenoh_locator = (!locator.is_empty()).then(|| locator.to_string());
    }
    if let Some(secs) = var("NEV_STATION_TIMEOUT").and_then(|v| v.trim().parse().ok()) {
        cfg.bridge.station_timeout = secs;
    }
    if let Some(hz) = var("NEV_HEARTBEAT_RATE").and_then(|v| v.trim().parse().ok()) {
        cfg.bridge.heartbeat_rate = hz;
    }
    if let Some(mode) = var("NEV_VIDEO_INGEST").and_then(|v| v.parse().ok()) {
        cfg.video.ingest = mode;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("config.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "web_port = 9000\n\n[bridge]\nstation_timeout = 4.5\n").unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.web_port, 9000);
        assert_eq!(cfg.subscriber_capacity, 20);
        assert_eq!(cfg.bridge.station_timeout, 4.5);
        assert_eq!(cfg.bridge.heartbeat_rate, 5.0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "web_port = \"eighty\"").unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, toml::to_string_pretty(&ServerConfig::default()).unwrap()).unwrap();
        assert_eq!(load_from(&path).unwrap(), Some(ServerConfig::default()));
    }

    #[test]
    fn overrides_apply_when_parseable() {
        let mut cfg = ServerConfig::default();
        apply_overrides(
            &mut cfg,
            vars(&[
                ("NEV_WEB_PORT", "8181"),
                ("NEV_STATION_TIMEOUT", "3.5"),
                ("NEV_HEARTBEAT_RATE", "10"),
            ]),
        );
        assert_eq!(cfg.web_port, 8181);
        assert_eq!(cfg.bridge.station_timeout, 3.5);
        assert_eq!(cfg.bridge.heartbeat_rate, 10.0);
    }

    #[test]
    fn zenoh_locator_from_file_and_env() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "zenoh_locator = \"tcp/10.0.0.5:7447\"\n").unwrap();
        let mut cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.zenoh_locator.as_deref(), Some("tcp/10.0.0.5:7447"));

        apply_overrides(&mut cfg, vars(&[("NEV_ZENOH_LOCATOR", "tcp/10.0.0.9:7447")]));
        assert_eq!(cfg.zenoh_locator.as_deref(), Some("tcp/10.0.0.9:7447"));

        apply_overrides(&mut cfg, vars(&[("NEV_ZENOH_LOCATOR", " ")]));
        assert_eq!(cfg.zenoh_locator, None);
    }

    #[test]
    fn video_section_selects_the_ingest_adapter() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[video]\ningest = \"latest\"\npace = 0.1\n").unwrap();
        let mut cfg = load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.video.ingest, IngestMode::Latest);
        assert_eq!(cfg.video.pace, 0.1);
        assert_eq!(cfg.video.backlog, 8);
        assert!(cfg.video.enabled);

        apply_overrides(&mut cfg, vars(&[("NEV_VIDEO_INGEST", "Stream")]));
        assert_eq!(cfg.video.ingest, IngestMode::Stream);
    }

    #[test]
    fn unparseable_overrides_are_ignored() {
        let mut cfg = ServerConfig::default();
        apply_overrides(
            &mut cfg,
            vars(&[("NEV_WEB_PORT", "not-a-port"), ("NEV_VIDEO_INGEST", "jpeg")]),
        );
        assert_eq!(cfg, ServerConfig::default());
    }
}
