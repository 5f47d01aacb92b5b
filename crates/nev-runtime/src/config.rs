//! Bridge cadences and timeouts.
//!
//! All values are plain seconds or hertz so they read naturally in the
//! server's TOML file.  Non-positive or non-finite values fall back to the
//! defaults when converted to [`Duration`]s, except `heartbeat_rate`, where a
//! rate of zero disables outbound heartbeats.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Outbound heartbeat rate in Hz.
    pub heartbeat_rate: f64,
    /// Seconds between periodic snapshot pushes.
    pub state_push_interval: f64,
    /// Seconds of station silence before the station counts as gone.
    pub station_timeout: f64,
    /// Seconds between supervisor passes.
    pub supervisor_tick: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat_rate: 5.0,
            state_push_interval: 0.05,
            station_timeout: 2.0,
            supervisor_tick: 0.01,
        }
    }
}

impl BridgeConfig {
    /// Interval between heartbeats, or `None` when heartbeats are disabled.
    pub fn heartbeat_period(&self) -> Option<Duration> {
        if self.heartbeat_rate.is_finite() && self.heartbeat_rate > 0.0 {
            Duration::try_from_secs_f64(1.0 / self.heartbeat_rate).ok()
        } else {
            None
        }
    }

    pub fn push_period(&self) -> Duration {
        positive_secs(self.state_push_interval, Self::default().state_push_interval)
    }

    pub fn station_grace(&self) -> Duration {
        positive_secs(self.station_timeout, Self::default().station_timeout)
    }

    pub fn tick_period(&self) -> Duration {
        positive_secs(self.supervisor_tick, Self::default().supervisor_tick)
    }
}

fn positive_secs(value: f64, fallback: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(d) if !d.is_zero() => d,
        _ => Duration::from_secs_f64(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_cadences() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.heartbeat_period(), Some(Duration::from_millis(200)));
        assert_eq!(cfg.push_period(), Duration::from_millis(50));
        assert_eq!(cfg.station_grace(), Duration::from_secs(2));
        assert_eq!(cfg.tick_period(), Duration::from_millis(10));
    }

    #[test]
    fn partial_table_keeps_remaining_defaults() {
        let cfg: BridgeConfig = toml::from_str("heartbeat_rate = 10.0").unwrap();
        assert_eq!(cfg.heartbeat_period(), Some(Duration::from_millis(100)));
        assert_eq!(cfg.station_timeout, 2.0);
    }

    #[test]
    fn zero_rate_disables_heartbeats() {
        let cfg = BridgeConfig {
            heartbeat_rate: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.heartbeat_period(), None);
    }

    #[test]
    fn invalid_durations_fall_back() {
        let cfg = BridgeConfig {
            state_push_interval: -1.0,
            station_timeout: f64::NAN,
            supervisor_tick: 0.0,
            ..Default::default()
        };
        assert_eq!(cfg.push_period(), Duration::from_millis(50));
        assert_eq!(cfg.station_grace(), Duration::from_secs(2));
        assert_eq!(cfg.tick_period(), Duration::from_millis(10));
    }
}
