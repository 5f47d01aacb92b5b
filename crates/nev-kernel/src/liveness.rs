//! Link liveness state machines.
//!
//! [`StationLiveness`] tracks the station heartbeat: a heartbeat moves it to
//! [`LinkState::Connected`]; only [`StationLiveness::check`] moves it back,
//! once the heartbeat is older than the configured timeout.
//!
//! [`VehicleLiveness`] watches the age of the last vehicle telemetry with
//! hysteresis: it drops out after [`VEHICLE_TIMEOUT`] and recovers only once
//! the age falls below [`VEHICLE_RECOVERY`].
//!
//! Both return `Some(Transition)` exactly once per edge, so callers can log
//! or broadcast the edge without repeating it every tick.

use std::time::{Duration, Instant};

/// Silence after which the vehicle is considered disconnected.
pub const VEHICLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Telemetry age below which a disconnected vehicle counts as back.
pub const VEHICLE_RECOVERY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connected,
}

/// An edge in a liveness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

// ────────────────────────────────────────────────────────────────────────────
// StationLiveness
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StationLiveness {
    state: LinkState,
    last_heartbeat: Option<Instant>,
    timeout: Duration,
}

impl StationLiveness {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Start disconnected with the given heartbeat `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: LinkState::Disconnected,
            last_heartbeat: None,
            timeout,
        }
    }

    /// Record a heartbeat received at `at`.
    pub fn heartbeat(&mut self, at: Instant) -> Option<Transition> {
        self.last_heartbeat = Some(at);
        match self.state {
            LinkState::Disconnected => {
                self.state = LinkState::Connected;
                Some(Transition::Connected)
            }
            LinkState::Connected => None,
        }
    }

    /// Supervisor check: time out a connected link whose heartbeat is stale.
    pub fn check(&mut self, now: Instant) -> Option<Transition> {
        let last = self.last_heartbeat?;
        if self.state == LinkState::Connected && now.saturating_duration_since(last) > self.timeout
        {
            self.state = LinkState::Disconnected;
            return Some(Transition::Disconnected);
        }
        None
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat
    }
}

impl Default for StationLiveness {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// VehicleLiveness
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct VehicleLiveness {
    disconnected: bool,
}

impl VehicleLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the age of `last_recv` at `now`.  Nothing happens before the
    /// first telemetry has ever arrived.
    pub fn check(&mut self, last_recv: Option<Instant>, now: Instant) -> Option<Transition> {
        let age = now.saturating_duration_since(last_recv?);
        if age > VEHICLE_TIMEOUT && !self.disconnected {
            self.disconnected = true;
            Some(Transition::Disconnected)
        } else if age < VEHICLE_RECOVERY && self.disconnected {
            self.disconnected = false;
            Some(Transition::Connected)
        } else {
            None
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn station_starts_disconnected() {
        let liveness = StationLiveness::default();
        assert_eq!(liveness.state(), LinkState::Disconnected);
        assert!(liveness.last_heartbeat().is_none());
    }

    #[test]
    fn first_heartbeat_connects_once() {
        let t0 = Instant::now();
        let mut liveness = StationLiveness::default();
        assert_eq!(liveness.heartbeat(t0), Some(Transition::Connected));
        assert_eq!(liveness.heartbeat(t0 + ms(200)), None);
        assert!(liveness.is_connected());
    }

    #[test]
    fn station_times_out_exactly_once_per_silence() {
        let t0 = Instant::now();
        let mut liveness = StationLiveness::new(Duration::from_secs(2));
        liveness.heartbeat(t0);

        assert_eq!(liveness.check(t0 + ms(1900)), None);
        assert_eq!(liveness.check(t0 + ms(2100)), Some(Transition::Disconnected));
        for step in 1..50 {
            assert_eq!(liveness.check(t0 + ms(2100 + step * 100)), None);
        }

        // A new heartbeat starts a new period with its own single edge.
        let t1 = t0 + ms(10_000);
        assert_eq!(liveness.heartbeat(t1), Some(Transition::Connected));
        assert_eq!(liveness.check(t1 + ms(2500)), Some(Transition::Disconnected));
        assert_eq!(liveness.check(t1 + ms(2600)), None);
    }

    #[test]
    fn heartbeat_keeps_station_alive() {
        let t0 = Instant::now();
        let mut liveness = StationLiveness::default();
        for i in 0..20 {
            liveness.heartbeat(t0 + ms(i * 500));
            assert_eq!(liveness.check(t0 + ms(i * 500 + 400)), None);
        }
    }

    #[test]
    fn vehicle_liveness_uses_hysteresis() {
        let t0 = Instant::now();
        let mut liveness = VehicleLiveness::new();

        assert_eq!(liveness.check(None, t0 + ms(60_000)), None);
        assert_eq!(liveness.check(Some(t0), t0 + ms(2000)), None);
        assert_eq!(liveness.check(Some(t0), t0 + ms(3100)), Some(Transition::Disconnected));
        assert_eq!(liveness.check(Some(t0), t0 + ms(4000)), None);

        // Fresh telemetry, but not fresh enough to count as recovered.
        let t1 = t0 + ms(5000);
        assert_eq!(liveness.check(Some(t1), t1 + ms(1500)), None);
        assert!(liveness.is_disconnected());

        assert_eq!(liveness.check(Some(t1), t1 + ms(200)), Some(Transition::Connected));
        assert!(!liveness.is_disconnected());
    }
}
