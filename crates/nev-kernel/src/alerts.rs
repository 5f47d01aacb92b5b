//! [`AlertEvaluator`] – advisory rule engine.
//!
//! Each [`AlertRule`] inspects the aggregate and contributes at most one
//! [`Alert`].  Rules run in registration order, so the order of the returned
//! list is the priority order.  Evaluation is a pure function of the state and
//! the supplied `now`; nothing is carried across passes.

use std::time::{Duration, Instant};

use nev_types::{Alert, Mode, SharedState};

use crate::liveness::VEHICLE_TIMEOUT;

/// Velocity magnitude above which the vehicle counts as moving.
pub const MOTION_THRESHOLD: f64 = 0.05;

// ────────────────────────────────────────────────────────────────────────────
// Rule trait
// ────────────────────────────────────────────────────────────────────────────

/// A single advisory condition.
pub trait AlertRule: Send + Sync {
    /// Short identifier, used in logs.
    fn name(&self) -> &str;

    /// Return the alert this rule raises for `state`, if any.
    fn evaluate(&self, state: &SharedState, now: Instant) -> Option<Alert>;
}

// ────────────────────────────────────────────────────────────────────────────
// AlertEvaluator
// ────────────────────────────────────────────────────────────────────────────

/// Ordered collection of [`AlertRule`]s.
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use nev_kernel::alerts::AlertEvaluator;
/// use nev_types::SharedState;
///
/// let evaluator = AlertEvaluator::standard();
/// let mut state = SharedState::new();
/// state.station_connected = true;
///
/// assert!(evaluator.evaluate(&state, Instant::now()).is_empty());
/// ```
pub struct AlertEvaluator {
    rules: Vec<Box<dyn AlertRule>>,
}

impl AlertEvaluator {
    /// An evaluator with no rules.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The built-in rule set in priority order.
    pub fn standard() -> Self {
        let mut evaluator = Self::empty();
        evaluator.add_rule(Box::new(MovingUnderEstop {
            threshold: MOTION_THRESHOLD,
        }));
        evaluator.add_rule(Box::new(EstopUnconfirmed));
        evaluator.add_rule(Box::new(IdleRemote));
        evaluator.add_rule(Box::new(VehicleSilence {
            timeout: VEHICLE_TIMEOUT,
        }));
        evaluator.add_rule(Box::new(StationUnavailable));
        evaluator
    }

    /// Append a rule; it runs after every rule registered before it.
    pub fn add_rule(&mut self, rule: Box<dyn AlertRule>) {
        self.rules.push(rule);
    }

    /// Evaluate every rule against `state`.
    pub fn evaluate(&self, state: &SharedState, now: Instant) -> Vec<Alert> {
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(state, now))
            .collect()
    }
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::standard()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Built-in rules
// ────────────────────────────────────────────────────────────────────────────

/// Vehicle confirms e-stop yet the arbitrated twist still shows motion.
pub struct MovingUnderEstop {
    pub threshold: f64,
}

impl AlertRule for MovingUnderEstop {
    fn name(&self) -> &str {
        "moving_under_estop"
    }

    fn evaluate(&self, state: &SharedState, _now: Instant) -> Option<Alert> {
        let moving = state.twist.final_lx.abs() > self.threshold
            || state.twist.final_az.abs() > self.threshold;
        (state.estop.is_estop && moving)
            .then(|| Alert::error("E-Stop active but vehicle is moving"))
    }
}

/// E-stop was commanded but the vehicle has not confirmed it yet.
pub struct EstopUnconfirmed;

impl AlertRule for EstopUnconfirmed {
    fn name(&self) -> &str {
        "estop_unconfirmed"
    }

    fn evaluate(&self, state: &SharedState, _now: Instant) -> Option<Alert> {
        (state.control.estop && !state.estop.is_estop)
            .then(|| Alert::warn("E-Stop sent, waiting for vehicle confirmation"))
    }
}

/// Remote mode requested and enabled, but no teleop stream is driving it.
pub struct IdleRemote;

impl AlertRule for IdleRemote {
    fn name(&self) -> &str {
        "idle_remote"
    }

    fn evaluate(&self, state: &SharedState, _now: Instant) -> Option<Alert> {
        let mux = &state.mux;
        (mux.requested_mode == Mode::Remote && mux.remote_enabled && !mux.teleop_active)
            .then(|| Alert::warn("Remote mode active but no teleop commands received"))
    }
}

/// No vehicle telemetry for longer than `timeout`.
pub struct VehicleSilence {
    pub timeout: Duration,
}

impl AlertRule for VehicleSilence {
    fn name(&self) -> &str {
        "vehicle_silence"
    }

    fn evaluate(&self, state: &SharedState, now: Instant) -> Option<Alert> {
        let age = now.saturating_duration_since(state.last_vehicle_recv?);
        (age > self.timeout)
            .then(|| Alert::error(format!("No vehicle data for {:.1}s", age.as_secs_f64())))
    }
}

/// The station link is not live, so nobody can drive.
pub struct StationUnavailable;

impl AlertRule for StationUnavailable {
    fn name(&self) -> &str {
        "station_unavailable"
    }

    fn evaluate(&self, state: &SharedState, _now: Instant) -> Option<Alert> {
        (!state.station_connected).then(|| Alert::warn("Station not connected, control unavailable"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nev_types::AlertLevel;

    fn quiet_state() -> SharedState {
        let mut state = SharedState::new();
        state.station_connected = true;
        state
    }

    fn messages(alerts: &[Alert]) -> Vec<&str> {
        alerts.iter().map(|a| a.message.as_str()).collect()
    }

    #[test]
    fn quiet_state_raises_nothing() {
        let alerts = AlertEvaluator::standard().evaluate(&quiet_state(), Instant::now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn moving_under_estop_is_an_error() {
        let mut state = quiet_state();
        state.estop.is_estop = true;
        state.twist.final_lx = 0.2;

        let alerts = AlertEvaluator::standard().evaluate(&state, Instant::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Error);
        assert!(alerts[0].message.contains("moving"));
    }

    #[test]
    fn small_residual_motion_under_estop_is_tolerated() {
        let mut state = quiet_state();
        state.estop.is_estop = true;
        state.twist.final_lx = 0.03;
        state.twist.final_az = 0.01;

        let alerts = AlertEvaluator::standard().evaluate(&state, Instant::now());
        assert!(alerts.is_empty(), "unexpected alerts: {alerts:?}");
    }

    #[test]
    fn unconfirmed_estop_warns() {
        let mut state = quiet_state();
        state.control.estop = true;

        let alerts = AlertEvaluator::standard().evaluate(&state, Instant::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warn);
    }

    #[test]
    fn idle_remote_warns_until_teleop_is_active() {
        let mut state = quiet_state();
        state.mux.requested_mode = Mode::Remote;
        state.mux.remote_enabled = true;
        assert_eq!(AlertEvaluator::standard().evaluate(&state, Instant::now()).len(), 1);

        state.mux.teleop_active = true;
        assert!(AlertEvaluator::standard().evaluate(&state, Instant::now()).is_empty());
    }

    #[test]
    fn vehicle_silence_reports_elapsed_seconds() {
        let start = Instant::now();
        let mut state = quiet_state();
        state.last_vehicle_recv = Some(start);

        let now = start + Duration::from_millis(3100);
        let alerts = AlertEvaluator::standard().evaluate(&state, now);
        assert_eq!(messages(&alerts), vec!["No vehicle data for 3.1s"]);

        let fresh = start + Duration::from_millis(2900);
        assert!(AlertEvaluator::standard().evaluate(&state, fresh).is_empty());
    }

    #[test]
    fn no_telemetry_ever_is_not_silence() {
        let state = quiet_state();
        let later = Instant::now() + Duration::from_secs(60);
        assert!(AlertEvaluator::standard().evaluate(&state, later).is_empty());
    }

    #[test]
    fn alerts_follow_priority_order() {
        let start = Instant::now();
        let mut state = SharedState::new();
        state.estop.is_estop = true;
        state.twist.final_az = -0.3;
        state.mux.requested_mode = Mode::Remote;
        state.mux.remote_enabled = true;
        state.last_vehicle_recv = Some(start);
        let now = start + Duration::from_secs(5);

        let evaluator = AlertEvaluator::standard();
        let first = evaluator.evaluate(&state, now);
        let levels: Vec<_> = first.iter().map(|a| a.level).collect();
        assert_eq!(
            levels,
            vec![AlertLevel::Error, AlertLevel::Warn, AlertLevel::Error, AlertLevel::Warn]
        );
        assert!(first[3].message.contains("Station"));

        // Same input, same output.
        assert_eq!(evaluator.evaluate(&state, now), first);
    }
}
