//! The [`SharedState`] aggregate.
//!
//! One instance exists for the lifetime of the process and is owned by the
//! control loop.  Telemetry buckets are only ever changed through their
//! generated `*Patch` types: a patch carries `Some` for every field present in
//! the inbound message, and [`apply`](MuxStatus::apply) overwrites exactly
//! those fields.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codes::{ActiveSource, AlertLevel, BridgeFlag, Mode, MuxFlag, NetStatusCode};

macro_rules! bucket {
    (
        $(#[$meta:meta])*
        $name:ident / $patch:ident {
            $($(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct $name {
            $($(#[$fmeta])* pub $field: $ty),+
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $($field: $default),+
                }
            }
        }

        #[doc = concat!("Partial update for [`", stringify!($name), "`]. Unknown keys are ignored.")]
        #[derive(Debug, Clone, Default, PartialEq, Deserialize)]
        pub struct $patch {
            $(#[serde(default)] pub $field: Option<$ty>),+
        }

        impl $name {
            /// Overwrite every field present in `patch`; absent fields keep
            /// their previous values.
            pub fn apply(&mut self, patch: &$patch) {
                $(
                    if let Some(value) = &patch.$field {
                        self.$field = value.clone();
                    }
                )+
            }
        }
    };
}

bucket! {
    /// Source-selection state reported by the vehicle mux.
    MuxStatus / MuxPatch {
        requested_mode: Mode = Mode::Idle,
        active_source: ActiveSource = ActiveSource::None,
        remote_enabled: bool = false,
        nav_active: bool = false,
        teleop_active: bool = false,
        final_active: bool = false,
    }
}

bucket! {
    /// Per-source and arbitrated velocities.
    TwistValues / TwistPatch {
        nav_lx: f64 = 0.0,
        nav_az: f64 = 0.0,
        teleop_lx: f64 = 0.0,
        teleop_az: f64 = 0.0,
        final_lx: f64 = 0.0,
        final_az: f64 = 0.0,
    }
}

bucket! {
    /// Link quality between vehicle and server.
    NetworkStatus / NetworkPatch {
        connected: bool = false,
        status_code: NetStatusCode = NetStatusCode::SocketErr,
        rtt_ms: f64 = 0.0,
        bandwidth_mbps: f64 = 0.0,
        bw_camera_mbps: f64 = 0.0,
        bw_telemetry_mbps: f64 = 0.0,
    }
}

bucket! {
    /// Drivetrain telemetry.
    HunterStatus / HunterPatch {
        linear_vel: f64 = 0.0,
        steering_angle: f64 = 0.0,
        vehicle_state: i64 = 0,
        control_mode: i64 = 0,
        error_code: i64 = 0,
        battery_voltage: f64 = 0.0,
    }
}

bucket! {
    /// Vehicle-confirmed stop state.
    EStopStatus / EStopPatch {
        is_estop: bool = false,
        bridge_flag: BridgeFlag = BridgeFlag::Ok,
        mux_flag: MuxFlag = MuxFlag::Ok,
    }
}

bucket! {
    /// Host health counters.  Fed by the `cpu`, `mem` and `net` topics.
    SystemResources / ResourcesPatch {
        cpu_phys: i64 = 0,
        cpu_logic: i64 = 0,
        cpu_usage: f64 = 0.0,
        cpu_temp: f64 = 0.0,
        cpu_load: f64 = 0.0,
        ram_total: u64 = 0,
        ram_used: u64 = 0,
        net_total_ifaces: i64 = 0,
        net_active_ifaces: i64 = 0,
        net_down_ifaces: i64 = 0,
    }
}

/// Commanded and observed control values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    pub mode: Mode,
    pub estop: bool,
    pub linear_x: f64,
    pub angular_z: f64,
    pub raw_speed: f64,
    pub raw_steer: f64,
    pub joystick_connected: bool,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: Mode::Idle,
            estop: false,
            linear_x: 0.0,
            angular_z: 0.0,
            raw_speed: 0.0,
            raw_steer: 0.0,
            joystick_connected: false,
        }
    }
}

/// A derived advisory.  Recomputed on every validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
}

impl Alert {
    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Warn,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Error,
            message: message.into(),
        }
    }
}

/// Free-form field map stored in one slot of an [`IndexedList`].
pub type FieldMap = serde_json::Map<String, Value>;

/// Slot capacity of every [`IndexedList`].
pub const MAX_INDEXED_SLOTS: usize = 64;

/// Sparse, grow-only positional list (GPUs, disk partitions, interfaces).
///
/// Slots are never removed or reordered.  Upserting past the end fills the
/// gap with empty maps.  Never grows past [`MAX_INDEXED_SLOTS`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndexedList(Vec<FieldMap>);

impl IndexedList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow to `idx + 1` slots if needed, then merge `fields` into slot `idx`.
    /// Returns `false` and leaves the list untouched when `idx` is out of range.
    pub fn upsert(&mut self, idx: usize, fields: FieldMap) -> bool {
        if idx >= MAX_INDEXED_SLOTS {
            return false;
        }
        if idx >= self.0.len() {
            self.0.resize_with(idx + 1, FieldMap::new);
        }
        self.0[idx].extend(fields);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&FieldMap> {
        self.0.get(idx)
    }
}

/// The canonical snapshot of vehicle, station and control state.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub mux: MuxStatus,
    pub twist: TwistValues,
    pub network: NetworkStatus,
    pub hunter: HunterStatus,
    pub estop: EStopStatus,
    pub resources: SystemResources,
    pub remote_enabled: bool,
    pub control: ControlState,
    pub alerts: Vec<Alert>,
    pub gpu_list: IndexedList,
    pub disk_partitions: IndexedList,
    pub net_interfaces: IndexedList,
    pub station_connected: bool,
    /// Monotonic time of the last vehicle telemetry update, `None` until the
    /// first one arrives.
    pub last_vehicle_recv: Option<Instant>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }
}
