//! Closed code sets carried as integers on the wire.
//!
//! Each enum serialises to and from its integer code; any other integer is
//! rejected with [`NevError::InvalidCode`], which makes the whole inbound
//! message malformed rather than letting an unknown code into the state.

use serde::{Deserialize, Serialize};

use crate::NevError;

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        $name:ident default $default:ident {
            $($(#[$vmeta:meta])* $variant:ident = $code:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Integer code used on the wire.
            pub fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl TryFrom<i64> for $name {
            type Error = NevError;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                match code {
                    $(c if c == $code => Ok(Self::$variant),)+
                    other => Err(NevError::InvalidCode {
                        kind: stringify!($name),
                        code: other,
                    }),
                }
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.code()
            }
        }
    };
}

code_enum! {
    /// Requested drive mode.
    Mode default Idle {
        Idle = -1,
        Ctrl = 0,
        Nav = 1,
        Remote = 2,
    }
}

code_enum! {
    /// Command source currently selected by the vehicle mux.
    ActiveSource default None {
        None = -1,
        Nav = 0,
        Teleop = 1,
    }
}

code_enum! {
    /// Vehicle-side view of its link to this server.
    NetStatusCode default SocketErr {
        Ok = 0,
        HbDelay = 1,
        SocketErr = 2,
    }
}

code_enum! {
    /// Why the vehicle's bridge raised an e-stop.
    BridgeFlag default Ok {
        Ok = 0,
        ServerCmd = 1,
        Socket = 2,
        HbTimeout = 3,
        CtrlTimeout = 4,
    }
}

code_enum! {
    /// Why the vehicle's mux raised an e-stop.
    MuxFlag default Ok {
        Ok = 0,
        /// Remote requested with nav active but no teleop stream.
        RemoteNavNoTeleop = 1,
    }
}

/// Severity of a derived [`Alert`][crate::state::Alert].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    #[default]
    Ok,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_codes_roundtrip_through_json() {
        for mode in [Mode::Idle, Mode::Ctrl, Mode::Nav, Mode::Remote] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, mode.code().to_string());
            let back: Mode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(serde_json::from_str::<Mode>("3").is_err());
        assert!(serde_json::from_str::<BridgeFlag>("5").is_err());
        assert!(matches!(
            ActiveSource::try_from(9),
            Err(NevError::InvalidCode { kind: "ActiveSource", code: 9 })
        ));
    }

    #[test]
    fn defaults_match_power_on_values() {
        assert_eq!(Mode::default(), Mode::Idle);
        assert_eq!(ActiveSource::default(), ActiveSource::None);
        assert_eq!(NetStatusCode::default(), NetStatusCode::SocketErr);
        assert_eq!(BridgeFlag::default(), BridgeFlag::Ok);
    }

    #[test]
    fn alert_level_is_lowercase_text() {
        assert_eq!(serde_json::to_string(&AlertLevel::Warn).unwrap(), "\"warn\"");
    }
}
