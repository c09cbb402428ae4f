//! Closed enumerations persisted as text
//!
//! Each enum stores and serializes as its lowercase wire string.

use calltrack_common::{Error, Result};

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Decode a stored column value
            pub fn from_db(value: &str) -> Result<Self> {
                Self::parse(value).ok_or_else(|| {
                    Error::Internal(format!("Invalid {} value '{}'", stringify!($name), value))
                })
            }

            /// Wire strings, for JSON schemas
            pub fn wire_values() -> Vec<&'static str> {
                Self::ALL.iter().map(|v| v.as_str()).collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::parse(&value).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid {} '{}'", stringify!($name), value))
                })
            }
        }
    };
}

string_enum! {
    /// Provider call state
    CallStatus {
        Queued => "queued",
        Ringing => "ringing",
        InProgress => "in-progress",
        Completed => "completed",
        Busy => "busy",
        Failed => "failed",
        NoAnswer => "no-answer",
        Canceled => "canceled",
        Unknown => "unknown",
    }
}

impl CallStatus {
    /// Map a provider status string; unrecognized values become `Unknown`
    pub fn from_provider(value: &str) -> Self {
        Self::parse(value.trim().to_ascii_lowercase().as_str()).unwrap_or(CallStatus::Unknown)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Busy
                | CallStatus::Failed
                | CallStatus::NoAnswer
                | CallStatus::Canceled
        )
    }

    /// Terminal without a conversation
    pub fn is_not_connected(&self) -> bool {
        self.is_terminal() && *self != CallStatus::Completed
    }

    /// Position in the forward progression; all terminal states share the top
    fn rank(&self) -> u8 {
        match self {
            CallStatus::Unknown => 0,
            CallStatus::Queued => 1,
            CallStatus::Ringing => 2,
            CallStatus::InProgress => 3,
            _ => 4,
        }
    }

    /// Stored states this status may overwrite
    ///
    /// Only forward moves out of a non-terminal state; `Unknown` replaces nothing.
    pub fn supersedes(&self) -> Vec<CallStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|stored| !stored.is_terminal() && stored.rank() < self.rank())
            .collect()
    }
}

string_enum! {
    CallResult {
        None => "none",
        NotConnected => "not_connected",
        AppointmentRequested => "appointment_requested",
        AppointmentBooked => "appointment_booked",
        AppointmentRescheduled => "appointment_rescheduled",
        AppointmentCancelled => "appointment_cancelled",
        CallTransferred => "call_transferred",
        NotInterested => "not_interested",
        FollowUp => "follow_up",
        Other => "other",
    }
}

string_enum! {
    CallIntent {
        None => "none",
        Purchase => "purchase",
        TradeIn => "trade_in",
        Finance => "finance",
        Credit => "credit",
        Appointment => "appointment",
        Other => "other",
    }
}

string_enum! {
    CallDepartment {
        None => "none",
        Sales => "sales",
        Service => "service",
        Parts => "parts",
        Other => "other",
    }
}

string_enum! {
    CallDirection {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

string_enum! {
    TrackingNumberStatus {
        Active => "active",
        Suspended => "suspended",
        Releasing => "releasing",
        Released => "released",
    }
}

string_enum! {
    RouteStatus {
        Active => "active",
        Suspended => "suspended",
        Deleted => "deleted",
    }
}

string_enum! {
    /// Role of a diarized speaker
    SpeakerRole {
        Salesperson => "salesperson",
        Client => "client",
        Unknown => "unknown",
    }
}

impl Default for SpeakerRole {
    fn default() -> Self {
        SpeakerRole::Unknown
    }
}
