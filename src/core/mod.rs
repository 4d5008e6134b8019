//! Core business logic - framework-agnostic services over a `DatabaseConnection`.
//!
//! Every function here is independent of HTTP, MQTT or WebSocket concerns and
//! returns [`crate::errors::Result`].

/// Declares a status-like enum stored as a string column.
///
/// Generates `as_str`, `ALL`, `Display`, `FromStr` and serde impls that use the
/// same string values as the database.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $($(#[$vmeta])* #[serde(rename = $value)] $variant),+
        }

        impl $name {
            /// Every variant in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Value stored in the database and sent over the wire.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::Error;

            fn from_str(s: &str) -> crate::errors::Result<Self> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    other => Err(crate::errors::Error::Validation {
                        message: format!("invalid {}: {other}", stringify!($name)),
                    }),
                }
            }
        }
    };
}

pub(crate) use string_enum;

/// Alerts raised from telemetry and their lifecycle
pub mod alert;
/// Registration, login, tokens, sessions and API keys
pub mod auth;
/// Fixed-table cost calculator and persisted budgets
pub mod budget;
/// Device registry, status and maintenance heuristics
pub mod device;
/// Liveness, readiness and aggregated health reports
pub mod health;
/// Production orders created from approved budgets
pub mod production;
/// Project CRUD, progress and derived metrics
pub mod project;
/// Token bucket rate limiting
pub mod rate_limit;
/// Telemetry samples recorded for devices
pub mod telemetry;

/// Rounds to two decimal places, the precision used for every price.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;

    string_enum! {
        enum Colour {
            Red => "red",
            DarkBlue => "dark_blue",
        }
    }

    #[test]
    fn test_string_enum_roundtrip() {
        assert_eq!(Colour::DarkBlue.as_str(), "dark_blue");
        assert_eq!("red".parse::<Colour>().ok(), Some(Colour::Red));
        assert!("green".parse::<Colour>().is_err());
        assert_eq!(Colour::ALL.len(), 2);
        assert_eq!(Colour::Red.to_string(), "red");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005_1), 1.01);
        assert_eq!(round2(2.0), 2.0);
        assert_eq!(round2(-3.456), -3.46);
    }
}
