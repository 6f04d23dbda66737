//! Cron triggers attached to a pipeline's `on` list.

use chrono::{DateTime, Utc};
use conveyor_core::error::ConfigError;
use cron::Schedule;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One cron schedule. The expression is kept verbatim for display and
/// round-tripping; the parsed [`Schedule`] drives generation.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub expr: String,
    pub timezone: Option<String>,
    schedule: Schedule,
}

impl Trigger {
    /// Parse a cron expression. Five-field expressions get a `0` seconds
    /// column prepended; six- and seven-field expressions pass through.
    pub fn parse(expr: &str) -> Result<Self, ConfigError> {
        Self::with_timezone(expr, None)
    }

    pub fn with_timezone(expr: &str, timezone: Option<String>) -> Result<Self, ConfigError> {
        let fields = expr.split_whitespace().count();
        let normalized = if fields == 5 {
            format!("0 {expr}")
        } else {
            expr.to_string()
        };
        let schedule = Schedule::from_str(&normalized).map_err(|err| ConfigError::InvalidCron {
            expr: expr.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            timezone,
            schedule,
        })
    }

    /// The next firing time strictly after `instant`.
    pub fn next_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&instant).next()
    }

    /// All firing times strictly after `instant`, ascending.
    pub fn upcoming(&self, instant: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> {
        self.schedule.clone().after_owned(instant)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl PartialEq for Trigger {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr && self.timezone == other.timezone
    }
}

impl Serialize for Trigger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.timezone {
            None => serializer.serialize_str(&self.expr),
            Some(tz) => {
                use serde::ser::SerializeMap;
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("cron", &self.expr)?;
                map.serialize_entry("timezone", tz)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TriggerVisitor;

        impl<'de> Visitor<'de> for TriggerVisitor {
            type Value = Trigger;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cron expression string or a {cron, timezone} map")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Trigger, E> {
                Trigger::parse(value).map_err(de::Error::custom)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Trigger, A::Error> {
                let mut cron: Option<String> = None;
                let mut timezone: Option<String> = None;
                while let Some(key) = access.next_key::<String>()? {
                    match key.as_str() {
                        "cron" => cron = Some(access.next_value()?),
                        "timezone" => timezone = Some(access.next_value()?),
                        other => {
                            return Err(de::Error::unknown_field(other, &["cron", "timezone"]))
                        }
                    }
                }
                let cron = cron.ok_or_else(|| de::Error::missing_field("cron"))?;
                Trigger::with_timezone(&cron, timezone).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(TriggerVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_expression_normalized() {
        let trigger = Trigger::parse("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(after),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap())
        );
        assert_eq!(trigger.to_string(), "*/5 * * * *");
    }

    #[test]
    fn test_next_after_is_strict() {
        let trigger = Trigger::parse("0 * * * *").unwrap();
        let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(on_the_hour),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 4, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_expression_rejected() {
        assert!(matches!(
            Trigger::parse("not a cron"),
            Err(ConfigError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_deserialize_string_and_map_forms() {
        let from_str: Trigger = serde_yaml::from_str("\"*/10 * * * *\"").unwrap();
        assert_eq!(from_str.expr, "*/10 * * * *");

        let from_map: Trigger =
            serde_yaml::from_str("{cron: \"0 9 * * 1-5\", timezone: \"Etc/UTC\"}").unwrap();
        assert_eq!(from_map.expr, "0 9 * * 1-5");
        assert_eq!(from_map.timezone.as_deref(), Some("Etc/UTC"));
    }
}
