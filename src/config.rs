use std::env;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    /// HMAC secret shared with the payment processor. Webhooks are refused while unset.
    pub payment_webhook_secret: Option<String>,
    pub unpaid_appointment_ttl_minutes: i64,
    pub unpaid_sweep_interval_secs: u64,
}

/// Keep `raw` when it parses and lies in `range`, else fall back to `default`.
fn bounded<T>(name: &str, raw: Option<&str>, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display,
{
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if range.contains(&v) => v,
        _ => {
            tracing::warn!(
                var = name,
                value = raw,
                min = %range.start(),
                max = %range.end(),
                fallback = %default,
                "ignoring out-of-range config value"
            );
            default
        }
    }
}

fn parse_or<T>(name: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display,
{
    bounded(name, env::var(name).ok().as_deref(), default, range)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let payment_webhook_secret = env::var("PAYMENT_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours: parse_or("SESSION_TTL_HOURS", 24, 1..=24 * 365),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 10, 1..=500),
            payment_webhook_secret,
            unpaid_appointment_ttl_minutes: parse_or(
                "UNPAID_APPOINTMENT_TTL_MINUTES",
                30,
                1..=60 * 24 * 7,
            ),
            unpaid_sweep_interval_secs: parse_or("UNPAID_SWEEP_INTERVAL_SECS", 60, 1..=86_400),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_keeps_values_in_range() {
        assert_eq!(bounded("SESSION_TTL_HOURS", Some(" 48 "), 24i64, 1..=8760), 48);
        assert_eq!(bounded("SESSION_TTL_HOURS", None, 24i64, 1..=8760), 24);
        assert_eq!(bounded("SESSION_TTL_HOURS", Some(""), 24i64, 1..=8760), 24);
    }

    #[test]
    fn bounded_falls_back_on_garbage_and_extremes() {
        assert_eq!(bounded("SESSION_TTL_HOURS", Some("soon"), 24i64, 1..=8760), 24);
        assert_eq!(bounded("SESSION_TTL_HOURS", Some("0"), 24i64, 1..=8760), 24);
        assert_eq!(bounded("SESSION_TTL_HOURS", Some("-5"), 24i64, 1..=8760), 24);
        assert_eq!(
            bounded("UNPAID_APPOINTMENT_TTL_MINUTES", Some("9223372036854775807"), 30i64, 1..=10_080),
            30
        );
        assert_eq!(bounded("UNPAID_SWEEP_INTERVAL_SECS", Some("0"), 60u64, 1..=86_400), 60);
    }
}
