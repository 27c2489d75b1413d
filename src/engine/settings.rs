use tracing::info;

use crate::limits::{MAX_HOLD_TTL_MS, MIN_HOLD_TTL_MS};
use crate::model::*;

use super::{Engine, EngineError};

/// Parse and apply one `key = value` change.
pub fn apply_setting(settings: &mut PlatformSettings, key: &str, value: &str) -> Result<(), EngineError> {
    let value = value.trim();
    let invalid = |why: &str| EngineError::InvalidArgument(format!("{key}: {why}"));
    match key.trim().to_ascii_lowercase().as_str() {
        "currency" => {
            if value.len() != 3 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid("expected a 3-letter currency code"));
            }
            settings.currency = value.to_ascii_uppercase();
        }
        "service_fee" => {
            let fee: Money = value.parse().map_err(|_| invalid("expected an integer amount"))?;
            if fee < 0 {
                return Err(invalid("cannot be negative"));
            }
            settings.service_fee = fee;
        }
        "commission_bps" => {
            let bps: u32 = value.parse().map_err(|_| invalid("expected basis points"))?;
            if bps > 10_000 {
                return Err(invalid("cannot exceed 10000"));
            }
            settings.commission_bps = bps;
        }
        "hold_ttl" => {
            let ttl: Ms = value.parse().map_err(|_| invalid("expected milliseconds"))?;
            if !(MIN_HOLD_TTL_MS..=MAX_HOLD_TTL_MS).contains(&ttl) {
                return Err(invalid("must be between one minute and one day"));
            }
            settings.hold_ttl_ms = ttl;
        }
        "week_start" => {
            settings.week_start = WeekStart::parse(value).ok_or_else(|| invalid("expected monday or sunday"))?;
        }
        _ => return Err(EngineError::InvalidArgument(format!("unknown setting: {key}"))),
    }
    Ok(())
}

impl Engine {
    pub async fn settings(&self) -> PlatformSettings {
        self.settings.read().await.clone()
    }

    /// Apply every change or none, then persist the result as one event.
    pub async fn update_settings(&self, changes: Vec<(String, String)>) -> Result<PlatformSettings, EngineError> {
        let mut guard = self.settings.write().await;
        let mut next = guard.clone();
        for (key, value) in &changes {
            apply_setting(&mut next, key, value)?;
        }
        if next == *guard {
            return Ok(next);
        }

        let event = Event::SettingsUpdated { settings: next.clone() };
        self.wal_append(&event).await?;
        *guard = next.clone();
        info!(
            "settings updated: currency={} service_fee={} commission_bps={} hold_ttl_ms={} week_start={}",
            next.currency,
            next.service_fee,
            next.commission_bps,
            next.hold_ttl_ms,
            next.week_start.as_str()
        );
        Ok(next)
    }
}
