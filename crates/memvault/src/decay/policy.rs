//! Importance decay curve and eligibility rules

use chrono::{DateTime, Duration, Utc};

use crate::config::DecayConfig;
use crate::error::{MemvaultError, Result};
use crate::record::{Importance, Record};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Importance after `idle` time without use.
///
/// `importance * min(1, exp(-decay_rate * idle_days) * (1 + access_boost * ln(1 + access_count)))`,
/// rounded. Never increases importance. May return 0.
pub fn decayed_importance(
    importance: Importance,
    decay_rate: f64,
    idle: Duration,
    access_count: u32,
    access_boost: f64,
) -> i64 {
    let idle_days = idle.num_seconds().max(0) as f64 / SECONDS_PER_DAY;
    let fade = (-decay_rate * idle_days).exp();
    let reinforcement = 1.0 + access_boost * (1.0 + f64::from(access_count)).ln();
    let factor = (fade * reinforcement).min(1.0);
    (f64::from(importance.get()) * factor).round() as i64
}

/// What a tick should do to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayOutcome {
    /// Not due, or the rounded importance did not move
    Unchanged,
    Decayed(Importance),
    /// Fell below the floor; the record is deleted
    Expired { decayed: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayPolicy {
    pub interval: Duration,
    pub grace_period: Duration,
    pub min_importance: Importance,
    pub access_boost: f64,
}

impl DecayPolicy {
    pub fn from_config(config: &DecayConfig) -> Result<Self> {
        if config.interval_secs == 0 {
            return Err(MemvaultError::Config(
                "decay.interval_secs must be at least 1".to_string(),
            ));
        }
        if !(config.access_boost.is_finite() && config.access_boost >= 0.0) {
            return Err(MemvaultError::Config(format!(
                "decay.access_boost {} must be non-negative",
                config.access_boost
            )));
        }
        let min_importance = Importance::new(i64::from(config.min_importance))
            .map_err(|e| MemvaultError::Config(format!("decay.min_importance: {e}")))?;
        let hours = i64::try_from(config.grace_period_hours)
            .map_err(|_| MemvaultError::Config("decay.grace_period_hours is too large".to_string()))?;
        let seconds = i64::try_from(config.interval_secs)
            .map_err(|_| MemvaultError::Config("decay.interval_secs is too large".to_string()))?;

        Ok(Self {
            interval: Duration::seconds(seconds),
            grace_period: Duration::hours(hours),
            min_importance,
            access_boost: config.access_boost,
        })
    }

    /// Start of the tick window containing `now`, aligned to the epoch
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(interval) = self.interval.num_microseconds().filter(|i| *i > 0) else {
            return now;
        };
        let micros = now.timestamp_micros();
        DateTime::from_timestamp_micros(micros - micros.rem_euclid(interval)).unwrap_or(now)
    }

    /// Active, idle past the grace period, and untouched since this window
    /// began.
    pub fn is_eligible(&self, record: &Record, now: DateTime<Utc>) -> bool {
        record.is_active()
            && now - record.accessed_at > self.grace_period
            && record.updated_at < self.window_start(now)
    }

    pub fn evaluate(&self, record: &Record, now: DateTime<Utc>) -> DecayOutcome {
        if !self.is_eligible(record, now) {
            return DecayOutcome::Unchanged;
        }

        // Earlier ticks already charged the time up to `updated_at`
        let since = (record.accessed_at + self.grace_period).max(record.updated_at);
        let decayed = decayed_importance(
            record.importance,
            record.decay_rate,
            now - since,
            record.access_count,
            self.access_boost,
        );

        if decayed < i64::from(self.min_importance.get()) {
            return DecayOutcome::Expired { decayed };
        }
        match Importance::new(decayed) {
            Ok(importance) if importance < record.importance => DecayOutcome::Decayed(importance),
            _ => DecayOutcome::Unchanged,
        }
    }
}

impl Default for DecayPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::hours(1),
            grace_period: Duration::hours(24),
            min_importance: Importance::clamped(1),
            access_boost: 0.1,
        }
    }
}
