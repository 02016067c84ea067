//! Periodic trigger for pipeline runs
//!
//! The job future is awaited to completion before the next tick is taken,
//! and ticks missed while a run was still going are skipped, so two runs
//! never overlap.

use super::error::ConfigError;
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl ScheduleUnit {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "seconds" => Ok(ScheduleUnit::Seconds),
            "minutes" => Ok(ScheduleUnit::Minutes),
            "hours" => Ok(ScheduleUnit::Hours),
            "days" => Ok(ScheduleUnit::Days),
            other => Err(ConfigError::InvalidValue(format!(
                "Invalid SCHEDULE_UNIT: {}. Must be one of seconds, minutes, hours, days.",
                other
            ))),
        }
    }

    fn seconds(&self) -> u64 {
        match self {
            ScheduleUnit::Seconds => 1,
            ScheduleUnit::Minutes => 60,
            ScheduleUnit::Hours => 3_600,
            ScheduleUnit::Days => 86_400,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleUnit::Seconds => "seconds",
            ScheduleUnit::Minutes => "minutes",
            ScheduleUnit::Hours => "hours",
            ScheduleUnit::Days => "days",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub interval: u64,
    pub unit: ScheduleUnit,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: 24,
            unit: ScheduleUnit::Hours,
        }
    }
}

impl ScheduleConfig {
    pub fn new(interval: u64, unit: ScheduleUnit) -> Result<Self, ConfigError> {
        if interval == 0 {
            return Err(ConfigError::InvalidValue(
                "SCHEDULE_INTERVAL must be at least 1".to_string(),
            ));
        }
        Ok(Self { interval, unit })
    }

    /// `SCHEDULE_INTERVAL` (default 24) and `SCHEDULE_UNIT` (default hours)
    pub fn from_env() -> Result<Self, ConfigError> {
        let interval = match env::var("SCHEDULE_INTERVAL") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::InvalidValue(format!("SCHEDULE_INTERVAL='{}' is not a number", raw))
            })?,
            Err(_) => 24,
        };
        let unit = match env::var("SCHEDULE_UNIT") {
            Ok(raw) => ScheduleUnit::parse(&raw)?,
            Err(_) => ScheduleUnit::Hours,
        };
        Self::new(interval, unit)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval.saturating_mul(self.unit.seconds()))
    }
}

/// Run `job` now and then once per configured period.
///
/// Stops after `max_runs` runs when given; otherwise runs until the
/// surrounding task is cancelled. Returns the number of completed runs.
pub async fn run_scheduled<F, Fut>(schedule: &ScheduleConfig, max_runs: Option<u64>, job: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    log::info!(
        "⏰ Scheduler started. Running every {} {}.",
        schedule.interval,
        schedule.unit.as_str()
    );
    run_every(schedule.period(), max_runs, job).await
}

async fn run_every<F, Fut>(period: Duration, max_runs: Option<u64>, mut job: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut runs = 0u64;
    loop {
        if max_runs.map_or(false, |max| runs >= max) {
            break;
        }
        timer.tick().await;

        let started = std::time::Instant::now();
        job().await;
        runs += 1;

        log::info!(
            "🔄 Scheduled run #{} finished in {}ms",
            runs,
            started.elapsed().as_millis()
        );
    }

    runs
}
