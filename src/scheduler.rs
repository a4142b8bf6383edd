// src/scheduler.rs
// Daily trigger: sleep until the configured local HH:MM, run the pipeline,
// repeat. Failures are logged and the loop keeps going.

use anyhow::Result;
use chrono::{DateTime, Local, TimeZone};
use tracing::{error, info};

use crate::config::Settings;
use crate::pipeline;
use crate::store::today_utc;

/// Next occurrence of `hour:minute` strictly after `now`, in `now`'s
/// timezone. Skips over nonexistent local times (DST gaps).
pub fn next_occurrence<Tz: TimeZone>(now: DateTime<Tz>, hour: u32, minute: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        if let Some(naive) = date.and_hms_opt(hour, minute, 0) {
            if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                if candidate > now {
                    return candidate;
                }
            }
        }
        date = date.succ_opt().expect("date overflow");
    }
}

/// Blocking daily scheduler. Runs the full pipeline once per day at the
/// configured time.
pub async fn run_daily(cfg: &Settings) -> Result<()> {
    let (hour, minute) = cfg.schedule_hm()?;
    info!(schedule = %cfg.schedule_time, "scheduler started");

    loop {
        let now = Local::now();
        let next = next_occurrence(now, hour, minute);
        let wait = (next - now)
            .to_std()
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        info!(next = %next.to_rfc3339(), wait_secs = wait.as_secs(), "sleeping until next run");
        tokio::time::sleep(wait).await;

        // Run dates are UTC days, matching how fetched papers are bucketed.
        let run_date = today_utc();
        if let Err(e) = pipeline::run(cfg, &run_date).await {
            error!(date = %run_date, error = ?e, "scheduled pipeline run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn same_day_when_time_is_still_ahead() {
        let now = "2024-01-05T06:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = next_occurrence(now, 8, 30);
        assert_eq!(next.to_rfc3339(), "2024-01-05T08:30:00+00:00");
    }

    #[test]
    fn next_day_when_time_already_passed() {
        let now = "2024-01-05T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = next_occurrence(now, 8, 30);
        assert_eq!(next.to_rfc3339(), "2024-01-06T08:30:00+00:00");
    }

    #[test]
    fn exact_boundary_rolls_to_next_day() {
        let now = "2024-01-05T08:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let next = next_occurrence(now, 8, 30);
        assert_eq!(next.to_rfc3339(), "2024-01-06T08:30:00+00:00");
    }
}
