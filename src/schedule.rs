use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScheduleConfig;
use crate::error::{BackupError, Result};

/// Upper bound for searching the next cron match
const CRON_SEARCH_DAYS: i64 = 366 * 5;

/// A rule deciding when the next backup cycle starts
pub trait Trigger: Send + Sync + fmt::Debug {
    /// First fire time strictly after `after`, in wall-clock (local) time
    fn next_naive(&self, after: NaiveDateTime) -> Option<NaiveDateTime>;

    /// Human-readable form for logs
    fn describe(&self) -> String;

    /// First fire time strictly after `after`, skipping wall-clock times that
    /// do not exist locally (DST gaps)
    fn next_fire_time(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut cursor = after.naive_local();
        for _ in 0..8 {
            let next = self.next_naive(cursor)?;
            if let Some(resolved) = Local.from_local_datetime(&next).earliest() {
                return Some(resolved);
            }
            cursor = next;
        }
        None
    }
}

/// Fires once per day at a fixed time of day
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTrigger {
    at: NaiveTime,
}

impl DailyTrigger {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// Accepts `HH:MM` or `HH:MM:SS`
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .map(Self::new)
            .map_err(|_| BackupError::config(format!("invalid schedule time '{}', expected HH:MM", value)))
    }
}

impl Trigger for DailyTrigger {
    fn next_naive(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = after.date().and_time(self.at);
        if today > after {
            Some(today)
        } else {
            after.date().succ_opt().map(|d| d.and_time(self.at))
        }
    }

    fn describe(&self) -> String {
        format!("daily at {}", self.at.format("%H:%M:%S"))
    }
}

/// Five-field cron expression: minute hour day-of-month month day-of-week
#[derive(Debug, Clone, PartialEq)]
pub struct CronTrigger {
    expr: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_any: bool,
    dow_any: bool,
}

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl CronTrigger {
    pub fn parse(expr: &str) -> Result<Self> {
        let expanded = match expr.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(BackupError::config(format!(
                "cron expression '{}' must have 5 fields, found {}",
                expr,
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, None, expr)?;
        let hours = parse_field(fields[1], 0, 23, None, expr)?;
        let days_of_month = parse_field(fields[2], 1, 31, None, expr)?;
        let months = parse_field(fields[3], 1, 12, Some((MONTH_NAMES, 1)), expr)?;
        let mut days_of_week = parse_field(fields[4], 0, 7, Some((DAY_NAMES, 0)), expr)?;
        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            expr: expr.trim().to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_any: fields[2].starts_with('*'),
            dow_any: fields[4].starts_with('*'),
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_any || self.dow_any {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl Trigger for CronTrigger {
    fn next_naive(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start = after
            .date()
            .and_hms_opt(after.hour(), after.minute(), 0)?
            + ChronoDuration::minutes(1);
        let limit = start + ChronoDuration::days(CRON_SEARCH_DAYS);
        let mut t = start;

        while t <= limit {
            if !bit(self.months, t.month()) {
                let (y, m) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + ChronoDuration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += ChronoDuration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn describe(&self) -> String {
        format!("cron '{}'", self.expr)
    }
}

fn bit(mask: u64, n: u32) -> bool {
    mask & (1u64 << n) != 0
}

fn parse_value(token: &str, names: Option<(&[&str], u32)>, expr: &str) -> Result<u32> {
    if let Ok(n) = token.parse::<u32>() {
        return Ok(n);
    }
    if let Some((names, offset)) = names {
        let lower = token.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lower) {
            return Ok(idx as u32 + offset);
        }
    }
    Err(BackupError::config(format!(
        "invalid value '{}' in cron expression '{}'",
        token, expr
    )))
}

fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
    expr: &str,
) -> Result<u64> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| {
                    BackupError::config(format!("invalid step '{}' in cron expression '{}'", step, expr))
                })?;
                if step == 0 {
                    return Err(BackupError::config(format!(
                        "zero step in cron expression '{}'",
                        expr
                    )));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, names, expr)?, parse_value(b, names, expr)?)
        } else {
            let v = parse_value(range, names, expr)?;
            // "5/15" means "from 5 to the end, every 15"
            if step.is_some() { (v, max) } else { (v, v) }
        };

        if lo < min || hi > max || lo > hi {
            return Err(BackupError::config(format!(
                "value out of range in field '{}' of cron expression '{}'",
                field, expr
            )));
        }

        let step = step.unwrap_or(1);
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }

    Ok(mask)
}

/// Build the trigger selected by the schedule section; `None` means run once
pub fn trigger_from_config(schedule: &ScheduleConfig) -> Result<Option<Box<dyn Trigger>>> {
    let trigger: Box<dyn Trigger> = match (&schedule.time, &schedule.cron) {
        (Some(_), Some(_)) => {
            return Err(BackupError::config(
                "schedule.time and schedule.cron are mutually exclusive",
            ));
        }
        (Some(time), None) => Box::new(DailyTrigger::parse(time)?),
        (None, Some(cron)) => Box::new(CronTrigger::parse(cron)?),
        (None, None) => return Ok(None),
    };

    if trigger.next_naive(Local::now().naive_local()).is_none() {
        return Err(BackupError::config(format!(
            "schedule {} never fires",
            trigger.describe()
        )));
    }
    Ok(Some(trigger))
}

/// Single-job cooperative loop: polls the trigger and runs the job to completion
pub struct Scheduler {
    trigger: Box<dyn Trigger>,
    poll_interval: Duration,
    next: Option<DateTime<Local>>,
}

impl Scheduler {
    pub fn new(trigger: Box<dyn Trigger>, poll_interval: Duration) -> Self {
        let next = trigger.next_fire_time(Local::now());
        Self {
            trigger,
            poll_interval,
            next,
        }
    }

    /// Start from an explicit reference time
    pub fn starting_at(trigger: Box<dyn Trigger>, poll_interval: Duration, now: DateTime<Local>) -> Self {
        let next = trigger.next_fire_time(now);
        Self {
            trigger,
            poll_interval,
            next,
        }
    }

    pub fn next_run(&self) -> Option<DateTime<Local>> {
        self.next
    }

    /// True when a run is due at `now`; advances to the following fire time
    pub fn poll(&mut self, now: DateTime<Local>) -> bool {
        match self.next {
            Some(next) if now >= next => {
                self.next = self.trigger.next_fire_time(now);
                true
            }
            _ => false,
        }
    }

    /// Run until Ctrl-C or until the job returns an error (fatal for the process)
    pub async fn run<F, Fut>(&mut self, job: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let shutdown = CancellationToken::new();
        // One listener for the whole run, so a Ctrl-C during a cycle is not lost
        let listener = tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));
        let result = self.run_until(job, &shutdown).await;
        listener.abort();
        result
    }

    /// Like [`Scheduler::run`], stopping when `shutdown` is cancelled. A running
    /// cycle is always finished first.
    pub async fn run_until<F, Fut>(&mut self, mut job: F, shutdown: &CancellationToken) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(first) = self.next else {
            return Err(BackupError::config(format!(
                "schedule {} never fires",
                self.trigger.describe()
            )));
        };
        info!(schedule = %self.trigger.describe(), next_run = %first, "Scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Stopping scheduler");
                    return Ok(());
                }
            }

            if !self.poll(Local::now()) {
                continue;
            }

            job().await?;

            // Ticks missed while the job was running are skipped
            self.next = self.trigger.next_fire_time(Local::now());
            if shutdown.is_cancelled() {
                info!("Stopping scheduler after the current cycle");
                return Ok(());
            }
            match self.next {
                Some(next) => info!(next_run = %next, "Next backup scheduled"),
                None => {
                    warn!(schedule = %self.trigger.describe(), "No further fire times, stopping");
                    return Ok(());
                }
            }
        }
    }
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown requested");
            shutdown.cancel();
        }
        Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
    }
}
