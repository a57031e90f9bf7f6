use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, Utc, Weekday};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::database::{self, DbPool};
use crate::engine::{CancelToken, HarvestEngine};
use crate::models::JobSchedule;

const TICK: Duration = Duration::from_secs(60);

/// Interval-based scraping campaigns. Jobs live in the `scheduled_jobs`
/// table and are re-read every tick, so jobs added from the CLI take effect
/// without a restart. Due jobs fire one at a time, matching the engine's
/// sequential source discipline.
pub struct HarvestScheduler {
    engine: Arc<HarvestEngine>,
    pool: DbPool,
    cancel: CancelToken,
}

impl HarvestScheduler {
    pub fn new(engine: Arc<HarvestEngine>, pool: DbPool) -> Self {
        Self {
            engine,
            pool,
            cancel: CancelToken::new(),
        }
    }

    /// Token that stops the loop at the next tick (and cancels an in-flight
    /// run between pages).
    pub fn stop_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn start(self) -> JoinHandle<()> {
        let engine = self.engine;
        let pool = self.pool;
        let cancel = self.cancel;

        tokio::spawn(async move {
            info!("Scheduler started (tick {:?})", TICK);
            loop {
                if cancel.is_cancelled() {
                    info!("Scheduler stopped");
                    return;
                }

                if let Err(e) = run_due_jobs(&engine, &pool, &cancel).await {
                    error!("Scheduler tick failed: {}", e);
                }

                tokio::time::sleep(TICK).await;
            }
        })
    }
}

/// A job is due when its source has no run since the schedule's most recent
/// firing instant.
async fn run_due_jobs(
    engine: &HarvestEngine,
    pool: &DbPool,
    cancel: &CancelToken,
) -> crate::error::Result<()> {
    let jobs = database::load_scheduled_jobs(pool).await?;

    for job in jobs {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let last = database::last_run_started_at(pool, job.source_id).await?;
        if !is_due(&job.schedule, last, Utc::now()) {
            continue;
        }

        info!(
            "Job {} due ({}), scraping source {}",
            job.job_id, job.schedule, job.source_id
        );
        let max_leads = job.max_leads.map(|n| n as usize);
        match engine
            .run_scraper_with_cancel(job.source_id, max_leads, cancel)
            .await
        {
            Ok(result) => info!(
                "Job {} finished: {} saved, {} duplicates, {} errors",
                job.job_id, result.leads_saved, result.leads_duplicate, result.error_count
            ),
            Err(e) => error!("Job {} failed: {}", job.job_id, e),
        }
    }

    Ok(())
}

/// Pure due-ness check. A source with no run at all is always due; otherwise
/// interval jobs fire when the interval has elapsed since the last run, and
/// fixed-time jobs fire when the last run predates the schedule's most recent
/// firing instant.
fn is_due(schedule: &JobSchedule, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last) = last_run else {
        return true;
    };

    match schedule {
        JobSchedule::Interval { minutes } => now - last >= ChronoDuration::minutes(*minutes),
        JobSchedule::DailyAt { time } => last < most_recent_daily(*time, now),
        JobSchedule::WeeklyAt { weekday, time } => {
            last < most_recent_weekly(*weekday, *time, now)
        }
    }
}

fn most_recent_daily(time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time).and_utc();
    if today <= now {
        today
    } else {
        today - ChronoDuration::days(1)
    }
}

fn most_recent_weekly(weekday: Weekday, time: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = (now.date_naive().weekday().num_days_from_monday() + 7
        - weekday.num_days_from_monday())
        % 7;
    let instant = (now.date_naive() - ChronoDuration::days(days_back as i64))
        .and_time(time)
        .and_utc();
    if instant <= now {
        instant
    } else {
        instant - ChronoDuration::days(7)
    }
}
