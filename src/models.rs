use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// One unnormalized field set extracted from a single HTML listing element.
/// Lives only inside a scraping run; never persisted.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    pub fields: HashMap<String, String>,
}

impl RawRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    pub fn insert(&mut self, key: &str, value: String) {
        self.fields.insert(key.to_string(), value);
    }
}

/// A normalized business-listing record. `id` is None until the row is saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Option<i64>,
    pub source_id: i64,
    pub business_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub category: Option<String>,
    pub score: i64,
    pub duplicate_of: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(source_id: i64, business_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            source_id,
            business_name,
            phone: None,
            email: None,
            website: None,
            address: None,
            city: None,
            state: None,
            category: None,
            score: 0,
            duplicate_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// City/state alone do not count as a full address.
    pub fn has_full_address(&self) -> bool {
        self.address
            .as_deref()
            .map(|a| !a.trim().is_empty())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Outcome of one scraping run against one source.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: i64,
    pub source_id: i64,
    pub source_name: String,
    pub status: RunStatus,
    pub leads_scraped: u64,
    pub leads_saved: u64,
    pub leads_duplicate: u64,
    pub leads_skipped: u64,
    pub error_count: u64,
    pub errors: Vec<String>,
}

/// When a scheduled job should fire. Times are UTC, matching the run
/// timestamps they are compared against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobSchedule {
    /// Every N minutes, measured from the source's last run.
    Interval { minutes: i64 },
    /// Once a day at a fixed time.
    DailyAt { time: NaiveTime },
    /// Once a week on a fixed weekday and time.
    WeeklyAt { weekday: Weekday, time: NaiveTime },
}

impl fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSchedule::Interval { minutes } => write!(f, "every {} minutes", minutes),
            JobSchedule::DailyAt { time } => write!(f, "daily at {} UTC", time.format("%H:%M")),
            JobSchedule::WeeklyAt { weekday, time } => {
                write!(f, "every {} at {} UTC", weekday, time.format("%H:%M"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub leads: i64,
    pub total_runs: i64,
    pub completed_runs: i64,
    pub failed_runs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub total_sources: i64,
    pub enabled_sources: i64,
    pub total_leads: i64,
    pub sources: Vec<SourceStats>,
}
