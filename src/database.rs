use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use mobc::{Manager, Pool};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{JobSchedule, Lead, RunStatus};
use crate::normalize::canonical_phone_digits;
use crate::sources::Source;

pub struct SqliteManager {
    db_path: String,
}

impl SqliteManager {
    pub fn new(db_path: String) -> Self {
        Self { db_path }
    }
}

#[async_trait::async_trait]
impl Manager for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        debug!("Opening database: {}", self.db_path);
        let conn = Connection::open(&self.db_path)?;

        // Some PRAGMAs return a result row; query_row swallows it either way.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous=NORMAL", [])?;
        conn.execute("PRAGMA foreign_keys=ON", [])?;

        init_database(&conn)?;
        Ok(conn)
    }

    async fn check(&self, conn: Self::Connection) -> std::result::Result<Self::Connection, Self::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(conn)
    }
}

pub type DbPool = Pool<SqliteManager>;

pub async fn create_db_pool(db_path: &str) -> Result<DbPool> {
    if db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
    }

    let manager = SqliteManager::new(db_path.to_string());
    let pool = Pool::builder().max_open(10).max_idle(5).build(manager);

    info!("✓ SQLite connection pool created: {}", db_path);
    Ok(pool)
}

fn init_database(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            source_type TEXT NOT NULL,
            base_url TEXT NOT NULL,
            pagination_type TEXT NOT NULL,
            selectors TEXT NOT NULL,
            rate_limit_delay REAL NOT NULL DEFAULT 3.0,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            business_name TEXT NOT NULL,
            phone TEXT,
            phone_digits TEXT,
            email TEXT,
            website TEXT,
            address TEXT,
            city TEXT,
            state TEXT,
            category TEXT,
            score INTEGER NOT NULL DEFAULT 0,
            duplicate_of INTEGER REFERENCES leads(id),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            leads_scraped INTEGER NOT NULL DEFAULT 0,
            leads_saved INTEGER NOT NULL DEFAULT 0,
            leads_duplicate INTEGER NOT NULL DEFAULT 0,
            leads_skipped INTEGER NOT NULL DEFAULT 0,
            error_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT UNIQUE NOT NULL,
            source_id INTEGER NOT NULL,
            schedule_kind TEXT NOT NULL DEFAULT 'interval',
            interval_minutes INTEGER,
            at_time TEXT,
            weekday INTEGER,
            max_leads INTEGER,
            enabled INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
        [],
    )?;

    // Blocking-key indexes for dedupe candidate lookups.
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_leads_phone_digits ON leads(phone_digits)",
        "CREATE INDEX IF NOT EXISTS idx_leads_email ON leads(email)",
        "CREATE INDEX IF NOT EXISTS idx_leads_name_city ON leads(business_name, city)",
        "CREATE INDEX IF NOT EXISTS idx_leads_source ON leads(source_id)",
        "CREATE INDEX IF NOT EXISTS idx_leads_score ON leads(score)",
        "CREATE INDEX IF NOT EXISTS idx_runs_source ON runs(source_id)",
        "CREATE INDEX IF NOT EXISTS idx_sources_enabled ON sources(enabled)",
    ];
    for index_sql in indexes {
        conn.execute(index_sql, [])?;
    }

    Ok(())
}

// ===== SOURCES =====

fn row_to_source(row: &Row<'_>) -> SqliteResult<Source> {
    let selectors_json: String = row.get("selectors")?;
    let selectors: HashMap<String, String> =
        serde_json::from_str(&selectors_json).unwrap_or_default();

    Ok(Source {
        id: row.get("id")?,
        name: row.get("name")?,
        source_type: row.get("source_type")?,
        base_url: row.get("base_url")?,
        pagination_type: row.get("pagination_type")?,
        selectors,
        rate_limit_delay: row.get("rate_limit_delay")?,
        enabled: row.get::<_, i64>("enabled")? != 0,
    })
}

pub async fn insert_source(
    pool: &DbPool,
    name: &str,
    source_type: &str,
    base_url: &str,
    pagination_type: &str,
    selectors: &HashMap<String, String>,
    rate_limit_delay: f64,
    enabled: bool,
) -> Result<i64> {
    let conn = pool.get().await?;
    let now = Utc::now().to_rfc3339();
    conn.execute(
        r#"
        INSERT INTO sources (name, source_type, base_url, pagination_type,
                             selectors, rate_limit_delay, enabled, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
        "#,
        params![
            name,
            source_type,
            base_url,
            pagination_type,
            serde_json::to_string(selectors).unwrap_or_else(|_| "{}".to_string()),
            rate_limit_delay,
            enabled as i64,
            now,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub async fn load_sources(pool: &DbPool, enabled_only: bool) -> Result<Vec<Source>> {
    let conn = pool.get().await?;
    let query = if enabled_only {
        "SELECT * FROM sources WHERE enabled = 1 ORDER BY id"
    } else {
        "SELECT * FROM sources ORDER BY id"
    };

    let mut stmt = conn.prepare(query)?;
    let sources = stmt
        .query_map([], row_to_source)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(sources)
}

pub async fn get_source(pool: &DbPool, source_id: i64) -> Result<Option<Source>> {
    let conn = pool.get().await?;
    let source = conn
        .query_row(
            "SELECT * FROM sources WHERE id = ?1",
            params![source_id],
            row_to_source,
        )
        .optional()?;
    Ok(source)
}

pub async fn source_name_exists(pool: &DbPool, name: &str) -> Result<bool> {
    let conn = pool.get().await?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sources WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ===== LEADS =====

fn row_to_lead(row: &Row<'_>) -> SqliteResult<Lead> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Lead {
        id: Some(row.get("id")?),
        source_id: row.get("source_id")?,
        business_name: row.get("business_name")?,
        phone: row.get("phone")?,
        email: row.get("email")?,
        website: row.get("website")?,
        address: row.get("address")?,
        city: row.get("city")?,
        state: row.get("state")?,
        category: row.get("category")?,
        score: row.get("score")?,
        duplicate_of: row.get("duplicate_of")?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Insert a batch of new leads in one transaction. Returns the number of
/// rows written.
pub async fn insert_leads(pool: &DbPool, leads: &[Lead]) -> Result<usize> {
    if leads.is_empty() {
        return Ok(0);
    }

    let conn = pool.get().await?;
    conn.execute("BEGIN IMMEDIATE", [])?;

    let insert = || -> SqliteResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO leads (source_id, business_name, phone, phone_digits, email,
                               website, address, city, state, category, score,
                               duplicate_of, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
        )?;
        for lead in leads {
            stmt.execute(params![
                lead.source_id,
                lead.business_name,
                lead.phone,
                phone_digits_key(lead),
                lead.email,
                lead.website,
                lead.address,
                lead.city,
                lead.state,
                lead.category,
                lead.score,
                lead.duplicate_of,
                lead.created_at.to_rfc3339(),
                lead.updated_at.to_rfc3339(),
            ])?;
        }
        Ok(leads.len())
    };

    match insert() {
        Ok(n) => {
            conn.execute("COMMIT", [])?;
            debug!("Committed batch of {} leads", n);
            Ok(n)
        }
        Err(e) => {
            let _ = conn.execute("ROLLBACK", []);
            Err(e.into())
        }
    }
}

/// Rewrite every mutable field of an existing lead after a merge. The score
/// passed in must already be recomputed for the merged field set.
pub async fn update_lead(pool: &DbPool, lead: &Lead) -> Result<()> {
    let id = lead
        .id
        .ok_or_else(|| crate::error::HarvestError::config("cannot update unsaved lead"))?;

    let conn = pool.get().await?;
    conn.execute(
        r#"
        UPDATE leads
        SET business_name = ?1, phone = ?2, phone_digits = ?3, email = ?4,
            website = ?5, address = ?6, city = ?7, state = ?8, category = ?9,
            score = ?10, updated_at = ?11
        WHERE id = ?12
        "#,
        params![
            lead.business_name,
            lead.phone,
            phone_digits_key(lead),
            lead.email,
            lead.website,
            lead.address,
            lead.city,
            lead.state,
            lead.category,
            lead.score,
            Utc::now().to_rfc3339(),
            id,
        ],
    )?;
    Ok(())
}

pub async fn get_lead(pool: &DbPool, lead_id: i64) -> Result<Option<Lead>> {
    let conn = pool.get().await?;
    let lead = conn
        .query_row(
            "SELECT * FROM leads WHERE id = ?1",
            params![lead_id],
            row_to_lead,
        )
        .optional()?;
    Ok(lead)
}

/// Canonical digit key persisted alongside the formatted phone so the
/// candidate query blocks on digits, not on formatting.
fn phone_digits_key(lead: &Lead) -> Option<String> {
    lead.phone
        .as_deref()
        .map(canonical_phone_digits)
        .filter(|d| !d.is_empty())
}

/// Fetch dedupe candidates sharing a blocking key with the given lead:
/// same canonical phone digits, same email, or same name prefix + city. Only
/// canonical rows (duplicate_of IS NULL) are candidates, and the ordering by
/// id keeps merge-target selection deterministic across runs.
pub async fn find_dedupe_candidates(pool: &DbPool, lead: &Lead) -> Result<Vec<Lead>> {
    let conn = pool.get().await?;

    let name_prefix: String = lead
        .business_name
        .to_lowercase()
        .chars()
        .take(4)
        .collect();
    let city = lead.city.as_deref().unwrap_or("").to_lowercase();

    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM leads
        WHERE duplicate_of IS NULL
          AND (
            (?1 IS NOT NULL AND phone_digits = ?1)
            OR (?2 IS NOT NULL AND email = ?2)
            OR (lower(substr(business_name, 1, 4)) = ?3
                AND lower(coalesce(city, '')) = ?4)
          )
        ORDER BY id
        "#,
    )?;

    let candidates = stmt
        .query_map(
            params![phone_digits_key(lead), lead.email, name_prefix, city],
            row_to_lead,
        )?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(candidates)
}

pub async fn count_leads(pool: &DbPool, source_id: Option<i64>) -> Result<i64> {
    let conn = pool.get().await?;
    let count = match source_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM leads WHERE source_id = ?1",
            params![id],
            |row| row.get(0),
        )?,
        None => conn.query_row("SELECT COUNT(*) FROM leads", [], |row| row.get(0))?,
    };
    Ok(count)
}

// ===== RUNS =====

pub async fn start_run(pool: &DbPool, source_id: i64) -> Result<i64> {
    let conn = pool.get().await?;
    conn.execute(
        "INSERT INTO runs (source_id, status, started_at) VALUES (?1, 'running', ?2)",
        params![source_id, Utc::now().to_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub async fn finish_run(
    pool: &DbPool,
    run_id: i64,
    status: RunStatus,
    leads_scraped: u64,
    leads_saved: u64,
    leads_duplicate: u64,
    leads_skipped: u64,
    error_count: u64,
    error_message: Option<&str>,
) -> Result<()> {
    let conn = pool.get().await?;
    conn.execute(
        r#"
        UPDATE runs
        SET status = ?1, leads_scraped = ?2, leads_saved = ?3,
            leads_duplicate = ?4, leads_skipped = ?5, error_count = ?6,
            error_message = ?7, ended_at = ?8
        WHERE id = ?9
        "#,
        params![
            status.as_str(),
            leads_scraped as i64,
            leads_saved as i64,
            leads_duplicate as i64,
            leads_skipped as i64,
            error_count as i64,
            error_message,
            Utc::now().to_rfc3339(),
            run_id,
        ],
    )?;
    Ok(())
}

pub struct RunCounters {
    pub total_runs: i64,
    pub completed_runs: i64,
    pub failed_runs: i64,
}

pub async fn get_run_counters(pool: &DbPool, source_id: i64) -> Result<RunCounters> {
    let conn = pool.get().await?;
    let counters = conn.query_row(
        r#"
        SELECT COUNT(*),
               SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END),
               SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END)
        FROM runs WHERE source_id = ?1
        "#,
        params![source_id],
        |row| {
            Ok(RunCounters {
                total_runs: row.get(0)?,
                completed_runs: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                failed_runs: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
            })
        },
    )?;
    Ok(counters)
}

pub async fn last_run_started_at(
    pool: &DbPool,
    source_id: i64,
) -> Result<Option<DateTime<Utc>>> {
    let conn = pool.get().await?;
    let started: Option<String> = conn
        .query_row(
            "SELECT started_at FROM runs WHERE source_id = ?1 ORDER BY id DESC LIMIT 1",
            params![source_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(started.map(|raw| parse_timestamp(&raw)))
}

// ===== SCHEDULED JOBS =====

#[derive(Debug, Clone)]
pub struct StoredJob {
    pub job_id: String,
    pub source_id: i64,
    pub schedule: JobSchedule,
    pub max_leads: Option<i64>,
    pub enabled: bool,
}

pub async fn insert_scheduled_job(pool: &DbPool, job: &StoredJob) -> Result<()> {
    let (kind, minutes, at_time, weekday) = match &job.schedule {
        JobSchedule::Interval { minutes } => ("interval", Some(*minutes), None, None),
        JobSchedule::DailyAt { time } => ("daily", None, Some(time.format("%H:%M").to_string()), None),
        JobSchedule::WeeklyAt { weekday, time } => (
            "weekly",
            None,
            Some(time.format("%H:%M").to_string()),
            Some(weekday.num_days_from_monday() as i64),
        ),
    };

    let conn = pool.get().await?;
    conn.execute(
        r#"
        INSERT INTO scheduled_jobs (job_id, source_id, schedule_kind, interval_minutes,
                                    at_time, weekday, max_leads, enabled, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            job.job_id,
            job.source_id,
            kind,
            minutes,
            at_time,
            weekday,
            job.max_leads,
            job.enabled as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Rows whose schedule columns do not reassemble into a known kind are
/// skipped with a warning instead of blocking the whole tick.
pub async fn load_scheduled_jobs(pool: &DbPool) -> Result<Vec<StoredJob>> {
    let conn = pool.get().await?;
    let mut stmt = conn.prepare(
        "SELECT job_id, source_id, schedule_kind, interval_minutes, at_time, weekday,
                max_leads, enabled
         FROM scheduled_jobs WHERE enabled = 1 ORDER BY id",
    )?;

    type JobRow = (
        String,
        i64,
        String,
        Option<i64>,
        Option<String>,
        Option<i64>,
        Option<i64>,
        i64,
    );
    let rows = stmt
        .query_map([], |row| {
            Ok::<JobRow, rusqlite::Error>((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })?
        .collect::<SqliteResult<Vec<_>>>()?;

    let mut jobs = Vec::with_capacity(rows.len());
    for (job_id, source_id, kind, minutes, at_time, weekday, max_leads, enabled) in rows {
        match parse_job_schedule(&kind, minutes, at_time.as_deref(), weekday) {
            Some(schedule) => jobs.push(StoredJob {
                job_id,
                source_id,
                schedule,
                max_leads,
                enabled: enabled != 0,
            }),
            None => warn!("Skipping job {} with malformed schedule '{}'", job_id, kind),
        }
    }
    Ok(jobs)
}

fn parse_job_schedule(
    kind: &str,
    minutes: Option<i64>,
    at_time: Option<&str>,
    weekday: Option<i64>,
) -> Option<JobSchedule> {
    match kind {
        "interval" => minutes.map(|minutes| JobSchedule::Interval { minutes }),
        "daily" => parse_job_time(at_time?).map(|time| JobSchedule::DailyAt { time }),
        "weekly" => {
            let time = parse_job_time(at_time?)?;
            let weekday = weekday_from_index(weekday?)?;
            Some(JobSchedule::WeeklyAt { weekday, time })
        }
        _ => None,
    }
}

fn parse_job_time(raw: &str) -> Option<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(raw, "%H:%M").ok()
}

fn weekday_from_index(index: i64) -> Option<chrono::Weekday> {
    use chrono::Weekday::*;
    match index {
        0 => Some(Mon),
        1 => Some(Tue),
        2 => Some(Wed),
        3 => Some(Thu),
        4 => Some(Fri),
        5 => Some(Sat),
        6 => Some(Sun),
        _ => None,
    }
}
