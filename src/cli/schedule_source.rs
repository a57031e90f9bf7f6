use chrono::{NaiveTime, Weekday};
use dialoguer::{theme::ColorfulTheme, Input, Select};
use uuid::Uuid;

use super::{prompt_error, CliApp};
use crate::database::{self, StoredJob};
use crate::error::{HarvestError, Result};
use crate::models::JobSchedule;

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("Monday", Weekday::Mon),
    ("Tuesday", Weekday::Tue),
    ("Wednesday", Weekday::Wed),
    ("Thursday", Weekday::Thu),
    ("Friday", Weekday::Fri),
    ("Saturday", Weekday::Sat),
    ("Sunday", Weekday::Sun),
];

impl CliApp {
    /// Persist a recurring job for one source. The scheduler re-reads jobs
    /// every tick, so the campaign starts without a restart.
    pub async fn schedule_source(&self) -> Result<()> {
        let sources = self.engine.registry().list_enabled().await?;
        if sources.is_empty() {
            println!("No enabled sources to schedule.");
            return Ok(());
        }

        let labels: Vec<String> = sources.iter().map(|s| s.name.clone()).collect();
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Source to schedule")
            .items(&labels)
            .interact()
            .map_err(prompt_error)?;
        let source = sources
            .get(selection)
            .ok_or_else(|| HarvestError::config("invalid source selection"))?;

        let schedule = self.prompt_schedule()?;

        let job = StoredJob {
            job_id: format!("job_{}_{}", source.id, Uuid::new_v4()),
            source_id: source.id,
            schedule,
            max_leads: Some(self.config.scraping.max_leads_per_source as i64),
            enabled: true,
        };
        database::insert_scheduled_job(&self.db_pool, &job).await?;

        println!(
            "✓ Scheduled '{}' {} (job {})",
            source.name, schedule, job.job_id
        );
        Ok(())
    }

    fn prompt_schedule(&self) -> Result<JobSchedule> {
        let kinds = ["Every N minutes", "Daily at a fixed time", "Weekly at a fixed time"];
        let kind = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Schedule")
            .default(0)
            .items(&kinds)
            .interact()
            .map_err(prompt_error)?;

        match kind {
            0 => {
                let minutes: i64 = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt("Interval in minutes")
                    .default(1440)
                    .interact_text()
                    .map_err(prompt_error)?;
                if minutes < 1 {
                    return Err(HarvestError::config("interval must be at least 1 minute"));
                }
                Ok(JobSchedule::Interval { minutes })
            }
            1 => Ok(JobSchedule::DailyAt {
                time: self.prompt_time()?,
            }),
            _ => {
                let names: Vec<&str> = WEEKDAYS.iter().map(|(name, _)| *name).collect();
                let day = Select::with_theme(&ColorfulTheme::default())
                    .with_prompt("Weekday")
                    .items(&names)
                    .interact()
                    .map_err(prompt_error)?;
                Ok(JobSchedule::WeeklyAt {
                    weekday: WEEKDAYS[day].1,
                    time: self.prompt_time()?,
                })
            }
        }
    }

    fn prompt_time(&self) -> Result<NaiveTime> {
        let raw: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Time (HH:MM, UTC)")
            .default("09:00".to_string())
            .interact_text()
            .map_err(prompt_error)?;
        NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|_| HarvestError::config(format!("'{}' is not a valid HH:MM time", raw)))
    }
}
