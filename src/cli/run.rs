use dialoguer::{theme::ColorfulTheme, Select};
use tracing::error;

use super::{prompt_error, CliApp, MenuAction};
use crate::error::Result;

impl CliApp {
    pub async fn run(&self) -> Result<()> {
        println!("\n🌾 Lead Harvester");
        println!("═══════════════════════════════════════");

        self.show_stats().await?;

        loop {
            let actions = vec![
                MenuAction::RunAllSources,
                MenuAction::RunSingleSource,
                MenuAction::ScheduleSource,
                MenuAction::ShowStats,
                MenuAction::ListSources,
                MenuAction::SeedSources,
                MenuAction::Exit,
            ];

            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt("\nSelect an action")
                .default(0)
                .items(&actions)
                .interact()
                .map_err(prompt_error)?;

            match &actions[selection] {
                MenuAction::RunAllSources => {
                    if let Err(e) = self.run_all_sources().await {
                        error!("Scrape of all sources failed: {}", e);
                    }
                }
                MenuAction::RunSingleSource => {
                    if let Err(e) = self.run_single_source().await {
                        error!("Scrape failed: {}", e);
                    }
                }
                MenuAction::ScheduleSource => {
                    if let Err(e) = self.schedule_source().await {
                        error!("Scheduling failed: {}", e);
                    }
                }
                MenuAction::ShowStats => {
                    if let Err(e) = self.show_stats().await {
                        error!("Failed to show stats: {}", e);
                    }
                }
                MenuAction::ListSources => {
                    if let Err(e) = self.list_sources().await {
                        error!("Failed to list sources: {}", e);
                    }
                }
                MenuAction::SeedSources => {
                    if let Err(e) = self.seed_sources().await {
                        error!("Seeding sources failed: {}", e);
                    }
                }
                MenuAction::Exit => {
                    println!("Goodbye!");
                    break;
                }
            }
        }

        Ok(())
    }
}
