use dialoguer::{theme::ColorfulTheme, Select};

use super::{prompt_error, CliApp};
use crate::error::{HarvestError, Result};
use crate::models::RunResult;

impl CliApp {
    pub async fn run_all_sources(&self) -> Result<()> {
        let results = self.engine.run_all_sources(None).await?;
        if results.is_empty() {
            println!("No enabled sources. Seed or register some first.");
            return Ok(());
        }

        for result in &results {
            print_run_result(result);
        }
        Ok(())
    }

    pub async fn run_single_source(&self) -> Result<()> {
        let sources = self.engine.registry().list_enabled().await?;
        if sources.is_empty() {
            println!("No enabled sources. Seed or register some first.");
            return Ok(());
        }

        let labels: Vec<String> = sources
            .iter()
            .map(|s| format!("{} ({})", s.name, s.base_url))
            .collect();

        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Source to scrape")
            .items(&labels)
            .interact()
            .map_err(prompt_error)?;

        let source = sources
            .get(selection)
            .ok_or_else(|| HarvestError::config("invalid source selection"))?;

        let result = self.engine.run_scraper(source.id, None).await?;
        print_run_result(&result);
        Ok(())
    }
}

fn print_run_result(result: &RunResult) {
    println!(
        "\n  {} [{}] — scraped {}, saved {}, duplicates {}, skipped {}, errors {}",
        result.source_name,
        result.status.as_str(),
        result.leads_scraped,
        result.leads_saved,
        result.leads_duplicate,
        result.leads_skipped,
        result.error_count,
    );
    for error in &result.errors {
        println!("    ⚠ {}", error);
    }
}
