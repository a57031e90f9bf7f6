use super::CliApp;
use crate::error::Result;

const SOURCES_FILE: &str = "sources.yml";

impl CliApp {
    pub async fn list_sources(&self) -> Result<()> {
        let sources = self.engine.registry().list_all().await?;
        if sources.is_empty() {
            println!("No sources configured yet.");
            return Ok(());
        }

        println!("\n📚 Configured sources");
        for source in sources {
            println!(
                "  [{}] {} — {} ({}, every request waits ~{}s){}",
                source.id,
                source.name,
                source.base_url,
                source.source_type,
                source.rate_limit_delay,
                if source.enabled { "" } else { " [disabled]" },
            );
        }
        Ok(())
    }

    pub async fn seed_sources(&self) -> Result<()> {
        let registered = self.engine.registry().seed_from_file(SOURCES_FILE).await?;
        println!("✓ Registered {} new sources from {}", registered, SOURCES_FILE);
        Ok(())
    }
}
