use super::CliApp;
use crate::error::Result;

impl CliApp {
    pub async fn show_stats(&self) -> Result<()> {
        let stats = self.engine.get_stats().await?;

        println!("\n📊 Platform stats");
        println!(
            "  Sources: {} ({} enabled) | Leads: {}",
            stats.total_sources, stats.enabled_sources, stats.total_leads
        );

        for source in &stats.sources {
            println!(
                "  [{}] {} — {} leads, {} runs ({} completed, {} failed){}",
                source.id,
                source.name,
                source.leads,
                source.total_runs,
                source.completed_runs,
                source.failed_runs,
                if source.enabled { "" } else { " [disabled]" },
            );
        }
        Ok(())
    }
}
