use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MenuAction {
    RunAllSources,
    RunSingleSource,
    ScheduleSource,
    ShowStats,
    ListSources,
    SeedSources,
    Exit,
}

impl fmt::Display for MenuAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuAction::RunAllSources => "🌐 Run all enabled sources",
            MenuAction::RunSingleSource => "🎯 Run a single source",
            MenuAction::ScheduleSource => "⏰ Schedule a recurring scrape",
            MenuAction::ShowStats => "📊 Show platform stats",
            MenuAction::ListSources => "📚 List configured sources",
            MenuAction::SeedSources => "🌱 Seed sources from sources.yml",
            MenuAction::Exit => "👋 Exit",
        };
        write!(f, "{}", label)
    }
}
