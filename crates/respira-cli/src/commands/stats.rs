use clap::Subcommand;
use respira_core::{Database, SqliteStatsStore, StatsLedger};

#[derive(Subcommand)]
pub enum StatsAction {
    /// Lifetime practice time and current streak
    Show,
    /// Recently completed sessions
    History {
        /// Number of sessions to show
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Clear all statistics
    Reset,
}

pub fn run(action: StatsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        StatsAction::Show => {
            let ledger = StatsLedger::new(Box::new(SqliteStatsStore::open()?));
            let stats = ledger.load()?;
            let out = serde_json::json!({
                "total_secs": stats.total_secs,
                "total_minutes": stats.total_secs / 60,
                "streak_days": stats.streak_days,
                "sessions_completed": stats.sessions_completed,
                "last_practiced": stats.last_practiced,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        StatsAction::History { limit } => {
            let db = Database::open()?;
            let sessions = db.recent_sessions(limit)?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        StatsAction::Reset => {
            let ledger = StatsLedger::new(Box::new(SqliteStatsStore::open()?));
            ledger.reset()?;
            println!("stats reset");
        }
    }
    Ok(())
}
