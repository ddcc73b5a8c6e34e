use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Subcommand;
use respira_core::error::Result as CoreResult;
use respira_core::{
    ChannelSink, Config, CueSink, Database, Event, PhaseKind, SessionEngine, SqliteStatsStore,
    StatsLedger,
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Run one session, printing each event as a JSON line. Ctrl-C stops it.
    Run {
        /// Mode id (see `respira modes list`)
        #[arg(long)]
        mode: Option<String>,
        /// Session length in seconds
        #[arg(long)]
        duration: Option<u32>,
        /// Delay before the first phase, in milliseconds
        #[arg(long)]
        lead_in: Option<u64>,
        /// Do not record the session in the stats ledger
        #[arg(long)]
        ephemeral: bool,
    },
}

/// Rings the terminal bell when a session ends.
struct TerminalBell;

impl CueSink for TerminalBell {
    fn phase_cue(&self, _kind: PhaseKind) -> CoreResult<()> {
        Ok(())
    }

    fn session_end_cue(&self, _completed: bool) -> CoreResult<()> {
        let mut stderr = std::io::stderr();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

pub fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SessionAction::Run {
            mode,
            duration,
            lead_in,
            ephemeral,
        } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_session(mode, duration, lead_in, ephemeral))
        }
    }
}

async fn run_session(
    mode: Option<String>,
    duration: Option<u32>,
    lead_in: Option<u64>,
    ephemeral: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let session = config.session_config(mode.as_deref(), duration)?;
    let mode_id = session.mode.id.clone();
    let total_secs = session.total_secs;

    let (sink, mut events) = ChannelSink::channel();
    // `.config` applies the `cues.bell`/`cues.haptics` switches.
    let mut builder = SessionEngine::builder(Arc::new(sink))
        .config(&config)
        .cues(Arc::new(TerminalBell))
        .session(session);
    if let Some(ms) = lead_in {
        builder = builder.lead_in(Duration::from_millis(ms));
    }

    let history = if ephemeral {
        None
    } else {
        builder = builder.ledger(StatsLedger::new(Box::new(SqliteStatsStore::open()?)));
        Some(Database::open()?)
    };

    let engine = builder.build();
    let started_at = Utc::now();
    engine.start()?;

    let completed = loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break false };
                println!("{}", serde_json::to_string(&event)?);
                if let Event::SessionEnded { completed, .. } = event {
                    break completed;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                engine.stop();
            }
        }
    };

    if completed {
        if let Some(db) = history {
            if let Err(e) =
                db.record_session(&mode_id, u64::from(total_secs), started_at, Utc::now())
            {
                tracing::warn!(error = %e, "session history not recorded");
            }
        }
    }
    Ok(())
}
