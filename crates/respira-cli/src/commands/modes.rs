use clap::Subcommand;
use respira_core::{format_mmss, Config};

#[derive(Subcommand)]
pub enum ModesAction {
    /// List built-in and custom modes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one mode's phases as JSON
    Show {
        /// Mode id
        id: String,
    },
}

pub fn run(action: ModesAction) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Config::load_or_default().mode_catalog()?;

    match action {
        ModesAction::List { json } => {
            if json {
                let modes: Vec<_> = catalog.iter().collect();
                println!("{}", serde_json::to_string_pretty(&modes)?);
            } else {
                for mode in catalog.iter() {
                    let rhythm = mode
                        .durations_ms
                        .iter()
                        .map(|ms| format!("{}", ms / 1000))
                        .collect::<Vec<_>>()
                        .join("-");
                    println!("{:<10} {:<16} {}", mode.id, mode.name, rhythm);
                }
            }
        }
        ModesAction::Show { id } => {
            let mode = catalog.get(&id)?;
            let phases: Vec<_> = mode
                .phases()
                .map(|phase| {
                    serde_json::json!({
                        "kind": phase.kind,
                        "cue": phase.kind.cue_label(),
                        "duration_ms": phase.duration_ms,
                    })
                })
                .collect();
            let cycle_secs = u32::try_from(mode.cycle_ms() / 1000).unwrap_or(u32::MAX);
            let out = serde_json::json!({
                "id": mode.id,
                "name": mode.name,
                "cycle": format_mmss(cycle_secs),
                "phases": phases,
                "completion_message": mode.completion_message,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
