//! Starforge CLI
//!
//! Thin wrapper around starforge-core for command-line usage. The remote
//! ledger is a file-backed stand-in under the data directory, so every
//! engine operation — the connect cascade, missions, item effects,
//! reconciliation — is drivable from a terminal.
//!
//! ## Usage
//!
//! ```bash
//! # Show a player's progress
//! starforge status 0xabc
//!
//! # List and drive missions
//! starforge mission list 0xabc
//! starforge mission start 0xabc mine-first-ore
//!
//! # Record gameplay events
//! starforge mine 0xabc iron_ore 4
//! starforge craft 0xabc mining_rig 1
//! starforge explore 0xabc sector-7 1
//!
//! # Consume items for a tiered effect
//! starforge use-item 0xabc mining_efficiency 3 --duration-secs 600
//! starforge effects 0xabc
//!
//! # Reconcile with the (stand-in) remote ledger
//! starforge sync 0xabc
//!
//! # Drop the local cache for an identity
//! starforge clear 0xabc
//! ```

mod ledger;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use starforge_core::{
    CreditingIssuer, EffectCategory, EventKind, GameEvent, MissionId, MissionStatus, PlayerId,
    ProgressEngine,
};

use ledger::JsonFileLedger;

/// Starforge - local-first player progress engine
#[derive(Parser)]
#[command(name = "starforge")]
#[command(version = "0.1.0")]
#[command(about = "Starforge - local-first player progress engine")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.starforge/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a player's progress and sync status
    Status {
        /// Player identity (wallet address)
        identity: String,
    },

    /// Mission management
    Mission {
        #[command(subcommand)]
        action: MissionAction,
    },

    /// Record a mining event
    Mine {
        identity: String,
        /// Resource type mined (e.g. iron_ore)
        resource: String,
        quantity: u32,
    },

    /// Record a crafting event
    Craft {
        identity: String,
        /// Item type crafted
        item: String,
        quantity: u32,
    },

    /// Record an exploration event
    Explore {
        identity: String,
        /// Sector explored
        sector: String,
        quantity: u32,
    },

    /// Consume items to activate a tiered effect
    UseItem {
        identity: String,
        /// Effect category (e.g. mining_efficiency, crafting_speed)
        category: String,
        quantity: u32,
        /// Duration granted per item, in seconds
        #[arg(long, default_value_t = 600)]
        duration_secs: u64,
    },

    /// List active item effects
    Effects { identity: String },

    /// Force a reconciliation with the remote ledger
    Sync { identity: String },

    /// Drop the local cache for an identity
    Clear { identity: String },
}

#[derive(Subcommand)]
enum MissionAction {
    /// List the mission catalog with per-player status
    List { identity: String },
    /// Start an available mission
    Start {
        identity: String,
        mission_id: String,
    },
    /// Abandon the active mission, keeping progress
    Abandon { identity: String },
    /// Reset a mission's progress to zero
    Reset {
        identity: String,
        mission_id: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.starforge/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".starforge")
        .join("data")
}

fn status_marker(status: MissionStatus) -> &'static str {
    match status {
        MissionStatus::Locked => "🔒",
        MissionStatus::Available => "○",
        MissionStatus::Active => "▶",
        MissionStatus::Completed => "✓",
    }
}

fn build_engine(data_dir: &PathBuf) -> Result<ProgressEngine> {
    let ledger = JsonFileLedger::new(data_dir.join("ledger"))
        .map_err(|e| anyhow::anyhow!("Failed to open ledger directory: {}", e))?;
    Ok(ProgressEngine::new(
        data_dir,
        Arc::new(ledger),
        Arc::new(CreditingIssuer),
    )?)
}

async fn connect(engine: &ProgressEngine, identity: &str) -> Result<PlayerId> {
    let player_id = PlayerId::from(identity);
    engine.connect(&player_id, "Pilot").await?;
    Ok(player_id)
}

/// Record one gameplay event and report progress/completion.
async fn record_event(engine: &ProgressEngine, event: GameEvent) -> Result<()> {
    let summary = engine.record_event(&event)?;
    let snapshot = engine.snapshot()?;
    match summary {
        Some(summary) => {
            println!("Mission complete!");
            println!("  +{} XP, +{} credits", summary.experience, summary.credits);
            for grant in &summary.resources {
                println!("  +{} {}", grant.quantity, grant.item);
            }
        }
        None => {
            match snapshot
                .active_mission
                .as_ref()
                .and_then(|id| snapshot.mission(id))
            {
                Some(mission) => println!(
                    "{}: {}/{}",
                    mission.title, mission.progress, mission.max_progress
                ),
                None => println!("Recorded (no active mission)."),
            }
        }
    }
    if !engine.push_remote().await? {
        eprintln!("warning: remote publish failed; will retry on next sync");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let engine = build_engine(&data_dir)?;

    match cli.command {
        Commands::Status { identity } => {
            connect(&engine, &identity).await?;
            let snapshot = engine.snapshot()?;
            let status = engine.sync_status()?;

            println!("Player: {} ({})", snapshot.name, snapshot.player_id);
            println!("  Level: {}", snapshot.level);
            println!("  Experience: {}", snapshot.experience);
            println!("  Credits: {}", snapshot.credits);
            match &snapshot.active_mission {
                Some(id) => println!("  Active mission: {}", id),
                None => println!("  Active mission: (none)"),
            }
            if !snapshot.inventory.is_empty() {
                println!("  Inventory:");
                for entry in &snapshot.inventory {
                    println!("    {} x{}", entry.item, entry.quantity);
                }
            }
            println!("  Items used (lifetime): {}", engine.lifetime_items_used());
            println!("  Sync: {}", status);
        }

        Commands::Mission { action } => match action {
            MissionAction::List { identity } => {
                connect(&engine, &identity).await?;
                println!("Missions:");
                for mission in engine.missions()? {
                    println!(
                        "  {} {} [{}] {}/{}",
                        status_marker(mission.status),
                        mission.id,
                        mission.title,
                        mission.progress,
                        mission.max_progress
                    );
                }
            }
            MissionAction::Start {
                identity,
                mission_id,
            } => {
                connect(&engine, &identity).await?;
                let id = MissionId::from(mission_id.as_str());
                engine.start_mission(&id)?;
                println!("Mission started: {}", id);
                engine.push_remote().await?;
            }
            MissionAction::Abandon { identity } => {
                connect(&engine, &identity).await?;
                let id = engine.abandon_mission()?;
                println!("Mission abandoned: {} (progress kept)", id);
                engine.push_remote().await?;
            }
            MissionAction::Reset {
                identity,
                mission_id,
            } => {
                connect(&engine, &identity).await?;
                let id = MissionId::from(mission_id.as_str());
                engine.reset_mission(&id)?;
                println!("Mission reset: {}", id);
                engine.push_remote().await?;
            }
        },

        Commands::Mine {
            identity,
            resource,
            quantity,
        } => {
            connect(&engine, &identity).await?;
            record_event(&engine, GameEvent::new(EventKind::Mining, resource, quantity)).await?;
        }

        Commands::Craft {
            identity,
            item,
            quantity,
        } => {
            connect(&engine, &identity).await?;
            record_event(&engine, GameEvent::new(EventKind::Crafting, item, quantity)).await?;
        }

        Commands::Explore {
            identity,
            sector,
            quantity,
        } => {
            connect(&engine, &identity).await?;
            record_event(
                &engine,
                GameEvent::new(EventKind::Exploration, sector, quantity),
            )
            .await?;
        }

        Commands::UseItem {
            identity,
            category,
            quantity,
            duration_secs,
        } => {
            connect(&engine, &identity).await?;
            let category: EffectCategory = category
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let effect = engine.use_items(
                category,
                quantity,
                Duration::from_secs(duration_secs),
                format!("{} booster", category),
            )?;
            println!("Effect active: {}", effect.category);
            println!("  Multiplier: x{:.2}", effect.multiplier);
            println!("  Duration: {}s", effect.duration_ms / 1000);
            println!("  Items used (lifetime): {}", engine.lifetime_items_used());
        }

        Commands::Effects { identity } => {
            connect(&engine, &identity).await?;
            let effects = engine.active_effects();
            if effects.is_empty() {
                println!("No active effects.");
            } else {
                let now = chrono::Utc::now().timestamp_millis();
                println!("Active effects:");
                for effect in effects {
                    println!(
                        "  {} x{:.2} ({}s remaining)",
                        effect.category,
                        effect.multiplier,
                        effect.remaining_ms(now) / 1000
                    );
                }
            }
        }

        Commands::Sync { identity } => {
            connect(&engine, &identity).await?;
            let outcome = engine.force_sync().await?;
            if !outcome.success {
                anyhow::bail!("Sync failed; local progress remains authoritative");
            }
            println!("Sync complete.");
            if outcome.conflicts.is_empty() {
                println!("  No conflicts.");
            } else {
                println!("  Conflicts resolved:");
                for conflict in &outcome.conflicts {
                    println!(
                        "    {}: local {} / remote {}",
                        conflict.field, conflict.local, conflict.remote
                    );
                }
            }
            engine.push_remote().await?;
        }

        Commands::Clear { identity } => {
            let player_id = PlayerId::from(identity.as_str());
            engine.clear_local(&player_id)?;
            println!("Local progress cleared for {}", player_id);
        }
    }

    engine.disconnect()?;
    Ok(())
}
