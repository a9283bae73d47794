use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sunsense_core::export::export_sessions_csv;
use sunsense_core::weather::forecast_peak;
use sunsense_core::*;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "sunsense")]
#[command(about = "UV exposure and vitamin D tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in locally and manage the profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Feed a JSONL file of observations and commands through the tracker
    Replay {
        /// One observation or command per line
        file: PathBuf,

        /// Use a constant UV index instead of the clear-sky model
        #[arg(long)]
        uv: Option<f64>,

        /// Run due exposure ticks before each line
        #[arg(long)]
        auto_tick: bool,
    },

    /// Show today's sessions, vitamin D and streaks
    Status {
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Record or clear a sunscreen application
    Sunscreen {
        /// Clear the recorded application instead
        #[arg(long)]
        clear: bool,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Run daily maintenance (streaks, vitamin D rollover, morning alert)
    Maintenance {
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        #[command(flatten)]
        position: Position,
    },

    /// Print the clear-sky UV forecast for a day
    Forecast {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Defaults to today (UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Export all sessions of the signed-in user to CSV
    Export {
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Create or replace the profile and make it the current user
    Set {
        #[arg(long)]
        user: String,

        /// Fitzpatrick skin type, 1-6
        #[arg(long, default_value_t = 2)]
        skin_type: u8,

        /// Minimal erythema dose in hundredths of an SED
        #[arg(long)]
        med: Option<u32>,

        /// Daily vitamin D target in IU
        #[arg(long)]
        target: Option<f64>,

        /// Fraction of skin exposed, 0-1
        #[arg(long)]
        body_factor: Option<f64>,
    },

    /// Print the current profile as JSON
    Show,
}

#[derive(Args)]
struct Position {
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    lon: Option<f64>,
}

/// Non-observation lines in a replay file
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayCommand {
    Tick {
        at: DateTime<Utc>,
    },
    Sunscreen {
        at: DateTime<Utc>,
        #[serde(default)]
        clear: bool,
    },
    Override {
        at: DateTime<Utc>,
        on: bool,
    },
    FloorChange {
        at: DateTime<Utc>,
    },
    Maintenance {
        at: DateTime<Utc>,
    },
    Background {
        at: DateTime<Utc>,
    },
    Foreground {
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayLine {
    Command(ReplayCommand),
    Observation(LocationObservation),
}

impl ReplayLine {
    fn at(&self) -> DateTime<Utc> {
        match self {
            ReplayLine::Observation(obs) => obs.timestamp,
            ReplayLine::Command(cmd) => match cmd {
                ReplayCommand::Tick { at }
                | ReplayCommand::Sunscreen { at, .. }
                | ReplayCommand::Override { at, .. }
                | ReplayCommand::FloorChange { at }
                | ReplayCommand::Maintenance { at }
                | ReplayCommand::Background { at }
                | ReplayCommand::Foreground { at } => *at,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    sunsense_core::logging::init_with_level(sunsense_core::logging::verbosity_level(cli.verbose));

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.data.data_dir = dir;
    }
    std::fs::create_dir_all(&config.data.data_dir)?;

    match cli.command {
        Commands::Profile { action } => cmd_profile(&config, action).await,
        Commands::Replay {
            file,
            uv,
            auto_tick,
        } => cmd_replay(config, &file, uv, auto_tick).await,
        Commands::Status { at } => cmd_status(&config, at.unwrap_or_else(Utc::now)).await,
        Commands::Sunscreen { clear, at } => {
            cmd_sunscreen(config, clear, at.unwrap_or_else(Utc::now)).await
        }
        Commands::Maintenance { at, position } => {
            cmd_maintenance(config, at.unwrap_or_else(Utc::now), position).await
        }
        Commands::Forecast { lat, lon, date } => {
            cmd_forecast(lat, lon, date.unwrap_or_else(|| Utc::now().date_naive())).await
        }
        Commands::Export { output } => cmd_export(&config, &output).await,
    }
}

fn store_path(config: &Config) -> PathBuf {
    config.data.data_dir.join("store.json")
}

fn sunscreen_path(config: &Config) -> PathBuf {
    config.data.data_dir.join("sunscreen.json")
}

/// Build an orchestrator on the local file store for the signed-in user
fn build_orchestrator(
    config: Config,
    uv_source: Arc<dyn UvIndexSource>,
) -> Result<Orchestrator> {
    let backend = Arc::new(FileBackend::new(store_path(&config)));
    let user = backend.current_user()?;
    let sunscreen = sunscreen_path(&config);

    Orchestrator::new(
        config,
        user,
        Collaborators {
            backend,
            uv_source,
            notifier: Arc::new(LogNotifier),
        },
    )
    .with_sunscreen_file(sunscreen)
}

async fn cmd_profile(config: &Config, action: ProfileAction) -> Result<()> {
    let backend = FileBackend::new(store_path(config));

    match action {
        ProfileAction::Set {
            user,
            skin_type,
            med,
            target,
            body_factor,
        } => {
            let mut profile = Profile::new(&user, SkinType::new(skin_type)?);
            profile.med = med;
            if let Some(target) = target {
                profile.vitamin_d_target_iu = target;
            }
            if let Some(factor) = body_factor {
                if !(0.0..=1.0).contains(&factor) {
                    return Err(Error::Config(format!(
                        "body factor must be between 0 and 1, got {}",
                        factor
                    )));
                }
                profile.body_exposure_factor = factor;
            }

            backend.sign_in(profile.clone())?;
            println!("✓ Signed in as {}", profile.user_id);
            println!("  Skin type: {}", profile.skin_type.value());
            println!("  MED: {}", profile.effective_med());
            println!("  Vitamin D target: {} IU", profile.vitamin_d_target_iu);
        }
        ProfileAction::Show => {
            let user = backend.current_user()?.ok_or(Error::NoActiveUser)?;
            let profile = backend.fetch_profile(&user).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
    }

    Ok(())
}

async fn cmd_replay(config: Config, file: &Path, uv: Option<f64>, auto_tick: bool) -> Result<()> {
    let uv_source: Arc<dyn UvIndexSource> = match uv {
        Some(value) => Arc::new(FixedUvSource::new(value)),
        None => Arc::new(ClearSkyUvModel::default()),
    };
    let mut orch = build_orchestrator(config, uv_source)?;
    let mut events = orch.subscribe();

    let reader = BufReader::new(std::fs::File::open(file)?);
    let mut lines = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ReplayLine = serde_json::from_str(&line).map_err(|e| {
            Error::InvalidObservation(format!("line {}: {}", number + 1, e))
        })?;
        lines.push(parsed);
    }

    let Some(first) = lines.first() else {
        println!("Nothing to replay.");
        return Ok(());
    };

    let start = first.at();
    let recovered = orch.recover(start).await?;
    if recovered > 0 {
        println!("Recovered {} unfinished session(s)", recovered);
    }

    let mut last = start;
    for line in lines {
        let at = line.at();
        if auto_tick {
            run_due_ticks(&mut orch, at, &mut events).await;
        }

        match line {
            ReplayLine::Observation(obs) => {
                if let Err(e) = orch.handle_observation(obs).await {
                    eprintln!("Skipped observation at {}: {}", at, e);
                }
            }
            ReplayLine::Command(cmd) => run_command(&mut orch, cmd).await?,
        }
        print_events(&mut events);
        last = last.max(at);
    }

    orch.enter_background(last).await;
    print_events(&mut events);

    let snapshot = orch.snapshot(last);
    println!("Final state: {}", snapshot.state);
    println!("Exposure: {:.0}% of MED", snapshot.exposure_ratio * 100.0);
    if let Some(record) = &snapshot.vitamin_d {
        println!(
            "Vitamin D: {:.0} / {:.0} IU",
            record.total_iu, record.target_iu
        );
    }

    Ok(())
}

async fn run_command(orch: &mut Orchestrator, cmd: ReplayCommand) -> Result<()> {
    match cmd {
        ReplayCommand::Tick { at } => {
            if let Err(e) = orch.run_exposure_tick(at).await {
                eprintln!("Tick at {} failed: {}", at, e);
            }
        }
        ReplayCommand::Sunscreen { at, clear: false } => orch.apply_sunscreen(at).await?,
        ReplayCommand::Sunscreen { at, clear: true } => orch.clear_sunscreen(at).await?,
        ReplayCommand::Override { at, on } => {
            orch.set_manual_override(on, at).await;
        }
        ReplayCommand::FloorChange { at } => orch.note_floor_change(at),
        ReplayCommand::Maintenance { at } => {
            let report = orch.run_daily_maintenance(at).await?;
            println!("{}", serde_json::to_string(&report)?);
        }
        ReplayCommand::Background { at } => orch.enter_background(at).await,
        ReplayCommand::Foreground { at } => orch.enter_foreground(at).await,
    }
    Ok(())
}

/// Run every tick that falls due at or before `until`
async fn run_due_ticks(
    orch: &mut Orchestrator,
    until: DateTime<Utc>,
    events: &mut broadcast::Receiver<TrackingEvent>,
) {
    let mut previous = None;
    while let Some(due) = orch.next_tick_due(until) {
        if due > until || previous.is_some_and(|p| due <= p) {
            break;
        }
        previous = Some(due);
        if let Err(e) = orch.run_exposure_tick(due).await {
            eprintln!("Tick at {} failed: {}", due, e);
            break;
        }
        print_events(events);
    }
}

fn print_events(events: &mut broadcast::Receiver<TrackingEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Could not serialize event: {}", e),
            },
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                eprintln!("Dropped {} events", skipped);
            }
            Err(_) => break,
        }
    }
}

async fn cmd_status(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let backend = FileBackend::new(store_path(config));
    let user = backend.current_user()?.ok_or(Error::NoActiveUser)?;
    let profile = backend.fetch_profile(&user).await?;
    let today = local_date(now, config.data.utc_offset());
    let med = profile.effective_med();

    println!("User: {} (skin type {}, MED {})", user, profile.skin_type.value(), med);
    println!("Date: {}", today);

    let sessions = backend.sessions_for_date(&user, today).await?;
    if sessions.is_empty() {
        println!("No sessions today.");
    }
    for session in &sessions {
        let end = session
            .end_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "active".into());
        println!(
            "  {} - {}  {:.3} SED  {:.0}% of MED{}",
            session.start_time.format("%H:%M"),
            end,
            session.session_sed,
            sunsense_core::exposure::compute_exposure_ratio(session.session_sed, med) * 100.0,
            if session.sunscreen_applied { "  (sunscreen)" } else { "" }
        );
    }

    match backend.fetch_vitamin_d(&user, today).await? {
        Some(record) => println!(
            "Vitamin D: {:.0} / {:.0} IU ({:.0}%)",
            record.total_iu,
            record.target_iu,
            record.progress() * 100.0
        ),
        None => println!("Vitamin D: no record today"),
    }

    if let Some(streaks) = backend.fetch_streaks(&user).await? {
        println!(
            "Streaks: {} UV-safe, {} vitamin D",
            streaks.uv_safe_streak, streaks.vitamin_d_streak
        );
    }

    let sunscreen = SunscreenState::load(&sunscreen_path(config))?;
    let protection = chrono::Duration::minutes(config.sunscreen.protection_minutes);
    if let Some(until) = sunscreen.expires_at(now, protection) {
        println!("Sunscreen active until {}", until.format("%H:%M"));
    }

    Ok(())
}

async fn cmd_sunscreen(config: Config, clear: bool, now: DateTime<Utc>) -> Result<()> {
    let mut orch = build_orchestrator(config, Arc::new(ClearSkyUvModel::default()))?;

    if clear {
        orch.clear_sunscreen(now).await?;
        println!("✓ Sunscreen cleared");
    } else {
        orch.apply_sunscreen(now).await?;
        let protection = chrono::Duration::minutes(orch.config().sunscreen.protection_minutes);
        println!("✓ Sunscreen applied");
        println!("  Protected until {}", (now + protection).to_rfc3339());
    }
    Ok(())
}

async fn cmd_maintenance(config: Config, now: DateTime<Utc>, position: Position) -> Result<()> {
    let mut orch = build_orchestrator(config, Arc::new(ClearSkyUvModel::default()))?;
    if let (Some(lat), Some(lon)) = (position.lat, position.lon) {
        orch.set_position(lat, lon);
    }

    orch.recover(now).await?;
    let report = orch.run_daily_maintenance(now).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_forecast(lat: f64, lon: f64, date: NaiveDate) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(Error::Config(format!("invalid position {}, {}", lat, lon)));
    }

    let points = ClearSkyUvModel::default().uv_forecast(lat, lon, date).await?;
    for point in &points {
        println!("{}  {:>5.1}", point.time.format("%H:%M"), point.uv_index);
    }
    match forecast_peak(&points) {
        Some(peak) if peak.uv_index > 0.0 => println!(
            "Peak: UV {:.1} at {} UTC",
            peak.uv_index,
            peak.time.format("%H:%M")
        ),
        _ => println!("No UV expected."),
    }
    Ok(())
}

async fn cmd_export(config: &Config, output: &Path) -> Result<()> {
    let backend = FileBackend::new(store_path(config));
    let user = backend.current_user()?.ok_or(Error::NoActiveUser)?;
    let profile = backend.fetch_profile(&user).await?;
    let sessions = backend.all_sessions(&user)?;

    let count = export_sessions_csv(&sessions, profile.effective_med(), output)?;
    println!("✓ Exported {} sessions", count);
    println!("  CSV: {}", output.display());
    Ok(())
}
