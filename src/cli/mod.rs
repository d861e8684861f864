use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use chrono_english::{parse_date_string, Dialect};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{error, level_filters::LevelFilter};

use crate::{
    log::{
        backfill::{fill_missed, FixedIntervalSchedule},
        store::PingLog,
    },
    remote::{client::RemoteClient, projection::project_entries, sync::SyncEngine},
    settings::Settings,
    utils::{dir::create_application_default_path, logging::enable_logging, time::local_time_of_millis},
};

#[derive(Parser, Debug)]
#[command(name = "Tagtrail", version, long_about = None)]
#[command(about = "Stochastic time tracker that mirrors tagged pings to a goal service", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable logging")]
    log: bool,
    #[arg(
        long,
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Record an activity sample in the log")]
    Ping {
        #[arg(
            long,
            default_value = "",
            help = "Space-separated tags describing the current activity"
        )]
        tags: String,
        #[arg(
            long,
            help = "Moment the sample refers to. Examples are \"10 minutes ago\", \"12:00 16/03/2025\". Defaults to now"
        )]
        time: Option<String>,
    },
    #[command(about = "Backfill pings that were missed while the tracker was not running")]
    Backfill {
        #[arg(long, help = "Extra tags to add to every backfilled entry")]
        tags: Option<String>,
        #[arg(
            long,
            help = "Stop backfilling at this time. Examples are \"yesterday\", \"1 hour ago\", \"15/03/2025\". Defaults to now"
        )]
        until: Option<String>,
    },
    #[command(about = "Reconcile configured goals with the remote service")]
    Sync {
        #[arg(long, help = "Only reconcile the named goal")]
        goal: Option<String>,
    },
    #[command(about = "Print the last recorded timestamp")]
    Last {},
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.clone().map_or_else(create_application_default_path, Ok)?;

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };
    enable_logging(&app_dir, logging_level, args.log)?;

    let settings = Settings::load_or_create(&app_dir)?;

    match args.commands {
        Commands::Ping { tags, time } => process_ping(&app_dir, &settings, tags, time).await,
        Commands::Backfill { tags, until } => {
            process_backfill(&app_dir, &settings, tags, until).await
        }
        Commands::Sync { goal } => process_sync(&app_dir, &settings, goal).await,
        Commands::Last {} => process_last(&app_dir, &settings).await,
    }
}

async fn process_ping(
    app_dir: &Path,
    settings: &Settings,
    tags: String,
    time: Option<String>,
) -> Result<()> {
    let moment = parse_time_arg(time)?;
    let mut log = PingLog::open(&settings.log_path(app_dir)).await?;
    log.append_or_insert(moment.timestamp_millis(), tags.trim())
        .await?;
    println!("Recorded {} at {}", tags.trim(), moment.format("%H:%M:%S"));
    Ok(())
}

async fn process_backfill(
    app_dir: &Path,
    settings: &Settings,
    tags: Option<String>,
    until: Option<String>,
) -> Result<()> {
    let until = parse_time_arg(until)?.with_timezone(&Utc);
    let mut log = PingLog::open(&settings.log_path(app_dir)).await?;
    let before = log.read_entries().await?.len();

    let schedule = FixedIntervalSchedule::from_minutes(i64::from(settings.gap_minutes));
    fill_missed(&mut log, &schedule, tags.as_deref().unwrap_or(""), until).await?;

    let filled = log.read_entries().await?.len() - before;
    println!("Backfilled {filled} missed pings");
    Ok(())
}

async fn process_sync(app_dir: &Path, settings: &Settings, goal: Option<String>) -> Result<()> {
    let mut log = PingLog::open(&settings.log_path(app_dir)).await?;
    let entries = log.read_entries().await?;

    let client = RemoteClient::new(
        settings.api_base.clone(),
        settings.username.clone(),
        settings.auth_token.clone(),
    );
    let engine = SyncEngine::new(client);

    let selected = settings
        .goals
        .iter()
        .filter(|v| goal.as_ref().map_or(true, |name| v.goal == *name))
        .collect::<Vec<_>>();
    if selected.is_empty() {
        println!("No matching goals configured, nothing to sync");
        return Ok(());
    }

    for goal_config in selected {
        let points = project_entries(&entries, goal_config, settings.gap_minutes);
        match engine.sync_goal(&goal_config.goal, &points).await {
            Ok(report) => println!(
                "{}: {} created, {} updated, {} deleted",
                goal_config.goal, report.created, report.updated, report.deleted
            ),
            Err(e) => {
                error!("Couldn't sync goal {}: {e:?}", goal_config.goal);
                eprintln!(
                    "{}: sync failed ({e}), will catch up on the next run",
                    goal_config.goal
                );
                if matches!(e, crate::remote::client::RemoteError::Auth) {
                    // Every other goal would hit the same wall.
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn process_last(app_dir: &Path, settings: &Settings) -> Result<()> {
    let log = PingLog::open(&settings.log_path(app_dir)).await?;
    match log.last_timestamp() {
        Some(timestamp) => println!(
            "{timestamp} [{}]",
            local_time_of_millis(timestamp * 1000).format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("The log has no recorded pings yet"),
    }
    Ok(())
}

fn parse_time_arg(value: Option<String>) -> Result<DateTime<Local>> {
    let now = Local::now();
    let Some(value) = value else {
        return Ok(now);
    };
    match parse_date_string(&value, now, Dialect::Uk) {
        Ok(v) => Ok(v.with_timezone(&Local)),
        Err(e) => Err(Args::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                format!("Failed to parse time {e}"),
            )
            .into()),
    }
}
