use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use battle_pass_leaderboard::badges::{default_badges, earned_xp, evaluate_badges, load_badges};
use battle_pass_leaderboard::cleanse::{cleanse, validate};
use battle_pass_leaderboard::config::{
    FailurePolicy, MissingTimestampPolicy, ScoringConfig, Settings, SourceLocation, TierMode,
};
use battle_pass_leaderboard::history::{find_member, member_history};
use battle_pass_leaderboard::leaderboard::{DataSources, LeaderboardBuilder};
use battle_pass_leaderboard::models::{Leaderboard, RecordOrigin};
use battle_pass_leaderboard::normalize::normalize_batch;
use battle_pass_leaderboard::report;
use battle_pass_leaderboard::source::build_source;

#[derive(Parser)]
#[command(name = "battle-pass")]
#[command(about = "Attendance points, tiers and badges for chapter members", long_about = None)]
struct Cli {
    #[command(flatten)]
    sources: SourceArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Sign-in sheet export (CSV)
    #[arg(long, global = true, conflicts_with = "signins_url")]
    signins_csv: Option<PathBuf>,
    /// Published sign-in sheet URL; repeat for fallbacks
    #[arg(long, global = true)]
    signins_url: Vec<String>,
    /// Paid-member roster export (CSV)
    #[arg(long, global = true, conflicts_with = "roster_url")]
    roster_csv: Option<PathBuf>,
    #[arg(long, global = true)]
    roster_url: Vec<String>,
    /// Historical sign-in export merged with live rows
    #[arg(long, global = true)]
    snapshot_csv: Option<PathBuf>,
    /// JSON map of email to {"adjustment", "reason"}
    #[arg(long, global = true)]
    overrides: Option<PathBuf>,
    /// Scoring configuration (JSON); unset fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Fail instead of degrading when a source is unavailable
    #[arg(long, global = true)]
    strict: bool,
    /// Assign tiers by point thresholds instead of percentiles
    #[arg(long, global = true)]
    fixed_tiers: bool,
    /// Score sign-ins without a timestamp as happening now
    #[arg(long, global = true)]
    missing_timestamp_now: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ranked leaderboard
    Leaderboard {
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show one member's scored attendance history
    History {
        #[arg(long)]
        member: String,
        #[arg(long)]
        json: bool,
    },
    /// Show badge progress for one member
    Badges {
        #[arg(long)]
        member: String,
        /// JSON array of badge definitions replacing the club defaults
        #[arg(long)]
        badges: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Run the cleansing pass and print what it changed
    Cleanse,
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value = "leaderboard.md")]
        out: PathBuf,
    },
}

impl SourceArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.signins_csv {
            settings.sign_ins = SourceLocation::File(path.clone());
        } else if !self.signins_url.is_empty() {
            settings.sign_ins = SourceLocation::Urls(self.signins_url.clone());
        }
        if let Some(path) = &self.roster_csv {
            settings.roster = SourceLocation::File(path.clone());
        } else if !self.roster_url.is_empty() {
            settings.roster = SourceLocation::Urls(self.roster_url.clone());
        }
        if self.snapshot_csv.is_some() {
            settings.snapshot = self.snapshot_csv.clone();
        }
        if self.overrides.is_some() {
            settings.overrides = self.overrides.clone();
        }
        if self.config.is_some() {
            settings.scoring = self.config.clone();
        }
    }

    fn tune(&self, scoring: &mut ScoringConfig) {
        if self.strict {
            scoring.failure_policy = FailurePolicy::Strict;
        }
        if self.fixed_tiers {
            scoring.tier_mode = TierMode::Fixed;
        }
        if self.missing_timestamp_now {
            scoring.missing_timestamp = MissingTimestampPolicy::UseNow;
        }
    }
}

fn open_sources(settings: &Settings) -> anyhow::Result<DataSources> {
    let snapshot = match &settings.snapshot {
        Some(path) => SourceLocation::File(path.clone()),
        None => SourceLocation::None,
    };
    let build = |name: &str, location: &SourceLocation, ttl| {
        build_source(name, location, ttl, settings.http_timeout, settings.retry)
            .with_context(|| format!("failed to configure {name} source"))
    };

    Ok(DataSources {
        sign_ins: build("sign-ins", &settings.sign_ins, settings.sign_in_ttl)?,
        snapshot: build("snapshot", &snapshot, settings.sign_in_ttl)?,
        roster: build("roster", &settings.roster, settings.roster_ttl)?,
        overrides: settings.overrides.clone(),
    })
}

async fn load_leaderboard(builder: &LeaderboardBuilder, sources: &DataSources) -> anyhow::Result<Leaderboard> {
    builder
        .refresh(sources)
        .await
        .context("failed to compute leaderboard")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = Settings::from_env().context("invalid BATTLE_PASS_* environment")?;
    cli.sources.apply(&mut settings);

    let mut scoring = match &settings.scoring {
        Some(path) => ScoringConfig::from_json_file(path)
            .with_context(|| format!("failed to read scoring config {}", path.display()))?,
        None => ScoringConfig::default(),
    };
    cli.sources.tune(&mut scoring);
    scoring.validate().context("invalid scoring config")?;

    let sources = open_sources(&settings)?;
    let builder = LeaderboardBuilder::new(scoring);

    match cli.command {
        Commands::Leaderboard { limit, json } => {
            let leaderboard = load_leaderboard(&builder, &sources).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&leaderboard)?);
                return Ok(());
            }
            if leaderboard.entries.is_empty() {
                println!("No sign-ins recorded yet.");
                return Ok(());
            }

            println!("{}", report::describe_thresholds(&leaderboard.tier_thresholds));
            for entry in leaderboard.entries.iter().take(limit) {
                println!("{}", report::format_entry(entry));
            }
        }
        Commands::History { member, json } => {
            let leaderboard = load_leaderboard(&builder, &sources).await?;
            let history = member_history(&leaderboard, &member)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                print!("{}", report::render_history(&history));
            }
        }
        Commands::Badges {
            member,
            badges,
            json,
        } => {
            let catalogue = match &badges {
                Some(path) => load_badges(path)
                    .with_context(|| format!("failed to read badge catalogue {}", path.display()))?,
                None => default_badges(),
            };
            let leaderboard = load_leaderboard(&builder, &sources).await?;
            let entry = find_member(&leaderboard, &member)
                .with_context(|| format!("no member matches {member}"))?;
            let progress = evaluate_badges(&entry.member, &catalogue);

            if json {
                let payload = serde_json::json!({
                    "handle": entry.member.handle,
                    "earned_xp": earned_xp(&progress),
                    "badges": progress,
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                print!("{}", report::render_badges(&entry.member.handle, &progress));
            }
        }
        Commands::Cleanse => {
            let (live, snapshot) = tokio::join!(sources.sign_ins.fetch(), sources.snapshot.fetch());
            let live = live.context("failed to read sign-ins")?;
            let snapshot = snapshot.context("failed to read snapshot")?;

            let mut records = normalize_batch(&snapshot, RecordOrigin::Snapshot).records;
            records.extend(normalize_batch(&live, RecordOrigin::Live).records);
            let outcome = cleanse(records);
            let issues = validate(&outcome.records);

            print!("{}", report::render_cleanse_report(&outcome.report, &issues));
        }
        Commands::Report { limit, out } => {
            let leaderboard = load_leaderboard(&builder, &sources).await?;
            let markdown = report::build_report(&leaderboard, Utc::now().naive_utc(), limit);
            std::fs::write(&out, markdown)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
