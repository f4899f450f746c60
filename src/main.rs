use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;

use flakescope::analysis::commits::{correlate_commits, most_recent};
use flakescope::analysis::patterns::{extract_patterns, PatternOptions, PatternReport};
use flakescope::analysis::report::StabilityReport;
use flakescope::analysis::trend::{project_trend, test_trend, TrendReport};
use flakescope::analysis::{within_period, Granularity, Period};
use flakescope::config::FlakescopeConfig;
use flakescope::ingest::{ingest, parse_runs_json};
use flakescope::quarantine::{QuarantineManager, QuarantineRecord};
use flakescope::storage::{self, Pool, SqliteQuarantineStore};

#[derive(Parser)]
#[command(
    name = "flakescope",
    about = "Test stability analytics: flakiness scores, trends, failure patterns and quarantine",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (TOML). Defaults to $FLAKESCOPE_CONFIG, then ./flakescope.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a JSON file of run records and store them
    Ingest {
        /// JSON array of runs, or an object with a `runs` array
        #[arg(long)]
        file: PathBuf,
    },

    /// List flaky tests with recommendations
    Flaky {
        /// Minimum flakiness score (0-100) to be listed
        #[arg(long)]
        min_score: Option<u32>,

        /// Maximum number of tests to list
        #[arg(long)]
        limit: Option<usize>,

        /// Lookback window, e.g. 24h, 7d, 4w
        #[arg(long)]
        period: Option<Period>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Flakiness trend over time buckets (project-wide without --test)
    Trend {
        /// Test id
        #[arg(long)]
        test: Option<String>,

        /// Bucket size: hour, day or week
        #[arg(long)]
        granularity: Option<Granularity>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Cluster failure messages (project-wide without --test)
    Patterns {
        /// Test id
        #[arg(long)]
        test: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Commits seen in a test's history and the outcome that followed each
    Commits {
        /// Test id
        #[arg(long)]
        test: String,

        /// Number of most recent commits to show
        #[arg(long)]
        limit: Option<usize>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Manage quarantined tests
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
}

#[derive(Subcommand)]
enum QuarantineAction {
    /// Quarantine a test (refreshes an existing quarantine)
    Add {
        /// Test id
        #[arg(long)]
        test: String,

        /// Why the test is quarantined
        #[arg(long)]
        reason: Option<String>,

        /// Who is quarantining it
        #[arg(long)]
        actor: Option<String>,
    },

    /// Release a test from quarantine
    Release {
        /// Test id
        #[arg(long)]
        test: String,

        /// Who is releasing it
        #[arg(long)]
        actor: Option<String>,
    },

    /// List quarantined tests
    List {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn quarantine_manager(pool: &Pool, config: &FlakescopeConfig) -> QuarantineManager<SqliteQuarantineStore> {
    QuarantineManager::with_default_reason(
        SqliteQuarantineStore::new(pool.clone()),
        config.quarantine.default_reason.as_str(),
    )
}

fn require_known_test(pool: &Pool, test_id: &str) -> Result<()> {
    if test_id.trim().is_empty() {
        bail!("a test id is required");
    }
    if !storage::test_exists(pool, test_id)? {
        bail!("unknown test '{}'", test_id);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config fallbacks warn before the configured subscriber exists.
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || {
        FlakescopeConfig::resolve(cli.config.as_deref())
    })?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    init_tracing(&config.logging.level, cli.log_json || config.logging.json);

    let pool = storage::open_pool(&config.storage.db_path)?;
    let now = Utc::now();

    match cli.command {
        Commands::Ingest { file } => {
            tracing::info!(file = %file.display(), "Ingesting run records");
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let batch = ingest(parse_runs_json(&content)?);
            let inserted = storage::save_executions(&pool, &batch.records)?;

            println!(
                "Ingested {} executions ({} new, {} already stored, {} rejected).",
                batch.records.len(),
                inserted,
                batch.records.len() - inserted,
                batch.rejected.len()
            );
            for r in &batch.rejected {
                println!("  record #{}: {}", r.index, r.error);
            }
        }
        Commands::Flaky {
            min_score,
            limit,
            period,
            json,
        } => {
            let mut analysis = config.analysis.clone();
            if let Some(score) = min_score {
                analysis.min_flakiness_score = score;
            }
            if let Some(limit) = limit {
                analysis.max_flaky_tests = limit;
            }
            if period.is_some() {
                analysis.period = period;
            }

            let report = flakescope::stability_report(&pool, &analysis, now).await?;
            if json {
                print_json(&report)?;
            } else {
                print_stability_report(&report);
            }
        }
        Commands::Trend {
            test,
            granularity,
            json,
        } => {
            let granularity = granularity.unwrap_or(config.analysis.granularity);
            match test {
                Some(test_id) => {
                    require_known_test(&pool, &test_id)?;
                    let records = within_period(
                        &storage::load_test_history(&pool, &test_id)?,
                        config.analysis.period,
                        now,
                    );
                    let report = test_trend(&test_id, &records, granularity)?;
                    if json {
                        print_json(&report)?;
                    } else {
                        print_trend(&report);
                    }
                }
                None => {
                    let records = within_period(&storage::load_executions(&pool)?, config.analysis.period, now);
                    let summary = project_trend(&records, granularity);
                    if json {
                        print_json(&summary)?;
                    } else {
                        print_trend(&summary.report);
                        println!("Average score:    {:.1}", summary.average_score);
                        println!("Average failures: {:.1}", summary.average_failures);
                        if let Some(d) = &summary.deltas {
                            println!(
                                "Change:           score {:+}, failures {:+}, pass rate {:+.1}%",
                                d.score, d.failed_runs, d.pass_rate
                            );
                        }
                    }
                }
            }
        }
        Commands::Patterns { test, json } => {
            let report = match test {
                Some(test_id) => {
                    require_known_test(&pool, &test_id)?;
                    let records = within_period(
                        &storage::load_test_history(&pool, &test_id)?,
                        config.analysis.period,
                        now,
                    );
                    let opts = PatternOptions::per_test().with_top_n(config.analysis.max_error_patterns);
                    let mut report = extract_patterns(&records, opts);
                    report.test_id = Some(test_id);
                    report
                }
                None => {
                    let records = within_period(&storage::load_executions(&pool)?, config.analysis.period, now);
                    extract_patterns(&records, PatternOptions::project_wide())
                }
            };
            if json {
                print_json(&report)?;
            } else {
                print_patterns(&report);
            }
        }
        Commands::Commits { test, limit, json } => {
            require_known_test(&pool, &test)?;
            let records = within_period(
                &storage::load_test_history(&pool, &test)?,
                config.analysis.period,
                now,
            );
            let commits = most_recent(
                correlate_commits(&records),
                limit.unwrap_or(config.analysis.max_commits),
            );
            if json {
                print_json(&commits)?;
            } else if commits.is_empty() {
                println!("No commits recorded for {}.", test);
            } else {
                println!("{:<12} | {:<20} | {:<6} | Message", "Commit", "First seen", "After");
                println!("{:-<12}-|-{:-<20}-|-{:-<6}-|-{:-<30}", "", "", "", "");
                for c in &commits {
                    let short: String = c.sha.chars().take(12).collect();
                    println!(
                        "{:<12} | {:<20} | {:<6} | {}",
                        short,
                        c.first_seen_at.format("%Y-%m-%d %H:%M:%S"),
                        c.status_after.to_string(),
                        c.message.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Quarantine { action } => {
            let manager = quarantine_manager(&pool, &config);
            match action {
                QuarantineAction::Add { test, reason, actor } => {
                    let record = manager.quarantine(&test, reason.as_deref(), actor.as_deref(), now)?;
                    println!(
                        "Test '{}' quarantined: {}",
                        record.test_id,
                        record.reason.as_deref().unwrap_or("")
                    );
                }
                QuarantineAction::Release { test, actor } => {
                    let record = manager.unquarantine(&test, actor.as_deref(), now)?;
                    println!("Test '{}' released from quarantine.", record.test_id);
                }
                QuarantineAction::List { json } => {
                    let records = manager.list_quarantined()?;
                    if json {
                        print_json(&records)?;
                    } else {
                        print_quarantined(&records);
                    }
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Human-readable output
// ---------------------------------------------------------------------------

fn print_stability_report(report: &StabilityReport) {
    println!("\n=== Flakescope Stability Report ===");
    if let Some(period) = &report.period {
        println!("Period:        last {}", period);
    }
    println!(
        "Tests:         {} ({} analyzed, {} with too little history)",
        report.total_tests,
        report.analyzed_tests,
        report.insufficient_data.len()
    );
    println!(
        "Flaky tests:   {} (score >= {})",
        report.flaky_count, report.min_flakiness_score
    );

    if !report.flaky_tests.is_empty() {
        println!();
        println!("{:<40} | {:>5} | {:>6} | {:>5} | Quarantined", "Test", "Score", "Pass %", "Runs");
        println!("{:-<40}-|-{:->5}-|-{:->6}-|-{:->5}-|-{:-<11}", "", "", "", "", "");
        for t in &report.flaky_tests {
            println!(
                "{:<40} | {:>5} | {:>6.1} | {:>5} | {}",
                t.score.test_id,
                t.score.stats.score,
                t.score.pass_rate,
                t.score.stats.total_runs,
                if t.quarantined { "yes" } else { "no" }
            );
            for p in &t.error_patterns {
                println!("{:<40} |   {}x {}", "", p.count, p.pattern);
            }
        }
    }

    println!("\nRecommendations:");
    for r in &report.recommendations {
        println!(" - {}", r.message);
    }
    println!();
}

fn print_trend(report: &TrendReport) {
    match &report.test_id {
        Some(id) => println!("Trend for {} ({}): {}", id, report.granularity, report.trend),
        None => println!("Project trend ({}): {}", report.granularity, report.trend),
    }
    if report.points.is_empty() {
        println!("No bucket has enough runs to score.");
        return;
    }
    println!("{:<16} | {:>5} | {:>5} | {:>6} | {:>6}", "Bucket", "Runs", "Fails", "Pass %", "Score");
    println!("{:-<16}-|-{:->5}-|-{:->5}-|-{:->6}-|-{:->6}", "", "", "", "", "");
    for p in &report.points {
        println!(
            "{:<16} | {:>5} | {:>5} | {:>6.1} | {:>6}",
            p.label, p.stats.total_runs, p.stats.failed_runs, p.pass_rate, p.stats.score
        );
    }
    if report.skipped_buckets > 0 {
        println!("({} bucket(s) with a single run skipped)", report.skipped_buckets);
    }
}

fn print_patterns(report: &PatternReport) {
    match &report.test_id {
        Some(id) => println!("Failure patterns for {} ({} failures)", id, report.total_failures),
        None => println!("Project failure patterns ({} failures)", report.total_failures),
    }
    if report.clusters.is_empty() {
        println!("No failures recorded.");
        return;
    }
    for c in &report.clusters {
        println!("{:>5}x  {}", c.count, c.pattern);
    }
    if !report.failure_hours.is_empty() {
        println!("Failure hours: {}", report.failure_hours.join(", "));
    }
}

fn print_quarantined(records: &[QuarantineRecord]) {
    if records.is_empty() {
        println!("No tests are quarantined.");
        return;
    }
    println!("{:<40} | {:<20} | {:<12} | Reason", "Test", "Since", "Actor");
    println!("{:-<40}-|-{:-<20}-|-{:-<12}-|-{:-<30}", "", "", "", "");
    for r in records {
        println!(
            "{:<40} | {:<20} | {:<12} | {}",
            r.test_id,
            r.quarantined_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            r.actor.as_deref().unwrap_or("-"),
            r.reason.as_deref().unwrap_or("")
        );
    }
}
