use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser as ClapParser, Subcommand};
use tracing::{info, warn};

use alert_hub::config::{AppConfig, ParseMode, ScorerKind};
use alert_hub::pipeline::{self, BatchReport, CancelToken};
use alert_hub::reference::References;
use alert_hub::{db, fetch, DataSource, Document, Parser};

#[derive(ClapParser)]
#[command(name = "alert_hub", about = "Import alert parser and unified record store")]
struct Cli {
    /// Config file (default: ./alert_hub.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Overrides {
    /// Anchor layout of the source pages
    #[arg(long, global = true, value_enum)]
    mode: Option<ParseMode>,
    /// Keep only records published on this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    target_date: Option<NaiveDate>,
    /// Reference match acceptance threshold, 0..=1
    #[arg(long, global = true)]
    threshold: Option<f64>,
    #[arg(long, global = true, value_enum)]
    scorer: Option<ScorerKind>,
    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Parser worker threads
    #[arg(long, global = true)]
    workers: Option<usize>,
}

impl Overrides {
    fn apply(self, cfg: &mut AppConfig) {
        if let Some(mode) = self.mode {
            cfg.parse.mode = mode;
        }
        if self.target_date.is_some() {
            cfg.parse.target_date = self.target_date;
        }
        if let Some(t) = self.threshold {
            cfg.parse.match_threshold = t;
        }
        if let Some(s) = self.scorer {
            cfg.scorer = s;
        }
        if let Some(db) = self.db {
            cfg.db_path = db;
        }
        if let Some(w) = self.workers {
            cfg.workers = w;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse local alert pages and merge them into the store
    Parse {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Data source tag for the parsed records (default from config)
        #[arg(long)]
        source: Option<String>,
    },
    /// Discover alerts from the index page, fetch and parse them
    Fetch {
        /// Max alerts to fetch (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show record counts and missing-value stats
    Stats,
    /// Write all stored records as JSON lines
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut cfg = AppConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut cfg);

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight documents");
                cancel.cancel();
            }
        });
    }

    let result = match cli.command {
        Commands::Parse { files, source } => {
            if let Some(s) = source {
                cfg.data_source = s.parse().unwrap_or(DataSource::Unknown);
            }
            let mut docs = Vec::with_capacity(files.len());
            for path in &files {
                let html = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {:?}", path))?;
                let id = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                docs.push(Document::from_html(&id, &html));
            }
            println!("Parsing {} documents...", docs.len());
            let report = parse_and_store(&cfg, &docs, &cancel)?;
            print_report(&report);
            Ok(())
        }
        Commands::Fetch { limit } => {
            let client = fetch::build_client()?;
            let index = fetch::fetch_index(&client, &cfg.index_url).await?;
            let mut links = fetch::discover_alert_links(&index, &cfg.index_url)?;
            if let Some(n) = limit {
                links.truncate(n);
            }
            if links.is_empty() {
                println!("No alerts found on the index page.");
                return Ok(());
            }

            let t_fetch = Instant::now();
            println!("Fetching {} alert pages...", links.len());
            let (pages, stats) = fetch::fetch_pages(&client, links, cfg.fetch_concurrency).await?;
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total,
                stats.ok,
                stats.errors,
                t_fetch.elapsed().as_secs_f64()
            );

            let mut docs: Vec<Document> = pages
                .into_iter()
                .filter_map(|p| Some(Document::from_html(&p.alert_no, &p.html?)))
                .collect();
            // Completion order is arbitrary; parse in a stable order.
            docs.sort_by(|a, b| a.source_id.cmp(&b.source_id));

            println!("Parsing {} documents...", docs.len());
            let report = parse_and_store(&cfg, &docs, &cancel)?;
            print_report(&report);
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Total records: {}", s.total);
            if !s.by_source.is_empty() {
                println!(
                    "{:<10} | {:>7} | {:>7} | {:>10} | {:>9} | {:>10}",
                    "Source", "Records", "Undated", "No country", "No hazard", "Analyzable"
                );
                println!("{}", "-".repeat(68));
                for src in &s.by_source {
                    println!(
                        "{:<10} | {:>7} | {:>7} | {:>10} | {:>9} | {:>10}",
                        src.data_source,
                        src.total,
                        src.undated,
                        src.no_country,
                        src.no_hazard,
                        src.analyzable
                    );
                }
            }
            Ok(())
        }
        Commands::Export { out } => {
            let conn = db::connect(&cfg.db_path)?;
            db::init_schema(&conn)?;
            let n = match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {:?}", path))?;
                    let mut w = std::io::BufWriter::new(file);
                    let n = db::export_jsonl(&conn, &mut w)?;
                    info!("Exported {} records to {:?}", n, path);
                    n
                }
                None => db::export_jsonl(&conn, &mut std::io::stdout().lock())?,
            };
            eprintln!("Exported {} records.", n);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Parse in the worker pool, merge with what the store already holds for this
/// source, and write the merged set back.
fn parse_and_store(cfg: &AppConfig, docs: &[Document], cancel: &CancelToken) -> Result<BatchReport> {
    let refs = Arc::new(References::load_dir(&cfg.reference_dir)?);
    let parser = Parser::new(cfg, refs)?;

    let conn = db::connect(&cfg.db_path)?;
    db::init_schema(&conn)?;
    let existing = db::load_source(&conn, parser.data_source())?;

    let report = pipeline::parse_batch(&parser, docs, &existing, cfg.workers, cancel)?;
    let saved = db::save_records(&conn, &report.records)?;
    info!("Saved {} records to {:?}", saved, cfg.db_path);
    Ok(report)
}

fn print_report(report: &BatchReport) {
    println!(
        "Parsed {} documents ({} failed, {} cancelled): {} records extracted, {} diagnostics, {} stored.",
        report.parsed,
        report.failed,
        report.cancelled,
        report.extracted,
        report.diagnostics,
        report.records.len(),
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
