use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use mrl_sync::{clip, render_update_preview, LinkerConfig, LinkerPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "mrl")]
#[command(about = "Link missions to their best-matching resources")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print dataset statistics and keyword-based link suggestions.
    Analyze,
    /// Score every mission against every resource and write SQL updates.
    Match,
}

#[derive(Debug, Args)]
struct Overrides {
    /// Missions CSV (URL or local path).
    #[arg(long, global = true)]
    missions: Option<String>,
    /// Resources CSV (URL or local path).
    #[arg(long, global = true)]
    resources: Option<String>,
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// YAML scoring rules.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,
    #[arg(long, global = true)]
    reports_dir: Option<PathBuf>,
    /// Keep each downloaded CSV under this directory, named by content hash.
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    threshold: Option<f64>,
}

impl Overrides {
    fn apply(self, config: &mut LinkerConfig) {
        if let Some(v) = self.missions {
            config.missions_location = v;
        }
        if let Some(v) = self.resources {
            config.resources_location = v;
        }
        if let Some(v) = self.output {
            config.output_path = v;
        }
        if let Some(v) = self.rules {
            config.scoring_rules = Some(v);
        }
        if let Some(v) = self.reports_dir {
            config.reports_dir = v;
        }
        if let Some(v) = self.snapshot_dir {
            config.snapshot_dir = Some(v);
        }
        if let Some(v) = self.threshold {
            config.threshold_override = Some(v);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = LinkerConfig::from_env();
    cli.overrides.apply(&mut config);
    let pipeline = LinkerPipeline::new(config)?;

    match cli.command.unwrap_or(Commands::Match) {
        Commands::Analyze => {
            let analysis = pipeline.run_analysis().await?;
            println!("{}", analysis.render_text()?);
        }
        Commands::Match => {
            let summary = pipeline.run_match().await?;
            println!(
                "Found {} missions and {} resources\n",
                summary.missions, summary.resources
            );
            println!("=== SMART MATCHING ANALYSIS ===");
            for verdict in &summary.verdicts {
                match &verdict.matched {
                    Some(m) => println!(
                        "✓ '{}...' -> '{}...' (score: {:.3})",
                        clip(&verdict.mission_title, 40),
                        clip(&m.resource_title, 40),
                        m.score
                    ),
                    None => println!(
                        "✗ '{}...' -> No good match found",
                        clip(&verdict.mission_title, 40)
                    ),
                }
            }
            let matches: Vec<_> = summary
                .verdicts
                .iter()
                .filter_map(|v| v.matched.clone())
                .collect();
            println!("\n{}", render_update_preview(&matches));

            println!("\n=== MATCHING RESULTS ===");
            println!("Successfully matched: {} missions", summary.matched);
            println!("Unmatched missions: {}", summary.unmatched);
            println!(
                "\nSQL statements saved to {} (run {}, reports in {})",
                summary.sql_output, summary.run_id, summary.reports_dir
            );
        }
    }

    Ok(())
}
