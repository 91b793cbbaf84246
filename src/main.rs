use std::{num::NonZeroUsize, path::PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod cache;
mod config;
mod db;
mod error;
mod models;
mod rank;
mod recommend;
mod report;
mod routes;
mod server;
mod stats;

use cache::Dataset;
use config::Config;
use models::{Band, Scope};

#[derive(Parser)]
#[command(name = "exam-rank")]
#[command(about = "Exam score to citywide rank lookup with school recommendations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic sample distribution and school list
    Seed,
    /// Import score records from a CSV file (year,score,student_count[,inner_count])
    ImportScores {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import school admissions from a CSV file
    ImportSchools {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Resolve a score to its rank
    Rank {
        #[arg(long)]
        score: f64,
        #[arg(long)]
        year: Option<i32>,
        /// city or inner
        #[arg(long, default_value_t = Scope::City)]
        scope: Scope,
    },
    /// Band schools into reach / match / safety for a rank
    Recommend {
        #[arg(long)]
        rank: i64,
        #[arg(long)]
        year: Option<i32>,
        /// Population the rank was counted in: city or inner
        #[arg(long, default_value_t = Scope::City)]
        scope: Scope,
        /// Most schools listed per band
        #[arg(long)]
        limit: Option<NonZeroUsize>,
    },
    /// Generate a markdown statistics report
    Report {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    let pool = db::open(&config.database_url).await?;

    match cli.command {
        Commands::InitDb => {
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportScores { csv } => {
            let imported = db::import_scores_csv(&pool, &csv).await?;
            println!("Imported {imported} score records from {}.", csv.display());
        }
        Commands::ImportSchools { csv } => {
            let imported = db::import_schools_csv(&pool, &csv).await?;
            println!("Imported {imported} school admissions from {}.", csv.display());
        }
        Commands::Rank { score, year, scope } => {
            let dataset = Dataset::load(&pool, config.score_bounds, config.default_year).await?;
            let result = dataset.resolver.resolve_in(score, year, scope)?;

            println!(
                "{:.2} in {} ({}): rank {} of {} (ranks {}-{}, {} at this score), top {:.1}%",
                result.score,
                result.year,
                result.scope,
                result.rank,
                result.total_students,
                result.rank_range.start,
                result.rank_range.end,
                result.segment_count,
                result.percentage
            );
            if let (Some(inner_rank), Some(inner_total)) =
                (result.inner_rank, result.total_students_inner)
            {
                println!("Inner districts: rank {inner_rank} of {inner_total}");
            }
            println!("{}", result.analysis);
        }
        Commands::Recommend {
            rank,
            year,
            scope,
            limit,
        } => {
            let dataset = Dataset::load(&pool, config.score_bounds, config.default_year).await?;
            let year = year
                .or_else(|| dataset.latest_admission_year(scope))
                .with_context(|| format!("no {scope} school admission data loaded"))?;

            let bander = recommend::RecommendationBander::new(config.max_rank, config.bands);
            let result = bander.recommend(rank, &dataset.schools, year, scope, None, limit)?;

            if result.total_schools == 0 {
                println!("No schools fall within any band for {scope} rank {rank} ({year}).");
                return Ok(());
            }

            for band in Band::ALL {
                println!("{}:", band.label());
                for pick in &result.recommendations[&band] {
                    println!(
                        "- {} ({}) admission rank {} (x{:.2})",
                        pick.school.name, pick.school.region, pick.admission_rank, pick.relative
                    );
                }
            }
        }
        Commands::Report { year, out } => {
            let dataset = Dataset::load(&pool, config.score_bounds, config.default_year).await?;
            let distribution = dataset.resolver.distribution(year)?;
            let statistics = stats::statistics(distribution);
            let report = report::build_report(&dataset.resolver, &statistics, &dataset.schools);

            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            server::start_server(config, pool).await?;
        }
    }

    Ok(())
}
