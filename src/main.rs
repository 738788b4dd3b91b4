use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde_json::json;
use std::path::PathBuf;

use tripweave_rs::trip::server;
use tripweave_rs::trip::{
    AccommodationTier, BudgetTier, PlanningService, Settings, TransportMode, TripRequest,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML settings file (defaults to ./tripweave.yaml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan a trip and wait for the itinerary
    Plan {
        /// Destination city
        #[arg(long)]
        city: String,

        /// First day of the trip (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Number of days
        #[arg(long)]
        days: u32,

        #[arg(long, default_value = "public_transit")]
        transport: TransportMode,

        /// economy, comfort or luxury
        #[arg(long, default_value = "comfort")]
        tier: AccommodationTier,

        /// low, medium or high
        #[arg(long, default_value = "medium")]
        budget: BudgetTier,

        /// Preference tag, most important first (repeatable)
        #[arg(long = "pref")]
        preferences: Vec<String>,
    },
    /// Resume an interrupted run from its latest checkpoint
    Resume {
        #[arg(long)]
        run_id: String,
    },
    /// Show the status of a run
    Status {
        #[arg(long)]
        run_id: String,
    },
    /// Start the HTTP server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref()).context("Failed to load settings")?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log_level))
        .init();

    let service = PlanningService::from_settings(&settings).await?;

    match args.command {
        Commands::Plan {
            city,
            start,
            days,
            transport,
            tier,
            budget,
            preferences,
        } => {
            let request = TripRequest::new(city, start, days)
                .with_transport(transport)
                .with_accommodation(tier)
                .with_budget(budget)
                .with_preferences(preferences);

            let state = service.plan(request).await?;
            let output = json!({
                "run": state.summary(),
                "itinerary": state.itinerary,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Resume { run_id } => {
            let state = service.resume_to_completion(&run_id).await?;
            let output = json!({
                "run": state.summary(),
                "itinerary": state.itinerary,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Status { run_id } => {
            let summary = service.get_run_status(&run_id).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Serve { port } => {
            let port = port.unwrap_or(settings.port);
            server::serve(service, &settings.host, port).await?;
        }
    }

    Ok(())
}
