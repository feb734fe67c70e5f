//! CLI entry point for the COVID-19 trend pipeline.
//!
//! Provides subcommands for a full pipeline run and for querying the
//! change-detection gate on its own.

use anyhow::Result;
use clap::{Parser, Subcommand};
use covid19_trends::{
    config::{Config, DEFAULT_CASES_SERVICE_URL, DEFAULT_WINDOW},
    fetch::BasicClient,
    gate,
    infra::arcgis::ArcGisClient,
    output::STATES_PATHS_FILE,
    pipeline,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "covid19_trends")]
#[command(about = "Builds county and state COVID-19 trend artifacts", long_about = None)]
struct Cli {
    /// Directory the artifacts are written to
    #[arg(short, long, global = true, env = "COVID19_OUTPUT_DIR", default_value = "public")]
    output_dir: PathBuf,

    /// Time-series feature layer URL
    #[arg(
        long,
        global = true,
        env = "COVID19_CASES_SERVICE_URL",
        default_value = DEFAULT_CASES_SERVICE_URL
    )]
    cases_service_url: String,

    /// Trend-category feature layer URL; trend labels are omitted when unset
    #[arg(long, global = true, env = "COVID19_TREND_SERVICE_URL")]
    trend_service_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check for upstream changes and rebuild every artifact
    Run {
        /// Run even when upstream is unchanged
        #[arg(short, long, default_value_t = false)]
        force: bool,

        /// Only process one state (by name)
        #[arg(short, long)]
        state: Option<String>,

        /// Days per aggregation window
        #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
        window: usize,

        /// Pin the new-cases chart y-max
        #[arg(long)]
        new_cases_y_max: Option<i64>,

        /// Counties catalog
        #[arg(long, default_value = "data/US-Counties.json")]
        counties_catalog: PathBuf,

        /// States catalog
        #[arg(long, default_value = "data/US-States.json")]
        states_catalog: PathBuf,

        /// Optional: S3 bucket name to upload artifacts to (e.g., "my-bucket")
        #[arg(long, env = "COVID19_S3_BUCKET")]
        s3_bucket: Option<String>,

        /// Optional: Gzip compress artifacts before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Report whether upstream changed since the last run
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/covid19_trends.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("covid19_trends.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let mut config = Config {
        cases_service_url: cli.cases_service_url,
        trend_service_url: cli.trend_service_url,
        output_dir: cli.output_dir,
        ..Default::default()
    };

    let api = ArcGisClient::new(
        BasicClient::new(),
        &config.cases_service_url,
        config.trend_service_url.as_deref(),
        config.trend_page_size,
    )?;

    match cli.command {
        Commands::Run {
            force,
            state,
            window,
            new_cases_y_max,
            counties_catalog,
            states_catalog,
            s3_bucket,
            gzip,
        } => {
            config.force = force;
            config.state_filter = state;
            config.window = window;
            config.new_cases_y_max = new_cases_y_max;
            config.counties_catalog = counties_catalog;
            config.states_catalog = states_catalog;
            config.s3_bucket = s3_bucket;
            config.gzip = gzip;

            let summary = pipeline::run(&api, &config).await?;
            if summary.skipped_by_gate {
                info!("Artifacts are up to date");
            }
        }
        Commands::Check => {
            let decision = gate::check(&api, &config.output_dir.join(STATES_PATHS_FILE)).await;
            info!(
                should_run = decision.should_run,
                upstream_modified = decision.upstream_modified,
                stored_modified = decision.stored_modified,
                "Gate check"
            );
            println!("{}", if decision.should_run { "run" } else { "up-to-date" });
        }
    }

    Ok(())
}
