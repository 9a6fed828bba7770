//! 🚀 ulg: the front door of the chat archive.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Parses args, sets up logging, loads config, then hands off to the library.
//! Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ulg::app_config::{AppConfig, load_config};
use ulg::coordinator::{Coordinator, IngestSettings, IngestionReport, run_ingest};
use ulg::normalizer::Normalizer;
use ulg::search::SearchEngine;

#[derive(Debug, Parser)]
#[command(name = "ulg", version, about = "📼 livestream chat archive: ingest, convert, serve")]
struct Cli {
    /// 🔧 TOML config file. Optional if everything is in ULG_* env vars.
    #[arg(short, long, global = true, env = "ULG_CONFIG", default_value = "ulg.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📥 Index every pending chat log, then route it to processed/error
    Ingest {
        /// 🙈 no progress bar (logs only)
        #[arg(long)]
        no_progress: bool,
    },
    /// 📼 Upsert the video listing into the videos index
    IngestVideos,
    /// 🎙️ Turn *_fixed.vtt subtitle files into pending transcript files
    ConvertVtt {
        /// 📂 overrides ingest.subtitles_dir
        #[arg(long)]
        subtitles_dir: Option<PathBuf>,
    },
    /// 🌐 Serve the search API
    Serve {
        /// 📡 overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
}

/// 🔍 The config file is optional, but if it's named it should be there. A missing file
/// falls back to environment-only config.
fn resolve_config(path: &Path) -> Result<AppConfig> {
    let the_file_exists = path.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even check whether '{}' exists. Permissions, maybe. Or a cursed mount.",
            path.display()
        )
    })?;
    let the_file = if the_file_exists {
        Some(path)
    } else {
        warn!("⚠️ '{}' not found, configuring from ULG_* environment variables only", path.display());
        None
    };
    load_config(the_file).context(
        "💀 In ulg-cli, main, we couldn't load the config. Take a look at the file and the ULG_* variables. \
         Make sure you didn't forget something obvious.",
    )
}

fn render_ingestion_report(report: &IngestionReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["file", "state", "lines", "indexed", "skipped", "dropped", "error"]);
    for file in &report.files {
        let the_error = match (&file.error, &file.routing_error) {
            (Some(err), _) => format!("{}: {}", err.kind(), err),
            (None, Some(routing)) => format!("routing: {routing}"),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(&file.file.name),
            Cell::new(format!("{:?}", file.state)),
            Cell::new(file.lines),
            Cell::new(file.succeeded),
            Cell::new(file.skipped_lines),
            Cell::new(file.dropped),
            Cell::new(the_error),
        ]);
    }
    format!(
        "{table}\n✅ {} processed, 💀 {} errored, 🛑 {} not started, 📄 {} documents indexed, 🙈 {} lines skipped",
        report.processed().count(),
        report.errored().count(),
        report.not_started,
        report.total_indexed(),
        report.total_skipped_lines()
    )
}

async fn ingest(config: &AppConfig, no_progress: bool) -> Result<()> {
    let the_coordinator = Coordinator::new(
        ulg::connect_store(config).await?,
        ulg::open_source(config).await?,
        ulg::load_catalog(config).await?,
        Normalizer::new(config.ingest.transcript_author.clone()),
        IngestSettings::from_config(config, !no_progress),
    );

    // 🛑 ctrl-c stops new files from starting. the ones in flight get to finish.
    let the_stop = the_coordinator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 ctrl-c: no new files will start, waiting for in-flight ones");
            the_stop.stop();
        }
    });

    let the_report = run_ingest(&the_coordinator).await?;
    if !the_report.files.is_empty() {
        println!("{}", render_ingestion_report(&the_report));
    }
    let the_retryable = the_report.retryable();
    if !the_retryable.is_empty() {
        warn!("🔁 {} files failed on transport and can be retried:", the_retryable.len());
        for file in the_retryable {
            warn!("🔁   {}", file.name);
        }
    }
    Ok(())
}

async fn ingest_videos(config: &AppConfig) -> Result<()> {
    let Some(the_path) = &config.ingest.videos_ndjson else {
        bail!("💀 ingest.videos_ndjson is not set. Nothing to push into '{}'.", config.elasticsearch.videos_index);
    };
    let the_catalog = ulg::videos::VideoCatalog::load(the_path).await?;
    let the_store = ulg::connect_store(config).await?;
    let the_report =
        ulg::videos::ingest_videos(the_store.as_ref(), &config.elasticsearch.videos_index, &the_catalog).await?;
    info!(
        "📼 {} videos upserted, {} rejected, in {} chunks",
        the_report.succeeded, the_report.failed, the_report.chunks
    );
    Ok(())
}

async fn convert_vtt(config: &AppConfig, subtitles_dir: Option<PathBuf>) -> Result<()> {
    let Some(the_dir) = subtitles_dir.or_else(|| config.ingest.subtitles_dir.clone()) else {
        bail!("💀 No subtitles directory. Pass --subtitles-dir or set ingest.subtitles_dir.");
    };
    let the_catalog = ulg::load_catalog(config).await?;
    let the_source = ulg::open_source(config).await?;
    ulg::transcripts::convert_vtt_dir(&the_dir, &the_catalog, the_source.as_ref()).await?;
    Ok(())
}

async fn serve(config: &AppConfig, bind: Option<String>) -> Result<()> {
    let the_engine = SearchEngine::from_config(ulg::connect_store(config).await?, config);
    let the_bind = bind.unwrap_or_else(|| config.server.bind.clone());
    ulg::server::serve(the_engine, &the_bind, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("🛑 ctrl-c: finishing in-flight requests");
    })
    .await
}

async fn run(cli: Cli) -> Result<()> {
    let the_config = resolve_config(&cli.config)?;
    match cli.command {
        Command::Ingest { no_progress } => ingest(&the_config, no_progress).await,
        Command::IngestVideos => ingest_videos(&the_config).await,
        Command::ConvertVtt { subtitles_dir } => convert_vtt(&the_config, subtitles_dir).await,
        Command::Serve { bind } => serve(&the_config, bind).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past, like cargo shorts
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let the_cli = Cli::parse();

    if let Err(err) = run(the_cli).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
                || cause_str.contains("document store unavailable")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }
        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. Check elasticsearch.url, \
                 then check it's actually running. With Docker: `docker ps`, or \
                 `docker compose up -d` to resurrect it. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}
