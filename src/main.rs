//! CLI entry point for the course downloader.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use course_downloader::download::filename::file_name_from_url;
use course_downloader::{
    ActionContext, AlwaysGranted, DownloadItem, DownloadServices, DownloadState,
    DownloaderConfig, FileDownloadItem, HttpEngine, LifecycleState,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, TargetArgs};

const PROGRESS_TICK_MS: u64 = 100;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = match &args.config {
        Some(path) => DownloaderConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => DownloaderConfig::load_default().context("failed to load default config")?,
    };
    debug!(?config, "effective configuration");

    let engine = HttpEngine::new(config.http_engine_options())
        .context("failed to start the transfer engine")?;
    let services = DownloadServices::builder(Arc::new(engine))
        .storage(config.storage_locations())
        .environment(config.request_environment())
        .build();
    let event_loop = services.start_event_loop();
    let ctx = ActionContext::new(Arc::new(AlwaysGranted));

    let code = match args.command {
        Command::Fetch { target, size, json } => {
            let item = build_item(&services, &target, config.show_notifications).size(size);
            fetch(&services, &ctx, &item, json, args.quiet).await?
        }
        Command::Delete {
            target,
            keep_secondaries,
        } => {
            let item = build_item(&services, &target, config.show_notifications)
                .delete_secondary_if(move |_| !keep_secondaries);
            delete(&ctx, &item)
        }
        Command::Locate { target } => {
            let item = build_item(&services, &target, config.show_notifications);
            locate(&item)
        }
    };

    event_loop.abort();
    Ok(code)
}

fn build_item(services: &DownloadServices, target: &TargetArgs, notify: bool) -> FileDownloadItem {
    let name = target
        .name
        .clone()
        .unwrap_or_else(|| file_name_from_url(&target.url));
    let secondaries = target
        .secondaries
        .iter()
        .map(|url| {
            FileDownloadItem::new(services, Some(url.as_str()), file_name_from_url(url))
                .folder(&target.folder)
                .show_notification(false)
        })
        .collect();

    FileDownloadItem::new(services, Some(target.url.as_str()), name)
        .folder(&target.folder)
        .show_notification(notify)
        .secondaries(secondaries)
}

async fn fetch(
    services: &DownloadServices,
    ctx: &ActionContext,
    item: &FileDownloadItem,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let identifier = item.identifier()?;
    if !item.is_downloadable() {
        bail!("not a valid download URL: {identifier}");
    }

    if let Some(path) = item.download() {
        info!(path = %path.display(), "already downloaded");
        report(item, json);
        return Ok(ExitCode::SUCCESS);
    }

    if !item.start(ctx) {
        bail!("download of {identifier} was not started");
    }

    let progress = if quiet || json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(item.download_size())
    };
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    progress.set_message(item.title().to_string());

    let cell = services.lifecycle().of(&identifier);
    let finished = cell.wait_until(|state| state != LifecycleState::Started);
    tokio::pin!(finished);
    let mut ticker = tokio::time::interval(Duration::from_millis(PROGRESS_TICK_MS));

    let final_state = loop {
        tokio::select! {
            state = &mut finished => break state,
            _ = ticker.tick() => {
                if let Some(status) = item.status() {
                    progress.set_length(status.total_bytes);
                    progress.set_position(status.downloaded_bytes);
                }
            }
        }
    };
    progress.finish_and_clear();
    debug!(url = %identifier, state = %final_state, "lifecycle settled");

    report(item, json);

    let failed = item
        .status()
        .is_some_and(|status| status.state == DownloadState::Failed);
    if failed || final_state == LifecycleState::Deleted {
        warn!(url = %identifier, "download failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn report(item: &FileDownloadItem, json: bool) {
    let path = item.download();
    if json {
        let value = serde_json::json!({
            "url": item.identifier().ok(),
            "path": path,
            "status": item.status(),
        });
        println!("{value}");
    } else if let Some(path) = path {
        println!("{}", path.display());
    }
}

fn delete(ctx: &ActionContext, item: &FileDownloadItem) -> ExitCode {
    if item.delete(ctx) {
        info!(file = %item.title(), "deleted");
    } else {
        info!(file = %item.title(), "nothing to delete");
    }
    ExitCode::SUCCESS
}

fn locate(item: &FileDownloadItem) -> ExitCode {
    match item.open_target() {
        Some(target) => {
            println!("{}", target.path.display());
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("{} is not downloaded", item.title());
            ExitCode::FAILURE
        }
    }
}
