mod fetch;
mod models;
mod notifier;
mod progress;
mod reader;
mod storage;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::fetch::HttpPageFetcher;
use crate::models::{Chapter, SpreadTable};
use crate::notifier::{SignalFileReloader, WidgetNotifier};
use crate::progress::ReadingLog;
use crate::reader::ChapterReader;
use crate::storage::pages::PageStore;
use crate::storage::widget::WidgetStore;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    opts: Options,

    #[command(subcommand)]
    command: Command,
}

/// Options shared by every subcommand.
#[derive(clap::Args, Debug)]
struct Options {
    /// Path to the page cache directory
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Directory shared with the home-screen widget
    #[arg(long, default_value = "./shared")]
    shared_dir: PathBuf,

    /// Page image URL template with {chapter} and {page} placeholders
    #[arg(
        long,
        default_value = "https://www.dragonball-multiverse.com/en/chapters/{chapter}/pages/{page}.jpg"
    )]
    page_url: String,

    /// Double-page spreads, as PRIMARY-SECOND page pairs
    #[arg(long = "spread", value_parser = parse_spread, default_values = ["8-9", "20-21"])]
    spreads: Vec<(u32, u32)>,

    /// Debounce window for widget refreshes, in milliseconds
    #[arg(long, default_value_t = 2000)]
    debounce_ms: u64,

    /// Minimum progress delta (percent) that justifies a widget refresh
    #[arg(long, default_value_t = 5)]
    min_progress_delta: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a chapter's pages into the cache
    Fetch {
        #[command(flatten)]
        chapter: ChapterArgs,
        /// Specific page numbers (defaults to the whole chapter)
        #[arg(long)]
        pages: Vec<u32>,
    },
    /// Record the page currently being read
    Progress {
        #[command(flatten)]
        chapter: ChapterArgs,
        #[arg(long)]
        page: u32,
    },
    /// Delete every cached page
    ClearCache,
}

/// Chapter identity comes in on the command line; the chapter list itself
/// lives outside this tool.
#[derive(clap::Args, Debug)]
struct ChapterArgs {
    #[arg(long)]
    chapter: u32,
    #[arg(long)]
    name: String,
    #[arg(long)]
    start: u32,
    #[arg(long)]
    end: u32,
}

impl ChapterArgs {
    fn into_chapter(self) -> Chapter {
        Chapter {
            number: self.chapter,
            name: self.name,
            start_page: self.start,
            end_page: self.end,
        }
    }
}

fn parse_spread(value: &str) -> Result<(u32, u32), String> {
    let (first, second) = value
        .split_once('-')
        .ok_or_else(|| format!("expected PRIMARY-SECOND, got {value:?}"))?;
    let first: u32 = first.trim().parse().map_err(|e| format!("{e}"))?;
    let second: u32 = second.trim().parse().map_err(|e| format!("{e}"))?;
    Ok((first, second))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "dbm_reader=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Args { opts, command } = Args::parse();
    let store = PageStore::new(&opts.data_dir);

    match command {
        Command::ClearCache => {
            store.clear().await?;
            tracing::info!("Page cache cleared");
            Ok(())
        }
        Command::Fetch { chapter, pages } => {
            let chapter = chapter.into_chapter();
            let requested: Vec<u32> = if pages.is_empty() {
                (chapter.start_page..=chapter.end_page).collect()
            } else {
                pages
            };
            run_fetch(&opts, store, chapter, requested).await
        }
        Command::Progress { chapter, page } => {
            let chapter = chapter.into_chapter();
            run_progress(&opts, store, chapter, page).await
        }
    }
}

fn build_reader(
    opts: &Options,
    store: PageStore,
    chapter: Chapter,
) -> (
    ChapterReader<HttpPageFetcher, ReadingLog>,
    tokio::task::JoinHandle<()>,
) {
    let spreads = SpreadTable::from_pairs(opts.spreads.clone());
    let widget_store = WidgetStore::new(&opts.shared_dir);
    let (notifier, notifier_task) = WidgetNotifier::spawn(
        widget_store.clone(),
        Arc::new(SignalFileReloader::new(&opts.shared_dir)),
        Duration::from_millis(opts.debounce_ms),
        opts.min_progress_delta,
    );
    let reader = ChapterReader::new(
        chapter,
        spreads,
        store,
        widget_store,
        HttpPageFetcher::new(&opts.page_url),
        ReadingLog::new(&opts.data_dir),
        notifier,
    );
    (reader, notifier_task)
}

async fn run_fetch(
    opts: &Options,
    store: PageStore,
    chapter: Chapter,
    requested: Vec<u32>,
) -> Result<()> {
    let spreads = SpreadTable::from_pairs(opts.spreads.clone());
    let expected = requested
        .iter()
        .filter(|p| !spreads.is_second_page(**p))
        .count();

    let (reader, notifier_task) = build_reader(opts, store, chapter);
    tracing::info!(
        chapter = reader.chapter().number,
        pages = requested.len(),
        "Fetching chapter"
    );

    let pages = reader.prefetch(&requested).await?;

    if pages.len() < expected {
        tracing::warn!(
            got = pages.len(),
            expected,
            "Some pages were unavailable; run fetch again to retry them"
        );
    } else {
        tracing::info!(pages = pages.len(), "Chapter complete in cache");
    }

    // Dropping the reader closes the notifier channel and flushes it.
    drop(reader);
    notifier_task.await?;
    Ok(())
}

async fn run_progress(opts: &Options, store: PageStore, chapter: Chapter, page: u32) -> Result<()> {
    let (reader, notifier_task) = build_reader(opts, store, chapter);
    reader.update_current_page_number(page).await?;
    tracing::info!(
        page,
        progress = reader.chapter().progress_at(page),
        "Reading position updated"
    );

    drop(reader);
    notifier_task.await?;
    Ok(())
}
