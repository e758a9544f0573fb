//! galleria - incremental catalog of generated images and videos.
//!
//! A single binary that:
//! - Syncs a library directory into a DuckDB catalog
//! - Extracts sampler parameters from embedded pipeline graphs
//! - Queries, inspects and curates the catalog from the terminal

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use galleria_core::MediaKind;
use galleria_daemon::storage::{Bounds, Catalog, PageRequest, QueryFilters, SortField, SortOrder};
use galleria_daemon::sync::{SyncCoordinator, SyncEvent};
use galleria_daemon::GalleriaConfig;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod output;

/// Catalog generated media and the pipeline parameters embedded in it
#[derive(Parser, Debug)]
#[command(name = "galleria")]
#[command(about = "Catalog generated media and the pipeline parameters embedded in it")]
#[command(version)]
struct Cli {
    /// Library root; locates `.galleria.toml` and the default catalog
    #[arg(short = 'L', long, global = true, default_value = ".", env = "GALLERIA_LIBRARY")]
    library: PathBuf,

    /// Catalog database file
    #[arg(long, global = true, env = "GALLERIA_CATALOG")]
    catalog: Option<PathBuf>,

    /// Config file (instead of `<library>/.galleria.toml`)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the library and bring the catalog up to date
    Sync {
        /// Library root (overrides --library)
        root: Option<PathBuf>,

        /// Extraction worker threads (0 = one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cataloged files matching filters
    Query(QueryArgs),

    /// Show one file and its extracted parameters
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Toggle, or set with --set, the favorite flag
    Favorite {
        #[arg(required = true)]
        ids: Vec<String>,

        #[arg(long)]
        set: Option<bool>,
    },

    /// Remove files from the catalog (files on disk are not touched)
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// List filterable values: models, samplers, schedulers, ranges
    Options {
        #[arg(long)]
        json: bool,
    },

    /// Catalog statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Case-insensitive text in file names and prompts
    text: Option<String>,

    /// Only favorites
    #[arg(short, long)]
    favorites: bool,

    /// image, video or other
    #[arg(long, value_parser = parse_kind)]
    kind: Option<MediaKind>,

    /// File extension (repeatable)
    #[arg(long = "ext")]
    extensions: Vec<String>,

    /// Only files with an embedded graph
    #[arg(long, conflicts_with = "no_graph")]
    has_graph: bool,

    /// Only files without an embedded graph
    #[arg(long)]
    no_graph: bool,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    sampler: Option<String>,

    #[arg(long)]
    scheduler: Option<String>,

    #[arg(long)]
    cfg_min: Option<f64>,

    #[arg(long)]
    cfg_max: Option<f64>,

    #[arg(long)]
    steps_min: Option<i64>,

    #[arg(long)]
    steps_max: Option<i64>,

    #[arg(long)]
    width_min: Option<i64>,

    #[arg(long)]
    width_max: Option<i64>,

    #[arg(long)]
    height_min: Option<i64>,

    #[arg(long)]
    height_max: Option<i64>,

    /// mtime, name or size
    #[arg(long, default_value = "mtime", value_parser = parse_sort)]
    sort: SortField,

    /// Ascending order (default is descending)
    #[arg(long)]
    asc: bool,

    #[arg(long, default_value = "0")]
    offset: usize,

    #[arg(short = 'n', long, default_value = "50")]
    limit: usize,

    #[arg(long)]
    json: bool,
}

impl QueryArgs {
    fn filters(&self) -> QueryFilters {
        QueryFilters {
            favorites_only: self.favorites,
            media_kind: self.kind,
            extensions: self.extensions.clone(),
            has_graph: match (self.has_graph, self.no_graph) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            model: self.model.clone(),
            sampler: self.sampler.clone(),
            scheduler: self.scheduler.clone(),
            cfg: Bounds::new(self.cfg_min, self.cfg_max),
            steps: Bounds::new(self.steps_min, self.steps_max),
            width: Bounds::new(self.width_min, self.width_max),
            height: Bounds::new(self.height_min, self.height_max),
            text: self.text.clone(),
        }
    }

    fn page(&self) -> PageRequest {
        PageRequest {
            offset: self.offset,
            limit: self.limit,
            sort: self.sort,
            order: if self.asc { SortOrder::Asc } else { SortOrder::Desc },
        }
    }
}

fn parse_kind(s: &str) -> Result<MediaKind, String> {
    match s.to_lowercase().as_str() {
        "image" | "video" | "other" => Ok(MediaKind::parse(s)),
        _ => Err(format!("unknown kind '{}' (expected image, video or other)", s)),
    }
}

fn parse_sort(s: &str) -> Result<SortField, String> {
    SortField::parse(s).ok_or_else(|| format!("unknown sort field '{}' (expected mtime, name or size)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let default_directives = if cli.verbose {
        "galleria=debug,galleria_daemon=debug,galleria_core=debug"
    } else {
        "galleria=info,galleria_daemon=info,galleria_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match &cli.command {
        Command::Sync { root, workers, json } => {
            let root = root.clone().unwrap_or_else(|| cli.library.clone());
            run_sync(&cli, &root, *workers, *json).await
        }
        Command::Query(args) => {
            let catalog = open_catalog(&cli, false)?;
            let page = catalog.query(&args.filters(), &args.page())?;
            if args.json {
                output::print_json(&page)
            } else {
                output::print_page(&page, args.offset);
                Ok(())
            }
        }
        Command::Show { id, json } => {
            let catalog = open_catalog(&cli, false)?;
            let detail = catalog
                .get_file(id)?
                .with_context(|| format!("No file with id {}", id))?;
            if *json {
                output::print_json(&detail)
            } else {
                output::print_detail(&detail);
                Ok(())
            }
        }
        Command::Favorite { ids, set } => {
            let catalog = open_catalog(&cli, true)?;
            match set {
                Some(value) => {
                    let updated = catalog.set_favorite(ids, *value)?;
                    println!("{} {} of {} files", "Updated".green(), updated, ids.len());
                }
                None => {
                    for id in ids {
                        let favorite = catalog.toggle_favorite(id)?;
                        let mark = if favorite { "★".yellow() } else { "☆".normal() };
                        println!("{} {}", mark, id);
                    }
                }
            }
            Ok(())
        }
        Command::Delete { ids } => {
            let catalog = open_catalog(&cli, true)?;
            let removed = catalog.delete_files(ids)?;
            println!("{} {} of {} files from the catalog", "Removed".green(), removed, ids.len());
            Ok(())
        }
        Command::Options { json } => {
            let catalog = open_catalog(&cli, false)?;
            let options = catalog.filter_options()?;
            if *json {
                output::print_json(&options)
            } else {
                output::print_options(&options);
                Ok(())
            }
        }
        Command::Stats { json } => {
            let catalog = open_catalog(&cli, false)?;
            let stats = catalog.stats()?;
            if *json {
                output::print_json(&stats)
            } else {
                let location = catalog
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(in memory)".to_string());
                output::print_stats(&stats, &location);
                Ok(())
            }
        }
    }
}

fn load_config(cli: &Cli, root: &Path) -> Result<GalleriaConfig> {
    match &cli.config {
        Some(path) => GalleriaConfig::load_strict(path),
        None => Ok(GalleriaConfig::load(root)),
    }
}

fn catalog_path(cli: &Cli, config: &GalleriaConfig, root: &Path) -> PathBuf {
    cli.catalog.clone().unwrap_or_else(|| config.catalog_path(root))
}

/// Open the catalog for a non-sync command. Read commands open read-only.
fn open_catalog(cli: &Cli, write: bool) -> Result<Catalog> {
    let root = cli.library.canonicalize().unwrap_or_else(|_| cli.library.clone());
    let config = load_config(cli, &root)?;
    let path = catalog_path(cli, &config, &root);
    if !path.exists() {
        anyhow::bail!(
            "No catalog at {}.\nRun `galleria sync {}` first.",
            path.display(),
            root.display()
        );
    }
    debug!(path = %path.display(), write, "opening catalog");
    let catalog = if write {
        Catalog::open(&path)
    } else {
        Catalog::open_read_only(&path)
    };
    catalog.with_context(|| format!("Failed to open catalog: {}", path.display()))
}

async fn run_sync(cli: &Cli, root: &Path, workers: Option<usize>, json: bool) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Library root not found: {}", root.display()))?;
    let mut config = load_config(cli, &root)?;
    if let Some(workers) = workers {
        config.sync.workers = workers;
    }

    let path = catalog_path(cli, &config, &root);
    info!("Library: {}", root.display());
    info!("Catalog: {}", path.display());
    let catalog = Arc::new(
        Catalog::open(&path).with_context(|| format!("Failed to open catalog: {}", path.display()))?,
    );
    let coordinator = SyncCoordinator::from_config(catalog, &config)?;

    let bar = if json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} {msg:<10} [{bar:32.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        bar
    };

    let mut run = coordinator.start(&root)?;

    // Ctrl-C stops the pass between files; committed files stay committed.
    let canceller = coordinator.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    while let Some(event) = run.events.recv().await {
        match event {
            SyncEvent::Scanned {
                to_add, to_update, ..
            } => bar.set_length((to_add + to_update) as u64),
            SyncEvent::Progress(progress) => {
                bar.set_position(progress.processed as u64);
                bar.set_message(progress.status.as_str());
            }
            SyncEvent::FileFailed { path, error } => {
                bar.println(format!("{} {}: {}", "skipped".yellow(), path.display(), error));
            }
            event if event.is_terminal() => break,
            _ => {}
        }
    }
    bar.finish_and_clear();
    interrupt.abort();

    let summary = run.wait().await?;
    if json {
        output::print_json(&summary)
    } else {
        output::print_summary(&summary);
        Ok(())
    }
}
