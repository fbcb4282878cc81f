//! CLI argument parsing and command handlers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kdam::{Bar, BarExt};
use log::info;

use crate::cache::ReadCache;
use crate::extract::DimensionProbe;
use crate::observer::{ObserverRegistry, ScanEvent, ScanObserver};
use crate::scan::ScanCoordinator;
use crate::store::ConnectionPool;
use crate::types::{Library, ScanStatus};
use crate::utils::config::{DetectorKind, EngineConfig};
use crate::utils::config_file::{apply_file_to_config, load_config_toml};
use crate::watch::{coordinator_sink, create_detector};

/// Persistent media-library indexer with live change detection.
#[derive(Clone, Parser)]
#[command(name = "mediadex")]
#[command(about = "Index a media library; watch it for changes; query its folder tree.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Run a full scan of the library.
    Scan {
        /// Library root directory.
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
    /// Run an incremental sync (enumeration-vs-index diff).
    Sync {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
    /// Watch the library continuously, reconciling detected changes.
    Watch {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Change detection strategy (overrides .mediadex.toml).
        #[arg(long, value_enum)]
        detector: Option<DetectorChoice>,
    },
    /// Print the persisted scan state.
    Status {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
    /// Print the cached folder tree with image counts.
    Tree {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum DetectorChoice {
    Polling,
    Event,
}

impl From<DetectorChoice> for DetectorKind {
    fn from(c: DetectorChoice) -> Self {
        match c {
            DetectorChoice::Polling => DetectorKind::Polling,
            DetectorChoice::Event => DetectorKind::Event,
        }
    }
}

/// Progress bar observer: renders batch progress through the notification
/// channel like any other subscriber.
struct BarObserver {
    bar: Arc<Mutex<Bar>>,
}

impl BarObserver {
    fn new() -> Self {
        Self {
            bar: Arc::new(Mutex::new(kdam::tqdm!(total = 0, desc = "Indexing"))),
        }
    }
}

impl ScanObserver for BarObserver {
    fn notify(&self, _library_id: &str, event: &ScanEvent) {
        if let ScanEvent::Progress(p) = event {
            if let Ok(mut bar) = self.bar.try_lock() {
                bar.total = p.total;
                let _ = bar.update_to(p.processed);
            }
        }
    }
}

/// Library identity for a root directory: the directory name doubles as id
/// and display name.
fn library_for(dir: &Path) -> Result<Library> {
    let root = dir.canonicalize().context("canonicalize library root")?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "library".to_string());
    Ok(Library::new(name.clone(), root, name))
}

fn engine_config(dir: &std::path::Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    if let Some(file) = load_config_toml(dir) {
        apply_file_to_config(&file, &mut config);
    }
    config
}

/// Poll the coordinator until the scan reaches a terminal status.
fn wait_for_terminal(coordinator: &Arc<ScanCoordinator>, library_id: &str) -> Result<ScanStatus> {
    loop {
        let state = coordinator.state(library_id)?;
        if state.status != ScanStatus::Scanning {
            return Ok(state.status);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Scan { dir } => handle_scan(dir, false),
        Commands::Sync { dir } => handle_scan(dir, true),
        Commands::Watch { dir, detector } => handle_watch(dir, *detector),
        Commands::Status { dir } => handle_status(dir),
        Commands::Tree { dir } => handle_tree(dir),
    }
}

fn handle_scan(dir: &Path, sync_only: bool) -> Result<()> {
    let library = library_for(dir)?;
    let config = engine_config(&library.root);
    let pool = Arc::new(ConnectionPool::new());
    let observers = Arc::new(ObserverRegistry::new());
    let coordinator = ScanCoordinator::new(
        Arc::clone(&pool),
        Arc::new(DimensionProbe),
        Arc::clone(&observers),
        config,
    );

    let id = library.id.clone();
    coordinator.register_library(library);
    observers.subscribe(&id, Arc::new(BarObserver::new()));

    let stop_coordinator = Arc::clone(&coordinator);
    let stop_id = id.clone();
    ctrlc::set_handler(move || {
        let _ = stop_coordinator.request_stop(&stop_id);
    })
    .context("set Ctrl+C handler")?;

    if sync_only {
        coordinator.request_sync(&id)?;
    } else {
        coordinator.request_full_scan(&id)?;
    }
    let status = wait_for_terminal(&coordinator, &id)?;
    match status {
        ScanStatus::Completed => info!("scan complete"),
        ScanStatus::Paused => info!("scan paused; run again with `resume` semantics via watch"),
        other => info!("scan ended with status {:?}", other),
    }
    Ok(())
}

fn handle_watch(dir: &Path, detector_choice: Option<DetectorChoice>) -> Result<()> {
    let library = library_for(dir)?;
    let config = {
        let mut c = engine_config(&library.root);
        if let Some(choice) = detector_choice {
            c.detector = choice.into();
        }
        c
    };
    let pool = Arc::new(ConnectionPool::new());
    let observers = Arc::new(ObserverRegistry::new());
    let coordinator = ScanCoordinator::new(
        Arc::clone(&pool),
        Arc::new(DimensionProbe),
        Arc::clone(&observers),
        config.clone(),
    );

    let id = library.id.clone();
    coordinator.register_library(library.clone());
    coordinator.startup_resume();

    let mut detector = create_detector(
        config.detector,
        coordinator_sink(&coordinator),
        Arc::clone(&pool),
        &config,
    );
    detector.watch(&library)?;
    info!(
        "watching '{}' with {:?} detection; Ctrl+C to stop",
        id, config.detector
    );

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("shutting down");
    detector.shutdown();
    coordinator.shutdown(Duration::from_secs(5));
    Ok(())
}

fn handle_status(dir: &Path) -> Result<()> {
    let library = library_for(dir)?;
    let state = crate::scan::state::load_state(&library.root).unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn handle_tree(dir: &Path) -> Result<()> {
    let library = library_for(dir)?;
    let pool = Arc::new(ConnectionPool::new());
    let cache = ReadCache::new(Arc::clone(&pool));
    let snapshot = cache.folder_tree(&library.root)?;
    println!("{} images total", snapshot.total_images);
    for folder in &snapshot.folders {
        println!("{:>6}  {}", folder.image_count, folder.path);
    }
    Ok(())
}
