use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use lib_trackd::configs::{Settings, TrackdConfig};

/// Config file read when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "trackd.json";

#[derive(Parser, Debug, Clone, Default)]
#[clap(name = "server_trackd", about = "Beacon tracking ingestion daemon", version)]
pub struct Cli {
    #[clap(short = 'c', long = "config", env = "TRACKD_CONFIG", help = "Path to the JSON configuration file.")]
    pub config: Option<PathBuf>,

    #[clap(long, env = "TRACKD_LISTEN_HOST", help = "Address the UDP and HTTP listeners bind to.")]
    pub listen_host: Option<String>,

    #[clap(long, env = "TRACKD_LISTEN_PORT", help = "Port shared by the UDP and HTTP listeners.")]
    pub listen_port: Option<u16>,

    #[clap(long, env = "TRACKD_NUM_WORKERS", help = "Number of worker threads (1-64).")]
    pub num_workers: Option<usize>,

    #[clap(long, env = "TRACKD_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TRACKD_LOG_LEVEL", help = "Logging level (debug, verbose, notice, warning).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TRACKD_PIDFILE", help = "Pidfile written by the master process.")]
    pub pidfile: Option<PathBuf>,

    #[clap(long, help = "Run the worker in the foreground without a supervising master.")]
    pub single_process: bool,

    #[clap(long, hide = true)]
    pub worker: bool,
}

/// Which half of the daemon this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Worker,
    Standalone,
}

impl Role {
    /// Base name of this role's log files.
    pub fn log_basename(self) -> &'static str {
        match self {
            Role::Master => "server_trackd.master",
            Role::Worker | Role::Standalone => "server_trackd",
        }
    }
}

impl Cli {
    pub fn role(&self) -> Role {
        if self.worker {
            Role::Worker
        } else if self.single_process {
            Role::Standalone
        } else {
            Role::Master
        }
    }

    /// The command line as a config layer. Ops are only read from files.
    pub fn overlay(&self) -> TrackdConfig {
        TrackdConfig {
            listen_host: self.listen_host.clone(),
            listen_port: self.listen_port,
            num_worker_threads: self.num_workers,
            log_dir: self.log_dir.clone(),
            log_level: self.log_level.clone(),
            pidfile: self.pidfile.clone(),
            ..Default::default()
        }
    }
}

fn file_layer(cli: &Cli) -> Result<TrackdConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if !default.exists() {
                return Ok(TrackdConfig::default());
            }
            default.to_path_buf()
        }
    };
    TrackdConfig::from_file(&path)
        .with_context(|| format!("failed to load config file {}", path.display()))
}

/// Loads the file layer, applies the command line over it and validates.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let settings = file_layer(cli)?
        .merge(cli.overlay())
        .into_settings()
        .context("invalid configuration")?;
    Ok(settings)
}
