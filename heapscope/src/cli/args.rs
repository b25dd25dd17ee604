//! CLI argument definitions

use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "heapscope", about = "Trace a synthetic workload and report its heap behavior")]
pub struct Args {
    /// Directory where captured data is persisted on shutdown
    #[arg(long, default_value = "./heapscope-data")]
    pub data_dir: PathBuf,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,

    /// Also export the captured allocations to this JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Timeline bin width in nanoseconds
    #[arg(long, default_value = "1000000")]
    pub timeline_bucket_ns: u64,

    /// Number of rows shown in each chart
    #[arg(long, default_value = "10")]
    pub limit: usize,

    /// Show the realtime dashboard while the workload runs
    #[arg(long)]
    pub realtime: bool,
}
