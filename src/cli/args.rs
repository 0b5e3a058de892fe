use clap::Parser;
use std::path::PathBuf;

use rasterflow::types::Pattern;

#[derive(Parser)]
#[command(name = "rasterflow", version, about = "RASTERFLOW demo pipeline CLI")]
pub struct CliArgs {
    /// Scene width in pixels
    #[arg(long, default_value_t = 1024)]
    pub width: usize,

    /// Scene height in pixels
    #[arg(long, default_value_t = 1024)]
    pub height: usize,

    /// Synthetic scene pattern
    #[arg(long, value_enum, default_value_t = Pattern::Checkerboard)]
    pub pattern: Pattern,

    /// Checkerboard period in pixels
    #[arg(long, default_value_t = 64)]
    pub period: usize,

    /// Smoothing radius of the detector
    #[arg(long, default_value_t = 2)]
    pub radius: usize,

    /// Detection threshold on the smoothed scene
    #[arg(long, default_value_t = 0.5)]
    pub threshold: f64,

    /// Worker threads per stage (0 = one per CPU core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Update only this region, as X,Y,WIDTH,HEIGHT (default: full scene)
    #[arg(long)]
    pub region: Option<String>,

    /// Write a JSON run report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Enable logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
