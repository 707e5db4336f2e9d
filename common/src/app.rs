//! Application related stuff

use crate::pbrt::Float;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

lazy_static! {
    /// The global application options.
    pub static ref OPTIONS: Options = Options::parse();
}

/// System wide options.
#[derive(Parser, Clone, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Options {
    /// Number of threads to use for guiding updates.
    #[arg(
        long = "nthreads",
        short = 't',
        value_name = "NUM",
        default_value_t = 0,
        help = "Use specified number of threads for guiding updates (0 = all logical CPUs)."
    )]
    n_threads: usize,

    /// Suppress all text output other than error messages.
    #[arg(long, help = "Suppress all text output other than error messages.")]
    pub quiet: bool,

    /// Total sample budget.
    #[arg(
        long = "spp",
        short = 's',
        value_name = "NUM",
        help = "Override the total number of samples per pixel."
    )]
    pub spp: Option<u32>,

    /// Samples taken by one sampling pass.
    #[arg(
        long = "samples-per-pass",
        short = 'p',
        value_name = "NUM",
        help = "Override the number of samples per pass."
    )]
    pub samples_per_pass: Option<u32>,

    /// Wall-clock budget in seconds.
    #[arg(
        long = "time-limit",
        value_name = "SECONDS",
        help = "Stop at the first pass boundary after the given number of seconds."
    )]
    pub time_limit: Option<Float>,

    /// Seed for the procedural sampler.
    #[arg(long, value_name = "NUM", default_value_t = 0, help = "Seed for the procedural sampler.")]
    pub seed: u64,

    /// Path to the JSON configuration.
    #[arg(help = "JSON configuration file; defaults are used when omitted.")]
    pub config: Option<String>,
}

impl Options {
    /// Returns the number of threads to use.
    pub fn threads(&self) -> usize {
        resolve_threads(self.n_threads)
    }
}

/// Returns a usable number of worker threads for a requested count, where
/// 0 selects all logical CPUs.
///
/// * `requested` - Requested number of threads.
pub fn resolve_threads(requested: usize) -> usize {
    let max_threads = num_cpus::get();
    match requested {
        0 => max_threads,
        n if n > max_threads => {
            warn!("Num threads > max logical CPUs {}", max_threads);
            max_threads
        }
        n => n,
    }
}

/// Returns a progress bar, hidden when `--quiet` is set.
///
/// * `len` - Number of steps.
pub fn create_progress_bar(len: u64) -> ProgressBar {
    if OPTIONS.quiet {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(len);
    let template = "[{elapsed_precise} - {eta_precise}] [{bar:40.cyan/blue}] {pos:>5}/{len:5} {msg}";
    match ProgressStyle::default_bar().template(template) {
        Ok(style) => progress.set_style(style.progress_chars("=>-")),
        Err(e) => warn!("Invalid progress bar template: {e}"),
    }
    progress
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
