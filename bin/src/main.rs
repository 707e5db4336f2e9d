#[macro_use]
extern crate log;

mod synthetic;

use common::app::*;
use common::pbrt::*;
use guiding::{CycleConfig, CycleState, GuidingConfig, GuidingCycleController, RadianceTable};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use synthetic::*;

/// Contents of the JSON configuration file. Every field is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct RunConfig {
    /// Radiance table discretization.
    #[serde(flatten)]
    guiding: GuidingConfig,

    /// Total samples per pixel.
    spp: u32,

    /// Samples per pass; -1 renders the whole budget in one pass.
    samples_per_pass: i64,

    /// Wall-clock budget in seconds; non-positive disables it.
    time_limit_in_sec: Float,

    /// Passes at the start that never trigger the time limit.
    time_limit_init_ignore_step: u32,

    /// Rays the procedural sampler traces per sample.
    rays_per_sample: usize,

    /// Share of rays the procedural sampler draws uniformly.
    uniform_fraction: Float,

    /// The procedural light.
    light: SyntheticLight,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            guiding: GuidingConfig::default(),
            spp: 256,
            samples_per_pass: 16,
            time_limit_in_sec: -1.0,
            time_limit_init_ignore_step: 0,
            rays_per_sample: 256,
            uniform_fraction: 0.1,
            light: SyntheticLight::default(),
        }
    }
}

impl RunConfig {
    /// Reads the configuration file, if any, and applies command line
    /// overrides.
    ///
    /// * `options` - Command line options.
    fn load(options: &Options) -> Result<Self, String> {
        let mut config: RunConfig = match &options.config {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| format!("Unable to read '{path}': {e}"))?;
                serde_json::from_str(&text).map_err(|e| format!("Invalid configuration '{path}': {e}"))?
            }
            None => RunConfig::default(),
        };

        if let Some(spp) = options.spp {
            config.spp = spp;
        }
        if let Some(n) = options.samples_per_pass {
            config.samples_per_pass = n as i64;
        }
        if let Some(t) = options.time_limit {
            config.time_limit_in_sec = t;
        }
        if config.guiding.n_threads == 0 {
            config.guiding.n_threads = options.threads();
        }
        Ok(config)
    }

    /// Returns the sample budget.
    fn cycle(&self) -> CycleConfig {
        CycleConfig {
            spp: self.spp,
            samples_per_pass: u32::try_from(self.samples_per_pass).ok(),
            time_limit: (self.time_limit_in_sec > 0.0).then(|| Duration::from_secs_f32(self.time_limit_in_sec)),
            time_limit_init_ignore_step: self.time_limit_init_ignore_step,
        }
    }
}

fn main() {
    // Initialize `env_logger`.
    env_logger::init();

    if let Err(e) = run(&OPTIONS) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(options: &Options) -> Result<(), String> {
    let config = RunConfig::load(options)?;
    let cycle = config.cycle();

    let table = RadianceTable::new(config.guiding.clone(), None).map_err(|e| e.to_string())?;
    let mut controller = GuidingCycleController::new(table, cycle).map_err(|e| e.to_string())?;
    let mut sampler = ProceduralSampler::new(
        config.light,
        config.guiding.bounds(),
        config.rays_per_sample,
        config.uniform_fraction,
        options.seed,
    );

    let passes = cycle.samples_per_pass.map_or(1, |n| (cycle.spp + n - 1) / n);
    let progress = create_progress_bar(passes as u64);
    progress.set_message("Guiding");
    loop {
        match controller.step(&mut sampler).map_err(|e| e.to_string())? {
            CycleState::GuidingUpdate => progress.inc(1),
            CycleState::Done => break,
            _ => {}
        }
    }
    progress.finish_with_message("Guiding complete");

    let report = controller.report();
    if !options.quiet {
        println!(
            "{} samples, {} passes, {} updates in {:.3} sec{}",
            report.completed_samples,
            report.passes,
            report.guiding_updates,
            report.elapsed.as_secs_f32(),
            if report.deadline_reached { " (time limit)" } else { "" }
        );
        if let Some(update) = &report.last_update {
            println!("Last update: {update}");
        }
        println!(
            "Guided density towards the light: {:.2}x uniform",
            sampler.concentration(controller.buffers())
        );
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use guiding::SpatialType;

    #[test]
    fn run_config_reads_flattened_guiding_options() {
        let c: RunConfig = serde_json::from_str(
            r#"{
                "spatial_type": "binary_tree",
                "epsilon": 0.2,
                "spp": 32,
                "samples_per_pass": -1,
                "light": { "cos_radius": 0.9 }
            }"#,
        )
        .unwrap();
        assert_eq!(c.guiding.spatial_type, SpatialType::BinaryTree);
        assert_eq!(c.guiding.epsilon, 0.2);
        assert_eq!(c.light.cos_radius, 0.9);
        assert_eq!(c.light.radiance, 10.0);

        let cycle = c.cycle();
        assert_eq!(cycle.spp, 32);
        assert_eq!(cycle.samples_per_pass, None);
        assert_eq!(cycle.time_limit, None);
    }

    #[test]
    fn positive_time_limit_becomes_deadline() {
        let c = RunConfig {
            time_limit_in_sec: 1.5,
            ..Default::default()
        };
        assert_eq!(c.cycle().time_limit, Some(Duration::from_millis(1500)));
        assert_eq!(c.cycle().samples_per_pass, Some(16));
    }
}
