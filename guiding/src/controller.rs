//! Guiding Cycle
//!
//! Alternates external sampling passes with radiance table updates until the
//! sample budget is spent or the wall-clock deadline passes.

use crate::buffers::*;
use crate::error::*;
use crate::sampler::*;
use crate::table::*;
use std::time::{Duration, Instant};

/// States of the guiding cycle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CycleState {
    /// Table built, no pass started.
    Idle,

    /// The external sampler owns the buffers.
    SamplingPass,

    /// The radiance table owns the buffers.
    GuidingUpdate,

    /// Budget spent or deadline reached.
    Done,
}

impl CycleState {
    /// Returns true if the cycle may move from this state to `to`.
    ///
    /// * `to` - The next state.
    pub fn can_transition_to(&self, to: CycleState) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::SamplingPass)
                | (Self::SamplingPass, Self::GuidingUpdate)
                | (Self::GuidingUpdate, Self::SamplingPass)
                | (Self::GuidingUpdate, Self::Done)
        )
    }
}

/// Sample budget and deadline of one render.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CycleConfig {
    /// Total samples per pixel.
    pub spp: u32,

    /// Samples per pass; `None` renders the whole budget in one pass.
    pub samples_per_pass: Option<u32>,

    /// Wall-clock deadline measured from `start()`.
    pub time_limit: Option<Duration>,

    /// Passes at the start that never trigger the deadline.
    pub time_limit_init_ignore_step: u32,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            spp: 256,
            samples_per_pass: Some(16),
            time_limit: None,
            time_limit_init_ignore_step: 0,
        }
    }
}

impl CycleConfig {
    /// Validates the budget.
    pub fn validate(&self) -> Result<()> {
        if self.spp == 0 {
            return Err(GuidingError::Configuration("spp must be positive".to_string()));
        }
        if self.samples_per_pass == Some(0) {
            return Err(GuidingError::Configuration(
                "samples_per_pass must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the quota of the first pass.
    fn first_quota(&self) -> u32 {
        self.samples_per_pass.map_or(self.spp, |n| n.min(self.spp))
    }
}

/// Summary of a guiding cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleReport {
    /// Samples per pixel rendered.
    pub completed_samples: u32,

    /// Sampling passes run.
    pub passes: u32,

    /// Radiance table updates run.
    pub guiding_updates: u32,

    /// Wall-clock time since `start()`.
    pub elapsed: Duration,

    /// True if the deadline ended the cycle before the budget was spent.
    pub deadline_reached: bool,

    /// Report of the last radiance table update.
    pub last_update: Option<UpdateReport>,
}

/// Drives the alternation between the external sampler and the radiance
/// table. The controller owns both the table and the shared buffers, so the
/// two sides can never touch the buffers at the same time.
pub struct GuidingCycleController {
    table: RadianceTable,
    buffers: GuidingBuffers,
    config: CycleConfig,
    state: CycleState,
    quota: u32,
    report: CycleReport,
    started: Option<Instant>,
    aborted: bool,
}

impl GuidingCycleController {
    /// Registers the table's buffers and returns an idle controller.
    ///
    /// * `table`  - The radiance table.
    /// * `config` - Sample budget and deadline.
    pub fn new(table: RadianceTable, config: CycleConfig) -> Result<Self> {
        config.validate()?;
        let mut buffers = GuidingBuffers::empty();
        table.register(&mut buffers)?;
        Ok(Self {
            table,
            buffers,
            config,
            state: CycleState::Idle,
            quota: 0,
            report: CycleReport::default(),
            started: None,
            aborted: false,
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Returns the radiance table.
    pub fn table(&self) -> &RadianceTable {
        &self.table
    }

    /// Returns the shared buffers.
    pub fn buffers(&self) -> &GuidingBuffers {
        &self.buffers
    }

    /// Returns the budget.
    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    /// Returns the progress so far.
    pub fn report(&self) -> CycleReport {
        let mut report = self.report.clone();
        report.elapsed = self.started.map_or(Duration::ZERO, |t| t.elapsed());
        report
    }

    /// Moves to `to` if the cycle allows it.
    fn transition(&mut self, to: CycleState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(GuidingError::IllegalTransition { from: self.state, to });
        }
        debug!("Guiding cycle {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    /// Publishes the next pass quota and hands the buffers to the sampler.
    fn begin_pass(&mut self, quota: u32) -> Result<()> {
        self.transition(CycleState::SamplingPass)?;
        self.quota = quota;
        self.buffers.samples_per_pass = quota;
        self.buffers.completed_sample_number = self.report.completed_samples;
        Ok(())
    }

    /// Starts the deadline clock and the first sampling pass.
    pub fn start(&mut self) -> Result<()> {
        let quota = self.config.first_quota();
        self.begin_pass(quota)?;
        self.started = Some(Instant::now());
        info!(
            "Guiding cycle: {} spp, {} per pass{}",
            self.config.spp,
            quota,
            self.config
                .time_limit
                .map_or_else(String::new, |t| format!(", {:.3} sec limit", t.as_secs_f32()))
        );
        Ok(())
    }

    /// Performs the work of the current state and moves to the next one.
    ///
    /// * `sampler` - The external sampler.
    pub fn step(&mut self, sampler: &mut dyn ExternalSampler) -> Result<CycleState> {
        if self.aborted {
            return Err(GuidingError::SamplingPass(
                "cycle aborted by an earlier failure".to_string(),
            ));
        }
        match self.state {
            CycleState::Idle => self.start()?,
            CycleState::SamplingPass => self.sampling_pass(sampler)?,
            CycleState::GuidingUpdate => self.guiding_update(sampler)?,
            CycleState::Done => {
                return Err(GuidingError::IllegalTransition {
                    from: CycleState::Done,
                    to: CycleState::SamplingPass,
                })
            }
        }
        Ok(self.state)
    }

    /// Runs the cycle to completion.
    ///
    /// * `sampler` - The external sampler.
    pub fn run(&mut self, sampler: &mut dyn ExternalSampler) -> Result<CycleReport> {
        while self.state != CycleState::Done {
            self.step(sampler)?;
        }
        let report = self.report();
        info!(
            "Guiding cycle done: {} samples in {} passes, {} updates, {:.3} sec{}",
            report.completed_samples,
            report.passes,
            report.guiding_updates,
            report.elapsed.as_secs_f32(),
            if report.deadline_reached { " (time limit)" } else { "" }
        );
        Ok(report)
    }

    fn sampling_pass(&mut self, sampler: &mut dyn ExternalSampler) -> Result<()> {
        let t = Instant::now();
        if let Err(err) = sampler.sample_pass(&mut self.buffers) {
            self.aborted = true;
            error!("Sampling pass {} failed: {}", self.report.passes, err);
            return Err(match err {
                GuidingError::SamplingPass(_) => err,
                other => GuidingError::SamplingPass(other.to_string()),
            });
        }
        self.report.completed_samples += self.quota;
        self.report.passes += 1;
        info!(
            "Pass {}: {} samples in {:.3} sec",
            self.report.passes,
            self.quota,
            t.elapsed().as_secs_f32()
        );
        self.transition(CycleState::GuidingUpdate)
    }

    fn guiding_update(&mut self, sampler: &mut dyn ExternalSampler) -> Result<()> {
        let t = Instant::now();
        let update = match self.table.compute_pdf(&mut self.buffers, Some(sampler)) {
            Ok(update) => update,
            Err(err) => {
                self.aborted = true;
                error!("Guiding update after pass {} failed: {}", self.report.passes, err);
                return Err(err);
            }
        };
        self.report.guiding_updates += 1;
        debug!("Guiding update {}: {}", self.report.guiding_updates, update);
        debug!("Guiding update took {:.3} sec", t.elapsed().as_secs_f32());
        self.report.last_update = Some(update);

        let left = self.config.spp - self.report.completed_samples;
        if left == 0 {
            return self.transition(CycleState::Done);
        }
        if self.deadline_passed() {
            if let Some(limit) = self.config.time_limit {
                info!("{:.3} sec is over", limit.as_secs_f32());
            }
            self.report.deadline_reached = true;
            return self.transition(CycleState::Done);
        }
        let quota = self.config.samples_per_pass.map_or(left, |n| n.min(left));
        self.begin_pass(quota)
    }

    /// Returns true once the time limit has elapsed, ignoring the first
    /// `time_limit_init_ignore_step` passes.
    fn deadline_passed(&self) -> bool {
        match (self.config.time_limit, self.started) {
            (Some(limit), Some(started)) => {
                self.report.passes > self.config.time_limit_init_ignore_step && started.elapsed() >= limit
            }
            _ => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    #[derive(Default)]
    struct CountingSampler {
        quotas: Vec<u32>,
        completed: Vec<u32>,
        fail_on: Option<usize>,
        truncate_tree_on: Option<usize>,
    }

    impl ExternalSampler for CountingSampler {
        fn sample_pass(&mut self, buffers: &mut GuidingBuffers) -> Result<()> {
            if self.fail_on == Some(self.quotas.len()) {
                return Err(GuidingError::SamplingPass("device lost".to_string()));
            }
            if self.truncate_tree_on == Some(self.quotas.len()) {
                buffers.record(0, 1, 5.0);
                buffers.stree_current_size = 0;
            }
            self.quotas.push(buffers.samples_per_pass);
            self.completed.push(buffers.completed_sample_number);
            Ok(())
        }
    }

    fn controller(config: CycleConfig) -> GuidingCycleController {
        let table = RadianceTable::new(
            GuidingConfig {
                n_cube: 2,
                n_uv: 2,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        GuidingCycleController::new(table, config).unwrap()
    }

    #[test]
    fn transitions_follow_the_cycle() {
        use CycleState::*;
        assert!(Idle.can_transition_to(SamplingPass));
        assert!(SamplingPass.can_transition_to(GuidingUpdate));
        assert!(GuidingUpdate.can_transition_to(SamplingPass));
        assert!(GuidingUpdate.can_transition_to(Done));
        assert!(!Idle.can_transition_to(GuidingUpdate));
        assert!(!SamplingPass.can_transition_to(Done));
        assert!(!Done.can_transition_to(SamplingPass));
    }

    #[test]
    fn step_walks_the_states() {
        let mut c = controller(CycleConfig {
            spp: 4,
            samples_per_pass: Some(2),
            ..Default::default()
        });
        let mut s = CountingSampler::default();
        assert_eq!(c.state(), CycleState::Idle);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::SamplingPass);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::GuidingUpdate);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::SamplingPass);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::GuidingUpdate);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::Done);
        assert!(matches!(
            c.step(&mut s),
            Err(GuidingError::IllegalTransition { from: CycleState::Done, .. })
        ));
    }

    #[test]
    fn start_twice_is_illegal() {
        let mut c = controller(CycleConfig::default());
        c.start().unwrap();
        assert!(matches!(
            c.start(),
            Err(GuidingError::IllegalTransition {
                from: CycleState::SamplingPass,
                to: CycleState::SamplingPass
            })
        ));
    }

    #[test]
    fn last_pass_is_truncated() {
        let mut c = controller(CycleConfig {
            spp: 10,
            samples_per_pass: Some(4),
            ..Default::default()
        });
        let mut s = CountingSampler::default();
        let r = c.run(&mut s).unwrap();
        assert_eq!(s.quotas, vec![4, 4, 2]);
        assert_eq!(s.completed, vec![0, 4, 8]);
        assert_eq!(r.completed_samples, 10);
        assert_eq!(r.passes, 3);
        assert_eq!(r.guiding_updates, 3);
        assert!(!r.deadline_reached);
        assert!(r.last_update.is_some());
    }

    #[test]
    fn no_pass_size_renders_everything_at_once() {
        let mut c = controller(CycleConfig {
            spp: 7,
            samples_per_pass: None,
            ..Default::default()
        });
        let mut s = CountingSampler::default();
        c.run(&mut s).unwrap();
        assert_eq!(s.quotas, vec![7]);
    }

    #[test]
    fn elapsed_deadline_stops_after_first_update() {
        let mut c = controller(CycleConfig {
            spp: 64,
            samples_per_pass: Some(1),
            time_limit: Some(Duration::ZERO),
            time_limit_init_ignore_step: 0,
        });
        let mut s = CountingSampler::default();
        let r = c.run(&mut s).unwrap();
        assert_eq!(r.passes, 1);
        assert!(r.deadline_reached);
        assert_eq!(c.state(), CycleState::Done);
    }

    #[test]
    fn initial_passes_ignore_deadline() {
        let mut c = controller(CycleConfig {
            spp: 64,
            samples_per_pass: Some(1),
            time_limit: Some(Duration::ZERO),
            time_limit_init_ignore_step: 3,
        });
        let mut s = CountingSampler::default();
        let r = c.run(&mut s).unwrap();
        assert_eq!(r.passes, 4);
        assert!(r.deadline_reached);
    }

    #[test]
    fn failed_pass_aborts_the_cycle() {
        let mut c = controller(CycleConfig {
            spp: 8,
            samples_per_pass: Some(2),
            ..Default::default()
        });
        let mut s = CountingSampler {
            fail_on: Some(1),
            ..Default::default()
        };
        assert!(matches!(c.run(&mut s), Err(GuidingError::SamplingPass(_))));
        assert_eq!(c.report().passes, 1);
        assert!(matches!(c.step(&mut s), Err(GuidingError::SamplingPass(_))));
    }

    #[test]
    fn failed_update_aborts_without_touching_the_table() {
        let table = RadianceTable::new(
            GuidingConfig {
                spatial_type: SpatialType::BinaryTree,
                binary_tree_max_size: 8,
                n_uv: 2,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let mut c = GuidingCycleController::new(
            table,
            CycleConfig {
                spp: 8,
                samples_per_pass: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        let mut s = CountingSampler {
            truncate_tree_on: Some(0),
            ..Default::default()
        };
        let published = c.buffers().q_table_pdf.row(0).to_vec();
        let value = c.table().value().to_vec();

        assert_eq!(c.step(&mut s).unwrap(), CycleState::SamplingPass);
        assert_eq!(c.step(&mut s).unwrap(), CycleState::GuidingUpdate);
        assert!(matches!(c.step(&mut s), Err(GuidingError::InvalidTopology(_))));
        assert_eq!(c.report().guiding_updates, 0);
        assert_eq!(c.table().pdf_row(0), &published[..]);
        assert_eq!(c.table().value(), &value[..]);

        assert!(matches!(c.step(&mut s), Err(GuidingError::SamplingPass(_))));
        assert_eq!(s.quotas.len(), 1);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let table = RadianceTable::new(GuidingConfig::default(), None).unwrap();
        let r = GuidingCycleController::new(
            table,
            CycleConfig {
                samples_per_pass: Some(0),
                ..Default::default()
            },
        );
        assert!(matches!(r, Err(GuidingError::Configuration(_))));
    }
}
