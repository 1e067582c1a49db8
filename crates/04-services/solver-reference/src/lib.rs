//! Reference compute module.
//!
//! A small direct-sum vortex particle solver: particles are seeded from the
//! vortex-ring initial condition, vorticity decays with viscosity, and every
//! particle is advected by the velocity all other particles induce. It exists
//! so the worker plumbing can run end to end; it makes no accuracy claims.

mod seeding;
mod vorton;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use sim_host::{ComputeModule, ModuleError, SolverInstance};
use sim_protocol::{Configuration, Solution};

use crate::vorton::{add, norm, scale, Vec3, Vorton, VORTICITY_EPSILON};

/// Loaded reference module. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ReferenceModule {
    live: Option<Arc<AtomicUsize>>,
}

impl ReferenceModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts live solver instances in `counter`.
    pub fn with_instance_counter(counter: Arc<AtomicUsize>) -> Self {
        Self {
            live: Some(counter),
        }
    }
}

impl ComputeModule for ReferenceModule {
    type Instance = ReferenceSolver;

    fn name(&self) -> &str {
        "reference"
    }

    fn create_instance(&self, configuration: &Configuration) -> Result<ReferenceSolver, ModuleError> {
        configuration
            .validate()
            .map_err(|err| ModuleError::InvalidConfiguration(err.to_string()))?;
        let solver = ReferenceSolver::new(configuration, self.live.clone());
        debug!(
            "reference solver created with {} vortons ({} requested)",
            solver.len(),
            configuration.n_vortons
        );
        Ok(solver)
    }
}

/// One live simulation.
#[derive(Debug)]
pub struct ReferenceSolver {
    vortons: Vec<Vorton>,
    free_stream: Vec3,
    viscosity: f64,
    iteration: u64,
    time: f64,
    live: Option<Arc<AtomicUsize>>,
}

impl ReferenceSolver {
    fn new(configuration: &Configuration, live: Option<Arc<AtomicUsize>>) -> Self {
        if let Some(live) = &live {
            live.fetch_add(1, Ordering::SeqCst);
        }
        Self {
            vortons: seeding::seed(configuration),
            free_stream: [0.0; 3],
            viscosity: configuration.viscosity,
            iteration: 0,
            time: 0.0,
            live,
        }
    }

    pub fn len(&self) -> usize {
        self.vortons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vortons.is_empty()
    }

    fn decay_vorticity(vortons: &mut [Vorton], viscosity: f64, dt: f64) {
        let rate = -0.1 * viscosity;
        for vorton in vortons {
            vorton.vorticity = add(vorton.vorticity, scale(vorton.vorticity, rate * dt));
        }
    }

    fn advect(&self, vortons: &mut [Vorton], dt: f64) {
        let velocities: Vec<Vec3> = vortons
            .iter()
            .enumerate()
            .map(|(idx, target)| {
                vortons
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != idx)
                    .fold(self.free_stream, |velocity, (_, source)| {
                        add(velocity, source.velocity_contribution(target.position))
                    })
            })
            .collect();
        for (vorton, velocity) in vortons.iter_mut().zip(velocities) {
            vorton.position = add(vorton.position, scale(velocity, dt));
        }
    }
}

impl SolverInstance for ReferenceSolver {
    fn step(&mut self, dt: f64) -> Result<(), ModuleError> {
        let mut next = self.vortons.clone();
        Self::decay_vorticity(&mut next, self.viscosity, dt);
        self.advect(&mut next, dt);
        if let Some(vorton) = next.iter().find(|v| {
            v.position
                .iter()
                .chain(v.vorticity.iter())
                .any(|c| !c.is_finite())
        }) {
            return Err(ModuleError::solver(format!(
                "non-finite particle state at {:?}",
                vorton.position
            )));
        }
        next.retain(|vorton| norm(vorton.vorticity) > VORTICITY_EPSILON);
        self.vortons = next;
        self.iteration += 1;
        self.time += dt;
        Ok(())
    }

    fn iteration(&self) -> u64 {
        self.iteration
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn solution(&self) -> Solution {
        Solution {
            iteration: self.iteration,
            time: self.time,
            positions: self.vortons.iter().flat_map(|v| v.position).collect(),
            intensities: self.vortons.iter().map(Vorton::intensity).collect(),
        }
    }
}

impl Drop for ReferenceSolver {
    fn drop(&mut self) {
        if let Some(live) = &self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sim_protocol::InitialConditions;

    #[test]
    fn fresh_instance_starts_at_zero() {
        let solver = ReferenceModule::new()
            .create_instance(&Configuration::with_vortons(100))
            .expect("create");
        assert_eq!(solver.iteration(), 0);
        assert_eq!(solver.time(), 0.0);
        let solution = solver.solution();
        assert!(!solution.is_empty());
        assert_eq!(solution.positions.len(), solution.len() * 3);
    }

    #[test]
    fn steps_advance_time_and_move_particles() {
        let mut solver = ReferenceModule::new()
            .create_instance(&Configuration::with_vortons(100))
            .expect("create");
        let before = solver.solution();
        for _ in 0..3 {
            solver.step(0.03).expect("step");
        }
        assert_eq!(solver.iteration(), 3);
        assert!((solver.time() - 0.09).abs() < 1e-12);
        let after = solver.solution();
        assert_ne!(after.positions, before.positions);
        assert!(after.positions.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn snapshots_are_independent_of_later_steps() {
        let mut solver = ReferenceModule::new()
            .create_instance(&Configuration::with_vortons(50))
            .expect("create");
        let snapshot = solver.solution();
        let copy = snapshot.clone();
        solver.step(0.1).expect("step");
        assert_eq!(snapshot, copy);
    }

    #[test]
    fn failed_step_leaves_the_instance_untouched() {
        let mut solver = ReferenceModule::new()
            .create_instance(&Configuration::with_vortons(50))
            .expect("create");
        solver.step(0.03).expect("step");
        let before = solver.solution();

        let err = solver.step(f64::INFINITY).unwrap_err();
        assert!(err.to_string().contains("non-finite"), "{err}");
        assert_eq!(solver.solution(), before);
        assert_eq!(solver.iteration(), 1);
    }

    #[test]
    fn instance_counter_tracks_drops() {
        let counter = Arc::new(AtomicUsize::new(0));
        let module = ReferenceModule::with_instance_counter(Arc::clone(&counter));
        let a = module.create_instance(&Configuration::with_vortons(10)).unwrap();
        let b = module.create_instance(&Configuration::with_vortons(10)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(a);
        drop(b);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rejects_invalid_configuration() {
        let mut configuration = Configuration::with_vortons(10);
        configuration.domain.max = configuration.domain.min;
        let err = ReferenceModule::new()
            .create_instance(&configuration)
            .unwrap_err();
        assert!(matches!(err, ModuleError::InvalidConfiguration(_)));
    }

    #[test]
    fn empty_conditions_produce_an_empty_solution() {
        let mut configuration = Configuration::with_vortons(10);
        configuration.initial_conditions = InitialConditions::Empty;
        let mut solver = ReferenceModule::new()
            .create_instance(&configuration)
            .expect("create");
        solver.step(0.03).expect("step");
        assert!(solver.solution().is_empty());
        assert_eq!(solver.iteration(), 1);
    }
}
