#[cfg(feature = "profiling")]
use std::time::Instant;

use log::debug;
use rand::Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::cohorts::TransitSchedule;
use crate::disease_progression::{update_infection, NodeUpdateStatus};
use crate::error::EpiError;
use crate::interventions::{update_all_kappa, InterventionSchedule};
use crate::lambda::{default_layers, update_lambdas, StepEnv, TransmissionLayer};
use crate::parameters::{validate_inputs, Params};
use crate::population::World;
use crate::statistics::update_grid_cell_statistics;
use crate::testing::{update_test_request, update_test_status, TestingProtocol};
use crate::transmission_matrices::TransmissionMatrices;
use crate::Timestep;

#[cfg(feature = "profiling")]
fn timed<T>(phase: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    debug!(
        "{phase} took {}",
        humantime::format_duration(start.elapsed())
    );
    out
}

#[cfg(not(feature = "profiling"))]
fn timed<T>(_phase: &str, f: impl FnOnce() -> T) -> T {
    f()
}

/// What happened during one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StepReport {
    pub new_infections: usize,
    pub new_symptomatic: usize,
    pub new_hospitalizations: usize,
    pub new_infectives: usize,
    pub locked_cells: usize,
    pub tests_requested: usize,
    pub positive_results: usize,
    pub negative_results: usize,
}

impl StepReport {
    fn add_transitions(mut self, status: NodeUpdateStatus) -> Self {
        self.new_infections += usize::from(status.new_infection);
        self.new_symptomatic += usize::from(status.new_symptomatic);
        self.new_hospitalizations += usize::from(status.new_hospitalization);
        self.new_infectives += usize::from(status.new_infective);
        self
    }

    fn merge(mut self, other: StepReport) -> Self {
        self.new_infections += other.new_infections;
        self.new_symptomatic += other.new_symptomatic;
        self.new_hospitalizations += other.new_hospitalizations;
        self.new_infectives += other.new_infectives;
        self
    }
}

/// Runs the phases of a step over a `World` with a fixed set of inputs.
#[derive(Debug, Clone)]
pub struct StepEngine {
    params: Params,
    matrices: TransmissionMatrices,
    interventions: InterventionSchedule,
    testing: Option<TestingProtocol>,
    transit: TransitSchedule,
    layers: Vec<Box<dyn TransmissionLayer>>,
}

impl StepEngine {
    /// Validates every static input against `world` before any step runs.
    /// # Errors
    /// - If the parameters, matrices, schedules or testing protocol are invalid.
    /// - If `world` is not consistently wired.
    pub fn new(
        params: Params,
        matrices: TransmissionMatrices,
        interventions: InterventionSchedule,
        testing: Option<TestingProtocol>,
        transit: TransitSchedule,
        world: &World,
    ) -> Result<Self, EpiError> {
        validate_inputs(&params)?;
        matrices.validate(&params)?;
        matrices.validate_communities(world.places.communities.len())?;
        interventions.validate()?;
        if let Some(protocol) = &testing {
            protocol.validate()?;
        }
        transit.validate(&world.places.cohorts)?;
        world.validate(&params)?;
        Ok(StepEngine {
            params,
            matrices,
            interventions,
            testing,
            transit,
            layers: default_layers(),
        })
    }

    #[must_use]
    pub fn with_layers(mut self, layers: Vec<Box<dyn TransmissionLayer>>) -> Self {
        self.layers = layers;
        self
    }

    #[must_use]
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Swaps the intervention schedule between steps.
    /// # Errors
    /// - If the new schedule fails validation; the old one stays in force.
    pub fn replace_interventions(&mut self, schedule: InterventionSchedule) -> Result<(), EpiError> {
        schedule.validate()?;
        self.interventions = schedule;
        Ok(())
    }

    /// Advances `world` by one step. On return every agent's `lambda` holds
    /// its hazard for `cur_time`, ready for the external infection sampler.
    pub fn run_step<R: Rng + ?Sized>(
        &self,
        world: &mut World,
        cur_time: Timestep,
        rng: &mut R,
    ) -> StepReport {
        let params = &self.params;
        let World { agents, places } = world;

        let mut report = timed("infection update", || {
            agents
                .par_iter_mut()
                .map(|agent| update_infection(agent, cur_time))
                .fold(StepReport::default, StepReport::add_transitions)
                .reduce(StepReport::default, StepReport::merge)
        });

        report.locked_cells = timed("grid statistics", || {
            update_grid_cell_statistics(
                &mut places.nbr_cells,
                &places.houses,
                agents,
                params.grid.locked_neighborhood_leakage,
                params.grid.locked_neighborhood_threshold,
            )
        });

        if let Some(protocol) = &self.testing {
            timed("testing", || {
                let (positive, negative) = update_test_status(agents, cur_time);
                report.positive_results = positive;
                report.negative_results = negative;
                report.tests_requested = update_test_request(
                    agents,
                    &places.houses,
                    &places.workplaces,
                    cur_time,
                    protocol,
                    params,
                    rng,
                );
            });
        }

        let active = self.interventions.active_at(cur_time, params.steps_per_day);
        timed("kappa update", || {
            update_all_kappa(
                agents,
                &places.houses,
                &places.nbr_cells,
                active,
                params,
                cur_time,
            );
        });

        let env = StepEnv {
            params,
            matrices: &self.matrices,
            transit: &self.transit,
            cur_time,
        };
        timed("aggregation", || {
            for layer in &self.layers {
                layer.aggregate(places, agents, &env);
            }
        });
        timed("distribution", || {
            let places = &*places;
            agents
                .par_iter_mut()
                .for_each(|agent| update_lambdas(agent, places, &self.layers, &env));
        });

        debug!("Step {cur_time}: {report:?}");
        report
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::StepEngine;
    use crate::cohorts::{CohortId, TransitSchedule};
    use crate::disease_progression::{DiseaseCourse, InfectionStatus};
    use crate::interventions::{CaseIsolation, InterventionParams, InterventionSchedule};
    use crate::parameters::{LayerParams, Normalization, Params};
    use crate::population::{
        Agent, Community, Grid, GridCell, GridPosition, House, Places, World,
    };
    use crate::testing::{TestState, TestTrigger, TestingProtocol, TestingRule, Turnaround};
    use crate::transmission_matrices::TransmissionMatrices;

    fn household_world(size: usize) -> World {
        let agents = (0..size)
            .map(|i| Agent::new(i, 30, 6, 0, 0, GridPosition::default()))
            .collect();
        World {
            agents,
            places: Places {
                houses: vec![House {
                    members: (0..size).collect(),
                    ..House::default()
                }],
                communities: vec![Community::new(0, (0..size).collect())],
                nbr_cells: Grid::from_fn(1, 1, |_| GridCell {
                    houses: vec![0],
                    ..GridCell::default()
                }),
                ..Places::default()
            },
        }
    }

    fn home_only_params() -> Params {
        let mut params = Params::default();
        params.transmission.home = LayerParams::new(0.2, Normalization::Density);
        params.transmission.workplace.beta = 0.0;
        params.transmission.community.beta = 0.0;
        params
    }

    fn engine(params: Params, world: &World) -> StepEngine {
        StepEngine::new(
            params,
            TransmissionMatrices::default(),
            InterventionSchedule::default(),
            None,
            TransitSchedule::default(),
            world,
        )
        .unwrap()
    }

    #[test]
    fn test_step_distributes_household_pressure() {
        let mut world = household_world(4);
        world.agents[0].infection_status = InfectionStatus::Infective;
        world.agents[0].course = Some(DiseaseCourse {
            asymptomatic_period: 100,
            ..DiseaseCourse::default()
        });
        let engine = engine(home_only_params(), &world);
        let mut rng = StdRng::seed_from_u64(0);
        let report = engine.run_step(&mut world, 1, &mut rng);
        assert_eq!(report.new_infectives, 0);
        for agent in &world.agents[1..] {
            assert_relative_eq!(agent.lambda, 0.05);
            assert_relative_eq!(agent.lambda_incoming.home, 0.05);
        }
    }

    #[test]
    fn test_state_changes_are_visible_in_the_same_step() {
        let mut world = household_world(2);
        assert!(world.agents[0].flag_exposure(DiseaseCourse {
            incubation_period: 1,
            asymptomatic_period: 10,
            ..DiseaseCourse::default()
        }));
        let engine = engine(home_only_params(), &world);
        let mut rng = StdRng::seed_from_u64(0);

        let report = engine.run_step(&mut world, 0, &mut rng);
        assert_eq!(report.new_infections, 1);
        assert!(world.agents[1].lambda.abs() < f64::EPSILON);

        let report = engine.run_step(&mut world, 1, &mut rng);
        assert_eq!(report.new_infectives, 1);
        assert_relative_eq!(world.agents[1].lambda, 0.1);
    }

    #[test]
    fn test_positive_test_reduces_kappa_next_step() {
        let mut world = household_world(2);
        world.agents[0].infection_status = InfectionStatus::Symptomatic;
        world.agents[0].symptom_onset = Some(0);
        world.agents[0].transition_observed_at = Some(0);
        world.agents[0].course = Some(DiseaseCourse {
            symptomatic_period: 100,
            ..DiseaseCourse::default()
        });
        let protocol = TestingProtocol {
            rules: vec![TestingRule {
                trigger: TestTrigger::Symptomatic,
                probability: 1.0,
                turnaround: Turnaround::Fixed { steps: 1 },
            }],
            sensitivity: 1.0,
            ..TestingProtocol::default()
        };
        let interventions = InterventionSchedule {
            days_before_interventions: 0,
            phases: vec![InterventionParams {
                num_days: 10,
                case_isolation: Some(CaseIsolation {
                    recognition_delay_days: 5,
                    ..CaseIsolation::default()
                }),
                ..InterventionParams::default()
            }],
        };
        let engine = StepEngine::new(
            home_only_params(),
            TransmissionMatrices::default(),
            interventions,
            Some(protocol),
            TransitSchedule::default(),
            &world,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(9);

        let report = engine.run_step(&mut world, 0, &mut rng);
        assert_eq!(report.tests_requested, 1);
        let before = world.agents[0].kappa;
        let lambda_before = world.agents[1].lambda;

        let report = engine.run_step(&mut world, 1, &mut rng);
        assert_eq!(report.positive_results, 1);
        assert_eq!(world.agents[0].test_status.state, TestState::Positive);
        assert!(world.agents[0].kappa.home < before.home);
        assert!(world.agents[1].lambda < lambda_before);
    }

    #[test]
    fn test_zero_length_period_still_triggers_symptom_test() {
        let mut world = household_world(2);
        assert!(world.agents[0].flag_exposure(DiseaseCourse {
            incubation_period: 1,
            asymptomatic_period: 0,
            symptomatic_period: 10,
            develops_symptoms: true,
            ..DiseaseCourse::default()
        }));
        let protocol = TestingProtocol {
            rules: vec![TestingRule {
                trigger: TestTrigger::Symptomatic,
                probability: 1.0,
                turnaround: Turnaround::Fixed { steps: 1 },
            }],
            sensitivity: 1.0,
            ..TestingProtocol::default()
        };
        let engine = StepEngine::new(
            home_only_params(),
            TransmissionMatrices::default(),
            InterventionSchedule::default(),
            Some(protocol),
            TransitSchedule::default(),
            &world,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(5);

        let mut requested = 0;
        let mut onset_step = None;
        for t in 0..6 {
            let report = engine.run_step(&mut world, t, &mut rng);
            requested += report.tests_requested;
            if report.new_symptomatic == 1 {
                onset_step = Some(t);
            }
        }
        // Symptoms are scheduled for step 1 but observed a step later.
        assert_eq!(onset_step, Some(2));
        assert_eq!(world.agents[0].symptom_onset, Some(1));
        assert_eq!(requested, 1);
        assert_eq!(world.agents[0].test_status.requested_at, Some(2));
        assert_eq!(world.agents[0].test_status.state, TestState::Positive);
    }

    #[test]
    fn test_invalid_transit_schedule_is_rejected() {
        let world = household_world(2);
        let mut transit = TransitSchedule::default();
        transit.am.insert(
            0,
            vec![crate::cohorts::Coach {
                occupants: vec![crate::cohorts::CoachOccupant {
                    cohort: CohortId { group: 1, index: 0 },
                    board: 0,
                    alight: 5,
                }],
            }],
        );
        let result = StepEngine::new(
            Params::default(),
            TransmissionMatrices::default(),
            InterventionSchedule::default(),
            None,
            transit,
            &world,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_replace_interventions_keeps_old_on_error() {
        let world = household_world(1);
        let mut engine = engine(Params::default(), &world);
        let bad = InterventionSchedule {
            days_before_interventions: 0,
            phases: vec![InterventionParams::default()],
        };
        assert!(engine.replace_interventions(bad).is_err());
        let good = InterventionSchedule {
            days_before_interventions: 0,
            phases: vec![InterventionParams {
                num_days: 1,
                ..InterventionParams::default()
            }],
        };
        assert!(engine.replace_interventions(good).is_ok());
    }
}
