use rayon::prelude::*;

use super::{fresh_or_zero, ContainerRef};
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::Params;
use crate::population::{Agent, Places, Pressure};
use crate::Timestep;

#[derive(Debug, Clone, Copy, Default)]
struct TravelTally {
    infected_distance: f64,
    total_distance: f64,
    actual_travellers: usize,
    usual_travellers: usize,
}

impl TravelTally {
    fn merge(self, other: TravelTally) -> TravelTally {
        TravelTally {
            infected_distance: self.infected_distance + other.infected_distance,
            total_distance: self.total_distance + other.total_distance,
            actual_travellers: self.actual_travellers + other.actual_travellers,
            usual_travellers: self.usual_travellers + other.usual_travellers,
        }
    }
}

/// Share of commuting distance covered by infectious travellers, scaled by
/// the fraction of usual commuters still travelling. Zero when nobody
/// commutes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn updated_travel_fraction(agents: &[Agent], params: &Params) -> f64 {
    let tally = agents
        .par_iter()
        .filter(|a| a.has_to_travel)
        .map(|a| {
            let mut tally = TravelTally {
                usual_travellers: 1,
                ..TravelTally::default()
            };
            if a.travels() {
                tally.actual_travellers = 1;
                tally.total_distance = a.commute_distance;
                tally.infected_distance = a.commute_distance
                    * a.infectious_weight(&params.infectiousness)
                    * a.kappa.community;
            }
            tally
        })
        .reduce(TravelTally::default, TravelTally::merge);
    if tally.total_distance <= 0.0 || tally.usual_travellers == 0 {
        return 0.0;
    }
    tally.infected_distance / tally.total_distance * tally.actual_travellers as f64
        / tally.usual_travellers as f64
}

/// Distance-weighted exposure of commuters that do not travel in a cohort.
#[must_use]
pub fn individual_lambda_travel(
    agent: &Agent,
    fraction: &Pressure,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    if !agent.travels() || agent.cohort.is_some() {
        return 0.0;
    }
    fresh_or_zero(fraction, agent.age_group, cur_time, ContainerRef::Travel)
        * params.transmission.travel
        * agent.susceptibility
        * agent.commute_distance
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TravelLayer;

impl TransmissionLayer for TravelLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Travel
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        places.travel = Pressure::scalar(updated_travel_fraction(agents, env.params), env.cur_time);
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        individual_lambda_travel(agent, &places.travel, env.params, env.cur_time)
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::{individual_lambda_travel, updated_travel_fraction, TravelLayer};
    use crate::cohorts::{CohortId, TransitSchedule};
    use crate::disease_progression::InfectionStatus;
    use crate::lambda::TransmissionLayer;
    use crate::layers::test_support::{agents, env};
    use crate::parameters::Params;
    use crate::population::{Places, Pressure};
    use crate::transmission_matrices::TransmissionMatrices;

    #[test]
    fn test_travel_fraction() {
        let params = Params::default();
        let mut agents = agents(4);
        for agent in &mut agents[..3] {
            agent.has_to_travel = true;
            agent.commute_distance = 2.0;
        }
        agents[0].infection_status = InfectionStatus::Infective;
        agents[2].travel_allowed = false;
        // 2 of 3 commuters travel; the infective covers 2 of 4 km.
        assert_relative_eq!(updated_travel_fraction(&agents, &params), 0.5 * 2.0 / 3.0);
    }

    #[test]
    fn test_no_commuters_means_no_fraction() {
        let params = Params::default();
        assert!(updated_travel_fraction(&agents(3), &params).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cohort_members_skip_travel_exposure() {
        let params = Params::default();
        let fraction = Pressure::scalar(0.1, 0);
        let mut agent = agents(1).remove(0);
        agent.has_to_travel = true;
        agent.commute_distance = 3.0;
        assert_relative_eq!(
            individual_lambda_travel(&agent, &fraction, &params, 0),
            0.1 * params.transmission.travel * 3.0
        );
        agent.cohort = Some(CohortId { group: 0, index: 0 });
        assert!(individual_lambda_travel(&agent, &fraction, &params, 0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_infectious_commuters_means_no_travel_hazard() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 3);
        let mut agents = agents(3);
        for agent in &mut agents {
            agent.has_to_travel = true;
            agent.commute_distance = 5.0;
        }
        agents[0].infection_status = InfectionStatus::Exposed;
        let mut places = Places::default();
        TravelLayer.aggregate(&mut places, &agents, &env);
        assert_eq!(places.travel.value_at(0, 3), Some(0.0));
        for agent in &agents {
            assert!(TravelLayer.distribute(agent, &places, &env).abs() < f64::EPSILON);
        }
    }
}

