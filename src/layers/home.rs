use rayon::prelude::*;

use super::{age_dependent, fresh_or_zero, mass_by_age, sum_weights, ContainerRef};
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::Params;
use crate::population::{Agent, House, Places, Pressure};
use crate::transmission_matrices::LowRankMatrix;
use crate::Timestep;

#[must_use]
pub fn updated_lambda_h_age_independent(house: &House, agents: &[Agent], params: &Params) -> f64 {
    sum_weights(&house.members, agents, params, |k| k.home)
        * params.transmission.home.normalization.scale(house.members.len())
}

/// Household pressure by target age group.
#[must_use]
pub fn updated_lambda_h_age_dependent(
    house: &House,
    agents: &[Agent],
    params: &Params,
    matrix: &LowRankMatrix,
) -> Vec<f64> {
    let scale = params.transmission.home.normalization.scale(house.members.len());
    let mass = mass_by_age(
        &house.members,
        agents,
        params,
        matrix.num_age_groups(),
        |k| k.home,
    );
    matrix.apply(&mass).into_iter().map(|p| p * scale).collect()
}

#[must_use]
pub fn individual_lambda_h(
    agent: &Agent,
    house: &House,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    fresh_or_zero(&house.pressure, agent.age_group, cur_time, ContainerRef::House(house.id))
        * agent.susceptibility
        * params.transmission.home.beta
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HomeLayer;

impl TransmissionLayer for HomeLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Home
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        let matrix = age_dependent(env.params, env.matrices.home.as_ref());
        places.houses.par_iter_mut().for_each(|house| {
            house.pressure = match matrix {
                Some(m) => Pressure::age_stratified(
                    updated_lambda_h_age_dependent(house, agents, env.params, m),
                    env.cur_time,
                ),
                None => Pressure::scalar(
                    updated_lambda_h_age_independent(house, agents, env.params),
                    env.cur_time,
                ),
            };
        });
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        places.houses.get(agent.home).map_or(0.0, |house| {
            individual_lambda_h(agent, house, env.params, env.cur_time)
        })
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::{individual_lambda_h, updated_lambda_h_age_dependent, HomeLayer};
    use crate::cohorts::TransitSchedule;
    use crate::disease_progression::InfectionStatus;
    use crate::lambda::TransmissionLayer;
    use crate::layers::test_support::{agents, env};
    use crate::parameters::{LayerParams, MixingModel, Normalization, Params};
    use crate::population::{House, Places};
    use crate::transmission_matrices::{LowRankMatrix, TransmissionMatrices};

    fn household_places(size: usize) -> Places {
        Places {
            houses: vec![House {
                members: (0..size).collect(),
                ..House::default()
            }],
            ..Places::default()
        }
    }

    #[test]
    fn test_one_infective_in_household_of_four() {
        let mut params = Params::default();
        params.transmission.home = LayerParams::new(0.2, Normalization::Density);
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 3);

        let mut agents = agents(4);
        agents[0].infection_status = InfectionStatus::Infective;
        let mut places = household_places(4);
        HomeLayer.aggregate(&mut places, &agents, &env);
        for agent in &agents[1..] {
            assert_relative_eq!(HomeLayer.distribute(agent, &places, &env), 0.05);
        }
    }

    #[test]
    fn test_household_without_infectious_members_is_zero() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(3);
        agents[1].infection_status = InfectionStatus::Exposed;
        agents[2].infection_status = InfectionStatus::Recovered;
        let mut places = household_places(3);
        HomeLayer.aggregate(&mut places, &agents, &env);
        assert!(HomeLayer.distribute(&agents[0], &places, &env).abs() < f64::EPSILON);
    }

    #[test]
    fn test_stale_pressure_contributes_nothing() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let mut agents = agents(2);
        agents[0].infection_status = InfectionStatus::Symptomatic;
        let mut places = household_places(2);
        HomeLayer.aggregate(&mut places, &agents, &env(&params, &matrices, &transit, 1));
        let lambda = individual_lambda_h(&agents[1], &places.houses[0], &params, 2);
        assert!(lambda.abs() < f64::EPSILON);
    }

    #[test]
    fn test_kappa_scales_household_pressure() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);
        let mut agents = agents(2);
        agents[0].infection_status = InfectionStatus::Infective;
        let mut places = household_places(2);
        HomeLayer.aggregate(&mut places, &agents, &env);
        let full = HomeLayer.distribute(&agents[1], &places, &env);
        agents[0].kappa.home = 0.25;
        HomeLayer.aggregate(&mut places, &agents, &env);
        assert_relative_eq!(HomeLayer.distribute(&agents[1], &places, &env), full * 0.25);
    }

    #[test]
    fn test_age_dependent_matches_dense_matrix() {
        let matrix = LowRankMatrix::new(
            vec![vec![0.9, 0.2], vec![0.4, -0.3], vec![0.1, 0.8]],
            vec![1.5, 0.4],
            vec![vec![0.5, 0.6, 0.2], vec![0.3, -0.1, 0.7]],
        )
        .unwrap();
        let params = Params {
            mixing: MixingModel::AgeDependent,
            num_age_groups: 3,
            ..Params::default()
        };
        let mut agents = agents(3);
        for (i, agent) in agents.iter_mut().enumerate() {
            agent.age_group = i;
            agent.infection_status = InfectionStatus::Infective;
            agent.infectiousness = 1.0 + i as f64;
        }
        let house = House {
            members: vec![0, 1, 2],
            ..House::default()
        };
        let pressure = updated_lambda_h_age_dependent(&house, &agents, &params, &matrix);

        let scale = params.transmission.home.normalization.scale(3);
        let mass = [1.0, 2.0, 3.0];
        for (target, row) in matrix.to_dense().iter().enumerate() {
            let direct: f64 = row.iter().zip(&mass).map(|(c, m)| c * m).sum::<f64>() * scale;
            assert_relative_eq!(pressure[target], direct, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_house_pressure_is_independent_of_aggregation_order() {
        let mut params = Params::default();
        params.transmission.home = LayerParams::new(0.3, Normalization::Density);
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 4);

        let mut agents = agents(6);
        agents[0].infection_status = InfectionStatus::Infective;
        agents[3].infection_status = InfectionStatus::Symptomatic;
        agents[4].infectiousness = 2.0;
        agents[4].infection_status = InfectionStatus::Infective;
        let houses = vec![
            House {
                id: 0,
                members: vec![0],
                ..House::default()
            },
            House {
                id: 1,
                members: vec![1, 2],
                ..House::default()
            },
            House {
                id: 2,
                members: vec![3, 4, 5],
                ..House::default()
            },
        ];

        let mut forward = Places {
            houses: houses.clone(),
            ..Places::default()
        };
        HomeLayer.aggregate(&mut forward, &agents, &env);

        let mut reversed = Places {
            houses: houses.iter().rev().cloned().collect(),
            ..Places::default()
        };
        HomeLayer.aggregate(&mut reversed, &agents, &env);
        for house in &reversed.houses {
            assert_eq!(house.pressure, forward.houses[house.id].pressure);
        }

        // Each house aggregated on its own sees only its own members.
        for house in &houses {
            let mut alone = Places {
                houses: vec![house.clone()],
                ..Places::default()
            };
            HomeLayer.aggregate(&mut alone, &agents, &env);
            assert_eq!(alone.houses[0].pressure, forward.houses[house.id].pressure);
        }
        assert!(forward.houses[1].pressure.mixing.abs() < f64::EPSILON);
    }
}

