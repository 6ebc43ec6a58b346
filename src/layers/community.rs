use rayon::prelude::*;

use super::{age_dependent, fresh_or_zero, sum_weights, ContainerRef};
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::{DistanceKernel, Params};
use crate::population::{Agent, Community, House, Places, Pressure};
use crate::transmission_matrices::{DistanceMatrix, LowRankMatrix};
use crate::Timestep;

fn community_weight(agent: &Agent, params: &Params) -> f64 {
    agent.infectious_weight(&params.infectiousness)
        * agent.kappa.community
        * agent.community_distance_factor
}

#[must_use]
pub fn updated_lambda_c_local(community: &Community, agents: &[Agent], params: &Params) -> f64 {
    let sum: f64 = community
        .members
        .iter()
        .filter_map(|&id| agents.get(id))
        .map(|a| community_weight(a, params))
        .sum();
    sum * params
        .transmission
        .community
        .normalization
        .scale(community.members.len())
}

#[must_use]
pub fn updated_lambda_c_local_age_dependent(
    community: &Community,
    agents: &[Agent],
    params: &Params,
    matrix: &LowRankMatrix,
) -> Vec<f64> {
    let mut mass = vec![0.0; matrix.num_age_groups()];
    for agent in community.members.iter().filter_map(|&id| agents.get(id)) {
        if let Some(slot) = mass.get_mut(agent.age_group) {
            *slot += community_weight(agent, params);
        }
    }
    let scale = params
        .transmission
        .community
        .normalization
        .scale(community.members.len());
    matrix.apply(&mass).into_iter().map(|p| p * scale).collect()
}

/// Pools each household's outgoing community weight over its random
/// neighbour households.
pub fn updated_lambda_c_local_random_community(
    houses: &mut [House],
    agents: &[Agent],
    params: &Params,
    cur_time: Timestep,
) {
    houses.par_iter_mut().for_each(|house| {
        house.random_community_outgoing = sum_weights(&house.members, agents, params, |k| {
            k.community
        });
    });
    let normalization = params.transmission.random_community.normalization;
    let pooled: Vec<f64> = houses
        .par_iter()
        .map(|house| {
            let (mass, size) = house
                .random_neighbours
                .iter()
                .filter_map(|&h| houses.get(h))
                .fold((0.0, 0), |(mass, size), n| {
                    (mass + n.random_community_outgoing, size + n.members.len())
                });
            mass * normalization.scale(size)
        })
        .collect();
    for (house, mixing) in houses.iter_mut().zip(pooled) {
        house.random_community = Pressure::scalar(mixing, cur_time);
    }
}

fn diffuse(values: &[&[f64]], weights: &[f64], width: usize) -> Vec<f64> {
    let norm: f64 = weights.iter().sum();
    if norm <= 0.0 {
        return vec![0.0; width];
    }
    let mut out = vec![0.0; width];
    for (value, w) in values.iter().zip(weights) {
        for (o, v) in out.iter_mut().zip(value.iter()) {
            *o += w * v;
        }
    }
    out.iter_mut().for_each(|o| *o /= norm);
    out
}

/// Spreads each community's local pressure to the others through the
/// distance kernel. Without distances the global pressure is the local one.
pub fn update_lambda_c_global(
    communities: &mut [Community],
    distance: Option<&DistanceMatrix>,
    kernel: &DistanceKernel,
    cur_time: Timestep,
) {
    let Some(distance) = distance else {
        for community in communities.iter_mut() {
            community.global = community.local.clone();
            community.global.computed_at = Some(cur_time);
        }
        return;
    };
    // Scalar pressure is diffused as a single age group.
    let locals: Vec<Vec<f64>> = communities
        .iter()
        .map(|c| {
            if c.local.age_mixing.is_empty() {
                vec![c.local.mixing]
            } else {
                c.local.age_mixing.clone()
            }
        })
        .collect();
    let stratified = communities.iter().any(|c| !c.local.age_mixing.is_empty());
    let width = locals.iter().map(Vec::len).max().unwrap_or(1);
    let views: Vec<&[f64]> = locals.iter().map(Vec::as_slice).collect();

    communities.par_iter_mut().enumerate().for_each(|(i, community)| {
        let weights: Vec<f64> = distance
            .row(i)
            .unwrap_or(&[])
            .iter()
            .map(|&d| kernel.f_kernel(d))
            .collect();
        let diffused: Vec<f64> = diffuse(&views, &weights, width)
            .into_iter()
            .map(|p| p * community.w_c)
            .collect();
        community.global = if stratified {
            Pressure::age_stratified(diffused, cur_time)
        } else {
            Pressure::scalar(diffused.first().copied().unwrap_or(0.0), cur_time)
        };
    });
}

#[must_use]
pub fn individual_lambda_c(
    agent: &Agent,
    community: &Community,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    fresh_or_zero(
        &community.global,
        agent.age_group,
        cur_time,
        ContainerRef::Community(community.id),
    ) * agent.susceptibility
        * agent.community_distance_factor
        * params.transmission.community.beta
}

/// Zero unless random-community mixing is switched on.
#[must_use]
pub fn individual_lambda_random_community(
    agent: &Agent,
    house: &House,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    let beta = params.transmission.random_community.beta;
    if beta <= 0.0 {
        return 0.0;
    }
    fresh_or_zero(
        &house.random_community,
        agent.age_group,
        cur_time,
        ContainerRef::RandomCommunity(house.id),
    ) * agent.susceptibility
        * beta
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CommunityLayer;

impl TransmissionLayer for CommunityLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Community
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        let matrix = age_dependent(env.params, env.matrices.community.as_ref());
        places.communities.par_iter_mut().for_each(|community| {
            community.local = match matrix {
                Some(m) => Pressure::age_stratified(
                    updated_lambda_c_local_age_dependent(community, agents, env.params, m),
                    env.cur_time,
                ),
                None => Pressure::scalar(
                    updated_lambda_c_local(community, agents, env.params),
                    env.cur_time,
                ),
            };
        });
        update_lambda_c_global(
            &mut places.communities,
            env.matrices.community_distance.as_ref(),
            &env.params.kernel,
            env.cur_time,
        );
        if env.params.transmission.random_community.beta > 0.0 {
            updated_lambda_c_local_random_community(
                &mut places.houses,
                agents,
                env.params,
                env.cur_time,
            );
        }
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        let community = places.communities.get(agent.community).map_or(0.0, |c| {
            individual_lambda_c(agent, c, env.params, env.cur_time)
        });
        let random = places.houses.get(agent.home).map_or(0.0, |h| {
            individual_lambda_random_community(agent, h, env.params, env.cur_time)
        });
        community + random
    }
}
