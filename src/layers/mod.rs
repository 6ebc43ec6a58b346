//! Container aggregation and per-agent distribution for each contact layer.

mod community;
mod home;
mod nbr_cell;
mod travel;
mod workplace;

pub use community::{
    individual_lambda_c, individual_lambda_random_community, update_lambda_c_global,
    updated_lambda_c_local, updated_lambda_c_local_age_dependent,
    updated_lambda_c_local_random_community, CommunityLayer,
};
pub use home::{
    individual_lambda_h, updated_lambda_h_age_dependent, updated_lambda_h_age_independent,
    HomeLayer,
};
pub use nbr_cell::{individual_lambda_nbr_cell, update_lambda_nbr_cells, NbrCellLayer};
pub use travel::{individual_lambda_travel, updated_travel_fraction, TravelLayer};
pub use workplace::{
    individual_lambda_project, individual_lambda_w, updated_lambda_project,
    updated_lambda_w_age_dependent, updated_lambda_w_age_independent, WorkplaceLayer,
};

use std::fmt;

use log::warn;

use crate::parameters::{MixingModel, Params};
use crate::population::{
    Agent, AgentId, CommunityId, GridPosition, HouseId, Kappa, Pressure, WorkplaceId,
};
use crate::transmission_matrices::LowRankMatrix;
use crate::Timestep;

/// Summed outgoing weight of `members` with the layer's kappa applied.
pub(crate) fn sum_weights(
    members: &[AgentId],
    agents: &[Agent],
    params: &Params,
    kappa: impl Fn(&Kappa) -> f64,
) -> f64 {
    members
        .iter()
        .filter_map(|&id| agents.get(id))
        .map(|a| a.infectious_weight(&params.infectiousness) * kappa(&a.kappa))
        .sum()
}

/// Outgoing weight of `members` binned by their age group.
pub(crate) fn mass_by_age(
    members: &[AgentId],
    agents: &[Agent],
    params: &Params,
    num_age_groups: usize,
    kappa: impl Fn(&Kappa) -> f64,
) -> Vec<f64> {
    let mut mass = vec![0.0; num_age_groups];
    for agent in members.iter().filter_map(|&id| agents.get(id)) {
        if let Some(slot) = mass.get_mut(agent.age_group) {
            *slot += agent.infectious_weight(&params.infectiousness) * kappa(&agent.kappa);
        }
    }
    mass
}

/// `matrix` if the model mixes by age, otherwise `None`.
pub(crate) fn age_dependent<'a>(
    params: &Params,
    matrix: Option<&'a LowRankMatrix>,
) -> Option<&'a LowRankMatrix> {
    match params.mixing {
        MixingModel::AgeDependent => matrix,
        MixingModel::AgeIndependent => None,
    }
}

/// Names the container a cached pressure belongs to in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerRef {
    House(HouseId),
    Workplace(WorkplaceId),
    Project {
        workplace: WorkplaceId,
        index: usize,
    },
    Community(CommunityId),
    RandomCommunity(HouseId),
    GridCell(GridPosition),
    Travel,
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerRef::House(id) => write!(f, "house {id}"),
            ContainerRef::Workplace(id) => write!(f, "workplace {id}"),
            ContainerRef::Project { workplace, index } => {
                write!(f, "project {index} of workplace {workplace}")
            }
            ContainerRef::Community(id) => write!(f, "community {id}"),
            ContainerRef::RandomCommunity(id) => write!(f, "random community of house {id}"),
            ContainerRef::GridCell(pos) => write!(f, "grid cell ({}, {})", pos.x, pos.y),
            ContainerRef::Travel => write!(f, "travel fraction"),
        }
    }
}

/// Reads a cached pressure, treating a stale cache as no pressure at all.
pub(crate) fn fresh_or_zero(
    pressure: &Pressure,
    age_group: usize,
    cur_time: Timestep,
    container: ContainerRef,
) -> f64 {
    pressure.value_at(age_group, cur_time).unwrap_or_else(|| {
        warn!(
            "The {container} pressure was computed at {:?}, not step {cur_time}",
            pressure.computed_at
        );
        0.0
    })
}
