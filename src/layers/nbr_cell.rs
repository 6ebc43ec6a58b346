use rayon::prelude::*;

use super::{fresh_or_zero, sum_weights, ContainerRef};
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::Params;
use crate::population::{Agent, Grid, GridCell, House, Places, Pressure};
use crate::Timestep;

/// Pools every cell's outgoing weight over its 3x3 neighbourhood. A cell's
/// outgoing weight is scaled by its `access_factor`, so locked cells leak
/// only a fraction of their pressure.
pub fn update_lambda_nbr_cells(
    nbr_cells: &mut Grid<GridCell>,
    houses: &[House],
    agents: &[Agent],
    params: &Params,
    cur_time: Timestep,
) {
    let local: Vec<(f64, usize)> = nbr_cells
        .cells()
        .par_iter()
        .map(|cell| {
            cell.houses
                .iter()
                .filter_map(|&h| houses.get(h))
                .fold((0.0, 0), |(mass, size), house| {
                    (
                        mass + sum_weights(&house.members, agents, params, |k| k.community),
                        size + house.members.len(),
                    )
                })
        })
        .collect();
    for (cell, (mass, _)) in nbr_cells.cells_mut().iter_mut().zip(&local) {
        cell.outgoing = mass * cell.access_factor;
    }

    let normalization = params.transmission.nbr_cell.normalization;
    let grid = &*nbr_cells;
    let pooled: Vec<f64> = (0..grid.cells().len())
        .into_par_iter()
        .map(|i| {
            let (mass, size) = grid
                .neighbourhood(grid.position_of(i))
                .map(|pos| grid.index_of(pos))
                .fold((0.0, 0), |(mass, size), j| {
                    (mass + grid.cells()[j].outgoing, size + local[j].1)
                });
            mass * normalization.scale(size)
        })
        .collect();
    for (cell, mixing) in nbr_cells.cells_mut().iter_mut().zip(pooled) {
        cell.pressure = Pressure::scalar(mixing, cur_time);
    }
}

/// The agent's own cell gates incoming pressure by its `access_factor`.
#[must_use]
pub fn individual_lambda_nbr_cell(
    agent: &Agent,
    cell: &GridCell,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    fresh_or_zero(
        &cell.pressure,
        agent.age_group,
        cur_time,
        ContainerRef::GridCell(agent.grid_cell),
    )
        * cell.access_factor
        * agent.susceptibility
        * params.transmission.nbr_cell.beta
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NbrCellLayer;

impl TransmissionLayer for NbrCellLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::NbrCell
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        update_lambda_nbr_cells(
            &mut places.nbr_cells,
            &places.houses,
            agents,
            env.params,
            env.cur_time,
        );
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        places.nbr_cells.get(agent.grid_cell).map_or(0.0, |cell| {
            individual_lambda_nbr_cell(agent, cell, env.params, env.cur_time)
        })
    }
}
