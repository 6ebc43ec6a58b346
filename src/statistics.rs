use log::debug;
use rayon::prelude::*;
use serde::Serialize;

use crate::disease_progression::InfectionStatus;
use crate::population::{Agent, Community, Grid, GridCell, House};

/// Counts by infection state of a set of agents, with a parallel count for
/// agents living in high-density areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CasualtyStats {
    pub affected: usize,
    pub hd_area_affected: usize,

    pub susceptible: usize,
    pub hd_area_susceptible: usize,
    pub exposed: usize,
    pub hd_area_exposed: usize,
    pub infective: usize,
    pub hd_area_infective: usize,
    pub symptomatic: usize,
    pub hd_area_symptomatic: usize,
    pub hospitalised: usize,
    pub hd_area_hospitalised: usize,
    pub critical: usize,
    pub hd_area_critical: usize,
    pub dead: usize,
    pub hd_area_dead: usize,
    pub recovered: usize,
    pub hd_area_recovered: usize,

    pub recovered_from_infective: usize,
    pub recovered_from_symptomatic: usize,
    pub recovered_from_hospitalised: usize,
    pub recovered_from_critical: usize,
    pub hd_area_recovered_from_infective: usize,
    pub hd_area_recovered_from_symptomatic: usize,
    pub hd_area_recovered_from_hospitalised: usize,
    pub hd_area_recovered_from_critical: usize,
}

impl CasualtyStats {
    fn record(&mut self, agent: &Agent) {
        let hd = usize::from(agent.high_density_area);
        let (count, hd_count) = match agent.infection_status {
            InfectionStatus::Susceptible => (&mut self.susceptible, &mut self.hd_area_susceptible),
            InfectionStatus::Exposed => (&mut self.exposed, &mut self.hd_area_exposed),
            InfectionStatus::Infective => (&mut self.infective, &mut self.hd_area_infective),
            InfectionStatus::Symptomatic => (&mut self.symptomatic, &mut self.hd_area_symptomatic),
            InfectionStatus::Hospitalised => {
                (&mut self.hospitalised, &mut self.hd_area_hospitalised)
            }
            InfectionStatus::Critical => (&mut self.critical, &mut self.hd_area_critical),
            InfectionStatus::Dead => (&mut self.dead, &mut self.hd_area_dead),
            InfectionStatus::Recovered => (&mut self.recovered, &mut self.hd_area_recovered),
        };
        *count += 1;
        *hd_count += hd;

        if agent.infection_status != InfectionStatus::Susceptible {
            self.affected += 1;
            self.hd_area_affected += hd;
        }
        if agent.infection_status == InfectionStatus::Recovered {
            let from = match agent.state_before_recovery {
                Some(InfectionStatus::Infective) => Some((
                    &mut self.recovered_from_infective,
                    &mut self.hd_area_recovered_from_infective,
                )),
                Some(InfectionStatus::Symptomatic) => Some((
                    &mut self.recovered_from_symptomatic,
                    &mut self.hd_area_recovered_from_symptomatic,
                )),
                Some(InfectionStatus::Hospitalised) => Some((
                    &mut self.recovered_from_hospitalised,
                    &mut self.hd_area_recovered_from_hospitalised,
                )),
                Some(InfectionStatus::Critical) => Some((
                    &mut self.recovered_from_critical,
                    &mut self.hd_area_recovered_from_critical,
                )),
                _ => None,
            };
            if let Some((count, hd_count)) = from {
                *count += 1;
                *hd_count += hd;
            }
        }
    }
}

#[must_use]
pub fn get_infected_community(agents: &[Agent], community: &Community) -> CasualtyStats {
    let mut stats = CasualtyStats::default();
    for agent in community.members.iter().filter_map(|&id| agents.get(id)) {
        stats.record(agent);
    }
    stats
}

/// Refreshes the counts of every grid cell and locks the cells whose share
/// of hospital cases exceeds `threshold`. Returns the number of locked cells.
#[allow(clippy::cast_precision_loss)]
pub fn update_grid_cell_statistics(
    nbr_cells: &mut Grid<GridCell>,
    houses: &[House],
    agents: &[Agent],
    leakage: f64,
    threshold: f64,
) -> usize {
    nbr_cells.cells_mut().par_iter_mut().for_each(|cell| {
        let residents = cell
            .houses
            .iter()
            .filter_map(|&h| houses.get(h))
            .flat_map(|h| h.members.iter())
            .filter_map(|&id| agents.get(id));
        let (mut population, mut infected, mut active) = (0, 0, 0);
        for agent in residents {
            population += 1;
            infected += usize::from(agent.infection_status.is_infected());
            active += usize::from(agent.infection_status.is_hospital_case());
        }
        cell.population = population;
        cell.num_infected = infected;
        cell.num_active_hospitalisations = active;
        cell.locked = population > 0 && active as f64 / population as f64 > threshold;
        cell.access_factor = if cell.locked { leakage } else { 1.0 };
    });
    let locked = nbr_cells.cells().iter().filter(|c| c.locked).count();
    debug!("{locked} of {} grid cells locked", nbr_cells.cells().len());
    locked
}
