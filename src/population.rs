use serde::{Deserialize, Serialize};

use crate::cohorts::{CohortId, CohortMap};
use crate::disease_progression::{DiseaseCourse, InfectionStatus};
use crate::error::EpiError;
use crate::lambda::LambdaIncoming;
use crate::parameters::{InfectiousnessParams, MixingModel, Params};
use crate::testing::{TestStatus, TraceSignal};
use crate::Timestep;

pub type AgentId = usize;
pub type HouseId = usize;
pub type WorkplaceId = usize;
pub type CommunityId = usize;

/// Multipliers on an agent's outgoing infectiousness in each contact layer.
/// Every component stays within [0, 1]; interventions only scale them down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kappa {
    pub home: f64,
    pub work: f64,
    pub community: f64,
}

impl Default for Kappa {
    fn default() -> Self {
        Kappa {
            home: 1.0,
            work: 1.0,
            community: 1.0,
        }
    }
}

impl Kappa {
    #[must_use]
    pub fn clamped(self) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Kappa {
            home: clamp(self.home),
            work: clamp(self.work),
            community: clamp(self.community),
        }
    }

    /// Component-wise product.
    #[must_use]
    pub fn scaled_by(self, other: Kappa) -> Self {
        Kappa {
            home: self.home * other.home,
            work: self.work * other.work,
            community: self.community * other.community,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IsolationStatus {
    #[default]
    None,
    /// Household member of a case or a traced contact.
    Quarantined,
    /// A recognised or tested-positive case.
    Isolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct GridPosition {
    pub x: usize,
    pub y: usize,
}

impl GridPosition {
    #[must_use]
    pub fn new(x: usize, y: usize) -> Self {
        GridPosition { x, y }
    }
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub age: u8,
    pub age_group: usize,

    pub infection_status: InfectionStatus,
    /// Step at which the current infection status was scheduled to begin.
    pub state_entered_at: Timestep,
    /// Step on which `update_infection` last moved the agent. This can be
    /// later than `state_entered_at` when a period rounds to zero steps.
    pub transition_observed_at: Option<Timestep>,
    /// Pre-sampled durations and branch outcomes, assigned at exposure.
    pub course: Option<DiseaseCourse>,
    /// Set by the infection sampler; consumed by `update_infection`.
    pub exposure_flagged: bool,
    pub time_of_infection: Option<Timestep>,
    pub symptom_onset: Option<Timestep>,
    pub state_before_recovery: Option<InfectionStatus>,

    pub infectiousness: f64,
    pub susceptibility: f64,
    /// Kernel weight of the agent's distance to its community centre.
    pub community_distance_factor: f64,
    pub kappa: Kappa,
    pub compliant: bool,
    pub essential_worker: bool,
    pub high_density_area: bool,
    pub isolation: IsolationStatus,

    pub home: HouseId,
    pub workplace: Option<WorkplaceId>,
    /// Index of the agent's project team within its workplace.
    pub project: Option<usize>,
    pub community: CommunityId,
    pub grid_cell: GridPosition,
    pub cohort: Option<CohortId>,

    pub has_to_travel: bool,
    pub commute_distance: f64,
    pub travel_allowed: bool,

    pub test_status: TestStatus,
    pub traced: Option<TraceSignal>,

    pub lambda_incoming: LambdaIncoming,
    pub lambda: f64,
}

impl Agent {
    #[must_use]
    pub fn new(
        id: AgentId,
        age: u8,
        age_group: usize,
        home: HouseId,
        community: CommunityId,
        grid_cell: GridPosition,
    ) -> Self {
        Agent {
            id,
            age,
            age_group,
            infection_status: InfectionStatus::Susceptible,
            state_entered_at: 0,
            transition_observed_at: None,
            course: None,
            exposure_flagged: false,
            time_of_infection: None,
            symptom_onset: None,
            state_before_recovery: None,
            infectiousness: 1.0,
            susceptibility: 1.0,
            community_distance_factor: 1.0,
            kappa: Kappa::default(),
            compliant: true,
            essential_worker: false,
            high_density_area: false,
            isolation: IsolationStatus::None,
            home,
            workplace: None,
            project: None,
            community,
            grid_cell,
            cohort: None,
            has_to_travel: false,
            commute_distance: 0.0,
            travel_allowed: true,
            test_status: TestStatus::default(),
            traced: None,
            lambda_incoming: LambdaIncoming::default(),
            lambda: 0.0,
        }
    }

    /// Whether the agent actually commutes this step.
    #[must_use]
    pub fn travels(&self) -> bool {
        self.has_to_travel
            && self.travel_allowed
            && !matches!(
                self.infection_status,
                InfectionStatus::Hospitalised | InfectionStatus::Critical | InfectionStatus::Dead
            )
    }

    /// Intrinsic outgoing infectiousness before any layer kappa is applied.
    /// Zero for anyone who is not currently infectious.
    #[must_use]
    pub fn infectious_weight(&self, infectiousness: &InfectiousnessParams) -> f64 {
        let state_factor = match self.infection_status {
            InfectionStatus::Infective => infectiousness.asymptomatic,
            InfectionStatus::Symptomatic => infectiousness.symptomatic,
            _ => return 0.0,
        };
        (self.infectiousness * state_factor).max(0.0)
    }
}

/// A per-step cached aggregate of a container, stamped with the step it was
/// computed for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pressure {
    pub mixing: f64,
    /// Per target age group; empty for age-independent layers.
    pub age_mixing: Vec<f64>,
    pub computed_at: Option<Timestep>,
}

impl Pressure {
    #[must_use]
    pub fn scalar(mixing: f64, computed_at: Timestep) -> Self {
        Pressure {
            mixing,
            age_mixing: Vec::new(),
            computed_at: Some(computed_at),
        }
    }

    #[must_use]
    pub fn age_stratified(age_mixing: Vec<f64>, computed_at: Timestep) -> Self {
        Pressure {
            mixing: age_mixing.iter().sum(),
            age_mixing,
            computed_at: Some(computed_at),
        }
    }

    /// The pressure seen by `age_group`, or `None` when the cache was not
    /// computed for `cur_time`.
    #[must_use]
    pub fn value_at(&self, age_group: usize, cur_time: Timestep) -> Option<f64> {
        if self.computed_at != Some(cur_time) {
            return None;
        }
        if self.age_mixing.is_empty() {
            Some(self.mixing)
        } else {
            Some(self.age_mixing.get(age_group).copied().unwrap_or(0.0))
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct House {
    pub id: HouseId,
    pub members: Vec<AgentId>,
    pub grid_cell: GridPosition,
    /// Households this one mixes with in the random-community layer.
    pub random_neighbours: Vec<HouseId>,
    pub pressure: Pressure,
    pub random_community_outgoing: f64,
    pub random_community: Pressure,
}

#[derive(Debug, Clone, Default)]
pub struct Project {
    pub members: Vec<AgentId>,
    pub pressure: Pressure,
}

#[derive(Debug, Clone, Default)]
pub struct Workplace {
    pub id: WorkplaceId,
    pub members: Vec<AgentId>,
    pub projects: Vec<Project>,
    pub pressure: Pressure,
}

#[derive(Debug, Clone)]
pub struct Community {
    pub id: CommunityId,
    pub members: Vec<AgentId>,
    /// Weight applied to the community's diffused pressure.
    pub w_c: f64,
    pub local: Pressure,
    pub global: Pressure,
}

impl Community {
    #[must_use]
    pub fn new(id: CommunityId, members: Vec<AgentId>) -> Self {
        Community {
            id,
            members,
            w_c: 1.0,
            local: Pressure::default(),
            global: Pressure::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridCell {
    pub houses: Vec<HouseId>,
    pub population: usize,
    pub num_infected: usize,
    pub num_active_hospitalisations: usize,
    pub locked: bool,
    /// 1 for open cells, the locked-neighbourhood leakage for locked ones.
    pub access_factor: f64,
    pub outgoing: f64,
    pub pressure: Pressure,
}

impl Default for GridCell {
    fn default() -> Self {
        GridCell {
            houses: Vec::new(),
            population: 0,
            num_infected: 0,
            num_active_hospitalisations: 0,
            locked: false,
            access_factor: 1.0,
            outgoing: 0.0,
            pressure: Pressure::default(),
        }
    }
}

/// A row-major matrix of cells.
#[derive(Debug, Clone, Default)]
pub struct Grid<T> {
    width: usize,
    height: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// # Errors
    /// - If `cells` does not hold exactly `width * height` entries.
    pub fn new(width: usize, height: usize, cells: Vec<T>) -> Result<Self, EpiError> {
        if cells.len() != width * height {
            return Err(EpiError::EpiError(format!(
                "A {width}x{height} grid needs {} cells, got {}.",
                width * height,
                cells.len()
            )));
        }
        Ok(Grid {
            width,
            height,
            cells,
        })
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(GridPosition) -> T) -> Self {
        let cells = (0..width * height)
            .map(|i| f(GridPosition::new(i % width, i / width)))
            .collect();
        Grid {
            width,
            height,
            cells,
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn contains(&self, pos: GridPosition) -> bool {
        pos.x < self.width && pos.y < self.height
    }

    #[must_use]
    pub fn get(&self, pos: GridPosition) -> Option<&T> {
        if self.contains(pos) {
            self.cells.get(self.index_of(pos))
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, pos: GridPosition) -> Option<&mut T> {
        if self.contains(pos) {
            let index = self.index_of(pos);
            self.cells.get_mut(index)
        } else {
            None
        }
    }

    #[must_use]
    pub fn position_of(&self, index: usize) -> GridPosition {
        GridPosition::new(index % self.width, index / self.width)
    }

    #[must_use]
    pub fn index_of(&self, pos: GridPosition) -> usize {
        pos.y * self.width + pos.x
    }

    #[must_use]
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [T] {
        &mut self.cells
    }

    /// The 3x3 block centred on `pos`, clipped at the grid edges, `pos` included.
    pub fn neighbourhood(&self, pos: GridPosition) -> impl Iterator<Item = GridPosition> + '_ {
        let xs = pos.x.saturating_sub(1)..=(pos.x + 1).min(self.width.saturating_sub(1));
        let ys = pos.y.saturating_sub(1)..=(pos.y + 1).min(self.height.saturating_sub(1));
        ys.flat_map(move |y| xs.clone().map(move |x| GridPosition::new(x, y)))
            .filter(move |p| self.contains(*p))
    }
}

/// Every contact-network container of the population.
#[derive(Debug, Clone, Default)]
pub struct Places {
    pub houses: Vec<House>,
    pub workplaces: Vec<Workplace>,
    pub communities: Vec<Community>,
    pub nbr_cells: Grid<GridCell>,
    pub cohorts: CohortMap,
    /// Fraction of commuting distance covered by infectious travellers.
    pub travel: Pressure,
}

#[derive(Debug, Clone, Default)]
pub struct World {
    pub agents: Vec<Agent>,
    pub places: Places,
}

impl World {
    /// Checks that agents and containers refer to each other consistently.
    /// # Errors
    /// - If an agent id does not match its index.
    /// - If a membership reference points outside its collection.
    /// - If a container lists an agent that does not belong to it.
    /// - If an agent attribute is negative or not finite.
    pub fn validate(&self, params: &Params) -> Result<(), EpiError> {
        let places = &self.places;
        for (index, agent) in self.agents.iter().enumerate() {
            if agent.id != index {
                return Err(EpiError::EpiError(format!(
                    "Agent at index {index} has id {}.",
                    agent.id
                )));
            }
            validate_agent(agent, places, params)?;
        }
        for (index, house) in places.houses.iter().enumerate() {
            validate_members(&self.agents, &house.members, "house", house.id, |a| {
                a.home == house.id
            })?;
            if house.random_neighbours.iter().any(|&h| h >= places.houses.len()) {
                return Err(EpiError::EpiError(format!(
                    "House {} has a random-community neighbour that does not exist.",
                    house.id
                )));
            }
            let Some(cell) = places.nbr_cells.get(house.grid_cell) else {
                return Err(EpiError::EpiError(format!(
                    "House {} lies outside the neighbourhood grid.",
                    house.id
                )));
            };
            if !cell.houses.contains(&index) {
                return Err(EpiError::EpiError(format!(
                    "House {} is missing from the house list of its grid cell {:?}.",
                    house.id, house.grid_cell
                )));
            }
        }
        for workplace in &places.workplaces {
            validate_members(
                &self.agents,
                &workplace.members,
                "workplace",
                workplace.id,
                |a| a.workplace == Some(workplace.id),
            )?;
            for (p, project) in workplace.projects.iter().enumerate() {
                validate_members(&self.agents, &project.members, "project", p, |a| {
                    a.workplace == Some(workplace.id) && a.project == Some(p)
                })?;
            }
        }
        for community in &places.communities {
            validate_members(
                &self.agents,
                &community.members,
                "community",
                community.id,
                |a| a.community == community.id,
            )?;
        }
        for (c, cell) in places.nbr_cells.cells().iter().enumerate() {
            let pos = places.nbr_cells.position_of(c);
            for &h in &cell.houses {
                match places.houses.get(h) {
                    None => {
                        return Err(EpiError::EpiError(
                            "A neighbourhood cell lists a house that does not exist.".to_string(),
                        ))
                    }
                    Some(house) if house.grid_cell != pos => {
                        return Err(EpiError::EpiError(format!(
                            "Grid cell {pos:?} lists house {h}, which lies in {:?}.",
                            house.grid_cell
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        for (&group, cohorts) in &places.cohorts {
            for (index, cohort) in cohorts.iter().enumerate() {
                let id = CohortId { group, index };
                if cohort.members.iter().any(|&m| {
                    self.agents.get(m).and_then(|a| a.cohort) != Some(id)
                }) {
                    return Err(EpiError::EpiError(format!(
                        "Cohort {id:?} lists an agent that is not assigned to it."
                    )));
                }
            }
        }
        Ok(())
    }
}

fn validate_agent(agent: &Agent, places: &Places, params: &Params) -> Result<(), EpiError> {
    let id = agent.id;
    let Some(home) = places.houses.get(agent.home) else {
        return Err(EpiError::EpiError(format!("Agent {id} has no valid home.")));
    };
    if agent.community >= places.communities.len() {
        return Err(EpiError::EpiError(format!(
            "Agent {id} has no valid community."
        )));
    }
    if let Some(w) = agent.workplace {
        let Some(workplace) = places.workplaces.get(w) else {
            return Err(EpiError::EpiError(format!(
                "Agent {id} has no valid workplace."
            )));
        };
        if agent.project.is_some_and(|p| p >= workplace.projects.len()) {
            return Err(EpiError::EpiError(format!(
                "Agent {id} has no valid project."
            )));
        }
    } else if agent.project.is_some() {
        return Err(EpiError::EpiError(format!(
            "Agent {id} has a project but no workplace."
        )));
    }
    if !places.nbr_cells.contains(agent.grid_cell) {
        return Err(EpiError::EpiError(format!(
            "Agent {id} lies outside the neighbourhood grid."
        )));
    }
    if home.grid_cell != agent.grid_cell {
        return Err(EpiError::EpiError(format!(
            "Agent {id} is placed in grid cell {:?} but its home is in {:?}.",
            agent.grid_cell, home.grid_cell
        )));
    }
    if let Some(cohort) = agent.cohort {
        if crate::cohorts::cohort(&places.cohorts, cohort).is_none() {
            return Err(EpiError::EpiError(format!(
                "Agent {id} is assigned to a cohort that does not exist."
            )));
        }
    }
    if params.mixing == MixingModel::AgeDependent && agent.age_group >= params.num_age_groups {
        return Err(EpiError::EpiError(format!(
            "Agent {id} has age group {} but only {} age groups are modelled.",
            agent.age_group, params.num_age_groups
        )));
    }
    for (name, value) in [
        ("susceptibility", agent.susceptibility),
        ("infectiousness", agent.infectiousness),
        ("community distance factor", agent.community_distance_factor),
        ("commute distance", agent.commute_distance),
    ] {
        if !(value >= 0.0 && value.is_finite()) {
            return Err(EpiError::EpiError(format!(
                "Agent {id} has an invalid {name}: {value}."
            )));
        }
    }
    Ok(())
}

fn validate_members(
    agents: &[Agent],
    members: &[AgentId],
    kind: &str,
    container: usize,
    belongs: impl Fn(&Agent) -> bool,
) -> Result<(), EpiError> {
    for &member in members {
        match agents.get(member) {
            Some(agent) if belongs(agent) => {}
            _ => {
                return Err(EpiError::EpiError(format!(
                    "The {kind} {container} lists agent {member}, who does not belong to it."
                )));
            }
        }
    }
    Ok(())
}
