use std::collections::HashSet;
use std::{fs::File, io::BufReader, path::Path};

use indexmap::IndexMap;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::Params;
use crate::population::{Agent, AgentId, Places};
use crate::Timestep;

/// A cohort is addressed by its grouping key and its position in that group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortId {
    pub group: u32,
    pub index: usize,
}

/// Commuters that travel together.
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    pub members: Vec<AgentId>,
    /// Summed outgoing weight of the members travelling this step.
    pub edge_weight: f64,
    pub travelling: usize,
    pub lambda_intra: f64,
    pub lambda_inter: f64,
    pub computed_at: Option<Timestep>,
}

impl Cohort {
    #[must_use]
    pub fn new(members: Vec<AgentId>) -> Self {
        Cohort {
            members,
            ..Cohort::default()
        }
    }
}

pub type CohortMap = IndexMap<u32, Vec<Cohort>>;

#[must_use]
pub fn cohort(cohorts: &CohortMap, id: CohortId) -> Option<&Cohort> {
    cohorts.get(&id.group).and_then(|group| group.get(id.index))
}

fn cohort_mut(cohorts: &mut CohortMap, id: CohortId) -> Option<&mut Cohort> {
    cohorts
        .get_mut(&id.group)
        .and_then(|group| group.get_mut(id.index))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Session {
    Am,
    Pm,
}

impl Session {
    /// The commute session running at `cur_time`, if any.
    #[must_use]
    pub fn at(cur_time: Timestep, params: &Params) -> Option<Session> {
        let step_of_day = cur_time % params.steps_per_day.max(1);
        if step_of_day == params.commute.am_step {
            Some(Session::Am)
        } else if step_of_day == params.commute.pm_step {
            Some(Session::Pm)
        } else {
            None
        }
    }
}

/// A cohort's stay on a coach, in minutes since the start of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachOccupant {
    pub cohort: CohortId,
    pub board: u32,
    pub alight: u32,
}

impl CoachOccupant {
    fn overlap(&self, other: &CoachOccupant) -> u32 {
        self.alight
            .min(other.alight)
            .saturating_sub(self.board.max(other.board))
    }

    fn duration(&self) -> u32 {
        self.alight.saturating_sub(self.board)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coach {
    pub occupants: Vec<CoachOccupant>,
}

/// Coach occupancy of each train, for the morning and evening sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitSchedule {
    pub am: IndexMap<u32, Vec<Coach>>,
    pub pm: IndexMap<u32, Vec<Coach>>,
}

impl TransitSchedule {
    #[must_use]
    pub fn session(&self, session: Session) -> &IndexMap<u32, Vec<Coach>> {
        match session {
            Session::Am => &self.am,
            Session::Pm => &self.pm,
        }
    }

    /// # Errors
    /// - If a coach refers to a cohort that does not exist.
    /// - If a cohort alights before it boards.
    /// - If a cohort rides more than one coach in a session.
    pub fn validate(&self, cohorts: &CohortMap) -> Result<(), EpiError> {
        for (name, trains) in [("AM", &self.am), ("PM", &self.pm)] {
            let mut seen = HashSet::new();
            for (train, coaches) in trains {
                for occupant in coaches.iter().flat_map(|c| &c.occupants) {
                    let id = occupant.cohort;
                    if cohort(cohorts, id).is_none() {
                        return Err(EpiError::EpiError(format!(
                            "Train {train} in the {name} session carries unknown cohort {id:?}."
                        )));
                    }
                    if occupant.board >= occupant.alight {
                        return Err(EpiError::EpiError(format!(
                            "Cohort {id:?} on train {train} must board before it alights."
                        )));
                    }
                    if !seen.insert(id) {
                        return Err(EpiError::EpiError(format!(
                            "Cohort {id:?} rides more than one coach in the {name} session."
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// # Errors
    /// - If the file cannot be read or parsed.
    /// - If the schedule fails `validate`.
    pub fn from_json_file(path: &Path, cohorts: &CohortMap) -> Result<Self, EpiError> {
        let reader = BufReader::new(File::open(path)?);
        let schedule: TransitSchedule = serde_json::from_reader(reader)?;
        schedule.validate(cohorts)?;
        info!(
            "Loaded {} AM and {} PM trains from {}",
            schedule.am.len(),
            schedule.pm.len(),
            path.display()
        );
        Ok(schedule)
    }
}

/// Outgoing weight and head count of the travelling members of each cohort.
pub fn update_cohort_edge_weights(cohorts: &mut CohortMap, agents: &[Agent], params: &Params) {
    cohorts
        .par_values_mut()
        .flat_map(|group| group.par_iter_mut())
        .for_each(|cohort| {
            let (weight, travelling) = cohort
                .members
                .iter()
                .filter_map(|&id| agents.get(id))
                .filter(|a| a.travels())
                .fold((0.0, 0), |(weight, count), a| {
                    (
                        weight + a.infectious_weight(&params.infectiousness) * a.kappa.community,
                        count + 1,
                    )
                });
            cohort.edge_weight = weight;
            cohort.travelling = travelling;
        });
}

pub fn update_lambda_intra_cohort(cohorts: &mut CohortMap, params: &Params, cur_time: Timestep) {
    let normalization = params.transmission.cohort_intra.normalization;
    cohorts
        .par_values_mut()
        .flat_map(|group| group.par_iter_mut())
        .for_each(|cohort| {
            cohort.lambda_intra = cohort.edge_weight * normalization.scale(cohort.travelling);
            cohort.computed_at = Some(cur_time);
        });
}

/// Mixing between cohorts that share a coach during `session`. Each
/// occupant's exposure to another is weighted by the fraction of its own
/// ride they overlap. Cohorts with no coach in the session get zero.
pub fn update_lambda_inter_cohort(
    cohorts: &mut CohortMap,
    transit: &TransitSchedule,
    session: Session,
    params: &Params,
    cur_time: Timestep,
) {
    let normalization = params.transmission.cohort_inter.normalization;
    let shared: &CohortMap = cohorts;
    let contributions: Vec<(CohortId, f64)> = transit
        .session(session)
        .par_values()
        .flat_map(|coaches| coaches.par_iter())
        .flat_map_iter(|coach| {
            let present: Vec<(&CoachOccupant, &Cohort)> = coach
                .occupants
                .iter()
                .filter_map(|o| match cohort(shared, o.cohort) {
                    Some(c) => Some((o, c)),
                    None => {
                        warn!("Transit schedule references missing cohort {:?}", o.cohort);
                        None
                    }
                })
                .collect();
            let head_count = present.iter().map(|(_, c)| c.travelling).sum();
            let scale = normalization.scale(head_count);
            present
                .iter()
                .map(|(me, _)| {
                    let duration = f64::from(me.duration().max(1));
                    let exposure: f64 = present
                        .iter()
                        .filter(|(other, _)| other.cohort != me.cohort)
                        .map(|(other, c)| f64::from(me.overlap(other)) / duration * c.edge_weight)
                        .sum();
                    (me.cohort, exposure * scale)
                })
                .collect::<Vec<_>>()
        })
        .collect();

    cohorts
        .values_mut()
        .flat_map(|group| group.iter_mut())
        .for_each(|cohort| {
            cohort.lambda_inter = 0.0;
            cohort.computed_at = Some(cur_time);
        });
    for (id, lambda) in contributions {
        if let Some(cohort) = cohort_mut(cohorts, id) {
            cohort.lambda_inter += lambda;
        }
    }
}

/// Hazard of a travelling cohort member during a commute session.
#[must_use]
pub fn individual_lambda_cohort(
    agent: &Agent,
    cohort: &Cohort,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    if !agent.travels() || Session::at(cur_time, params).is_none() {
        return 0.0;
    }
    if cohort.computed_at != Some(cur_time) {
        warn!(
            "Cohort pressure for agent {} was computed at {:?}, not step {cur_time}",
            agent.id, cohort.computed_at
        );
        return 0.0;
    }
    let t = &params.transmission;
    agent.susceptibility
        * (t.cohort_intra.beta * cohort.lambda_intra + t.cohort_inter.beta * cohort.lambda_inter)
}

/// Refreshes only the cohort share of every agent's hazard.
pub fn update_individual_lambda_cohort(
    agents: &mut [Agent],
    cohorts: &CohortMap,
    params: &Params,
    cur_time: Timestep,
) {
    agents.par_iter_mut().for_each(|agent| {
        let lambda = agent
            .cohort
            .and_then(|id| cohort(cohorts, id))
            .map_or(0.0, |c| individual_lambda_cohort(agent, c, params, cur_time));
        agent.lambda_incoming.cohort = lambda;
        agent.lambda = agent.lambda_incoming.total();
    });
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CohortLayer;

impl TransmissionLayer for CohortLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Cohort
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        let cohorts = &mut places.cohorts;
        update_cohort_edge_weights(cohorts, agents, env.params);
        update_lambda_intra_cohort(cohorts, env.params, env.cur_time);
        match Session::at(env.cur_time, env.params) {
            Some(session) => {
                update_lambda_inter_cohort(
                    cohorts,
                    env.transit,
                    session,
                    env.params,
                    env.cur_time,
                );
            }
            None => cohorts
                .values_mut()
                .flat_map(|group| group.iter_mut())
                .for_each(|cohort| cohort.lambda_inter = 0.0),
        }
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        agent
            .cohort
            .and_then(|id| cohort(&places.cohorts, id))
            .map_or(0.0, |c| individual_lambda_cohort(agent, c, env.params, env.cur_time))
    }
}
