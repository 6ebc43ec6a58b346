use log::{trace, warn};
use serde::{Deserialize, Serialize};

use crate::population::Agent;
use crate::Timestep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InfectionStatus {
    #[default]
    Susceptible,
    Exposed,
    /// Infectious without symptoms.
    Infective,
    Symptomatic,
    Hospitalised,
    Critical,
    Recovered,
    Dead,
}

impl InfectionStatus {
    /// Position along the progression order. Transitions never decrease it.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            InfectionStatus::Susceptible => 0,
            InfectionStatus::Exposed => 1,
            InfectionStatus::Infective => 2,
            InfectionStatus::Symptomatic => 3,
            InfectionStatus::Hospitalised => 4,
            InfectionStatus::Critical => 5,
            InfectionStatus::Recovered => 6,
            InfectionStatus::Dead => 7,
        }
    }

    #[must_use]
    pub fn can_progress_to(self, next: InfectionStatus) -> bool {
        use InfectionStatus::{
            Critical, Dead, Exposed, Hospitalised, Infective, Recovered, Susceptible, Symptomatic,
        };
        matches!(
            (self, next),
            (Susceptible, Exposed)
                | (Exposed, Infective)
                | (Infective, Symptomatic | Recovered)
                | (Symptomatic, Hospitalised | Critical | Recovered | Dead)
                | (Hospitalised, Critical | Recovered)
                | (Critical, Recovered | Dead)
        )
    }

    #[must_use]
    pub fn is_infectious(self) -> bool {
        matches!(self, InfectionStatus::Infective | InfectionStatus::Symptomatic)
    }

    /// Exposed through critical.
    #[must_use]
    pub fn is_infected(self) -> bool {
        matches!(
            self,
            InfectionStatus::Exposed
                | InfectionStatus::Infective
                | InfectionStatus::Symptomatic
                | InfectionStatus::Hospitalised
                | InfectionStatus::Critical
        )
    }

    #[must_use]
    pub fn is_hospital_case(self) -> bool {
        matches!(self, InfectionStatus::Hospitalised | InfectionStatus::Critical)
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, InfectionStatus::Recovered | InfectionStatus::Dead)
    }
}

/// Durations (in steps) and branch outcomes drawn for an agent when it is
/// exposed. The state machine only compares elapsed time against them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiseaseCourse {
    pub incubation_period: Timestep,
    pub asymptomatic_period: Timestep,
    pub symptomatic_period: Timestep,
    pub hospital_regular_period: Timestep,
    pub hospital_critical_period: Timestep,
    pub develops_symptoms: bool,
    pub after_symptomatic: InfectionStatus,
    pub after_hospitalised: InfectionStatus,
    pub after_critical: InfectionStatus,
}

impl Default for DiseaseCourse {
    fn default() -> Self {
        DiseaseCourse {
            incubation_period: 0,
            asymptomatic_period: 0,
            symptomatic_period: 0,
            hospital_regular_period: 0,
            hospital_critical_period: 0,
            develops_symptoms: false,
            after_symptomatic: InfectionStatus::Recovered,
            after_hospitalised: InfectionStatus::Recovered,
            after_critical: InfectionStatus::Recovered,
        }
    }
}

impl DiseaseCourse {
    /// How long an agent stays in `status`, or `None` for states that are
    /// never left through elapsed time.
    #[must_use]
    pub fn duration_in(&self, status: InfectionStatus) -> Option<Timestep> {
        match status {
            InfectionStatus::Exposed => Some(self.incubation_period),
            InfectionStatus::Infective => Some(self.asymptomatic_period),
            InfectionStatus::Symptomatic => Some(self.symptomatic_period),
            InfectionStatus::Hospitalised => Some(self.hospital_regular_period),
            InfectionStatus::Critical => Some(self.hospital_critical_period),
            InfectionStatus::Susceptible | InfectionStatus::Recovered | InfectionStatus::Dead => {
                None
            }
        }
    }

    #[must_use]
    pub fn successor_of(&self, status: InfectionStatus) -> Option<InfectionStatus> {
        match status {
            InfectionStatus::Exposed => Some(InfectionStatus::Infective),
            InfectionStatus::Infective if self.develops_symptoms => {
                Some(InfectionStatus::Symptomatic)
            }
            InfectionStatus::Infective => Some(InfectionStatus::Recovered),
            InfectionStatus::Symptomatic => Some(self.after_symptomatic),
            InfectionStatus::Hospitalised => Some(self.after_hospitalised),
            InfectionStatus::Critical => Some(self.after_critical),
            InfectionStatus::Susceptible | InfectionStatus::Recovered | InfectionStatus::Dead => {
                None
            }
        }
    }
}

/// Transition events of one agent during one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeUpdateStatus {
    pub new_infection: bool,
    pub new_symptomatic: bool,
    pub new_hospitalization: bool,
    pub new_infective: bool,
}

impl Agent {
    /// Marks a susceptible agent as infected this step and attaches its
    /// pre-sampled course. Returns `false` if the agent was not susceptible.
    pub fn flag_exposure(&mut self, course: DiseaseCourse) -> bool {
        if self.infection_status != InfectionStatus::Susceptible || self.exposure_flagged {
            return false;
        }
        self.exposure_flagged = true;
        self.course = Some(course);
        true
    }
}

/// Per-step probability of infection under a daily hazard `lambda`.
#[must_use]
pub fn infection_probability(lambda: f64, steps_per_day: Timestep) -> f64 {
    if !(lambda > 0.0 && lambda.is_finite()) || steps_per_day == 0 {
        return 0.0;
    }
    1.0 - (-lambda / f64::from(steps_per_day)).exp()
}

/// Advance `agent` by at most one transition.
pub fn update_infection(agent: &mut Agent, cur_time: Timestep) -> NodeUpdateStatus {
    let mut status = NodeUpdateStatus::default();

    if agent.infection_status == InfectionStatus::Susceptible {
        if agent.exposure_flagged {
            agent.exposure_flagged = false;
            if agent.course.is_none() {
                warn!("Agent {} was exposed without a disease course", agent.id);
            }
            agent.infection_status = InfectionStatus::Exposed;
            agent.state_entered_at = cur_time;
            agent.transition_observed_at = Some(cur_time);
            agent.time_of_infection = Some(cur_time);
            trace!("Agent {} exposed at step {cur_time}", agent.id);
            status.new_infection = true;
        }
        return status;
    }

    let Some(course) = agent.course else {
        return status;
    };
    let Some(duration) = course.duration_in(agent.infection_status) else {
        return status;
    };
    let due = agent.state_entered_at.saturating_add(duration);
    if cur_time < due {
        return status;
    }
    let Some(next) = course.successor_of(agent.infection_status) else {
        return status;
    };
    if !agent.infection_status.can_progress_to(next) {
        warn!(
            "Agent {} has an invalid scheduled transition {:?} -> {:?}; staying put",
            agent.id, agent.infection_status, next
        );
        return status;
    }

    trace!(
        "Agent {}: {:?} -> {:?} at step {cur_time}",
        agent.id,
        agent.infection_status,
        next
    );
    if next == InfectionStatus::Recovered {
        agent.state_before_recovery = Some(agent.infection_status);
    }
    agent.infection_status = next;
    agent.state_entered_at = due;
    agent.transition_observed_at = Some(cur_time);
    match next {
        InfectionStatus::Infective => status.new_infective = true,
        InfectionStatus::Symptomatic => {
            agent.symptom_onset = Some(due);
            status.new_symptomatic = true;
        }
        InfectionStatus::Hospitalised => status.new_hospitalization = true,
        _ => {}
    }
    status
}
