use std::{fs::File, io::BufReader, path::Path};

use log::{info, trace, warn};
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::disease_progression::InfectionStatus;
use crate::error::EpiError;
use crate::parameters::Params;
use crate::population::{Agent, AgentId, House, Workplace};
use crate::Timestep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestState {
    #[default]
    Untested,
    /// The outcome is drawn when the test is requested and revealed at
    /// `result_at`.
    Pending {
        result: bool,
    },
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TestStatus {
    pub state: TestState,
    pub requested_at: Option<Timestep>,
    pub result_at: Option<Timestep>,
    /// Set by a positive result until the agent's contacts are traced.
    pub needs_tracing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactSetting {
    Household,
    /// The agent's project team, or the whole workplace without one.
    Workplace,
    /// Households mixed with through the random community.
    Neighbourhood,
}

/// Records that an agent was identified as a contact of a positive case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSignal {
    pub at: Timestep,
    pub setting: ContactSetting,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TestTrigger {
    Hospitalised,
    Symptomatic,
    TracedContact {
        /// `None` matches any setting.
        setting: Option<ContactSetting>,
        /// `None` matches contacts with or without symptoms.
        symptomatic: Option<bool>,
    },
}

impl TestTrigger {
    /// Triggers only fire on the step their signal first appears. State
    /// triggers key off the step the transition was observed, not the
    /// scheduled entry time, which lags behind after zero-length periods.
    fn fires(&self, agent: &Agent, cur_time: Timestep) -> bool {
        let entered_now = agent.transition_observed_at == Some(cur_time);
        match self {
            TestTrigger::Hospitalised => agent.infection_status.is_hospital_case() && entered_now,
            TestTrigger::Symptomatic => {
                agent.infection_status == InfectionStatus::Symptomatic && entered_now
            }
            TestTrigger::TracedContact {
                setting,
                symptomatic,
            } => agent.traced.is_some_and(|signal| {
                signal.at == cur_time
                    && setting.map_or(true, |s| s == signal.setting)
                    && symptomatic.map_or(true, |s| {
                        (agent.infection_status == InfectionStatus::Symptomatic) == s
                    })
            }),
        }
    }
}

/// Steps between a test request and its result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Turnaround {
    Fixed { steps: Timestep },
    Uniform { min: Timestep, max: Timestep },
    Gamma { shape: f64, scale: f64 },
}

impl Turnaround {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Timestep {
        match *self {
            Turnaround::Fixed { steps } => steps,
            Turnaround::Uniform { min, max } => rng.random_range(min..=max),
            Turnaround::Gamma { shape, scale } => match Gamma::new(shape, scale) {
                Ok(gamma) => gamma.sample(rng).round().max(0.0) as Timestep,
                Err(e) => {
                    warn!("Invalid turnaround distribution: {e}; returning results immediately");
                    0
                }
            },
        }
    }

    fn validate(&self) -> Result<(), EpiError> {
        match *self {
            Turnaround::Fixed { .. } => Ok(()),
            Turnaround::Uniform { min, max } if min <= max => Ok(()),
            Turnaround::Uniform { .. } => Err(EpiError::EpiError(
                "A uniform turnaround needs min <= max.".to_string(),
            )),
            Turnaround::Gamma { shape, scale } if shape > 0.0 && scale > 0.0 => Ok(()),
            Turnaround::Gamma { .. } => Err(EpiError::EpiError(
                "A gamma turnaround needs a positive shape and scale.".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestingRule {
    pub trigger: TestTrigger,
    pub probability: f64,
    pub turnaround: Turnaround,
}

/// Which contacts of a positive case are traced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingParams {
    pub household: bool,
    pub workplace: bool,
    pub neighbourhood: bool,
}

impl Default for TracingParams {
    fn default() -> Self {
        TracingParams {
            household: true,
            workplace: false,
            neighbourhood: false,
        }
    }
}

/// An ordered rule table. The first rule whose trigger fires decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingProtocol {
    pub start_day: u32,
    pub rules: Vec<TestingRule>,
    /// Days after a negative result before the agent can be retested.
    pub retest_delay_days: u32,
    pub sensitivity: f64,
    pub specificity: f64,
    pub tracing: TracingParams,
}

impl Default for TestingProtocol {
    fn default() -> Self {
        TestingProtocol {
            start_day: 0,
            rules: vec![
                TestingRule {
                    trigger: TestTrigger::Hospitalised,
                    probability: 1.0,
                    turnaround: Turnaround::Fixed { steps: 4 },
                },
                TestingRule {
                    trigger: TestTrigger::Symptomatic,
                    probability: 0.5,
                    turnaround: Turnaround::Fixed { steps: 8 },
                },
            ],
            retest_delay_days: 7,
            sensitivity: 0.9,
            specificity: 0.99,
            tracing: TracingParams::default(),
        }
    }
}

impl TestingProtocol {
    /// # Errors
    /// - If a probability, the sensitivity or the specificity is outside [0, 1].
    /// - If a turnaround distribution is malformed.
    pub fn validate(&self) -> Result<(), EpiError> {
        for (name, p) in [
            ("sensitivity", self.sensitivity),
            ("specificity", self.specificity),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EpiError::EpiError(format!(
                    "The test {name} must be between 0 and 1, inclusive."
                )));
            }
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if !(0.0..=1.0).contains(&rule.probability) {
                return Err(EpiError::EpiError(format!(
                    "The probability of testing rule {i} must be between 0 and 1, inclusive."
                )));
            }
            rule.turnaround.validate()?;
        }
        Ok(())
    }

    /// # Errors
    /// - If the file cannot be read or parsed.
    /// - If the protocol fails `validate`.
    pub fn from_json_file(path: &Path) -> Result<Self, EpiError> {
        let reader = BufReader::new(File::open(path)?);
        let protocol: TestingProtocol = serde_json::from_reader(reader)?;
        protocol.validate()?;
        info!(
            "Loaded {} testing rules from {}",
            protocol.rules.len(),
            path.display()
        );
        Ok(protocol)
    }
}

fn contacts_of(
    agent: &Agent,
    houses: &[House],
    workplaces: &[Workplace],
    tracing: &TracingParams,
) -> Vec<(AgentId, ContactSetting)> {
    let mut contacts = Vec::new();
    let home = houses.get(agent.home);
    if tracing.household {
        if let Some(house) = home {
            contacts.extend(house.members.iter().map(|&m| (m, ContactSetting::Household)));
        }
    }
    if tracing.workplace {
        if let Some(workplace) = agent.workplace.and_then(|w| workplaces.get(w)) {
            let team = agent
                .project
                .and_then(|p| workplace.projects.get(p))
                .map_or(&workplace.members, |project| &project.members);
            contacts.extend(team.iter().map(|&m| (m, ContactSetting::Workplace)));
        }
    }
    if tracing.neighbourhood {
        if let Some(house) = home {
            for neighbour in house.random_neighbours.iter().filter_map(|&h| houses.get(h)) {
                contacts.extend(
                    neighbour
                        .members
                        .iter()
                        .map(|&m| (m, ContactSetting::Neighbourhood)),
                );
            }
        }
    }
    contacts.retain(|&(m, _)| m != agent.id);
    contacts
}

fn is_eligible(agent: &Agent, retest_delay: Timestep, cur_time: Timestep) -> bool {
    if agent.infection_status == InfectionStatus::Dead {
        return false;
    }
    match agent.test_status.state {
        TestState::Untested => true,
        TestState::Pending { .. } | TestState::Positive => false,
        TestState::Negative => agent
            .test_status
            .result_at
            .map_or(true, |at| cur_time >= at.saturating_add(retest_delay)),
    }
}

/// Traces the contacts of newly positive agents, then requests tests for
/// every eligible agent whose first matching rule succeeds. Returns the
/// number of tests requested.
pub fn update_test_request<R: Rng + ?Sized>(
    agents: &mut [Agent],
    houses: &[House],
    workplaces: &[Workplace],
    cur_time: Timestep,
    protocol: &TestingProtocol,
    params: &Params,
    rng: &mut R,
) -> usize {
    let tracers: Vec<AgentId> = agents
        .iter()
        .filter(|a| a.test_status.needs_tracing)
        .map(|a| a.id)
        .collect();
    for tracer in tracers {
        let Some(source) = agents.get_mut(tracer) else {
            continue;
        };
        source.test_status.needs_tracing = false;
        let contacts = contacts_of(source, houses, workplaces, &protocol.tracing);
        for (contact, setting) in contacts {
            if let Some(agent) = agents.get_mut(contact) {
                if agent.infection_status != InfectionStatus::Dead {
                    trace!("Agent {contact} traced through agent {tracer} ({setting:?})");
                    agent.traced = Some(TraceSignal {
                        at: cur_time,
                        setting,
                    });
                }
            }
        }
    }

    if cur_time < protocol.start_day.saturating_mul(params.steps_per_day) {
        return 0;
    }
    let retest_delay = protocol.retest_delay_days.saturating_mul(params.steps_per_day);
    let mut requested = 0;
    for agent in agents.iter_mut() {
        if !is_eligible(agent, retest_delay, cur_time) {
            continue;
        }
        let Some(rule) = protocol.rules.iter().find(|r| r.trigger.fires(agent, cur_time)) else {
            continue;
        };
        if !rng.random_bool(rule.probability) {
            continue;
        }
        let result = if agent.infection_status.is_infected() {
            rng.random_bool(protocol.sensitivity)
        } else {
            !rng.random_bool(protocol.specificity)
        };
        let turnaround = rule.turnaround.sample(rng);
        trace!(
            "Agent {} requested a {:?} test at step {cur_time}",
            agent.id,
            rule.trigger
        );
        agent.test_status = TestStatus {
            state: TestState::Pending { result },
            requested_at: Some(cur_time),
            result_at: Some(cur_time.saturating_add(turnaround)),
            needs_tracing: false,
        };
        requested += 1;
    }
    requested
}

/// Reveals pending results that are due. Returns the number of positive and
/// negative results.
pub fn update_test_status(agents: &mut [Agent], cur_time: Timestep) -> (usize, usize) {
    agents
        .par_iter_mut()
        .map(|agent| {
            let status = &mut agent.test_status;
            let TestState::Pending { result } = status.state else {
                return (0, 0);
            };
            if status.result_at.is_some_and(|at| at > cur_time) {
                return (0, 0);
            }
            status.result_at = Some(cur_time);
            if result {
                status.state = TestState::Positive;
                status.needs_tracing = true;
                (1, 0)
            } else {
                status.state = TestState::Negative;
                (0, 1)
            }
        })
        .reduce(|| (0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
}
