use std::{fs::File, io::BufReader, path::Path};

use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::disease_progression::InfectionStatus;
use crate::error::EpiError;
use crate::parameters::Params;
use crate::population::{Agent, Grid, GridCell, House, IsolationStatus, Kappa};
use crate::testing::TestState;
use crate::Timestep;

/// Multipliers applied to an agent's home, work and community kappa.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KappaEffect {
    pub home: f64,
    pub work: f64,
    pub community: f64,
}

impl KappaEffect {
    #[must_use]
    pub fn as_kappa(self) -> Kappa {
        Kappa {
            home: self.home,
            work: self.work,
            community: self.community,
        }
    }

    fn validate(&self, lever: &str) -> Result<(), EpiError> {
        if [self.home, self.work, self.community]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
        {
            Ok(())
        } else {
            Err(EpiError::EpiError(format!(
                "The {lever} effects must be between 0 and 1, inclusive."
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaseIsolation {
    pub effect: KappaEffect,
    /// Days between symptom onset and the case being recognised.
    pub recognition_delay_days: u32,
    /// Whether a positive test isolates the agent regardless of symptoms.
    pub isolate_positive: bool,
}

impl Default for CaseIsolation {
    fn default() -> Self {
        CaseIsolation {
            effect: KappaEffect {
                home: 0.75,
                work: 0.0,
                community: 0.1,
            },
            recognition_delay_days: 1,
            isolate_positive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeQuarantine {
    pub effect: KappaEffect,
}

impl Default for HomeQuarantine {
    fn default() -> Self {
        HomeQuarantine {
            effect: KappaEffect {
                home: 1.0,
                work: 0.25,
                community: 0.25,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lockdown {
    pub effect: KappaEffect,
    /// Essential workers keep working and travelling.
    pub exempt_essential: bool,
}

impl Default for Lockdown {
    fn default() -> Self {
        Lockdown {
            effect: KappaEffect {
                home: 1.0,
                work: 0.25,
                community: 0.25,
            },
            exempt_essential: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactTracing {
    pub effect: KappaEffect,
    pub quarantine_days: u32,
}

impl Default for ContactTracing {
    fn default() -> Self {
        ContactTracing {
            effect: KappaEffect {
                home: 1.0,
                work: 0.25,
                community: 0.25,
            },
            quarantine_days: 14,
        }
    }
}

/// The policy levers in force during one phase. Absent levers are off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionParams {
    pub num_days: u32,
    pub case_isolation: Option<CaseIsolation>,
    pub home_quarantine: Option<HomeQuarantine>,
    pub lockdown: Option<Lockdown>,
    pub contact_tracing: Option<ContactTracing>,
    /// Restrict work and community contact in locked grid cells.
    pub neighbourhood_containment: bool,
}

impl InterventionParams {
    /// # Errors
    /// - If any lever effect lies outside [0, 1].
    pub fn validate(&self) -> Result<(), EpiError> {
        if let Some(ci) = &self.case_isolation {
            ci.effect.validate("case isolation")?;
        }
        if let Some(hq) = &self.home_quarantine {
            hq.effect.validate("home quarantine")?;
        }
        if let Some(ld) = &self.lockdown {
            ld.effect.validate("lockdown")?;
        }
        if let Some(ct) = &self.contact_tracing {
            ct.effect.validate("contact tracing")?;
        }
        Ok(())
    }
}

/// Consecutive intervention phases starting after `days_before_interventions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionSchedule {
    pub days_before_interventions: u32,
    pub phases: Vec<InterventionParams>,
}

impl InterventionSchedule {
    /// The phase in force at `cur_time`. The last phase stays in force once
    /// every window has elapsed.
    #[must_use]
    pub fn active_at(
        &self,
        cur_time: Timestep,
        steps_per_day: Timestep,
    ) -> Option<&InterventionParams> {
        let day = cur_time / steps_per_day.max(1);
        let mut elapsed = day.checked_sub(self.days_before_interventions)?;
        for phase in &self.phases {
            if elapsed < phase.num_days {
                return Some(phase);
            }
            elapsed -= phase.num_days;
        }
        self.phases.last()
    }

    /// # Errors
    /// - If a phase has an empty window.
    /// - If a phase fails `InterventionParams::validate`.
    pub fn validate(&self) -> Result<(), EpiError> {
        for (i, phase) in self.phases.iter().enumerate() {
            if phase.num_days == 0 {
                return Err(EpiError::EpiError(format!(
                    "Intervention phase {i} must last at least one day."
                )));
            }
            phase.validate()?;
        }
        Ok(())
    }

    /// # Errors
    /// - If the file cannot be read or parsed.
    /// - If the schedule fails `validate`.
    pub fn from_json_file(path: &Path) -> Result<Self, EpiError> {
        let reader = BufReader::new(File::open(path)?);
        let schedule: InterventionSchedule = serde_json::from_reader(reader)?;
        schedule.validate()?;
        info!(
            "Loaded {} intervention phases from {}",
            schedule.phases.len(),
            path.display()
        );
        Ok(schedule)
    }
}

fn is_recognised_case(
    agent: &Agent,
    case_isolation: &CaseIsolation,
    params: &Params,
    cur_time: Timestep,
) -> bool {
    if agent.infection_status.is_terminal() {
        return false;
    }
    let delay = case_isolation
        .recognition_delay_days
        .saturating_mul(params.steps_per_day);
    let symptomatic = agent.infection_status == InfectionStatus::Symptomatic
        && agent
            .symptom_onset
            .is_some_and(|onset| cur_time >= onset.saturating_add(delay));
    let positive =
        case_isolation.isolate_positive && agent.test_status.state == TestState::Positive;
    symptomatic || positive
}

/// Recomputes every agent's kappa and travel permission from the phase in
/// force. Only compliant agents follow isolation, quarantine and lockdown;
/// containment of locked cells applies to everyone.
pub fn update_all_kappa(
    agents: &mut [Agent],
    houses: &[House],
    nbr_cells: &Grid<GridCell>,
    interventions: Option<&InterventionParams>,
    params: &Params,
    cur_time: Timestep,
) {
    let isolated: Vec<bool> = match interventions.and_then(|iv| iv.case_isolation.as_ref()) {
        Some(ci) => agents
            .par_iter()
            .map(|a| a.compliant && is_recognised_case(a, ci, params, cur_time))
            .collect(),
        None => vec![false; agents.len()],
    };
    let house_has_case: Vec<bool> = houses
        .par_iter()
        .map(|h| h.members.iter().any(|&m| isolated.get(m).copied().unwrap_or(false)))
        .collect();

    let leakage = params.grid.locked_neighborhood_leakage;
    agents.par_iter_mut().enumerate().for_each(|(i, agent)| {
        let mut kappa = Kappa::default();
        agent.isolation = IsolationStatus::None;
        agent.travel_allowed = true;

        if let Some(iv) = interventions {
            if agent.compliant {
                if let Some(ci) = iv.case_isolation.as_ref().filter(|_| isolated[i]) {
                    kappa = kappa.scaled_by(ci.effect.as_kappa());
                    agent.isolation = IsolationStatus::Isolated;
                } else if let Some(hq) = iv
                    .home_quarantine
                    .as_ref()
                    .filter(|_| house_has_case.get(agent.home).copied().unwrap_or(false))
                {
                    kappa = kappa.scaled_by(hq.effect.as_kappa());
                    agent.isolation = IsolationStatus::Quarantined;
                } else if let Some(ct) = iv.contact_tracing.as_ref().filter(|ct| {
                    let window = ct.quarantine_days.saturating_mul(params.steps_per_day);
                    agent
                        .traced
                        .is_some_and(|signal| cur_time < signal.at.saturating_add(window))
                }) {
                    kappa = kappa.scaled_by(ct.effect.as_kappa());
                    agent.isolation = IsolationStatus::Quarantined;
                }

                if let Some(ld) = &iv.lockdown {
                    if ld.exempt_essential && agent.essential_worker {
                        kappa = kappa.scaled_by(Kappa {
                            work: 1.0,
                            ..ld.effect.as_kappa()
                        });
                    } else {
                        kappa = kappa.scaled_by(ld.effect.as_kappa());
                        agent.travel_allowed = false;
                    }
                }
                if agent.isolation != IsolationStatus::None {
                    agent.travel_allowed = false;
                }
            }

            let cell_locked = nbr_cells.get(agent.grid_cell).is_some_and(|c| c.locked);
            if iv.neighbourhood_containment && cell_locked {
                kappa.work *= leakage;
                kappa.community *= leakage;
            }
        }

        if matches!(
            agent.infection_status,
            InfectionStatus::Hospitalised | InfectionStatus::Critical | InfectionStatus::Dead
        ) {
            agent.travel_allowed = false;
        }
        agent.kappa = kappa.clamped();
    });
}
