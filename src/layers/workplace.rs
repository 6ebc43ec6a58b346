use rayon::prelude::*;

use super::{age_dependent, fresh_or_zero, mass_by_age, sum_weights, ContainerRef};
use crate::lambda::{LayerKind, StepEnv, TransmissionLayer};
use crate::parameters::Params;
use crate::population::{Agent, Places, Pressure, Project, Workplace};
use crate::transmission_matrices::LowRankMatrix;
use crate::Timestep;

#[must_use]
pub fn updated_lambda_w_age_independent(
    workplace: &Workplace,
    agents: &[Agent],
    params: &Params,
) -> f64 {
    sum_weights(&workplace.members, agents, params, |k| k.work)
        * params
            .transmission
            .workplace
            .normalization
            .scale(workplace.members.len())
}

#[must_use]
pub fn updated_lambda_w_age_dependent(
    workplace: &Workplace,
    agents: &[Agent],
    params: &Params,
    matrix: &LowRankMatrix,
) -> Vec<f64> {
    let scale = params
        .transmission
        .workplace
        .normalization
        .scale(workplace.members.len());
    let mass = mass_by_age(
        &workplace.members,
        agents,
        params,
        matrix.num_age_groups(),
        |k| k.work,
    );
    matrix.apply(&mass).into_iter().map(|p| p * scale).collect()
}

/// Pressure within a project team, seen on top of the workplace pressure.
#[must_use]
pub fn updated_lambda_project(project: &Project, agents: &[Agent], params: &Params) -> f64 {
    sum_weights(&project.members, agents, params, |k| k.work)
        * params
            .transmission
            .project
            .normalization
            .scale(project.members.len())
}

#[must_use]
pub fn individual_lambda_w(
    agent: &Agent,
    workplace: &Workplace,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    fresh_or_zero(
        &workplace.pressure,
        agent.age_group,
        cur_time,
        ContainerRef::Workplace(workplace.id),
    ) * agent.susceptibility
        * params.transmission.workplace.beta
}

/// Zero when `workplace` has no project at `index`.
#[must_use]
pub fn individual_lambda_project(
    agent: &Agent,
    workplace: &Workplace,
    index: usize,
    params: &Params,
    cur_time: Timestep,
) -> f64 {
    let Some(project) = workplace.projects.get(index) else {
        return 0.0;
    };
    let container = ContainerRef::Project {
        workplace: workplace.id,
        index,
    };
    fresh_or_zero(&project.pressure, agent.age_group, cur_time, container)
        * agent.susceptibility
        * params.transmission.project.beta
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkplaceLayer;

impl TransmissionLayer for WorkplaceLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Workplace
    }

    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv) {
        let matrix = age_dependent(env.params, env.matrices.workplace.as_ref());
        places.workplaces.par_iter_mut().for_each(|workplace| {
            workplace.pressure = match matrix {
                Some(m) => Pressure::age_stratified(
                    updated_lambda_w_age_dependent(workplace, agents, env.params, m),
                    env.cur_time,
                ),
                None => Pressure::scalar(
                    updated_lambda_w_age_independent(workplace, agents, env.params),
                    env.cur_time,
                ),
            };
            for project in &mut workplace.projects {
                project.pressure = Pressure::scalar(
                    updated_lambda_project(project, agents, env.params),
                    env.cur_time,
                );
            }
        });
    }

    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64 {
        let Some(workplace) = agent.workplace.and_then(|w| places.workplaces.get(w)) else {
            return 0.0;
        };
        let project = agent.project.map_or(0.0, |index| {
            individual_lambda_project(agent, workplace, index, env.params, env.cur_time)
        });
        individual_lambda_w(agent, workplace, env.params, env.cur_time) + project
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::{individual_lambda_project, WorkplaceLayer};
    use crate::cohorts::TransitSchedule;
    use crate::disease_progression::InfectionStatus;
    use crate::lambda::TransmissionLayer;
    use crate::layers::test_support::{agents, env};
    use crate::layers::ContainerRef;
    use crate::parameters::{LayerParams, Normalization, Params};
    use crate::population::{Places, Project, Workplace};
    use crate::transmission_matrices::TransmissionMatrices;

    fn office(agents: &mut [crate::population::Agent]) -> Places {
        for agent in agents.iter_mut() {
            agent.workplace = Some(0);
        }
        agents[0].project = Some(0);
        agents[1].project = Some(0);
        Places {
            workplaces: vec![Workplace {
                members: (0..agents.len()).collect(),
                projects: vec![Project {
                    members: vec![0, 1],
                    ..Project::default()
                }],
                ..Workplace::default()
            }],
            ..Places::default()
        }
    }

    #[test]
    fn test_project_members_see_boosted_pressure() {
        let mut params = Params::default();
        params.transmission.workplace = LayerParams::new(0.5, Normalization::Density);
        params.transmission.project = LayerParams::new(1.0, Normalization::Density);
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(4);
        let mut places = office(&mut agents);
        agents[0].infection_status = InfectionStatus::Infective;
        WorkplaceLayer.aggregate(&mut places, &agents, &env);

        // workplace: 0.5 * 1/4, project: 1.0 * 1/2
        assert_relative_eq!(WorkplaceLayer.distribute(&agents[1], &places, &env), 0.625);
        assert_relative_eq!(WorkplaceLayer.distribute(&agents[2], &places, &env), 0.125);
    }

    #[test]
    fn test_agent_without_workplace_gets_nothing() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(3);
        let mut places = office(&mut agents);
        agents[0].infection_status = InfectionStatus::Symptomatic;
        agents[2].workplace = None;
        WorkplaceLayer.aggregate(&mut places, &agents, &env);
        assert!(WorkplaceLayer.distribute(&agents[2], &places, &env).abs() < f64::EPSILON);
    }

    #[test]
    fn test_susceptibility_scales_workplace_hazard() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(4);
        let mut places = office(&mut agents);
        agents[0].infection_status = InfectionStatus::Infective;
        WorkplaceLayer.aggregate(&mut places, &agents, &env);
        let base = WorkplaceLayer.distribute(&agents[3], &places, &env);
        agents[3].susceptibility = 0.5;
        assert_relative_eq!(
            WorkplaceLayer.distribute(&agents[3], &places, &env),
            base * 0.5
        );
    }

    #[test]
    fn test_no_infectious_members_means_no_workplace_hazard() {
        let mut params = Params::default();
        params.transmission.project = LayerParams::new(1.0, Normalization::Density);
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(4);
        let mut places = office(&mut agents);
        agents[0].infection_status = InfectionStatus::Exposed;
        agents[1].infection_status = InfectionStatus::Recovered;
        WorkplaceLayer.aggregate(&mut places, &agents, &env);
        for agent in &agents {
            assert!(WorkplaceLayer.distribute(agent, &places, &env).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_project_is_looked_up_by_workplace_and_index() {
        let mut params = Params::default();
        params.transmission.project = LayerParams::new(1.0, Normalization::Density);
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = env(&params, &matrices, &transit, 0);

        let mut agents = agents(4);
        let mut places = office(&mut agents);
        agents[0].infection_status = InfectionStatus::Infective;
        WorkplaceLayer.aggregate(&mut places, &agents, &env);
        let workplace = &places.workplaces[0];

        assert_relative_eq!(
            individual_lambda_project(&agents[1], workplace, 0, &params, 0),
            0.5
        );
        assert!(individual_lambda_project(&agents[1], workplace, 3, &params, 0).abs() < f64::EPSILON);
        // Pressure from step 0 is stale at step 1.
        assert!(individual_lambda_project(&agents[1], workplace, 0, &params, 1).abs() < f64::EPSILON);
        assert_eq!(
            ContainerRef::Project {
                workplace: 3,
                index: 1
            }
            .to_string(),
            "project 1 of workplace 3"
        );
    }
}
