use std::fmt::Debug;

use dyn_clone::DynClone;
use log::warn;
use serde::Serialize;

use crate::cohorts::{CohortLayer, TransitSchedule};
use crate::layers::{CommunityLayer, HomeLayer, NbrCellLayer, TravelLayer, WorkplaceLayer};
use crate::parameters::Params;
use crate::population::{Agent, Places};
use crate::transmission_matrices::TransmissionMatrices;
use crate::Timestep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LayerKind {
    Home,
    /// Workplace and project team.
    Workplace,
    /// Local, global and random community mixing.
    Community,
    NbrCell,
    Travel,
    /// Intra- and inter-cohort mixing during a commute.
    Cohort,
}

/// The last step's incoming hazard of an agent broken down by layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LambdaIncoming {
    pub home: f64,
    pub work: f64,
    pub community: f64,
    pub nbr_cell: f64,
    pub travel: f64,
    pub cohort: f64,
}

impl LambdaIncoming {
    #[must_use]
    pub fn get(&self, kind: LayerKind) -> f64 {
        match kind {
            LayerKind::Home => self.home,
            LayerKind::Workplace => self.work,
            LayerKind::Community => self.community,
            LayerKind::NbrCell => self.nbr_cell,
            LayerKind::Travel => self.travel,
            LayerKind::Cohort => self.cohort,
        }
    }

    pub fn set(&mut self, kind: LayerKind, value: f64) {
        let slot = match kind {
            LayerKind::Home => &mut self.home,
            LayerKind::Workplace => &mut self.work,
            LayerKind::Community => &mut self.community,
            LayerKind::NbrCell => &mut self.nbr_cell,
            LayerKind::Travel => &mut self.travel,
            LayerKind::Cohort => &mut self.cohort,
        };
        *slot = value;
    }

    #[must_use]
    pub fn total(&self) -> f64 {
        self.home + self.work + self.community + self.nbr_cell + self.travel + self.cohort
    }
}

/// Read-only inputs shared by every layer during one step.
#[derive(Debug, Clone, Copy)]
pub struct StepEnv<'a> {
    pub params: &'a Params,
    pub matrices: &'a TransmissionMatrices,
    pub transit: &'a TransitSchedule,
    pub cur_time: Timestep,
}

/// One contact layer. `aggregate` only reads agents and writes the layer's
/// containers; `distribute` only reads containers.
pub trait TransmissionLayer: DynClone + Send + Sync + Debug {
    fn kind(&self) -> LayerKind;

    /// Recompute this layer's container pressure for `env.cur_time`.
    fn aggregate(&self, places: &mut Places, agents: &[Agent], env: &StepEnv);

    /// The hazard `agent` receives from this layer.
    fn distribute(&self, agent: &Agent, places: &Places, env: &StepEnv) -> f64;
}

dyn_clone::clone_trait_object!(TransmissionLayer);

/// Every layer of the model, in the order they are combined.
#[must_use]
pub fn default_layers() -> Vec<Box<dyn TransmissionLayer>> {
    vec![
        Box::new(HomeLayer),
        Box::new(WorkplaceLayer),
        Box::new(CommunityLayer),
        Box::new(NbrCellLayer),
        Box::new(TravelLayer),
        Box::new(CohortLayer),
    ]
}

/// Sum the contribution of every layer into `agent.lambda`.
pub fn update_lambdas(
    agent: &mut Agent,
    places: &Places,
    layers: &[Box<dyn TransmissionLayer>],
    env: &StepEnv,
) {
    agent.lambda_incoming = LambdaIncoming::default();
    for layer in layers {
        let mut contribution = layer.distribute(agent, places, env);
        if !(contribution >= 0.0 && contribution.is_finite()) {
            warn!(
                "Agent {} received an invalid {:?} hazard {contribution} at step {}; using 0",
                agent.id,
                layer.kind(),
                env.cur_time
            );
            contribution = 0.0;
        }
        let kind = layer.kind();
        agent
            .lambda_incoming
            .set(kind, agent.lambda_incoming.get(kind) + contribution);
    }
    agent.lambda = agent.lambda_incoming.total();
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::{default_layers, update_lambdas, LayerKind, StepEnv, TransmissionLayer};
    use crate::cohorts::TransitSchedule;
    use crate::parameters::Params;
    use crate::population::{Agent, GridPosition, Places};
    use crate::transmission_matrices::TransmissionMatrices;

    #[derive(Debug, Clone)]
    struct Fixed(LayerKind, f64);

    impl TransmissionLayer for Fixed {
        fn kind(&self) -> LayerKind {
            self.0
        }
        fn aggregate(&self, _: &mut Places, _: &[Agent], _: &StepEnv) {}
        fn distribute(&self, _: &Agent, _: &Places, _: &StepEnv) -> f64 {
            self.1
        }
    }

    #[test]
    fn test_contributions_are_summed_and_clamped() {
        let params = Params::default();
        let matrices = TransmissionMatrices::default();
        let transit = TransitSchedule::default();
        let env = StepEnv {
            params: &params,
            matrices: &matrices,
            transit: &transit,
            cur_time: 0,
        };
        let layers: Vec<Box<dyn TransmissionLayer>> = vec![
            Box::new(Fixed(LayerKind::Home, 0.25)),
            Box::new(Fixed(LayerKind::Workplace, -3.0)),
            Box::new(Fixed(LayerKind::Community, f64::NAN)),
            Box::new(Fixed(LayerKind::Travel, 0.5)),
        ];
        let mut agent = Agent::new(0, 20, 4, 0, 0, GridPosition::default());
        agent.lambda = 42.0;
        update_lambdas(&mut agent, &Places::default(), &layers, &env);
        assert_relative_eq!(agent.lambda, 0.75);
        assert_relative_eq!(agent.lambda_incoming.work, 0.0);
        assert_relative_eq!(agent.lambda_incoming.travel, 0.5);
    }

    #[test]
    fn test_default_layers_cover_each_kind_once() {
        let layers = default_layers();
        let cloned = layers.clone();
        let kinds: Vec<LayerKind> = cloned.iter().map(|l| l.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                LayerKind::Home,
                LayerKind::Workplace,
                LayerKind::Community,
                LayerKind::NbrCell,
                LayerKind::Travel,
                LayerKind::Cohort
            ]
        );
    }
}
