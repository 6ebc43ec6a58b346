// Re-export commonly used types at the crate root
pub use cohorts::{CohortId, CohortMap, TransitSchedule};
pub use disease_progression::{update_infection, DiseaseCourse, InfectionStatus, NodeUpdateStatus};
pub use error::EpiError;
pub use interventions::{update_all_kappa, InterventionParams, InterventionSchedule};
pub use lambda::{default_layers, update_lambdas, LayerKind, TransmissionLayer};
pub use parameters::Params;
pub use population::{Agent, Places, World};
pub use step::{StepEngine, StepReport};
pub use testing::TestingProtocol;
pub use transmission_matrices::TransmissionMatrices;

// Module declarations
pub mod cohorts;
pub mod disease_progression;
pub mod error;
pub mod interventions;
pub mod lambda;
pub mod layers;
pub mod parameters;
pub mod population;
pub mod statistics;
pub mod step;
pub mod testing;
pub mod transmission_matrices;

/// Simulation time, counted in steps.
pub type Timestep = u32;
