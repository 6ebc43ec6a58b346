use std::{fs::File, io::BufReader, path::Path};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::EpiError;
use crate::Timestep;

/// How a container's summed infectious weight is scaled by the number of
/// people in it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Normalization {
    /// Density independent: the raw sum.
    Raw,
    /// Divided by the container size.
    Density,
    /// Divided by `size^alpha`.
    SizePower { alpha: f64 },
}

impl Normalization {
    /// The factor applied to a container sum. Empty containers always scale to zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn scale(&self, size: usize) -> f64 {
        if size == 0 {
            return 0.0;
        }
        match self {
            Normalization::Raw => 1.0,
            Normalization::Density => 1.0 / size as f64,
            Normalization::SizePower { alpha } => 1.0 / (size as f64).powf(*alpha),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayerParams {
    /// Global scaling constant of the layer's force of infection.
    pub beta: f64,
    pub normalization: Normalization,
}

impl LayerParams {
    #[must_use]
    pub fn new(beta: f64, normalization: Normalization) -> Self {
        LayerParams {
            beta,
            normalization,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransmissionParams {
    pub home: LayerParams,
    pub workplace: LayerParams,
    /// Extra weight seen by members of the same project team.
    pub project: LayerParams,
    pub community: LayerParams,
    /// Mixing with randomly assigned neighbouring households.
    pub random_community: LayerParams,
    pub nbr_cell: LayerParams,
    pub cohort_intra: LayerParams,
    pub cohort_inter: LayerParams,
    /// Scaling constant of the distance-weighted travel exposure for commuters
    /// that are not assigned to a cohort.
    pub travel: f64,
}

impl Default for TransmissionParams {
    fn default() -> Self {
        TransmissionParams {
            home: LayerParams::new(0.47, Normalization::SizePower { alpha: 0.8 }),
            workplace: LayerParams::new(0.94, Normalization::Density),
            project: LayerParams::new(0.0, Normalization::Density),
            community: LayerParams::new(0.097, Normalization::Density),
            random_community: LayerParams::new(0.0, Normalization::Density),
            nbr_cell: LayerParams::new(0.0, Normalization::Density),
            cohort_intra: LayerParams::new(0.0, Normalization::Density),
            cohort_inter: LayerParams::new(0.0, Normalization::Density),
            travel: 10.0,
        }
    }
}

/// Relative infectiousness by infectious state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InfectiousnessParams {
    pub asymptomatic: f64,
    pub symptomatic: f64,
}

impl Default for InfectiousnessParams {
    fn default() -> Self {
        InfectiousnessParams {
            asymptomatic: 1.0,
            symptomatic: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MixingModel {
    #[default]
    AgeIndependent,
    /// Home, workplace and community pressure are resolved per age group
    /// through the low-rank transmission matrices.
    AgeDependent,
}

/// Parameters of the distance kernel `f(d) = 1 / (1 + (d / a)^b)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DistanceKernel {
    pub a: f64,
    pub b: f64,
}

impl Default for DistanceKernel {
    fn default() -> Self {
        DistanceKernel {
            a: 10.751,
            b: 5.384,
        }
    }
}

impl DistanceKernel {
    #[must_use]
    pub fn f_kernel(&self, distance: f64) -> f64 {
        1.0 / (1.0 + (distance / self.a).powf(self.b))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridParams {
    /// Fraction of neighbourhood-cell transmission that still crosses the
    /// boundary of a locked cell.
    pub locked_neighborhood_leakage: f64,
    /// Active hospitalisation fraction above which a cell locks.
    pub locked_neighborhood_threshold: f64,
}

impl Default for GridParams {
    fn default() -> Self {
        GridParams {
            locked_neighborhood_leakage: 1.0,
            locked_neighborhood_threshold: 0.001,
        }
    }
}

/// Steps of the day on which the morning and evening commutes happen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommuteParams {
    pub am_step: Timestep,
    pub pm_step: Timestep,
}

impl Default for CommuteParams {
    fn default() -> Self {
        CommuteParams {
            am_step: 0,
            pm_step: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub steps_per_day: Timestep,
    pub num_age_groups: usize,
    pub mixing: MixingModel,
    pub transmission: TransmissionParams,
    pub infectiousness: InfectiousnessParams,
    pub kernel: DistanceKernel,
    pub grid: GridParams,
    pub commute: CommuteParams,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            steps_per_day: 4,
            num_age_groups: 16,
            mixing: MixingModel::AgeIndependent,
            transmission: TransmissionParams::default(),
            infectiousness: InfectiousnessParams::default(),
            kernel: DistanceKernel::default(),
            grid: GridParams::default(),
            commute: CommuteParams::default(),
        }
    }
}

impl Params {
    /// Read parameters from a JSON document and validate them.
    /// # Errors
    /// - If the file cannot be read or parsed.
    /// - If any parameter fails `validate_inputs`.
    pub fn from_json_file(path: &Path) -> Result<Self, EpiError> {
        let reader = BufReader::new(File::open(path)?);
        let params: Params = serde_json::from_reader(reader)?;
        validate_inputs(&params)?;
        info!("Loaded model parameters from {}", path.display());
        Ok(params)
    }
}

fn validate_layer(name: &str, layer: &LayerParams) -> Result<(), EpiError> {
    if !(layer.beta >= 0.0 && layer.beta.is_finite()) {
        return Err(EpiError::EpiError(format!(
            "The {name} transmission constant must be finite and non-negative."
        )));
    }
    if let Normalization::SizePower { alpha } = layer.normalization {
        if !(alpha >= 0.0 && alpha.is_finite()) {
            return Err(EpiError::EpiError(format!(
                "The {name} size exponent must be finite and non-negative."
            )));
        }
    }
    Ok(())
}

/// Checks the parameters before the step loop starts.
/// # Errors
/// - If any transmission constant, exponent or relative infectiousness is negative.
/// - If the grid leakage or threshold is outside [0, 1].
/// - If the commute steps do not fall within a day.
pub fn validate_inputs(parameters: &Params) -> Result<(), EpiError> {
    if parameters.steps_per_day == 0 {
        return Err(EpiError::EpiError(
            "The number of steps per day must be positive.".to_string(),
        ));
    }
    if parameters.num_age_groups == 0 {
        return Err(EpiError::EpiError(
            "The number of age groups must be positive.".to_string(),
        ));
    }
    let t = &parameters.transmission;
    for (name, layer) in [
        ("home", &t.home),
        ("workplace", &t.workplace),
        ("project", &t.project),
        ("community", &t.community),
        ("random community", &t.random_community),
        ("neighbourhood cell", &t.nbr_cell),
        ("intra-cohort", &t.cohort_intra),
        ("inter-cohort", &t.cohort_inter),
    ] {
        validate_layer(name, layer)?;
    }
    if !(t.travel >= 0.0 && t.travel.is_finite()) {
        return Err(EpiError::EpiError(
            "The travel transmission constant must be finite and non-negative.".to_string(),
        ));
    }
    let i = &parameters.infectiousness;
    if !(i.asymptomatic >= 0.0 && i.asymptomatic.is_finite())
        || !(i.symptomatic >= 0.0 && i.symptomatic.is_finite())
    {
        return Err(EpiError::EpiError(
            "Relative infectiousness values must be finite and non-negative.".to_string(),
        ));
    }
    let k = &parameters.kernel;
    if !(k.a > 0.0 && k.a.is_finite()) {
        return Err(EpiError::EpiError(
            "The distance kernel scale must be finite and positive.".to_string(),
        ));
    }
    if !(k.b >= 0.0 && k.b.is_finite()) {
        return Err(EpiError::EpiError(
            "The distance kernel exponent must be finite and non-negative.".to_string(),
        ));
    }
    let g = &parameters.grid;
    if !(0.0..=1.0).contains(&g.locked_neighborhood_leakage) {
        return Err(EpiError::EpiError(
            "The locked neighbourhood leakage must be between 0 and 1, inclusive.".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&g.locked_neighborhood_threshold) {
        return Err(EpiError::EpiError(
            "The locked neighbourhood threshold must be between 0 and 1, inclusive.".to_string(),
        ));
    }
    let c = &parameters.commute;
    if c.am_step >= parameters.steps_per_day || c.pm_step >= parameters.steps_per_day {
        return Err(EpiError::EpiError(
            "Commute steps must fall within a single day.".to_string(),
        ));
    }
    if c.am_step == c.pm_step {
        return Err(EpiError::EpiError(
            "The morning and evening commutes must happen on different steps.".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use approx::assert_relative_eq;
    use tempfile::NamedTempFile;

    use super::{validate_inputs, DistanceKernel, Normalization, Params};
    use crate::error::EpiError;

    #[test]
    fn test_default_params_are_valid() {
        assert!(validate_inputs(&Params::default()).is_ok());
    }

    #[test]
    fn test_normalization_scale() {
        assert_relative_eq!(Normalization::Raw.scale(4), 1.0);
        assert_relative_eq!(Normalization::Density.scale(4), 0.25);
        assert_relative_eq!(Normalization::SizePower { alpha: 0.5 }.scale(4), 0.5);
        assert_relative_eq!(Normalization::Density.scale(0), 0.0);
    }

    #[test]
    fn test_kernel_is_one_half_at_scale() {
        let kernel = DistanceKernel { a: 2.0, b: 3.0 };
        assert_relative_eq!(kernel.f_kernel(0.0), 1.0);
        assert_relative_eq!(kernel.f_kernel(2.0), 0.5);
    }

    #[test]
    fn test_validate_negative_beta() {
        let mut params = Params::default();
        params.transmission.workplace.beta = -0.1;
        let e = validate_inputs(&params).err();
        match e {
            Some(EpiError::EpiError(msg)) => assert_eq!(
                msg,
                "The workplace transmission constant must be finite and non-negative."
            ),
            Some(ue) => panic!("Expected a validation error. Instead got {ue:?}"),
            None => panic!("Expected an error. Instead, validation passed with no errors."),
        }
    }

    #[test]
    fn test_validate_leakage_range() {
        let mut params = Params::default();
        params.grid.locked_neighborhood_leakage = 1.5;
        assert!(validate_inputs(&params).is_err());
    }

    #[test]
    fn test_validate_rejects_nan_and_bad_kernel() {
        let mut params = Params::default();
        params.infectiousness.symptomatic = f64::NAN;
        assert!(validate_inputs(&params).is_err());

        let mut params = Params::default();
        params.kernel.b = -1.0;
        assert!(validate_inputs(&params).is_err());

        let mut params = Params::default();
        params.kernel.b = f64::INFINITY;
        assert!(validate_inputs(&params).is_err());

        let mut params = Params::default();
        params.kernel.a = f64::NAN;
        assert!(validate_inputs(&params).is_err());
    }

    #[test]
    fn test_validate_commute_steps() {
        let mut params = Params::default();
        params.commute.pm_step = params.steps_per_day;
        assert!(validate_inputs(&params).is_err());
        params.commute.pm_step = params.commute.am_step;
        assert!(validate_inputs(&params).is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            "{{\"steps_per_day\": 2, \"commute\": {{\"am_step\": 0, \"pm_step\": 1}}, \
             \"transmission\": {{\"home\": {{\"beta\": 0.2, \"normalization\": \"Density\"}}}}}}"
        )
        .unwrap();
        let params = Params::from_json_file(file.path()).unwrap();
        assert_eq!(params.steps_per_day, 2);
        assert_relative_eq!(params.transmission.home.beta, 0.2);
        assert_eq!(params.transmission.home.normalization, Normalization::Density);
        assert_relative_eq!(params.transmission.community.beta, 0.097);
    }

    #[test]
    fn test_invalid_json_file_fails_validation() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"steps_per_day\": 0}}").unwrap();
        assert!(Params::from_json_file(file.path()).is_err());
    }
}
