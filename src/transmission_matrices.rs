use std::path::Path;

use log::info;

use crate::error::EpiError;
use crate::parameters::{MixingModel, Params};

/// An age-by-age contact matrix stored as `U * diag(sigma) * Vt`.
/// `u` is ages x rank and `vt` is rank x ages.
#[derive(Debug, Clone, PartialEq)]
pub struct LowRankMatrix {
    u: Vec<Vec<f64>>,
    sigma: Vec<f64>,
    vt: Vec<Vec<f64>>,
}

impl LowRankMatrix {
    /// # Errors
    /// - If the factors are empty or ragged.
    /// - If the rank of `u`, `sigma` and `vt` disagree.
    /// - If `u` and `vt` do not cover the same number of age groups.
    /// - If any entry is not finite.
    pub fn new(u: Vec<Vec<f64>>, sigma: Vec<f64>, vt: Vec<Vec<f64>>) -> Result<Self, EpiError> {
        let rank = sigma.len();
        if rank == 0 || u.is_empty() {
            return Err(EpiError::EpiError(
                "Low-rank factors must not be empty.".to_string(),
            ));
        }
        if let Some(row) = u.iter().position(|r| r.len() != rank) {
            return Err(EpiError::EpiError(format!(
                "Row {row} of U has {} columns but there are {rank} singular values.",
                u[row].len()
            )));
        }
        if vt.len() != rank {
            return Err(EpiError::EpiError(format!(
                "Vt has {} rows but there are {rank} singular values.",
                vt.len()
            )));
        }
        let ages = u.len();
        if let Some(row) = vt.iter().position(|r| r.len() != ages) {
            return Err(EpiError::EpiError(format!(
                "Row {row} of Vt has {} columns but U has {ages} rows.",
                vt[row].len()
            )));
        }
        let finite = u
            .iter()
            .chain(vt.iter())
            .flatten()
            .chain(sigma.iter())
            .all(|x| x.is_finite());
        if !finite {
            return Err(EpiError::EpiError(
                "Low-rank factors must only contain finite values.".to_string(),
            ));
        }
        Ok(LowRankMatrix { u, sigma, vt })
    }

    /// Loads the three factors from header-less CSV files. The singular
    /// values may be laid out as a row or as a column.
    /// # Errors
    /// - If a file cannot be read or holds a non-numeric entry.
    /// - If the factors fail the checks in `new`.
    pub fn from_csv(u_path: &Path, sigma_path: &Path, vt_path: &Path) -> Result<Self, EpiError> {
        let u = read_matrix_csv(u_path)?;
        let sigma = read_matrix_csv(sigma_path)?.into_iter().flatten().collect();
        let vt = read_matrix_csv(vt_path)?;
        let matrix = LowRankMatrix::new(u, sigma, vt)?;
        info!(
            "Loaded a rank {} transmission matrix over {} age groups from {}",
            matrix.rank(),
            matrix.num_age_groups(),
            u_path.display()
        );
        Ok(matrix)
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.sigma.len()
    }

    #[must_use]
    pub fn num_age_groups(&self) -> usize {
        self.u.len()
    }

    /// Pressure on each target age group from `mass`, the infectious mass
    /// by source age group. Runs in O(rank * ages).
    #[must_use]
    pub fn apply(&self, mass: &[f64]) -> Vec<f64> {
        let projected: Vec<f64> = self
            .vt
            .iter()
            .zip(&self.sigma)
            .map(|(row, s)| s * row.iter().zip(mass).map(|(v, m)| v * m).sum::<f64>())
            .collect();
        self.u
            .iter()
            .map(|row| row.iter().zip(&projected).map(|(u, p)| u * p).sum())
            .collect()
    }

    #[must_use]
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let ages = self.num_age_groups();
        self.u
            .iter()
            .map(|u_row| {
                (0..ages)
                    .map(|col| {
                        u_row
                            .iter()
                            .zip(&self.sigma)
                            .zip(&self.vt)
                            .map(|((u, s), vt_row)| u * s * vt_row[col])
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Pairwise distances between community centres.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// # Errors
    /// - If the matrix is not square.
    /// - If any distance is negative or not finite.
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, EpiError> {
        let n = rows.len();
        if let Some(row) = rows.iter().position(|r| r.len() != n) {
            return Err(EpiError::EpiError(format!(
                "Distance matrix row {row} has {} entries, expected {n}.",
                rows[row].len()
            )));
        }
        if rows.iter().flatten().any(|d| !(*d >= 0.0 && d.is_finite())) {
            return Err(EpiError::EpiError(
                "Distances must be finite and non-negative.".to_string(),
            ));
        }
        Ok(DistanceMatrix { rows })
    }

    /// # Errors
    /// - If the file cannot be read or holds a non-numeric entry.
    /// - If the matrix fails the checks in `new`.
    pub fn from_csv(path: &Path) -> Result<Self, EpiError> {
        let matrix = DistanceMatrix::new(read_matrix_csv(path)?)?;
        info!(
            "Loaded distances between {} communities from {}",
            matrix.len(),
            path.display()
        );
        Ok(matrix)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn row(&self, community: usize) -> Option<&[f64]> {
        self.rows.get(community).map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransmissionMatrices {
    pub home: Option<LowRankMatrix>,
    pub workplace: Option<LowRankMatrix>,
    pub community: Option<LowRankMatrix>,
    pub community_distance: Option<DistanceMatrix>,
}

impl TransmissionMatrices {
    /// # Errors
    /// - If age-dependent mixing is configured and a factorization is missing.
    /// - If a factorization does not cover `num_age_groups`.
    pub fn validate(&self, params: &Params) -> Result<(), EpiError> {
        for (name, matrix) in [
            ("home", &self.home),
            ("workplace", &self.workplace),
            ("community", &self.community),
        ] {
            match matrix {
                None if params.mixing == MixingModel::AgeDependent => {
                    return Err(EpiError::EpiError(format!(
                        "Age-dependent mixing requires a {name} transmission matrix."
                    )));
                }
                Some(m) if m.num_age_groups() != params.num_age_groups => {
                    return Err(EpiError::EpiError(format!(
                        "The {name} transmission matrix covers {} age groups, expected {}.",
                        m.num_age_groups(),
                        params.num_age_groups
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Checks the distance matrix against the number of communities.
    /// # Errors
    /// - If the matrix does not have one row per community.
    pub fn validate_communities(&self, num_communities: usize) -> Result<(), EpiError> {
        match &self.community_distance {
            Some(d) if d.len() != num_communities => Err(EpiError::EpiError(format!(
                "The distance matrix covers {} communities, expected {num_communities}.",
                d.len()
            ))),
            _ => Ok(()),
        }
    }
}

/// Reads a header-less CSV file of numbers into its rows.
fn read_matrix_csv(path: &Path) -> Result<Vec<Vec<f64>>, EpiError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row = record
            .iter()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<f64>, _>>()?;
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(EpiError::EpiError(format!(
            "No data found in file: {}",
            path.display()
        )));
    }
    Ok(rows)
}
