use serde::{Deserialize, Serialize};

/// Delayed-neutron families and group speeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KineticsData {
    /// Decay constants per family, 1/s.
    pub lambda: Vec<f64>,
    /// Delayed fractions per family.
    pub beta: Vec<f64>,
    /// Neutron speed per energy group, cm/s.
    pub velocity: Vec<f64>,
}

impl KineticsData {
    pub fn num_families(&self) -> usize {
        self.lambda.len()
    }

    pub fn beta_total(&self) -> f64 {
        self.beta.iter().sum()
    }
}

/// Precursor integrator over one substep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransientMethod {
    /// Exact exponential solution with the fission rate frozen over the
    /// substep (multigroup analytic method).
    Maf,
    /// Backward-Euler update.
    Implicit,
}

/// Advances one precursor family concentration by `dt`, with the delayed
/// production rate `beta_f = beta_j * F` frozen over the substep.
pub(crate) fn advance_precursor(
    method: TransientMethod,
    c: f64,
    lambda: f64,
    beta_f: f64,
    dt: f64,
) -> f64 {
    match method {
        TransientMethod::Maf => {
            let decay = (-lambda * dt).exp();
            c * decay + beta_f / lambda * (1.0 - decay)
        }
        TransientMethod::Implicit => (c + dt * beta_f) / (1.0 + lambda * dt),
    }
}
