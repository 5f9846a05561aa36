use std::f64::consts::PI;

use crate::error::TrackGenerationError;

/// Tabuchi-Yamamoto polar sets, optimized for the flat-source
/// exponential kernel. (sin_theta, weight) pairs; weights sum to 1.
const TY1_SIN: [f64; 1] = [0.798184];
const TY1_WGT: [f64; 1] = [1.0];
const TY2_SIN: [f64; 2] = [0.363900, 0.899900];
const TY2_WGT: [f64; 2] = [0.212854, 0.787146];
const TY3_SIN: [f64; 3] = [0.166648, 0.537707, 0.932954];
const TY3_WGT: [f64; 3] = [0.046233, 0.283619, 0.670148];

fn ty_polar(num_polar: usize) -> Result<(&'static [f64], &'static [f64]), TrackGenerationError> {
    match num_polar {
        1 => Ok((&TY1_SIN, &TY1_WGT)),
        2 => Ok((&TY2_SIN, &TY2_WGT)),
        3 => Ok((&TY3_SIN, &TY3_WGT)),
        n => Err(TrackGenerationError::InvalidPolarCount(n)),
    }
}

/// Angular quadrature of the track layout: the effective azimuthal angles
/// and spacings the cyclic layout produced, their angular weights, and the
/// Tabuchi-Yamamoto polar set.
///
/// `weight[m * num_polar + p]` is the combined tally weight
/// `2 * dphi_m * w_p * s_m * sin(theta_p)` used for scalar-flux, current
/// and leakage tallies; the azimuthal widths `delta_phi` sum to pi.
#[derive(Debug, Clone)]
pub struct Quadrature {
    pub num_azim: usize,
    pub num_polar: usize,
    pub phi: Vec<f64>,
    pub spacing: Vec<f64>,
    pub delta_phi: Vec<f64>,
    pub sin_theta: Vec<f64>,
    pub polar_weight: Vec<f64>,
    pub weight: Vec<f64>,
}

impl Quadrature {
    pub(crate) fn new(
        phi: Vec<f64>,
        spacing: Vec<f64>,
        num_polar: usize,
    ) -> Result<Self, TrackGenerationError> {
        let (sin_theta, polar_weight) = ty_polar(num_polar)?;
        let na = phi.len();

        // Angular bin edges halfway between neighboring effective angles.
        let mut bounds = vec![0.0; na + 1];
        bounds[na] = PI;
        for m in 1..na {
            bounds[m] = 0.5 * (phi[m - 1] + phi[m]);
        }
        let delta_phi: Vec<f64> = (0..na).map(|m| bounds[m + 1] - bounds[m]).collect();

        let mut weight = vec![0.0; na * num_polar];
        for m in 0..na {
            for p in 0..num_polar {
                weight[m * num_polar + p] =
                    2.0 * delta_phi[m] * polar_weight[p] * spacing[m] * sin_theta[p];
            }
        }

        Ok(Self {
            num_azim: na,
            num_polar,
            phi,
            spacing,
            delta_phi,
            sin_theta: sin_theta.to_vec(),
            polar_weight: polar_weight.to_vec(),
            weight,
        })
    }

    pub fn weight(&self, azim: usize, polar: usize) -> f64 {
        self.weight[azim * self.num_polar + polar]
    }
}
