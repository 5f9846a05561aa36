use crate::error::MaterialError;

/// Reference temperature of the as-built cross sections.
pub const ROOM_TEMPERATURE: f64 = 300.0;

/// Multigroup cross-section set.
///
/// The scattering matrix is stored row-major by destination group:
/// `sigma_s[g_to * ng + g_from]`. The total cross section is always kept
/// consistent with `sigma_a` plus the column sums of the scattering matrix.
///
/// Time dependence (control moves) enters through a piecewise-linear table
/// for `sigma_a`, and temperature feedback through per-group `gamma`
/// coefficients with a square-root-of-temperature law. [`Material::sync`]
/// applies both to the working copies; the as-built reference values are
/// never modified.
#[derive(Debug, Clone)]
pub struct Material {
    id: u32,
    num_groups: usize,
    sigma_t: Vec<f64>,
    sigma_a: Vec<f64>,
    sigma_s: Vec<f64>,
    sigma_f: Vec<f64>,
    nu_sigma_f: Vec<f64>,
    chi: Vec<f64>,
    dif_coef: Vec<f64>,
    buckling: Vec<f64>,
    // As-built absorption, the baseline for sync().
    sigma_a_ref: Vec<f64>,
    // Piecewise-linear sigma_a(t): `sigma_a_table[step * ng + g]`.
    time_points: Vec<f64>,
    sigma_a_table: Vec<f64>,
    // Temperature feedback coefficients; empty means no feedback.
    gamma: Vec<f64>,
    conserve_sigma_t: bool,
}

impl Material {
    pub fn new(id: u32, num_groups: usize) -> Self {
        Self {
            id,
            num_groups,
            sigma_t: vec![0.0; num_groups],
            sigma_a: vec![0.0; num_groups],
            sigma_s: vec![0.0; num_groups * num_groups],
            sigma_f: vec![0.0; num_groups],
            nu_sigma_f: vec![0.0; num_groups],
            chi: vec![0.0; num_groups],
            dif_coef: vec![0.0; num_groups],
            buckling: vec![0.0; num_groups],
            sigma_a_ref: vec![0.0; num_groups],
            time_points: Vec::new(),
            sigma_a_table: Vec::new(),
            gamma: Vec::new(),
            conserve_sigma_t: false,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    fn check_len(&self, field: &'static str, got: usize, expected: usize) -> Result<(), MaterialError> {
        if got != expected {
            Err(MaterialError::GroupMismatch {
                id: self.id,
                field,
                expected,
                got,
            })
        } else {
            Ok(())
        }
    }

    pub fn set_sigma_a(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("sigma_a", values.len(), self.num_groups)?;
        self.sigma_a.copy_from_slice(values);
        self.sigma_a_ref.copy_from_slice(values);
        self.rebuild_totals();
        Ok(())
    }

    /// Scattering matrix, row-major by destination group.
    pub fn set_sigma_s(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("sigma_s", values.len(), self.num_groups * self.num_groups)?;
        self.sigma_s.copy_from_slice(values);
        self.rebuild_totals();
        Ok(())
    }

    pub fn set_sigma_f(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("sigma_f", values.len(), self.num_groups)?;
        self.sigma_f.copy_from_slice(values);
        Ok(())
    }

    pub fn set_nu_sigma_f(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("nu_sigma_f", values.len(), self.num_groups)?;
        self.nu_sigma_f.copy_from_slice(values);
        Ok(())
    }

    pub fn set_chi(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("chi", values.len(), self.num_groups)?;
        self.chi.copy_from_slice(values);
        Ok(())
    }

    pub fn set_dif_coef(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("dif_coef", values.len(), self.num_groups)?;
        self.dif_coef.copy_from_slice(values);
        Ok(())
    }

    pub fn set_buckling(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("buckling", values.len(), self.num_groups)?;
        self.buckling.copy_from_slice(values);
        Ok(())
    }

    /// Temperature feedback coefficients for the sqrt(T) absorption law.
    pub fn set_gamma(&mut self, values: &[f64]) -> Result<(), MaterialError> {
        self.check_len("gamma", values.len(), self.num_groups)?;
        self.gamma = values.to_vec();
        Ok(())
    }

    /// Absorption-vs-time table: `sigma_a[step * ng + g]` at `times[step]`.
    /// Values are interpolated linearly and clamped outside the table.
    pub fn set_time_table(&mut self, times: &[f64], sigma_a: &[f64]) -> Result<(), MaterialError> {
        self.check_len("sigma_a table", sigma_a.len(), times.len() * self.num_groups)?;
        self.time_points = times.to_vec();
        self.sigma_a_table = sigma_a.to_vec();
        Ok(())
    }

    /// When enabled, sync() recomputes the self-scattering term so the
    /// transport-corrected total `1/(3D)` is preserved as `sigma_a` moves,
    /// and folds the axial buckling into absorption.
    pub fn set_conserve_sigma_t(&mut self, on: bool) {
        self.conserve_sigma_t = on;
    }

    pub fn sigma_t(&self, g: usize) -> f64 {
        self.sigma_t[g]
    }

    pub fn sigma_a(&self, g: usize) -> f64 {
        self.sigma_a[g]
    }

    pub fn sigma_s(&self, g_to: usize, g_from: usize) -> f64 {
        self.sigma_s[g_to * self.num_groups + g_from]
    }

    pub fn nu_sigma_f(&self, g: usize) -> f64 {
        self.nu_sigma_f[g]
    }

    pub fn chi(&self, g: usize) -> f64 {
        self.chi[g]
    }

    /// Fission cross section; falls back to `nu_sigma_f / nu` when no
    /// explicit `sigma_f` was provided.
    pub fn sigma_f(&self, g: usize, nu: f64) -> f64 {
        if self.sigma_f[g] > 0.0 {
            self.sigma_f[g]
        } else {
            self.nu_sigma_f[g] / nu
        }
    }

    /// Diffusion coefficient; `1/(3 sigma_t)` when none was provided.
    pub fn dif_coef(&self, g: usize) -> f64 {
        if self.dif_coef[g] > 0.0 {
            self.dif_coef[g]
        } else {
            1.0 / (3.0 * self.sigma_t[g])
        }
    }

    pub fn is_fissile(&self) -> bool {
        self.nu_sigma_f.iter().any(|&v| v > 0.0)
    }

    /// Scattering source into group `g` for the given group flux values.
    pub fn scatter_into(&self, g: usize, flux: &[f64]) -> f64 {
        let row = &self.sigma_s[g * self.num_groups..(g + 1) * self.num_groups];
        row.iter().zip(flux).map(|(s, f)| s * f).sum()
    }

    /// Out-scattering cross section from group `g` (self-scatter excluded).
    pub fn out_scatter(&self, g: usize) -> f64 {
        (0..self.num_groups)
            .filter(|&to| to != g)
            .map(|to| self.sigma_s[to * self.num_groups + g])
            .sum()
    }

    /// Applies time interpolation and temperature feedback to the working
    /// cross sections.
    pub fn sync(&mut self, time: f64, temperature: f64) -> Result<(), MaterialError> {
        let ng = self.num_groups;
        for g in 0..ng {
            let mut sa = if self.time_points.is_empty() {
                self.sigma_a_ref[g]
            } else {
                self.interp_sigma_a(g, time)
            };
            if !self.gamma.is_empty() {
                sa *= 1.0 + self.gamma[g] * (temperature.sqrt() - ROOM_TEMPERATURE.sqrt());
            }
            self.sigma_a[g] = sa;

            if self.conserve_sigma_t {
                if self.dif_coef[g] <= 0.0 {
                    return Err(MaterialError::MissingData {
                        id: self.id,
                        field: "dif_coef",
                    });
                }
                let out = self.out_scatter(g);
                self.sigma_s[g * ng + g] = 1.0 / (3.0 * self.dif_coef[g]) - self.sigma_a[g] - out;
                self.sigma_a[g] += self.dif_coef[g] * self.buckling[g];
            }
        }
        self.rebuild_totals();
        Ok(())
    }

    fn interp_sigma_a(&self, g: usize, time: f64) -> f64 {
        let ng = self.num_groups;
        let n = self.time_points.len();
        if time <= self.time_points[0] {
            return self.sigma_a_table[g];
        }
        if time >= self.time_points[n - 1] {
            return self.sigma_a_table[(n - 1) * ng + g];
        }
        for i in 0..n - 1 {
            let (t0, t1) = (self.time_points[i], self.time_points[i + 1]);
            if time >= t0 && time < t1 {
                let v0 = self.sigma_a_table[i * ng + g];
                let v1 = self.sigma_a_table[(i + 1) * ng + g];
                return v0 + (v1 - v0) * (time - t0) / (t1 - t0);
            }
        }
        self.sigma_a_table[(n - 1) * ng + g]
    }

    fn rebuild_totals(&mut self) {
        let ng = self.num_groups;
        for g in 0..ng {
            let scatter: f64 = (0..ng).map(|to| self.sigma_s[to * ng + g]).sum();
            self.sigma_t[g] = self.sigma_a[g] + scatter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_group() -> Material {
        let mut m = Material::new(1, 1);
        m.set_sigma_a(&[0.1]).unwrap();
        m.set_sigma_s(&[0.3]).unwrap();
        m.set_nu_sigma_f(&[0.12]).unwrap();
        m.set_chi(&[1.0]).unwrap();
        m
    }

    #[test]
    fn test_totals() {
        let m = one_group();
        assert!((m.sigma_t(0) - 0.4).abs() < 1e-14);
    }

    #[test]
    fn test_two_group_scatter_source() {
        let mut m = Material::new(2, 2);
        m.set_sigma_a(&[0.01, 0.1]).unwrap();
        // Columns are source groups: down-scatter 1->2 of 0.02.
        m.set_sigma_s(&[0.20, 0.00, 0.02, 0.90]).unwrap();
        let flux = [2.0, 1.0];
        assert!((m.scatter_into(0, &flux) - 0.4).abs() < 1e-14);
        assert!((m.scatter_into(1, &flux) - (0.02 * 2.0 + 0.9)).abs() < 1e-14);
        assert!((m.out_scatter(0) - 0.02).abs() < 1e-14);
        assert!((m.sigma_t(0) - (0.01 + 0.22)).abs() < 1e-14);
    }

    #[test]
    fn test_time_interpolation() {
        let mut m = one_group();
        m.set_time_table(&[0.0, 2.0], &[0.1, 0.2]).unwrap();
        m.sync(1.0, ROOM_TEMPERATURE).unwrap();
        assert!((m.sigma_a(0) - 0.15).abs() < 1e-12);
        // Clamped beyond the table.
        m.sync(5.0, ROOM_TEMPERATURE).unwrap();
        assert!((m.sigma_a(0) - 0.2).abs() < 1e-12);
        m.sync(-1.0, ROOM_TEMPERATURE).unwrap();
        assert!((m.sigma_a(0) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_temperature_feedback() {
        let mut m = one_group();
        m.set_gamma(&[0.01]).unwrap();
        m.sync(0.0, ROOM_TEMPERATURE).unwrap();
        assert!((m.sigma_a(0) - 0.1).abs() < 1e-12);
        m.sync(0.0, 400.0).unwrap();
        let expected = 0.1 * (1.0 + 0.01 * (400.0_f64.sqrt() - 300.0_f64.sqrt()));
        assert!((m.sigma_a(0) - expected).abs() < 1e-12);
        assert!(m.sigma_a(0) > 0.1);
    }

    #[test]
    fn test_conserve_sigma_t() {
        let mut m = one_group();
        m.set_dif_coef(&[1.0]).unwrap();
        m.set_conserve_sigma_t(true);
        m.sync(0.0, ROOM_TEMPERATURE).unwrap();
        // sigma_t must equal the transport-corrected total 1/(3D).
        assert!((m.sigma_t(0) - 1.0 / 3.0).abs() < 1e-12);

        // Raising absorption trades against self-scatter, total unchanged.
        let mut hot = one_group();
        hot.set_dif_coef(&[1.0]).unwrap();
        hot.set_gamma(&[0.05]).unwrap();
        hot.set_conserve_sigma_t(true);
        hot.sync(0.0, 600.0).unwrap();
        assert!((hot.sigma_t(0) - 1.0 / 3.0).abs() < 1e-12);
        assert!(hot.sigma_a(0) > m.sigma_a(0));
    }

    #[test]
    fn test_conserve_requires_dif_coef() {
        let mut m = one_group();
        m.set_conserve_sigma_t(true);
        assert!(matches!(
            m.sync(0.0, ROOM_TEMPERATURE),
            Err(MaterialError::MissingData { .. })
        ));
    }
}
