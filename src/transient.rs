pub mod kinetics;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError, TransientStepError};
use crate::material::ROOM_TEMPERATURE;
use crate::solver::{MocSolver, SolveOutcome, SweepMode, TransientTerms};

pub use kinetics::{KineticsData, TransientMethod};

/// Knobs of a transient run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientConfig {
    /// Energy per fission, J.
    pub kappa: f64,
    /// Adiabatic heat-up coefficient, K per (J/cm^3).
    pub alpha: f64,
    /// Neutrons per fission, used to recover sigma_f from nu-sigma-f.
    pub nu: f64,
    /// Outer (transport) step length, s.
    pub dt_moc: f64,
    /// Substep length for precursors and temperature, s.
    pub dt_cmfd: f64,
    pub t_start: f64,
    pub t_end: f64,
    pub method: TransientMethod,
    /// Total core power the initial state is normalized to, W.
    pub power_init: f64,
}

impl Default for TransientConfig {
    fn default() -> Self {
        Self {
            kappa: 3.204e-11,
            alpha: 0.0,
            nu: 2.43,
            dt_moc: 1e-3,
            dt_cmfd: 1e-4,
            t_start: 0.0,
            t_end: 1.0,
            method: TransientMethod::Maf,
            power_init: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    InitialStateSolved,
    Stepping,
    Failed,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Uninitialized => "uninitialized",
            State::InitialStateSolved => "initial state solved",
            State::Stepping => "stepping",
            State::Failed => "failed",
        }
    }
}

/// Time-dependent solver on top of the transport sweep.
///
/// The initial condition is a steady-state eigenvalue solve normalized to
/// the requested power, with the precursors in equilibrium. Each outer step
/// advances precursors and temperatures over substeps with the flux frozen,
/// re-syncs the cross sections, and closes the step with a fixed-source
/// transport solve carrying the time-absorption and delayed terms. A step
/// whose inner solve fails is rolled back and the solver is marked failed.
pub struct TransientSolver {
    solver: MocSolver,
    kinetics: KineticsData,
    cfg: TransientConfig,
    state: State,
    time: f64,
    k0: f64,
    /// Precursor concentrations, `fsr * num_families + j`.
    precursors: Vec<f64>,
    /// Per-FSR temperature, K.
    temperatures: Vec<f64>,
}

impl TransientSolver {
    pub fn new(
        solver: MocSolver,
        kinetics: KineticsData,
        cfg: TransientConfig,
    ) -> Result<Self> {
        if kinetics.lambda.len() != kinetics.beta.len() {
            return Err(SolverError::Config(format!(
                "{} decay constants but {} delayed fractions",
                kinetics.lambda.len(),
                kinetics.beta.len()
            )));
        }
        if kinetics.velocity.len() != solver.num_groups() {
            return Err(SolverError::Config(format!(
                "{} group speeds for {} energy groups",
                kinetics.velocity.len(),
                solver.num_groups()
            )));
        }
        if !(cfg.dt_moc > 0.0) || !(cfg.dt_cmfd > 0.0) {
            return Err(SolverError::Config("step lengths must be positive".into()));
        }
        if cfg.t_end <= cfg.t_start {
            return Err(SolverError::Config("t_end must be after t_start".into()));
        }
        if !(cfg.power_init > 0.0) {
            return Err(SolverError::Config("initial power must be positive".into()));
        }
        let t_start = cfg.t_start;
        Ok(Self {
            solver,
            kinetics,
            cfg,
            state: State::Uninitialized,
            time: t_start,
            k0: 1.0,
            precursors: Vec::new(),
            temperatures: Vec::new(),
        })
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn keff_initial(&self) -> f64 {
        self.k0
    }

    pub fn solver(&self) -> &MocSolver {
        &self.solver
    }

    pub fn is_finished(&self) -> bool {
        self.time >= self.cfg.t_end - 1e-12 * self.cfg.t_end.abs().max(1.0)
    }

    /// Integrated fission power per FSR, W.
    pub fn fsr_powers(&self) -> Vec<f64> {
        self.solver.fsr_powers(self.cfg.kappa, self.cfg.nu)
    }

    /// Total fission power, W.
    pub fn power(&self) -> f64 {
        self.fsr_powers().iter().sum()
    }

    /// Volume-weighted average temperature, K.
    pub fn core_temperature(&self) -> f64 {
        let volumes = self.solver.volumes();
        let total: f64 = volumes.iter().sum();
        if total <= 0.0 || self.temperatures.is_empty() {
            return ROOM_TEMPERATURE;
        }
        self.temperatures
            .iter()
            .zip(volumes)
            .map(|(t, v)| t * v)
            .sum::<f64>()
            / total
    }

    fn expect_state(&self, expected: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(TransientStepError::InvalidState {
                expected,
                actual: self.state.name(),
            }
            .into())
        }
    }

    /// Steady-state eigenvalue solve at `t_start` and room temperature,
    /// normalized to the initial power, with equilibrium precursors.
    pub fn solve_initial_state(&mut self) -> Result<SolveOutcome> {
        self.expect_state("uninitialized", self.state == State::Uninitialized)?;

        for m in self.solver.materials_mut() {
            m.sync(self.cfg.t_start, ROOM_TEMPERATURE)?;
        }
        let out = self.solver.converge(SweepMode::Eigenvalue)?;
        self.k0 = out.keff;

        let power = self.power();
        if power <= 0.0 {
            return Err(SolverError::Config(
                "initial state produces no fission power".into(),
            ));
        }
        self.solver.scale_flux(self.cfg.power_init / power);

        let nfsr = self.solver.num_fsrs();
        let nj = self.kinetics.num_families();
        self.precursors = vec![0.0; nfsr * nj];
        let fission = self.fission_rates();
        for r in 0..nfsr {
            for j in 0..nj {
                self.precursors[r * nj + j] =
                    self.kinetics.beta[j] * fission[r] / self.kinetics.lambda[j];
            }
        }
        self.temperatures = vec![ROOM_TEMPERATURE; nfsr];
        self.time = self.cfg.t_start;
        self.state = State::InitialStateSolved;
        Ok(out)
    }

    /// Advances one outer step of at most `dt_moc`, shortened so the last
    /// step lands exactly on `t_end`.
    pub fn solve_outer_step(&mut self) -> Result<SolveOutcome> {
        self.expect_state(
            "initial state solved or stepping",
            matches!(self.state, State::InitialStateSolved | State::Stepping),
        )?;
        if self.is_finished() {
            return Err(TransientStepError::InvalidState {
                expected: "a remaining time step",
                actual: "finished",
            }
            .into());
        }

        let dt = self.cfg.dt_moc.min(self.cfg.t_end - self.time);
        let t_new = self.time + dt;

        let snapshot = self.solver.snapshot();
        let precursors_saved = self.precursors.clone();
        let temperatures_saved = self.temperatures.clone();

        match self.advance_step(dt, t_new) {
            Ok(out) => {
                self.time = t_new;
                self.state = State::Stepping;
                Ok(out)
            }
            Err(e) => {
                self.solver.restore(&snapshot);
                self.precursors = precursors_saved;
                self.temperatures = temperatures_saved;
                self.state = State::Failed;
                // The step may have moved the cross sections to t_new
                // already; put them back at the restored time.
                let time = self.time;
                for (m, &temp) in self
                    .solver
                    .materials_mut()
                    .iter_mut()
                    .zip(&self.temperatures)
                {
                    m.sync(time, temp)?;
                }
                Err(TransientStepError::Inner {
                    time: t_new,
                    source: Box::new(e),
                }
                .into())
            }
        }
    }

    fn advance_step(&mut self, dt: f64, t_new: f64) -> Result<SolveOutcome> {
        let nfsr = self.solver.num_fsrs();
        let nj = self.kinetics.num_families();
        let ng = self.solver.num_groups();

        // Precursors and temperatures march on the finer grid with the
        // flux of the previous transport solve held constant.
        let n_sub = ((dt / self.cfg.dt_cmfd).round() as usize).max(1);
        let dt_sub = dt / n_sub as f64;
        let fission = self.fission_rates();
        let power_density = self.power_densities();
        for _ in 0..n_sub {
            for r in 0..nfsr {
                for j in 0..nj {
                    let i = r * nj + j;
                    self.precursors[i] = kinetics::advance_precursor(
                        self.cfg.method,
                        self.precursors[i],
                        self.kinetics.lambda[j],
                        self.kinetics.beta[j] * fission[r],
                        dt_sub,
                    );
                }
                self.temperatures[r] += dt_sub * self.cfg.alpha * power_density[r];
            }
        }

        for (m, &t) in self
            .solver
            .materials_mut()
            .iter_mut()
            .zip(&self.temperatures)
        {
            m.sync(t_new, t)?;
        }

        let delayed: Vec<f64> = (0..nfsr)
            .map(|r| {
                (0..nj)
                    .map(|j| self.kinetics.lambda[j] * self.precursors[r * nj + j])
                    .sum()
            })
            .collect();
        let inv_velocity_dt: Vec<f64> = (0..ng)
            .map(|g| 1.0 / (self.kinetics.velocity[g] * dt))
            .collect();
        self.solver.set_transient_terms(Some(TransientTerms {
            inv_velocity_dt,
            flux_prev: self.solver.flux().to_vec(),
            delayed,
            prompt_factor: (1.0 - self.kinetics.beta_total()) / self.k0,
        }));
        let result = self.solver.converge(SweepMode::FixedSource);
        self.solver.set_transient_terms(None);
        result
    }

    /// Fission source `sum_g nu-sigma-f phi / k0` per FSR.
    fn fission_rates(&self) -> Vec<f64> {
        let ng = self.solver.num_groups();
        let flux = self.solver.flux();
        self.solver
            .materials()
            .iter()
            .enumerate()
            .map(|(r, m)| {
                (0..ng)
                    .map(|g| m.nu_sigma_f(g) * flux[r * ng + g])
                    .sum::<f64>()
                    / self.k0
            })
            .collect()
    }

    /// Fission power density per FSR, W/cm^3.
    fn power_densities(&self) -> Vec<f64> {
        let ng = self.solver.num_groups();
        let flux = self.solver.flux();
        self.solver
            .materials()
            .iter()
            .enumerate()
            .map(|(r, m)| {
                if !m.is_fissile() {
                    return 0.0;
                }
                (0..ng)
                    .map(|g| self.cfg.kappa * m.sigma_f(g, self.cfg.nu) * flux[r * ng + g])
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{Cell, CellFill, Geometry, Surface};
    use crate::material::Material;
    use crate::solver::SolverConfig;
    use crate::track::TrackGenerator;

    fn reflective_box(material: Material) -> MocSolver {
        reflective_box_cfg(material, SolverConfig::default())
    }

    fn reflective_box_cfg(material: Material, cfg: SolverConfig) -> MocSolver {
        let mut g = Geometry::new();
        let m = g.add_material(material).unwrap();
        let left = g.add_surface(Surface::x_plane(0.0)).unwrap();
        let right = g.add_surface(Surface::x_plane(1.0)).unwrap();
        let bottom = g.add_surface(Surface::y_plane(0.0)).unwrap();
        let top = g.add_surface(Surface::y_plane(1.0)).unwrap();
        g.add_cell(
            Cell::new(0, CellFill::Material(m))
                .with_surface(1, left)
                .with_surface(-1, right)
                .with_surface(1, bottom)
                .with_surface(-1, top),
        )
        .unwrap();
        g.initialize_flat_source_regions().unwrap();
        let tracks = TrackGenerator::new(8, 0.25).generate(&g, None).unwrap();
        MocSolver::new(&g, tracks, cfg).unwrap()
    }

    fn fuel() -> Material {
        let mut m = Material::new(1, 1);
        m.set_sigma_a(&[0.1]).unwrap();
        m.set_sigma_s(&[0.3]).unwrap();
        m.set_nu_sigma_f(&[0.11]).unwrap();
        m.set_chi(&[1.0]).unwrap();
        m
    }

    fn kinetics() -> KineticsData {
        KineticsData {
            lambda: vec![0.08],
            beta: vec![0.0065],
            velocity: vec![1.0e4],
        }
    }

    #[test]
    fn test_state_machine() {
        let cfg = TransientConfig::default();
        let mut tr = TransientSolver::new(reflective_box(fuel()), kinetics(), cfg).unwrap();
        // Stepping before the initial solve is rejected.
        assert!(matches!(
            tr.solve_outer_step(),
            Err(SolverError::TransientStep(
                TransientStepError::InvalidState { .. }
            ))
        ));
        tr.solve_initial_state().unwrap();
        // Re-solving the initial state is rejected too.
        assert!(matches!(
            tr.solve_initial_state(),
            Err(SolverError::TransientStep(
                TransientStepError::InvalidState { .. }
            ))
        ));
    }

    #[test]
    fn test_initial_power_normalization() {
        let cfg = TransientConfig {
            power_init: 250.0,
            ..TransientConfig::default()
        };
        let mut tr = TransientSolver::new(reflective_box(fuel()), kinetics(), cfg).unwrap();
        let out = tr.solve_initial_state().unwrap();
        assert!((out.keff - 1.1).abs() < 1e-3, "k0 {}", out.keff);
        assert!((tr.power() - 250.0).abs() / 250.0 < 1e-10);
        assert!((tr.core_temperature() - ROOM_TEMPERATURE).abs() < 1e-12);
    }

    #[test]
    fn test_steady_state_is_stationary() {
        // No cross-section motion: power must hold at its initial value.
        let cfg = TransientConfig {
            dt_moc: 5e-3,
            dt_cmfd: 1e-3,
            t_end: 2e-2,
            power_init: 100.0,
            ..TransientConfig::default()
        };
        let mut tr = TransientSolver::new(reflective_box(fuel()), kinetics(), cfg).unwrap();
        tr.solve_initial_state().unwrap();
        while !tr.is_finished() {
            tr.solve_outer_step().unwrap();
        }
        assert!((tr.time() - 2e-2).abs() < 1e-12);
        assert!(
            (tr.power() - 100.0).abs() / 100.0 < 1e-4,
            "power drifted to {}",
            tr.power()
        );
    }

    #[test]
    fn test_failed_step_restores_cross_sections() {
        // A large absorption drop makes the step prompt supercritical,
        // so the inner fixed-source solve cannot converge.
        let mut m = fuel();
        m.set_time_table(&[0.0, 1e-9], &[0.1, 0.05]).unwrap();
        let solver_cfg = SolverConfig {
            max_iterations: 200,
            ..SolverConfig::default()
        };
        let kinetics = KineticsData {
            lambda: vec![0.08],
            beta: vec![0.0065],
            velocity: vec![1.0e8],
        };
        let cfg = TransientConfig {
            dt_moc: 0.1,
            dt_cmfd: 0.05,
            t_end: 0.2,
            ..TransientConfig::default()
        };
        let mut tr =
            TransientSolver::new(reflective_box_cfg(m, solver_cfg), kinetics, cfg).unwrap();
        tr.solve_initial_state().unwrap();
        let power_before = tr.power();

        assert!(matches!(
            tr.solve_outer_step(),
            Err(SolverError::TransientStep(TransientStepError::Inner { .. }))
        ));
        // Time, power and the cross sections are back at the pre-step state.
        assert!(tr.time().abs() < 1e-15);
        assert!((tr.solver().materials()[0].sigma_a(0) - 0.1).abs() < 1e-12);
        assert!((tr.power() - power_before).abs() / power_before < 1e-12);
        // A failed solver refuses further steps.
        assert!(matches!(
            tr.solve_outer_step(),
            Err(SolverError::TransientStep(
                TransientStepError::InvalidState { .. }
            ))
        ));
    }

    #[test]
    fn test_config_validation() {
        let bad = TransientConfig {
            t_end: -1.0,
            ..TransientConfig::default()
        };
        assert!(matches!(
            TransientSolver::new(reflective_box(fuel()), kinetics(), bad),
            Err(SolverError::Config(_))
        ));

        let mismatched = KineticsData {
            lambda: vec![0.08],
            beta: vec![0.0065],
            velocity: vec![1.0e4, 2.0e5],
        };
        let cfg = TransientConfig::default();
        assert!(matches!(
            TransientSolver::new(reflective_box(fuel()), mismatched, cfg),
            Err(SolverError::Config(_))
        ));
    }
}
