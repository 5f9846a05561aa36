use serde::{Deserialize, Serialize};

use crate::error::LinearSolveError;
use crate::geom::{BoundaryType, Bounds, Point, Vector};
use crate::material::Material;

/// Tag attached to a track segment that ends on a coarse-mesh face.
/// `sign` is +1 when the crossing moves along the +axis of the face normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCrossing {
    pub face: usize,
    pub sign: f64,
}

/// Regular nx x ny grid over the geometry bounding box.
///
/// Faces are indexed with all vertical faces first:
/// vertical face (line ix in 0..=nx, row iy) -> `iy * (nx + 1) + ix`,
/// horizontal face (col ix, line iy in 0..=ny) -> `nv + iy * nx + ix`.
#[derive(Debug, Clone)]
pub struct CoarseMesh {
    pub nx: usize,
    pub ny: usize,
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
}

impl CoarseMesh {
    pub fn from_bounds(b: &Bounds, nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            x0: b.x_min,
            y0: b.y_min,
            dx: b.width() / nx as f64,
            dy: b.height() / ny as f64,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.nx * self.ny
    }

    fn num_vertical_faces(&self) -> usize {
        (self.nx + 1) * self.ny
    }

    pub fn num_faces(&self) -> usize {
        self.num_vertical_faces() + self.nx * (self.ny + 1)
    }

    pub fn vertical_face(&self, ix_line: usize, iy: usize) -> usize {
        iy * (self.nx + 1) + ix_line
    }

    pub fn horizontal_face(&self, ix: usize, iy_line: usize) -> usize {
        self.num_vertical_faces() + iy_line * self.nx + ix
    }

    fn clamp_ix(&self, v: f64) -> usize {
        (v.max(0.0) as usize).min(self.nx - 1)
    }

    fn clamp_iy(&self, v: f64) -> usize {
        (v.max(0.0) as usize).min(self.ny - 1)
    }

    /// Cell containing `p`, clamped to the grid.
    pub fn cell_of(&self, p: &Point) -> usize {
        let ix = self.clamp_ix((p.x - self.x0) / self.dx);
        let iy = self.clamp_iy((p.y - self.y0) / self.dy);
        iy * self.nx + ix
    }

    /// Distance along `dir` to the next interior gridline, with the face
    /// crossed. Crossings of the outer boundary lines are not reported here;
    /// they are tagged separately at track ends.
    pub fn next_crossing(&self, p: &Point, dir: &Vector) -> Option<(f64, FaceCrossing)> {
        let eps = 1e-12;
        let mut best: Option<(f64, FaceCrossing)> = None;

        if dir.dx.abs() > eps {
            let fx = (p.x - self.x0) / self.dx;
            let line = if dir.dx > 0.0 {
                fx.floor() as i64 + 1
            } else {
                fx.ceil() as i64 - 1
            };
            if line >= 1 && line <= self.nx as i64 - 1 {
                let xl = self.x0 + line as f64 * self.dx;
                let t = (xl - p.x) / dir.dx;
                if t > 0.0 {
                    let y = p.y + t * dir.dy;
                    let iy = self.clamp_iy((y - self.y0) / self.dy);
                    best = Some((
                        t,
                        FaceCrossing {
                            face: self.vertical_face(line as usize, iy),
                            sign: dir.dx.signum(),
                        },
                    ));
                }
            }
        }

        if dir.dy.abs() > eps {
            let fy = (p.y - self.y0) / self.dy;
            let line = if dir.dy > 0.0 {
                fy.floor() as i64 + 1
            } else {
                fy.ceil() as i64 - 1
            };
            if line >= 1 && line <= self.ny as i64 - 1 {
                let yl = self.y0 + line as f64 * self.dy;
                let t = (yl - p.y) / dir.dy;
                if t > 0.0 && best.map_or(true, |(bt, _)| t < bt) {
                    let x = p.x + t * dir.dx;
                    let ix = self.clamp_ix((x - self.x0) / self.dx);
                    best = Some((
                        t,
                        FaceCrossing {
                            face: self.horizontal_face(ix, line as usize),
                            sign: dir.dy.signum(),
                        },
                    ));
                }
            }
        }
        best
    }

    /// Face tag for a track endpoint sitting on the outer boundary,
    /// crossed while moving along `dir`.
    pub fn boundary_crossing(&self, p: &Point, dir: &Vector) -> Option<FaceCrossing> {
        let tol = 1e-6 * (self.dx + self.dy);
        let w = self.dx * self.nx as f64;
        let h = self.dy * self.ny as f64;
        if (p.x - self.x0).abs() < tol || (p.x - (self.x0 + w)).abs() < tol {
            let line = if (p.x - self.x0).abs() < tol { 0 } else { self.nx };
            let iy = self.clamp_iy((p.y - self.y0) / self.dy);
            return Some(FaceCrossing {
                face: self.vertical_face(line, iy),
                sign: dir.dx.signum(),
            });
        }
        if (p.y - self.y0).abs() < tol || (p.y - (self.y0 + h)).abs() < tol {
            let line = if (p.y - self.y0).abs() < tol { 0 } else { self.ny };
            let ix = self.clamp_ix((p.x - self.x0) / self.dx);
            return Some(FaceCrossing {
                face: self.horizontal_face(ix, line),
                sign: dir.dy.signum(),
            });
        }
        None
    }
}

/// Knobs of the CMFD accelerator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CmfdConfig {
    /// SOR over-relaxation factor.
    pub omega: f64,
    /// Eigenvalue / linear-solve convergence tolerance.
    pub tolerance: f64,
    /// Under-relaxation of the nonlinear D-tilde update.
    pub relax: f64,
    pub max_sor_iterations: usize,
    pub max_power_iterations: usize,
}

impl Default for CmfdConfig {
    fn default() -> Self {
        Self {
            omega: 1.5,
            tolerance: 1e-8,
            relax: 0.6,
            max_sor_iterations: 20_000,
            max_power_iterations: 1000,
        }
    }
}

/// Borrowed view of the fine-mesh state the accelerator condenses.
pub(crate) struct CmfdFrame<'a> {
    pub materials: &'a [Material],
    pub volumes: &'a [f64],
    pub fsr_to_cell: &'a [usize],
    /// Tallied net surface currents, `face * ng + g`, +axis positive.
    pub currents: &'a [f64],
    pub num_groups: usize,
    pub bcs: [BoundaryType; 4],
}

pub(crate) enum CmfdMode<'a> {
    Eigenvalue,
    FixedSource {
        /// Volume-density external source per FSR and group.
        ext_source: &'a [f64],
        /// Prompt fission multiplier (1 - beta) / k0.
        prompt_factor: f64,
        /// Time-absorption term 1/(v_g dt) per group.
        inv_velocity_dt: &'a [f64],
    },
}

/// Coarse-mesh finite-difference accelerator.
///
/// Condenses FSR fluxes and cross sections onto the coarse grid, builds
/// D-hat / D-tilde surface couplings from the tallied MOC currents, solves
/// the coarse diffusion problem (power iteration with SOR inners, or a
/// single SOR solve in fixed-source mode) and prolongs the coarse flux
/// ratio back onto the FSRs.
pub struct Cmfd {
    cfg: CmfdConfig,
    mesh: CoarseMesh,
    d_tilde_prev: Vec<f64>,
    keff: f64,
    last_balance: Option<f64>,
}

/// Homogenized per-cell data for one accelerate() call.
struct CellData {
    vol: Vec<f64>,
    /// Cell-averaged flux from the fine mesh, `c * ng + g`.
    phi: Vec<f64>,
    sigma_a: Vec<f64>,
    nu_sigma_f: Vec<f64>,
    chi: Vec<f64>,
    dif: Vec<f64>,
    /// Scattering matrix per cell, `c * ng * ng + to * ng + from`.
    scat: Vec<f64>,
}

/// Surface couplings; boundary faces store outward-leakage coefficients.
struct Coupling {
    d_hat: Vec<f64>,
    d_tilde: Vec<f64>,
}

impl Cmfd {
    pub fn new(cfg: CmfdConfig, mesh: CoarseMesh) -> Self {
        Self {
            cfg,
            mesh,
            d_tilde_prev: Vec::new(),
            keff: 1.0,
            last_balance: None,
        }
    }

    pub fn mesh(&self) -> &CoarseMesh {
        &self.mesh
    }

    pub fn keff(&self) -> f64 {
        self.keff
    }

    /// Relative neutron-balance residual of the last coarse solve.
    pub fn last_balance(&self) -> Option<f64> {
        self.last_balance
    }

    pub(crate) fn accelerate(
        &mut self,
        frame: &CmfdFrame,
        flux: &mut [f64],
        mode: &CmfdMode,
    ) -> Result<f64, LinearSolveError> {
        let ng = frame.num_groups;
        let nc = self.mesh.num_cells();
        let data = self.aggregate(frame, flux);
        let coupling = self.compute_coupling(frame, &data);

        // Coarse solve starts from the condensed fine-mesh flux.
        let mut phi: Vec<f64> = data.phi.clone();

        let k = match mode {
            CmfdMode::Eigenvalue => {
                let k = self.solve_eigenvalue(&data, &coupling, &mut phi, ng)?;
                self.last_balance =
                    Some(self.balance_residual(&data, &coupling, &phi, k, ng));
                k
            }
            CmfdMode::FixedSource {
                ext_source,
                prompt_factor,
                inv_velocity_dt,
            } => {
                let ext = self.aggregate_ext(frame, ext_source);
                self.solve_fixed_source(
                    &data,
                    &coupling,
                    &mut phi,
                    &ext,
                    *prompt_factor,
                    inv_velocity_dt,
                    ng,
                )?;
                self.keff
            }
        };

        // Multiplicative prolongation of the coarse flux ratio.
        let mut factor = vec![1.0f64; nc * ng];
        for c in 0..nc {
            for g in 0..ng {
                let old = data.phi[c * ng + g];
                let new = phi[c * ng + g];
                if old > 0.0 && new > 0.0 {
                    factor[c * ng + g] = (new / old).clamp(0.05, 20.0);
                }
            }
        }
        for (r, &c) in frame.fsr_to_cell.iter().enumerate() {
            for g in 0..ng {
                flux[r * ng + g] *= factor[c * ng + g];
            }
        }

        if matches!(mode, CmfdMode::Eigenvalue) {
            self.keff = k;
        }
        Ok(k)
    }

    /// Volume-flux condensation of xs and flux onto the coarse cells.
    fn aggregate(&self, frame: &CmfdFrame, flux: &[f64]) -> CellData {
        let ng = frame.num_groups;
        let nc = self.mesh.num_cells();
        let mut vol = vec![0.0; nc];
        let mut phi_v = vec![0.0; nc * ng];
        let mut sa = vec![0.0; nc * ng];
        let mut nsf = vec![0.0; nc * ng];
        let mut dif = vec![0.0; nc * ng];
        let mut chi_w = vec![0.0; nc * ng];
        let mut fis_w = vec![0.0; nc];
        let mut scat = vec![0.0; nc * ng * ng];

        for (r, &c) in frame.fsr_to_cell.iter().enumerate() {
            let v = frame.volumes[r];
            if v <= 0.0 {
                continue;
            }
            let m = &frame.materials[r];
            vol[c] += v;
            let mut fis = 0.0;
            for g in 0..ng {
                let vf = v * flux[r * ng + g];
                phi_v[c * ng + g] += vf;
                sa[c * ng + g] += vf * m.sigma_a(g);
                nsf[c * ng + g] += vf * m.nu_sigma_f(g);
                dif[c * ng + g] += vf * m.dif_coef(g);
                fis += vf * m.nu_sigma_f(g);
                for to in 0..ng {
                    scat[c * ng * ng + to * ng + g] += vf * m.sigma_s(to, g);
                }
            }
            fis_w[c] += fis;
            for g in 0..ng {
                chi_w[c * ng + g] += fis * m.chi(g);
            }
        }

        let mut phi = vec![0.0; nc * ng];
        for c in 0..nc {
            for g in 0..ng {
                let w = phi_v[c * ng + g];
                if w > 0.0 {
                    sa[c * ng + g] /= w;
                    nsf[c * ng + g] /= w;
                    dif[c * ng + g] /= w;
                    for to in 0..ng {
                        scat[c * ng * ng + to * ng + g] /= w;
                    }
                }
                if vol[c] > 0.0 {
                    phi[c * ng + g] = w / vol[c];
                }
                chi_w[c * ng + g] = if fis_w[c] > 0.0 {
                    chi_w[c * ng + g] / fis_w[c]
                } else {
                    0.0
                };
            }
        }

        CellData {
            vol,
            phi,
            sigma_a: sa,
            nu_sigma_f: nsf,
            chi: chi_w,
            dif,
            scat,
        }
    }

    fn aggregate_ext(&self, frame: &CmfdFrame, ext_source: &[f64]) -> Vec<f64> {
        let ng = frame.num_groups;
        let mut ext = vec![0.0; self.mesh.num_cells() * ng];
        for (r, &c) in frame.fsr_to_cell.iter().enumerate() {
            let v = frame.volumes[r];
            for g in 0..ng {
                ext[c * ng + g] += v * ext_source[r * ng + g];
            }
        }
        ext
    }

    /// D-hat / D-tilde per face per group. The nonlinear correction is
    /// under-relaxed against the previous call and bounded by D-hat so the
    /// operator stays solvable while the currents are still noisy.
    fn compute_coupling(&mut self, frame: &CmfdFrame, data: &CellData) -> Coupling {
        let ng = frame.num_groups;
        let mesh = &self.mesh;
        let (nx, ny) = (mesh.nx, mesh.ny);
        let nf = mesh.num_faces();
        if self.d_tilde_prev.len() != nf * ng {
            self.d_tilde_prev = vec![0.0; nf * ng];
        }
        let mut d_hat = vec![0.0; nf * ng];
        let mut d_tilde = vec![0.0; nf * ng];
        let relax = self.cfg.relax;

        // Vertical faces.
        for iy in 0..ny {
            for line in 0..=nx {
                let fi = mesh.vertical_face(line, iy);
                for g in 0..ng {
                    let j = frame.currents[fi * ng + g];
                    if line == 0 || line == nx {
                        let (c, bc, outward) = if line == 0 {
                            (iy * nx, frame.bcs[0], -j)
                        } else {
                            (iy * nx + nx - 1, frame.bcs[1], j)
                        };
                        let (hat, tilde) = boundary_coupling(
                            bc,
                            data.dif[c * ng + g],
                            mesh.dx,
                            mesh.dy,
                            data.phi[c * ng + g],
                            outward,
                        );
                        apply_coupling(
                            fi * ng + g,
                            hat,
                            tilde,
                            relax,
                            &mut d_hat,
                            &mut d_tilde,
                            &mut self.d_tilde_prev,
                        );
                    } else {
                        let cl = iy * nx + line - 1;
                        let cr = iy * nx + line;
                        let (dl, dr) = (data.dif[cl * ng + g], data.dif[cr * ng + g]);
                        let hat = if dl + dr > 0.0 {
                            2.0 * dl * dr / (mesh.dx * (dl + dr)) * mesh.dy
                        } else {
                            0.0
                        };
                        let (pl, pr) = (data.phi[cl * ng + g], data.phi[cr * ng + g]);
                        let tilde = if pl + pr > 0.0 {
                            -(j + hat * (pr - pl)) / (pl + pr)
                        } else {
                            0.0
                        };
                        apply_coupling(
                            fi * ng + g,
                            hat,
                            tilde,
                            relax,
                            &mut d_hat,
                            &mut d_tilde,
                            &mut self.d_tilde_prev,
                        );
                    }
                }
            }
        }

        // Horizontal faces.
        for line in 0..=ny {
            for ix in 0..nx {
                let fi = mesh.horizontal_face(ix, line);
                for g in 0..ng {
                    let j = frame.currents[fi * ng + g];
                    if line == 0 || line == ny {
                        let (c, bc, outward) = if line == 0 {
                            (ix, frame.bcs[2], -j)
                        } else {
                            ((ny - 1) * nx + ix, frame.bcs[3], j)
                        };
                        let (hat, tilde) = boundary_coupling(
                            bc,
                            data.dif[c * ng + g],
                            mesh.dy,
                            mesh.dx,
                            data.phi[c * ng + g],
                            outward,
                        );
                        apply_coupling(
                            fi * ng + g,
                            hat,
                            tilde,
                            relax,
                            &mut d_hat,
                            &mut d_tilde,
                            &mut self.d_tilde_prev,
                        );
                    } else {
                        let cb = (line - 1) * nx + ix;
                        let ct = line * nx + ix;
                        let (db, dt) = (data.dif[cb * ng + g], data.dif[ct * ng + g]);
                        let hat = if db + dt > 0.0 {
                            2.0 * db * dt / (mesh.dy * (db + dt)) * mesh.dx
                        } else {
                            0.0
                        };
                        let (pb, pt) = (data.phi[cb * ng + g], data.phi[ct * ng + g]);
                        let tilde = if pb + pt > 0.0 {
                            -(j + hat * (pt - pb)) / (pb + pt)
                        } else {
                            0.0
                        };
                        apply_coupling(
                            fi * ng + g,
                            hat,
                            tilde,
                            relax,
                            &mut d_hat,
                            &mut d_tilde,
                            &mut self.d_tilde_prev,
                        );
                    }
                }
            }
        }

        Coupling { d_hat, d_tilde }
    }

    /// One SOR pass; returns the max relative flux change.
    #[allow(clippy::too_many_arguments)]
    fn sor_sweep(
        &self,
        data: &CellData,
        coupling: &Coupling,
        phi: &mut [f64],
        fission_term: &[f64],
        ext: Option<&[f64]>,
        prompt_factor: Option<f64>,
        inv_velocity_dt: Option<&[f64]>,
        ng: usize,
    ) -> f64 {
        let mesh = &self.mesh;
        let (nx, ny) = (mesh.nx, mesh.ny);
        let omega = self.cfg.omega;
        let mut max_rel: f64 = 0.0;

        for iy in 0..ny {
            for ix in 0..nx {
                let c = iy * nx + ix;
                let vol = data.vol[c];
                if vol <= 0.0 {
                    continue;
                }
                // Fission source of this cell with the latest flux, only
                // used in fixed-source mode (eigenvalue mode freezes it).
                let cell_fission: f64 = prompt_factor.map_or(0.0, |pf| {
                    pf * (0..ng)
                        .map(|g| data.nu_sigma_f[c * ng + g] * phi[c * ng + g])
                        .sum::<f64>()
                });

                for g in 0..ng {
                    let i = c * ng + g;
                    let mut diag = vol
                        * (data.sigma_a[i]
                            + out_scatter(data, c, g, ng)
                            + inv_velocity_dt.map_or(0.0, |v| v[g]));
                    let mut rhs = 0.0;

                    // In-scatter with the latest flux values.
                    for from in 0..ng {
                        if from != g {
                            rhs += vol * data.scat[c * ng * ng + g * ng + from] * phi[c * ng + from];
                        }
                    }
                    rhs += match prompt_factor {
                        // Fixed-source: prompt fission follows the iterate.
                        Some(_) => vol * data.chi[i] * cell_fission,
                        // Eigenvalue: frozen fission source for this outer.
                        None => data.chi[i] * fission_term[c],
                    };
                    if let Some(e) = ext {
                        rhs += e[i];
                    }

                    // Face couplings.
                    let fl = mesh.vertical_face(ix, iy) * ng + g;
                    let fr = mesh.vertical_face(ix + 1, iy) * ng + g;
                    let fb = mesh.horizontal_face(ix, iy) * ng + g;
                    let ft = mesh.horizontal_face(ix, iy + 1) * ng + g;

                    if ix == 0 {
                        diag += coupling.d_hat[fl] + coupling.d_tilde[fl];
                    } else {
                        diag += coupling.d_hat[fl] + coupling.d_tilde[fl];
                        rhs -= (coupling.d_tilde[fl] - coupling.d_hat[fl])
                            * phi[(c - 1) * ng + g];
                    }
                    if ix == nx - 1 {
                        diag += coupling.d_hat[fr] + coupling.d_tilde[fr];
                    } else {
                        diag += coupling.d_hat[fr] - coupling.d_tilde[fr];
                        rhs -= (-coupling.d_hat[fr] - coupling.d_tilde[fr])
                            * phi[(c + 1) * ng + g];
                    }
                    if iy == 0 {
                        diag += coupling.d_hat[fb] + coupling.d_tilde[fb];
                    } else {
                        diag += coupling.d_hat[fb] + coupling.d_tilde[fb];
                        rhs -= (coupling.d_tilde[fb] - coupling.d_hat[fb])
                            * phi[(c - nx) * ng + g];
                    }
                    if iy == ny - 1 {
                        diag += coupling.d_hat[ft] + coupling.d_tilde[ft];
                    } else {
                        diag += coupling.d_hat[ft] - coupling.d_tilde[ft];
                        rhs -= (-coupling.d_hat[ft] - coupling.d_tilde[ft])
                            * phi[(c + nx) * ng + g];
                    }

                    if diag.abs() < 1e-300 {
                        continue;
                    }
                    let old = phi[i];
                    let new = (1.0 - omega) * old + omega * rhs / diag;
                    phi[i] = new;
                    if new.abs() > 1e-300 {
                        max_rel = max_rel.max(((new - old) / new).abs());
                    }
                }
            }
        }
        max_rel
    }

    fn sor_solve(
        &self,
        data: &CellData,
        coupling: &Coupling,
        phi: &mut [f64],
        fission_term: &[f64],
        ext: Option<&[f64]>,
        prompt_factor: Option<f64>,
        inv_velocity_dt: Option<&[f64]>,
        ng: usize,
    ) -> Result<(), LinearSolveError> {
        let mut res = f64::INFINITY;
        for it in 1..=self.cfg.max_sor_iterations {
            res = self.sor_sweep(
                data,
                coupling,
                phi,
                fission_term,
                ext,
                prompt_factor,
                inv_velocity_dt,
                ng,
            );
            if !res.is_finite() || res > 1e10 {
                return Err(LinearSolveError::SorDiverged {
                    iterations: it,
                    residual: res,
                });
            }
            if res < self.cfg.tolerance {
                return Ok(());
            }
        }
        Err(LinearSolveError::SorDiverged {
            iterations: self.cfg.max_sor_iterations,
            residual: res,
        })
    }

    fn solve_eigenvalue(
        &self,
        data: &CellData,
        coupling: &Coupling,
        phi: &mut [f64],
        ng: usize,
    ) -> Result<f64, LinearSolveError> {
        let nc = self.mesh.num_cells();
        let mut k = self.keff;
        let fission_of = |phi: &[f64]| -> Vec<f64> {
            (0..nc)
                .map(|c| {
                    data.vol[c]
                        * (0..ng)
                            .map(|g| data.nu_sigma_f[c * ng + g] * phi[c * ng + g])
                            .sum::<f64>()
                })
                .collect()
        };

        let mut fission = fission_of(phi);
        let total0: f64 = fission.iter().sum();
        if total0 <= 0.0 {
            // Nothing fissile on the coarse mesh; leave the flux untouched.
            return Ok(k);
        }

        for outer in 1..=self.cfg.max_power_iterations {
            let total_old: f64 = fission.iter().sum();
            let term: Vec<f64> = fission.iter().map(|f| f / k).collect();
            self.sor_solve(data, coupling, phi, &term, None, None, None, ng)?;

            let fission_new = fission_of(phi);
            let total_new: f64 = fission_new.iter().sum();
            let k_new = k * total_new / total_old;

            let mut src_res = 0.0;
            let mut n = 0usize;
            for c in 0..nc {
                if fission_new[c] > 0.0 {
                    let d = fission_new[c] / total_new - fission[c] / total_old;
                    src_res += (d * total_new / fission_new[c]).powi(2);
                    n += 1;
                }
            }
            let src_res = if n > 0 { (src_res / n as f64).sqrt() } else { 0.0 };

            let dk = ((k_new - k) / k_new).abs();
            fission = fission_new;
            k = k_new;
            if outer > 1 && dk < self.cfg.tolerance && src_res < 1e-6 {
                return Ok(k);
            }
        }
        Err(LinearSolveError::PowerIterationDiverged {
            iterations: self.cfg.max_power_iterations,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn solve_fixed_source(
        &self,
        data: &CellData,
        coupling: &Coupling,
        phi: &mut [f64],
        ext: &[f64],
        prompt_factor: f64,
        inv_velocity_dt: &[f64],
        ng: usize,
    ) -> Result<(), LinearSolveError> {
        let fission_term = vec![0.0; self.mesh.num_cells()];
        self.sor_solve(
            data,
            coupling,
            phi,
            &fission_term,
            Some(ext),
            Some(prompt_factor),
            Some(inv_velocity_dt),
            ng,
        )
    }

    /// Relative neutron-balance defect of the solved coarse eigensystem:
    /// production over k minus absorption and boundary leakage.
    fn balance_residual(
        &self,
        data: &CellData,
        coupling: &Coupling,
        phi: &[f64],
        k: f64,
        ng: usize,
    ) -> f64 {
        let mesh = &self.mesh;
        let (nx, ny) = (mesh.nx, mesh.ny);
        let nc = mesh.num_cells();

        let mut production = 0.0;
        let mut absorption = 0.0;
        for c in 0..nc {
            for g in 0..ng {
                let i = c * ng + g;
                production += data.vol[c] * data.nu_sigma_f[i] * phi[i];
                absorption += data.vol[c] * data.sigma_a[i] * phi[i];
            }
        }

        let mut leakage = 0.0;
        for iy in 0..ny {
            for g in 0..ng {
                let fl = mesh.vertical_face(0, iy) * ng + g;
                let fr = mesh.vertical_face(nx, iy) * ng + g;
                leakage += (coupling.d_hat[fl] + coupling.d_tilde[fl]) * phi[(iy * nx) * ng + g];
                leakage +=
                    (coupling.d_hat[fr] + coupling.d_tilde[fr]) * phi[(iy * nx + nx - 1) * ng + g];
            }
        }
        for ix in 0..nx {
            for g in 0..ng {
                let fb = mesh.horizontal_face(ix, 0) * ng + g;
                let ft = mesh.horizontal_face(ix, ny) * ng + g;
                leakage += (coupling.d_hat[fb] + coupling.d_tilde[fb]) * phi[ix * ng + g];
                leakage += (coupling.d_hat[ft] + coupling.d_tilde[ft])
                    * phi[((ny - 1) * nx + ix) * ng + g];
            }
        }

        let gain = production / k;
        let loss = absorption + leakage;
        if gain.abs() > 0.0 {
            ((gain - loss) / gain).abs()
        } else {
            0.0
        }
    }
}

/// Outward-leakage coefficients (J_out = (hat + tilde) * phi) for a
/// boundary face. `thickness` is the cell size normal to the face,
/// `length` the face extent.
fn boundary_coupling(
    bc: BoundaryType,
    dif: f64,
    thickness: f64,
    length: f64,
    phi: f64,
    j_out: f64,
) -> (f64, f64) {
    match bc {
        BoundaryType::Reflective => (0.0, 0.0),
        BoundaryType::Vacuum => {
            let hat = 2.0 * dif / (thickness + 4.0 * dif) * length;
            let tilde = if phi > 0.0 { j_out / phi - hat } else { 0.0 };
            (hat, tilde)
        }
    }
}

/// Under-relaxes and bounds one D-tilde entry against its D-hat.
fn apply_coupling(
    i: usize,
    hat: f64,
    tilde_new: f64,
    relax: f64,
    d_hat: &mut [f64],
    d_tilde: &mut [f64],
    prev: &mut [f64],
) {
    let mut t = relax * tilde_new + (1.0 - relax) * prev[i];
    if t.abs() > hat {
        t = hat * t.signum();
    }
    d_hat[i] = hat;
    d_tilde[i] = t;
    prev[i] = t;
}

fn out_scatter(data: &CellData, c: usize, g: usize, ng: usize) -> f64 {
    (0..ng)
        .filter(|&to| to != g)
        .map(|to| data.scat[c * ng * ng + to * ng + g])
        .sum()
}
