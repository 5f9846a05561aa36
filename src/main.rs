use anyhow::Result;
use moc2d::cmfd::{Cmfd, CmfdConfig, CoarseMesh};
use moc2d::solver::{MocSolver, SolverConfig, SweepMode};
use moc2d::transient::{KineticsData, TransientConfig, TransientSolver};
use moc2d::{Cell, CellFill, Geometry, Material, Surface, TrackGenerator};

/// Two-group pin cell: a fuel circle in water, reflective 1.26 cm box.
fn pin_cell() -> Result<Geometry> {
    let mut g = Geometry::new();

    let mut fuel = Material::new(1, 2);
    fuel.set_sigma_a(&[0.0092, 0.079])?;
    fuel.set_sigma_s(&[0.53, 0.0, 0.02, 1.07])?;
    fuel.set_nu_sigma_f(&[0.0069, 0.142])?;
    fuel.set_chi(&[1.0, 0.0])?;
    let mut water = Material::new(2, 2);
    water.set_sigma_a(&[0.0006, 0.0197])?;
    water.set_sigma_s(&[0.56, 0.0, 0.045, 1.35])?;

    let fuel = g.add_material(fuel)?;
    let water = g.add_material(water)?;

    let circle = g.add_surface(Surface::circle(0.63, 0.63, 0.45))?;
    let left = g.add_surface(Surface::x_plane(0.0))?;
    let right = g.add_surface(Surface::x_plane(1.26))?;
    let bottom = g.add_surface(Surface::y_plane(0.0))?;
    let top = g.add_surface(Surface::y_plane(1.26))?;

    g.add_cell(Cell::new(0, CellFill::Material(fuel)).with_surface(-1, circle))?;
    g.add_cell(
        Cell::new(0, CellFill::Material(water))
            .with_surface(1, circle)
            .with_surface(1, left)
            .with_surface(-1, right)
            .with_surface(1, bottom)
            .with_surface(-1, top),
    )?;
    g.initialize_flat_source_regions()?;
    Ok(g)
}

fn main() -> Result<()> {
    // Steady state: CMFD-accelerated eigenvalue solve of the pin cell.
    let g = pin_cell()?;
    let mesh = CoarseMesh::from_bounds(g.bounds()?, 2, 2);
    let tracks = TrackGenerator::new(32, 0.05).generate(&g, Some(&mesh))?;
    let cmfd = Cmfd::new(CmfdConfig::default(), mesh);
    let mut solver = MocSolver::new(&g, tracks, SolverConfig::default())?.with_cmfd(cmfd)?;
    let out = solver.converge_with_progress(SweepMode::Eigenvalue, 5, |p| {
        println!(
            "iter {:4}  k = {:.6}  residual = {:.3e}",
            p.iteration, p.keff, p.residual
        );
    })?;
    println!(
        "pin cell k-eff = {:.6} after {} iterations\n",
        out.keff, out.iterations
    );

    // Transient: a small prompt reactivity step in an infinite medium.
    let mut fuel = Material::new(1, 1);
    fuel.set_sigma_a(&[0.1])?;
    fuel.set_sigma_s(&[0.3])?;
    fuel.set_nu_sigma_f(&[0.11])?;
    fuel.set_chi(&[1.0])?;
    fuel.set_time_table(&[0.0, 1e-9], &[0.1, 0.0995])?;

    let mut g = Geometry::new();
    let m = g.add_material(fuel)?;
    let left = g.add_surface(Surface::x_plane(0.0))?;
    let right = g.add_surface(Surface::x_plane(1.0))?;
    let bottom = g.add_surface(Surface::y_plane(0.0))?;
    let top = g.add_surface(Surface::y_plane(1.0))?;
    g.add_cell(
        Cell::new(0, CellFill::Material(m))
            .with_surface(1, left)
            .with_surface(-1, right)
            .with_surface(1, bottom)
            .with_surface(-1, top),
    )?;
    g.initialize_flat_source_regions()?;
    let tracks = TrackGenerator::new(8, 0.25).generate(&g, None)?;
    let solver = MocSolver::new(&g, tracks, SolverConfig::default())?;

    let kinetics = KineticsData {
        lambda: vec![0.08],
        beta: vec![0.0065],
        velocity: vec![1.0e4],
    };
    let cfg = TransientConfig {
        dt_moc: 1e-3,
        dt_cmfd: 2e-4,
        t_end: 1e-2,
        power_init: 1.0,
        ..TransientConfig::default()
    };
    let mut transient = TransientSolver::new(solver, kinetics, cfg)?;
    transient.solve_initial_state()?;
    println!(
        "initial k = {:.6}, power = {:.4} W",
        transient.keff_initial(),
        transient.power()
    );
    while !transient.is_finished() {
        transient.solve_outer_step()?;
        println!("t = {:.4} s  power = {:.4} W", transient.time(), transient.power());
    }
    Ok(())
}
