//! Multigrid cycle behavior on a trivial model operator.
//!
//! With `A = I` the algebra stays exact: smoothing is plain damped
//! relaxation, restriction/interpolation form an averaging projector, and
//! every cycle shape must contract the error monotonically. That makes
//! convergence, fixed-point and cross-rank agreement checkable to tight
//! tolerances without a discretization in the loop.

use std::sync::{Arc, Mutex};
use std::thread;

use patch_forest::gmg::{GhostFiller, Operator, PatchSolver, PatchSolverSmoother, Smoother};
use patch_forest::prelude::*;
use patch_forest::vector::{PatchView, PatchViewMut};

struct Identity;

impl Operator<2> for Identity {
    fn apply(
        &self,
        _domain: &Domain<2>,
        x: &Vector<2>,
        b: &mut Vector<2>,
    ) -> Result<(), PatchForestError> {
        b.copy_from(x)
    }
}

struct Richardson {
    omega: f64,
}

impl Smoother<2> for Richardson {
    fn smooth(
        &self,
        domain: &Domain<2>,
        f: &Vector<2>,
        u: &mut Vector<2>,
    ) -> Result<(), PatchForestError> {
        for patch in domain.patch_infos() {
            let fv = f.patch_view(patch.local_index);
            let mut uv = u.patch_view_mut(patch.local_index);
            uv.for_each_interior_mut(|c, v| *v += self.omega * (fv.get_signed(c) - *v));
        }
        Ok(())
    }
}

/// Exact per-patch solve for the identity operator.
struct CopySolver;

impl PatchSolver<2> for CopySolver {
    fn solve(
        &self,
        _patch: &PatchInfo<2>,
        f: PatchView<'_, 2>,
        mut u: PatchViewMut<'_, 2>,
    ) -> Result<(), PatchForestError> {
        u.for_each_interior_mut(|c, v| *v = f.get_signed(c));
        Ok(())
    }
}

/// Clears the halo; sufficient coupling for an identity operator, and lets
/// the tests observe that a sweep refreshed the ghosts.
struct ZeroGhostFiller;

impl GhostFiller<2> for ZeroGhostFiller {
    fn fill_ghost(&self, domain: &Domain<2>, u: &mut Vector<2>) -> Result<(), PatchForestError> {
        let g = domain.num_ghost_cells() as isize;
        let [nx, ny] = domain.ns();
        for patch in domain.patch_infos() {
            let mut uv = u.patch_view_mut(patch.local_index);
            for x in -g..nx as isize + g {
                for y in -g..ny as isize + g {
                    let interior =
                        x >= 0 && x < nx as isize && y >= 0 && y < ny as isize;
                    if !interior {
                        uv.set_signed([x, y], 0.0);
                    }
                }
            }
        }
        Ok(())
    }
}

struct TestFactory<C> {
    comm: C,
}

impl<C: Communicator + Clone + Send + Sync + 'static> LevelFactory<2> for TestFactory<C> {
    fn operator(
        &self,
        _domain: &Arc<Domain<2>>,
        _finer: Option<&Arc<dyn Operator<2>>>,
    ) -> Arc<dyn Operator<2>> {
        Arc::new(Identity)
    }

    fn smoother(&self, _domain: &Arc<Domain<2>>) -> Arc<dyn Smoother<2>> {
        Arc::new(Richardson { omega: 0.7 })
    }

    fn restrictor(
        &self,
        fine: &Arc<Domain<2>>,
        coarse: &Arc<Domain<2>>,
    ) -> Result<Arc<dyn patch_forest::gmg::Restrictor<2>>, PatchForestError> {
        Ok(Arc::new(CellAverageRestrictor::new(
            fine.clone(),
            coarse.clone(),
            self.comm.clone(),
        )?))
    }

    fn interpolator(
        &self,
        fine: &Arc<Domain<2>>,
        coarse: &Arc<Domain<2>>,
    ) -> Result<Arc<dyn patch_forest::gmg::Interpolator<2>>, PatchForestError> {
        Ok(Arc::new(PiecewiseConstantInterpolator::new(
            fine.clone(),
            coarse.clone(),
            self.comm.clone(),
        )?))
    }
}

fn mixed_forest() -> QuadForest {
    let mut forest = QuadForest::new();
    forest.refine_all();
    forest.refine_all();
    forest.refine_cells(&[TreeCell {
        level: 2,
        coords: [0, 0],
    }]);
    forest
}

fn opts() -> GeneratorOpts<2> {
    GeneratorOpts {
        ns: [4, 4],
        ..GeneratorOpts::default()
    }
}

fn fill_f(domain: &Domain<2>, v: &mut Vector<2>) {
    for patch in domain.patch_infos() {
        let id = patch.id.get() as f64;
        let mut view = v.patch_view_mut(patch.local_index);
        let mut k = 0.0;
        view.for_each_interior_mut(|_, val| {
            *val = (id * 0.37 + k * 0.11).sin();
            k += 1.0;
        });
    }
}

fn residual_norm<C: Communicator>(
    domain: &Domain<2>,
    f: &Vector<2>,
    u: &Vector<2>,
    comm: &C,
) -> f64 {
    let mut r = Vector::new(domain);
    r.copy_from(f).unwrap();
    r.add_scaled(-1.0, u).unwrap();
    r.max_norm(comm).unwrap()
}

fn build_cycle<C: Communicator + Clone + Send + Sync + 'static>(
    cycle_type: CycleType,
    comm: &C,
) -> (Arc<Domain<2>>, Cycle<2>) {
    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), comm).unwrap();
    let domain = generator.finest_domain();
    let cycle_opts = CycleOpts {
        cycle_type,
        ..CycleOpts::default()
    };
    let cycle = CycleBuilder::new(cycle_opts)
        .build(&mut generator, &TestFactory { comm: comm.clone() })
        .unwrap();
    (domain, cycle)
}

#[test]
fn v_cycle_contracts_monotonically() {
    let (domain, mut cycle) = build_cycle(CycleType::V, &NoComm);
    assert_eq!(cycle.num_levels(), 4);
    let mut f = Vector::new(&domain);
    fill_f(&domain, &mut f);
    let mut u = Vector::new(&domain);
    let mut prev = residual_norm(&domain, &f, &u, &NoComm);
    for _ in 0..10 {
        cycle.apply(&f, &mut u).unwrap();
        let norm = residual_norm(&domain, &f, &u, &NoComm);
        assert!(norm < prev || norm == 0.0);
        prev = norm;
    }
    assert!(prev < 1e-8);
}

#[test]
fn w_and_f_cycles_converge() {
    for cycle_type in [CycleType::W, CycleType::F] {
        let (domain, mut cycle) = build_cycle(cycle_type, &NoComm);
        let mut f = Vector::new(&domain);
        fill_f(&domain, &mut f);
        let mut u = Vector::new(&domain);
        for _ in 0..8 {
            cycle.apply(&f, &mut u).unwrap();
        }
        assert!(
            residual_norm(&domain, &f, &u, &NoComm) < 1e-8,
            "{cycle_type:?} cycle failed to converge"
        );
    }
}

#[test]
fn exact_solution_is_a_fixed_point() {
    let (domain, mut cycle) = build_cycle(CycleType::V, &NoComm);
    let mut f = Vector::new(&domain);
    fill_f(&domain, &mut f);
    let mut u = Vector::new(&domain);
    u.copy_from(&f).unwrap();
    cycle.apply(&f, &mut u).unwrap();
    let mut diff = Vector::new(&domain);
    diff.copy_from(&u).unwrap();
    diff.add_scaled(-1.0, &f).unwrap();
    assert!(diff.max_norm(&NoComm).unwrap() < 1e-14);
}

#[test]
fn patch_solver_smoother_solves_identity_in_one_sweep() {
    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), &NoComm).unwrap();
    let domain = generator.finest_domain();
    let smoother = PatchSolverSmoother::new(CopySolver);
    let mut f = Vector::new(&domain);
    fill_f(&domain, &mut f);
    let mut u = Vector::new(&domain);
    smoother.smooth(&domain, &f, &mut u).unwrap();
    assert!(residual_norm(&domain, &f, &u, &NoComm) < 1e-15);
}

#[test]
fn ghost_filler_runs_before_the_sweep() {
    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), &NoComm).unwrap();
    let domain = generator.finest_domain();
    let smoother: PatchSolverSmoother<2, CopySolver> =
        PatchSolverSmoother::with_ghost_filler(CopySolver, Arc::new(ZeroGhostFiller));
    let mut f = Vector::new(&domain);
    fill_f(&domain, &mut f);
    let mut u = Vector::new(&domain);
    // Poison the halo; the sweep must refresh it before solving.
    for patch in domain.patch_infos() {
        u.patch_view_mut(patch.local_index).set_signed([-1, 0], 7.0);
    }
    smoother.smooth(&domain, &f, &mut u).unwrap();
    for patch in domain.patch_infos() {
        assert_eq!(u.patch_view(patch.local_index).get_signed([-1, 0]), 0.0);
    }
    assert!(residual_norm(&domain, &f, &u, &NoComm) < 1e-15);
}

#[test]
fn builder_respects_level_limits() {
    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), &NoComm).unwrap();
    let cycle = CycleBuilder::new(CycleOpts::default())
        .max_levels(2)
        .build(&mut generator, &TestFactory { comm: NoComm })
        .unwrap();
    assert_eq!(cycle.num_levels(), 2);

    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), &NoComm).unwrap();
    let cycle = CycleBuilder::new(CycleOpts::default())
        .patches_per_proc(1000)
        .build(&mut generator, &TestFactory { comm: NoComm })
        .unwrap();
    assert_eq!(cycle.num_levels(), 1);
}

/// Records, per operator callback, whether the finer level's operator was
/// handed in.
struct ChainFactory {
    finer_seen: Mutex<Vec<bool>>,
}

impl LevelFactory<2> for ChainFactory {
    fn operator(
        &self,
        _domain: &Arc<Domain<2>>,
        finer: Option<&Arc<dyn Operator<2>>>,
    ) -> Arc<dyn Operator<2>> {
        self.finer_seen.lock().unwrap().push(finer.is_some());
        Arc::new(Identity)
    }

    fn smoother(&self, _domain: &Arc<Domain<2>>) -> Arc<dyn Smoother<2>> {
        Arc::new(Richardson { omega: 0.7 })
    }

    fn restrictor(
        &self,
        fine: &Arc<Domain<2>>,
        coarse: &Arc<Domain<2>>,
    ) -> Result<Arc<dyn patch_forest::gmg::Restrictor<2>>, PatchForestError> {
        Ok(Arc::new(CellAverageRestrictor::new(
            fine.clone(),
            coarse.clone(),
            NoComm,
        )?))
    }

    fn interpolator(
        &self,
        fine: &Arc<Domain<2>>,
        coarse: &Arc<Domain<2>>,
    ) -> Result<Arc<dyn patch_forest::gmg::Interpolator<2>>, PatchForestError> {
        Ok(Arc::new(PiecewiseConstantInterpolator::new(
            fine.clone(),
            coarse.clone(),
            NoComm,
        )?))
    }
}

#[test]
fn operator_factory_receives_finer_operator() {
    let mut generator = TreeDomainGenerator::new(mixed_forest(), opts(), &NoComm).unwrap();
    let factory = ChainFactory {
        finer_seen: Mutex::new(Vec::new()),
    };
    let cycle = CycleBuilder::new(CycleOpts::default())
        .build(&mut generator, &factory)
        .unwrap();
    let finer_seen = factory.finer_seen.lock().unwrap();
    assert_eq!(finer_seen.len(), cycle.num_levels());
    // Finest level has nothing to restrict from; every coarser one does.
    assert!(!finer_seen[0]);
    assert!(finer_seen[1..].iter().all(|&seen| seen));
}

fn on_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalComm) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    LocalComm::universe(size)
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect()
}

fn collect_values(domain: &Domain<2>, v: &Vector<2>) -> Vec<(u64, Vec<f64>)> {
    domain
        .patch_infos()
        .iter()
        .map(|p| {
            let view = v.patch_view(p.local_index);
            let mut vals = Vec::new();
            view.for_each_interior(|_, x| vals.push(x));
            (p.id.get(), vals)
        })
        .collect()
}

fn run_cycles<C: Communicator + Clone + Send + Sync + 'static>(
    comm: &C,
    sweeps: usize,
) -> Vec<(u64, Vec<f64>)> {
    let (domain, mut cycle) = build_cycle(CycleType::V, comm);
    let mut f = Vector::new(&domain);
    fill_f(&domain, &mut f);
    let mut u = Vector::new(&domain);
    for _ in 0..sweeps {
        cycle.apply(&f, &mut u).unwrap();
    }
    collect_values(&domain, &u)
}

#[test]
fn distributed_cycle_matches_serial() {
    let mut serial = run_cycles(&NoComm, 3);
    serial.sort_by_key(|(id, _)| *id);
    for size in [2, 3] {
        let per_rank = on_ranks(size, move |comm| run_cycles(&comm, 3));
        let mut merged: Vec<(u64, Vec<f64>)> = per_rank.into_iter().flatten().collect();
        merged.sort_by_key(|(id, _)| *id);
        assert_eq!(merged.len(), serial.len());
        for ((id_a, vals_a), (id_b, vals_b)) in merged.iter().zip(serial.iter()) {
            assert_eq!(id_a, id_b);
            for (a, b) in vals_a.iter().zip(vals_b.iter()) {
                assert!((a - b).abs() < 1e-13, "patch {id_a} diverged on {size} ranks");
            }
        }
    }
}
