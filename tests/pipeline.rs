use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use angmom::{
    angmom::calc_ang_mom_ops,
    config::ModelConfig,
    constants::HARTREE2INVCM,
    hamiltonian::{ ParamKey, TermKind, TermLabel },
    linalg::{ dagger, expm, hermitize, unitary_transform },
    projection::{ ModelProjection, SpinFreeData },
    spin::SpinTotal,
};

// spin-free data of a single term of orbital angular momentum `l` and
// multiplicity `mult`, in a random orbital basis, with spin-orbit coupling
// `zeta L·S` and a constant energy `e0`
fn single_term_data(l: u32, mult: usize, zeta: f64, e0: f64, seed: u64) -> SpinFreeData {
    let n = (2 * l + 1) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let gen: nd::Array2<C64>
        = nd::Array2::from_shape_fn((n, n), |_| C64::new(rng.gen(), rng.gen()));
    let U = expm(&hermitize(&gen).mapv(|z| C64::i() * z)).unwrap();
    let l_ops = calc_ang_mom_ops(SpinTotal::new(2 * l)).cart();
    let s = SpinTotal::from_mult(mult).f();
    let norm = (s * (s + 1.0) * (2.0 * s + 1.0)).sqrt();
    let mut angm: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
    let mut amfi: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
    for c in 0..3 {
        let rot = unitary_transform(&l_ops.index_axis(nd::Axis(0), c).to_owned(), &dagger(&U));
        amfi.index_axis_mut(nd::Axis(0), c).assign(&rot.mapv(|z| -C64::i() * z * zeta * norm));
        angm.index_axis_mut(nd::Axis(0), c).assign(&rot);
    }
    SpinFreeData {
        mults: vec![mult],
        energies: vec![nd::Array2::eye(n).mapv(|z: C64| z * e0)],
        angm: vec![angm],
        amfi: vec![vec![amfi]],
    }
}

fn soc_of(proj: &ModelProjection) -> (f64, f64) {
    let params = proj.evaluate().unwrap();
    let shift
        = params.param(&TermLabel::new(TermKind::Diag, []), &ParamKey::Shift)
        .unwrap();
    let lamb
        = params.param(&TermLabel::new(TermKind::Soc, ['L', 'S']), &ParamKey::Lamb(None))
        .unwrap();
    (shift, lamb)
}

#[test]
fn configured_projection_of_d_term() {
    let doc = r#"
        model_space = "4D"

        [terms]
        soc = [["L", "S"]]
    "#;
    let config = ModelConfig::from_toml_str(doc).unwrap();
    let data = single_term_data(2, 4, 5e-4, 0.1, 11);
    let proj = ModelProjection::new(data, config.into()).unwrap();
    assert_eq!(proj.terms().len(), 1);
    let (shift, lamb) = soc_of(&proj);
    assert!((shift - 0.1 * HARTREE2INVCM).abs() < 1e-5);
    assert!((lamb - 5e-4 * HARTREE2INVCM).abs() < 1e-5);
}

#[test]
fn isotropic_coupling_is_frame_independent() {
    let doc = r#"
        model_space = "3P"
        quax = [[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]

        [terms]
        soc = [["L", "S"]]
    "#;
    let config = ModelConfig::from_toml_str(doc).unwrap();
    let data = single_term_data(1, 3, -1e-3, 0.0, 23);
    let proj = ModelProjection::new(data, config.into()).unwrap();
    let (shift, lamb) = soc_of(&proj);
    assert!(shift.abs() < 1e-5);
    assert!((lamb + 1e-3 * HARTREE2INVCM).abs() < 1e-5);
}

#[test]
fn spin_orbit_spectrum_is_preserved() {
    let data = single_term_data(1, 2, 1e-3, 0.0, 7);
    let doc = "model_space = \"2P\"";
    let config = ModelConfig::from_toml_str(doc).unwrap();
    let proj = ModelProjection::new(data.clone(), config.into()).unwrap();
    let H = proj.model_hamiltonian(&[]).unwrap();
    let ws = data.ws_hamiltonian().unwrap();
    // the term basis spans the whole spin-orbit space here
    let tr_model: C64 = H.diag().sum();
    let tr_ws: C64 = ws.diag().sum();
    assert!((tr_model - tr_ws).norm() < 1e-12);
    let sq_model: f64 = H.iter().map(|z| z.norm_sqr()).sum();
    let sq_ws: f64 = ws.iter().map(|z| z.norm_sqr()).sum();
    assert!((sq_model - sq_ws).abs() < 1e-12);
}

#[test]
fn term_content_report() {
    let data = single_term_data(3, 1, 0.0, 0.0, 2);
    let content = data.term_content().unwrap();
    let report = content.to_string();
    assert!(report.contains("1.00 |1F>"));
    assert!(!report.contains("|1D>"));
}
