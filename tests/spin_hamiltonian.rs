use indexmap::IndexMap;
use ndarray as nd;
use ndarray_linalg::assert::close_l2;
use num_complex::Complex64 as C64;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use angmom::{
    constants::HARTREE2INVCM,
    hamiltonian::{
        ModelParameters,
        ParamKey,
        SpinHamiltonian,
        SpinHamiltonianParams,
        TermKind,
        TimeReversal,
    },
    spin::SpinTotal,
    symbol::Symbol,
};

// D orbital, spin 1 and a spin-1/2 partner
fn mixed_space() -> Symbol {
    Symbol::uncoupled([
        ('L', SpinTotal::new(4)),
        ('S', SpinTotal::new(2)),
        ('R', SpinTotal::new(1)),
    ])
    .unwrap()
}

fn mixed_model(iso_soc: bool, time_reversal_symm: TimeReversal) -> SpinHamiltonian {
    let mut terms: IndexMap<TermKind, Vec<Vec<char>>> = IndexMap::new();
    terms.insert(TermKind::Soc, vec![vec!['L', 'S']]);
    terms.insert(TermKind::Cf, vec![vec!['L']]);
    terms.insert(TermKind::LZee, vec![vec!['L']]);
    terms.insert(TermKind::SZee, vec![vec!['S']]);
    terms.insert(TermKind::Ex, vec![vec!['S', 'R']]);
    let params = SpinHamiltonianParams {
        k_max: 4,
        iso_soc,
        time_reversal_symm,
        terms,
        ..SpinHamiltonianParams::default()
    };
    SpinHamiltonian::new(mixed_space(), params).unwrap()
}

// random parameters for every operator of the model and the Hamiltonian
// (cm⁻¹) they span
fn random_hamiltonian(model: &SpinHamiltonian, rng: &mut StdRng)
    -> (ModelParameters, nd::Array2<C64>)
{
    let n = model.dim();
    let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
    let params: ModelParameters
        = model.terms().iter()
        .map(|(label, ops)| {
            let values: IndexMap<ParamKey, f64>
                = ops.iter()
                .map(|(key, op)| {
                    let value: f64 = rng.gen_range(-100.0..100.0);
                    H.scaled_add(C64::from(value), op);
                    (key.clone(), value)
                })
                .collect();
            (label.clone(), values)
        })
        .collect();
    (params, H)
}

#[test]
fn project_parametrise_round_trip_over_all_term_kinds() {
    let mut rng = StdRng::seed_from_u64(1234);
    let settings = [
        (true, TimeReversal::Even, 1 + 1 + 14 + 3 + 3 + 9),
        (false, TimeReversal::Even, 1 + 3 + 14 + 3 + 3 + 9),
        (true, TimeReversal::Odd, 1 + 1 + 14 + 3 + 3 + 15),
        (false, TimeReversal::Any, 1 + 3 + 14 + 3 + 3 + 24),
    ];
    for (iso_soc, trs, num_params) in settings {
        let model = mixed_model(iso_soc, trs);
        assert_eq!(model.dim(), 30);
        assert_eq!(model.num_params(), num_params, "iso_soc = {}, {:?}", iso_soc, trs);

        let (truth, H) = random_hamiltonian(&model, &mut rng);
        let fitted = model.project(&H.mapv(|v| v / HARTREE2INVCM), false).unwrap();
        for (label, values) in truth.iter() {
            for (key, value) in values.iter() {
                let fit = fitted.param(label, key).unwrap();
                assert!(
                    (fit - value).abs() < 1e-6,
                    "{} {} ({:?}): {} vs {}", label, key, trs, fit, value,
                );
            }
        }
        let rebuilt = model.parametrise(&fitted, None).unwrap();
        close_l2(&rebuilt, &H, 1e-10);
    }
}

#[test]
fn scaled_parametrisation_switches_off_terms() {
    let mut rng = StdRng::seed_from_u64(99);
    let model = mixed_model(true, TimeReversal::Even);
    let (params, H) = random_hamiltonian(&model, &mut rng);

    let mut scale: IndexMap<TermKind, f64> = IndexMap::new();
    scale.insert(TermKind::LZee, 0.0);
    scale.insert(TermKind::SZee, 0.0);
    let zero_field = model.parametrise(&params, Some(&scale)).unwrap();

    // the Zeeman part alone
    let mut zeeman: nd::Array2<C64> = nd::Array2::zeros(H.raw_dim());
    for (label, ops) in model.terms().iter() {
        if !matches!(label.kind, TermKind::LZee | TermKind::SZee) { continue; }
        for (key, op) in ops.iter() {
            let value = params.param(label, key).unwrap();
            zeeman.scaled_add(C64::from(value), op);
        }
    }
    close_l2(&(&zero_field + &zeeman), &H, 1e-10);
}
