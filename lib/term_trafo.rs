//! Transformation of a spin-free ab-initio basis into a symmetry-adapted
//! term basis.
//!
//! The transformation is built one angular momentum label at a time. At
//! each label the basis is split into irreps, quantised along `z`, and
//! phased along `x` (see [`project_angm_basis`]). Independent phasing leaves
//! one free phase per irrep block, which is fixed afterwards by requiring
//! the Wigner-Eckart-reduced spin-orbit coupling elements between connected
//! blocks to be real.

use std::f64::consts::{ PI, SQRT_2 };
use log::debug;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::{ AngmomError, AngmomResult },
    group::project_angm_basis,
    linalg::{
        eye,
        group_indices,
        submatrix3,
        transform3_between,
        unitary_transform3,
    },
    spin::{ parity_sign, w3j_f, SpinTotal },
    symbol::{ couple_space, Symbol },
    term::TermSymbol,
};

/// Absolute tolerance on the imaginary part of phased reduced elements.
pub const PHASE_RESIDUAL_TOL: f64 = 1e-8;

// reduced elements smaller than this carry no phase information
const REDUCED_ZERO_TOL: f64 = 1e-12;

/* Wigner-Eckart reduction ****************************************************/

/// Reduce the components `T_q` of a rank-`k` spherical tensor between the
/// `j1` and `j2` manifolds to a single reduced matrix element.
///
/// `tensor` has shape `(nq, 2j1 + 1, 2j2 + 1)` with `q = -k..=k` if `full`,
/// and `q = 0..k` otherwise. The reduced element is the mean of the ratios
/// of the tensor to its Wigner-Eckart coefficient wherever the coefficient
/// is non-zero, or zero if there is no such entry. Ratios that disagree
/// beyond `rtol` are an error.
pub fn wigner_eckart_reduce(
    tensor: &nd::Array3<C64>,
    k: usize,
    j1: SpinTotal,
    j2: SpinTotal,
    full: bool,
    rtol: f64,
) -> AngmomResult<C64>
{
    let ki = k as i32;
    let qs: Vec<i32> = if full { (-ki..=ki).collect() } else { (0..ki).collect() };
    let expected = [qs.len(), j1.mult(), j2.mult()];
    if tensor.shape() != expected {
        return Err(AngmomError::shape(&expected, tensor.shape()));
    }
    let mut ratios: Vec<C64> = Vec::new();
    for (iq, q) in qs.iter().enumerate() {
        for (i1, s1) in j1.projections().enumerate() {
            let m1 = s1.proj();
            for (i2, s2) in j2.projections().enumerate() {
                let m2 = s2.proj();
                let we
                    = parity_sign(j1.halves() as i32 - m1.halves())
                    * w3j_f(j1.f(), -m1.f(), k as f64, f64::from(*q), j2.f(), m2.f());
                if we != 0.0 {
                    ratios.push(tensor[[iq, i1, i2]] / we);
                }
            }
        }
    }
    if ratios.is_empty() { return Ok(C64::from(0.0)); }
    let mean: C64 = ratios.iter().sum::<C64>() / ratios.len() as f64;
    let consistent
        = ratios.iter()
        .all(|r| (r - mean).norm() <= 1e-8 + rtol * mean.norm());
    if consistent { Ok(mean) } else { Err(AngmomError::WignerEckart(ratios)) }
}

fn l_labels(terms: &[Symbol]) -> AngmomResult<Vec<SpinTotal>> {
    let mut labels: Vec<SpinTotal> = Vec::new();
    for term in terms.iter() {
        let l = term.qn_of('L').ok_or(AngmomError::UndefinedLabel('L'))?;
        labels.extend(std::iter::repeat(l).take(l.mult()));
    }
    Ok(labels)
}

/// Rank-1 Wigner-Eckart reduction of every `L` block of a spherical tensor
/// between two lists of terms.
///
/// Rows and columns of the result run over the distinct `L` values of
/// `terms1` and `terms2` in ascending order.
pub fn we_reduce_term_blocks(
    tensor: &nd::Array3<C64>,
    terms1: &[Symbol],
    terms2: &[Symbol],
) -> AngmomResult<nd::Array2<C64>>
{
    let rows = group_indices(&l_labels(terms1)?);
    let cols = group_indices(&l_labels(terms2)?);
    let mut red: nd::Array2<C64> = nd::Array2::zeros((rows.len(), cols.len()));
    for (r, (l1, idx1)) in rows.iter().enumerate() {
        for (c, (l2, idx2)) in cols.iter().enumerate() {
            let blk = submatrix3(tensor, idx1, idx2);
            red[[r, c]] = wigner_eckart_reduce(&blk, 1, *l1, *l2, true, 1.0)?;
        }
    }
    Ok(red)
}

/// Spherical components `q = -1, 0, 1` of a Cartesian AMFI triple, with the
/// imaginary unit of the spin-orbit operator absorbed.
pub fn amfi_tensor(amfi: &nd::Array3<C64>) -> nd::Array3<C64> {
    let x = amfi.index_axis(nd::Axis(0), 0);
    let y = amfi.index_axis(nd::Axis(0), 1);
    let z = amfi.index_axis(nd::Axis(0), 2);
    let i = C64::i();
    let mut out: nd::Array3<C64> = nd::Array3::zeros(amfi.raw_dim());
    out.index_axis_mut(nd::Axis(0), 0)
        .assign(&nd::Zip::from(&x).and(&y).map_collect(|a, b| i * (-a + i * b) / SQRT_2));
    out.index_axis_mut(nd::Axis(0), 1)
        .assign(&z.mapv(|a| -i * a));
    out.index_axis_mut(nd::Axis(0), 2)
        .assign(&nd::Zip::from(&x).and(&y).map_collect(|a, b| i * (a + i * b) / SQRT_2));
    out
}

/* Relative phases ************************************************************/

fn spin_connected(t1: &Symbol, t2: &Symbol) -> bool {
    match (t1.qn_of('S'), t2.qn_of('S')) {
        (Some(s1), Some(s2)) => s1.halves().abs_diff(s2.halves()) <= 2,
        _ => true,
    }
}

// least-squares fit of a single angle φ to a set of angles modulo π
fn fit_phase_angle(angles: &[f64]) -> f64 {
    let sin: f64 = angles.iter().map(|a| (2.0 * a).sin()).sum();
    let cos: f64 = angles.iter().map(|a| (2.0 * a).cos()).sum();
    let ph = (sin / cos).atan() / 2.0;
    if ph.is_nan() {
        debug!("no matrix elements available for phasing; using zero phase");
        return 0.0;
    }
    let curvature: f64 = angles.iter().map(|a| (2.0 * (a - ph)).cos()).sum();
    if curvature > 0.0 { ph } else { ph + PI / 2.0 }
}

/// Fix the relative phase of each term block from the spin-orbit coupling
/// between blocks.
///
/// `amfi_blks[a][b]` is the Cartesian AMFI operator between the (already
/// internally phased) blocks `a` and `b`, whose terms are `term_blks[a]` and
/// `term_blks[b]`. The first block keeps phase zero; every later block gets
/// the phase that best renders its reduced elements with all earlier blocks
/// real. Terms whose spins differ by more than one do not connect, and a
/// block with no connections keeps phase zero. Returns `exp(i φ_a)` per
/// block, or an error if some phased reduced element stays complex.
pub fn adjust_relative_term_phases(
    amfi_blks: &[Vec<nd::Array3<C64>>],
    term_blks: &[Vec<Symbol>],
) -> AngmomResult<Vec<C64>>
{
    let n = term_blks.len();
    if amfi_blks.len() != n || amfi_blks.iter().any(|row| row.len() != n) {
        let cols = amfi_blks.first().map_or(0, |row| row.len());
        return Err(AngmomError::shape(&[n, n], &[amfi_blks.len(), cols]));
    }
    let mut angles: Vec<Vec<Vec<f64>>> = Vec::with_capacity(n);
    for (terms1, row) in term_blks.iter().zip(amfi_blks) {
        let mut angle_row: Vec<Vec<f64>> = Vec::with_capacity(n);
        for (terms2, amfi) in term_blks.iter().zip(row) {
            let red = we_reduce_term_blocks(&amfi_tensor(amfi), terms1, terms2)?;
            let mut angs: Vec<f64> = Vec::new();
            for (t1, red_row) in terms1.iter().zip(red.rows()) {
                for (t2, elem) in terms2.iter().zip(red_row.iter()) {
                    if spin_connected(t1, t2) && elem.norm() > REDUCED_ZERO_TOL {
                        angs.push(elem.arg());
                    }
                }
            }
            angle_row.push(angs);
        }
        angles.push(angle_row);
    }

    let mut phi: Vec<f64> = Vec::with_capacity(n);
    for (a, row) in angles.iter().enumerate() {
        if a == 0 { phi.push(0.0); continue; }
        let shifted: Vec<f64>
            = row.iter().zip(phi.iter())
            .flat_map(|(angs, ph)| angs.iter().map(move |ang| ang + ph))
            .collect();
        if shifted.is_empty() {
            debug!("term block {} is isolated; using zero phase", a);
        }
        phi.push(fit_phase_angle(&shifted));
    }
    let phases: Vec<C64> = phi.iter().map(|p| C64::from_polar(1.0, *p)).collect();

    let residual: f64
        = angles.iter().zip(phases.iter())
        .flat_map(|(row, ph1)| {
            row.iter().zip(phases.iter())
                .flat_map(move |(angs, ph2)| {
                    angs.iter()
                        .map(move |ang| (ph1.conj() * C64::from_polar(1.0, *ang) * ph2).im.abs())
                })
        })
        .fold(0.0, f64::max);
    if residual > PHASE_RESIDUAL_TOL {
        return Err(AngmomError::ImaginaryResidual(residual));
    }
    Ok(phases)
}

/* Term transformation ********************************************************/

/// Source of the irrep decomposition for one label of the coupling chain.
#[derive(Clone, Debug)]
pub enum Generator {
    /// Cartesian angular momentum operators; irreps are found by projection.
    Angm(nd::Array3<C64>),
    /// Irrep quantum number of every basis state, e.g. the spin of each
    /// spin-free state. Only valid as the outermost label.
    Irreps(Vec<SpinTotal>),
}

/// One block of states sharing the outermost quantum number.
#[derive(Clone, Debug)]
pub struct TermBlock {
    /// Quantum number of the block.
    pub qn: SpinTotal,
    /// Basis states belonging to the block.
    pub rows: Vec<usize>,
    /// Terms of the block, in column order.
    pub terms: Vec<Symbol>,
    /// Transformation from the block states to the term states.
    pub vecs: nd::Array2<C64>,
}

/// Output of [`evaluate_term_trafo`].
#[derive(Clone, Debug)]
pub enum TermTrafo {
    /// A single transformation of the whole basis.
    Full(nd::Array2<C64>),
    /// Per-block transformations, when the outermost label is given by
    /// [`Generator::Irreps`].
    Blocked(Vec<TermBlock>),
}

impl TermTrafo {
    /// Unwrap a full transformation.
    pub fn into_full(self) -> AngmomResult<nd::Array2<C64>> {
        match self {
            Self::Full(vecs) => Ok(vecs),
            Self::Blocked(_) => Err(AngmomError::domain("expected a full term transformation")),
        }
    }

    /// Unwrap per-block transformations.
    pub fn into_blocks(self) -> AngmomResult<Vec<TermBlock>> {
        match self {
            Self::Blocked(blocks) => Ok(blocks),
            Self::Full(_) => Err(AngmomError::domain("expected blocked term transformations")),
        }
    }
}

/// Transformation from a computational basis into the basis of `terms`.
///
/// `chain` lists `(label, generator)` pairs from the innermost to the
/// outermost label; the outermost is decomposed first. `amfi` is the
/// Cartesian spin-orbit operator in the computational basis, used to fix the
/// relative phases of blocks at every level. Terms listed in `flip_phase`
/// have their overall sign inverted.
pub fn evaluate_term_trafo(
    terms: &[Symbol],
    amfi: &nd::Array3<C64>,
    chain: &[(char, Generator)],
    flip_phase: Option<&[Symbol]>,
) -> AngmomResult<TermTrafo>
{
    let inner = chain.len().saturating_sub(1);
    if let Some((label, _))
        = chain[..inner].iter().find(|(_, g)| matches!(g, Generator::Irreps(_)))
    {
        return Err(AngmomError::domain(
            format!("explicit irreps for '{}' are only allowed for the outermost label", label)
        ));
    }
    term_trafo_level(terms, amfi, chain, flip_phase)
}

fn term_trafo_level(
    terms: &[Symbol],
    amfi: &nd::Array3<C64>,
    chain: &[(char, Generator)],
    flip_phase: Option<&[Symbol]>,
) -> AngmomResult<TermTrafo>
{
    let n = amfi.shape()[1];
    let Some(((label, generator), rest)) = chain.split_last() else {
        let flip
            = flip_phase
            .zip(terms.first())
            .is_some_and(|(flip, term)| flip.contains(term));
        let sign = if flip { -1.0 } else { 1.0 };
        return Ok(TermTrafo::Full(eye(n) * sign));
    };
    let label = *label;

    let (vecs, amfi, rest, qns): (
        Option<nd::Array2<C64>>,
        nd::Array3<C64>,
        Vec<(char, nd::Array3<C64>)>,
        Vec<SpinTotal>,
    ) = match generator {
        Generator::Irreps(qns) => {
            if qns.len() != n {
                return Err(AngmomError::shape(&[n], &[qns.len()]));
            }
            let rest: Vec<(char, nd::Array3<C64>)>
                = rest.iter()
                .map(|(l, g)| match g {
                    Generator::Angm(op) => Ok((*l, op.clone())),
                    Generator::Irreps(_) => Err(AngmomError::domain("nested explicit irreps")),
                })
                .collect::<AngmomResult<_>>()?;
            (None, amfi.clone(), rest, qns.clone())
        },
        Generator::Angm(op) => {
            let ls: Vec<SpinTotal>
                = terms.iter()
                .map(|t| t.qn_of(label).ok_or(AngmomError::UndefinedLabel(label)))
                .collect::<AngmomResult<_>>()?;
            let vecs = project_angm_basis(&ls, op, false)?;
            if terms.is_empty() { return Ok(TermTrafo::Full(vecs)); }
            let rest: Vec<(char, nd::Array3<C64>)>
                = rest.iter()
                .map(|(l, g)| match g {
                    Generator::Angm(o) => Ok((*l, unitary_transform3(o, &vecs))),
                    Generator::Irreps(_) => Err(AngmomError::domain("nested explicit irreps")),
                })
                .collect::<AngmomResult<_>>()?;
            let amfi = unitary_transform3(amfi, &vecs);
            let qns: Vec<SpinTotal>
                = ls.iter()
                .flat_map(|l| std::iter::repeat(*l).take(l.mult()))
                .collect();
            (Some(vecs), amfi, rest, qns)
        },
    };

    let groups = group_indices(&qns);
    let mut term_blks: Vec<Vec<Symbol>> = Vec::with_capacity(groups.len());
    for (qn, _) in groups.iter() {
        let mut blk: Vec<Symbol>
            = terms.iter()
            .filter(|t| t.qn_of(label) == Some(*qn))
            .cloned()
            .collect();
        blk.sort_by_key(|t| {
            rest.iter().rev().map(|(l, _)| t.qn_of(*l)).collect::<Vec<_>>()
        });
        term_blks.push(blk);
    }

    let mut vecs_blks: Vec<nd::Array2<C64>> = Vec::with_capacity(groups.len());
    for ((qn, idx), blk_terms) in groups.iter().zip(term_blks.iter()) {
        debug!("resolving '{}' = {} block with {} terms", label, qn, blk_terms.len());
        let sub_chain: Vec<(char, Generator)>
            = rest.iter()
            .map(|(l, op)| (*l, Generator::Angm(submatrix3(op, idx, idx))))
            .collect();
        let sub_amfi = submatrix3(&amfi, idx, idx);
        let trafo = term_trafo_level(blk_terms, &sub_amfi, &sub_chain, flip_phase)?;
        vecs_blks.push(trafo.into_full()?);
    }

    let amfi_blks: Vec<Vec<nd::Array3<C64>>>
        = groups.iter().zip(vecs_blks.iter())
        .map(|((_, idx1), v1)| {
            groups.iter().zip(vecs_blks.iter())
                .map(|((_, idx2), v2)| {
                    transform3_between(&submatrix3(&amfi, idx1, idx2).view(), v1, v2)
                })
                .collect()
        })
        .collect();
    let phases = adjust_relative_term_phases(&amfi_blks, &term_blks)?;
    for (v, ph) in vecs_blks.iter_mut().zip(phases.iter()) {
        v.mapv_inplace(|z| z * ph);
    }

    match vecs {
        None => {
            let blocks: Vec<TermBlock>
                = groups.into_iter().zip(term_blks).zip(vecs_blks)
                .map(|(((qn, rows), terms), vecs)| TermBlock { qn, rows, terms, vecs })
                .collect();
            Ok(TermTrafo::Blocked(blocks))
        },
        Some(vecs) => {
            let cols: usize = vecs_blks.iter().map(|v| v.ncols()).sum();
            let mut placed: nd::Array2<C64> = nd::Array2::zeros((vecs.ncols(), cols));
            let mut c = 0;
            for ((_, idx), v) in groups.iter().zip(vecs_blks.iter()) {
                for (r, row) in idx.iter().zip(v.rows()) {
                    placed.slice_mut(nd::s![*r, c..c + v.ncols()]).assign(&row);
                }
                c += v.ncols();
            }
            Ok(TermTrafo::Full(vecs.dot(&placed)))
        },
    }
}

/* Term spaces ****************************************************************/

/// Terms spanning a model space and the transformation from their states to
/// the states of the model space.
///
/// A non-empty `coupling` list of `(j, j1, j2)` is applied to the model space
/// and its transpose returned. Otherwise a level is traced back to its
/// parent term, and a term maps to itself.
pub fn evaluate_term_space(model_space: &TermSymbol, coupling: &[(char, char, char)])
    -> AngmomResult<(Vec<Symbol>, nd::Array2<f64>)>
{
    if !coupling.is_empty() {
        let (terms, cg_vec) = couple_space(model_space.symbol(), coupling)?;
        return Ok((terms, cg_vec.t().to_owned()));
    }
    match model_space {
        TermSymbol::Level(level) => {
            let term = level.term()?;
            let (_, trafo)
                = term.couple('J', 'L', 'S', Some(vec![level.symbol().clone()]))?;
            Ok((vec![term.into_symbol()], trafo))
        },
        TermSymbol::Term(term) => {
            let n = term.multiplicity();
            Ok((vec![term.symbol().clone()], nd::Array2::eye(n)))
        },
        TermSymbol::Symbol(sym) => Err(AngmomError::domain(
            format!("model space {} needs an explicit coupling", sym)
        )),
    }
}
