//! Expansion of spin-free operators into the full wavefunction space.
//!
//! A spin-free basis lists spatial states grouped by spin multiplicity. The
//! corresponding wavefunction (spin-orbit) basis takes every spatial state
//! of multiplicity `2S + 1` together with its `M_S = -S..S` partners, with
//! `M_S` running fastest.

use std::f64::consts::SQRT_2;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::{ AngmomError, AngmomResult },
    linalg::{ block_diag, eye, kron },
    spin::{ parity_sign, w3j, Spin, SpinTotal },
};

/// Expand spin-diagonal blocks `op_i ⊗ 1_{mult_i}` and place them along the
/// diagonal.
///
/// Blocks may be rectangular, so this also expands spin-free basis
/// transformations.
pub fn sf2ws(blocks: &[nd::Array2<C64>], mults: &[usize])
    -> AngmomResult<nd::Array2<C64>>
{
    if blocks.len() != mults.len() {
        return Err(AngmomError::shape(&[mults.len()], &[blocks.len()]));
    }
    let expanded: Vec<nd::Array2<C64>>
        = blocks.iter().zip(mults)
        .map(|(op, mult)| kron(op, &eye(*mult)))
        .collect();
    Ok(block_diag(&expanded))
}

/// [`sf2ws`] for each Cartesian component.
pub fn sf2ws3(blocks: &[nd::Array3<C64>], mults: &[usize])
    -> AngmomResult<nd::Array3<C64>>
{
    if blocks.len() != mults.len() {
        return Err(AngmomError::shape(&[mults.len()], &[blocks.len()]));
    }
    let comps: Vec<nd::Array2<C64>>
        = (0..3)
        .map(|c| {
            let comp: Vec<nd::Array2<C64>>
                = blocks.iter()
                .map(|b| b.index_axis(nd::Axis(0), c).to_owned())
                .collect();
            sf2ws(&comp, mults)
        })
        .collect::<AngmomResult<_>>()?;
    let n = comps[0].nrows();
    let m = comps[0].ncols();
    let mut out: nd::Array3<C64> = nd::Array3::zeros((3, n, m));
    for (mut o, c) in out.outer_iter_mut().zip(comps.iter()) {
        o.assign(c);
    }
    Ok(out)
}

// coupling coefficient of |s1 ms1> and |s2 ms2>, all in doubled units
fn spin_coeff(s1: i32, ms1: i32, s2: i32, ms2: i32) -> f64 {
    let root = |x: i32| f64::from(x).max(0.0).sqrt();
    let (s, m) = (f64::from(s1), f64::from(ms1));
    let (c, norm)
        = if s1 == s2 {
            if s1 == 0 { return 0.0; }
            let c
                = if ms1 == ms2 {
                    m
                } else if ms1 + 2 == ms2 {
                    root((s1 - ms1) * (s1 + ms1 + 2)) / 2.0
                } else if ms1 - 2 == ms2 {
                    -root((s1 + ms1) * (s1 - ms1 + 2)) / 2.0
                } else {
                    0.0
                };
            (c, s * (s + 2.0) * (2.0 * s + 2.0) / 2.0)
        } else if s1 + 2 == s2 {
            let c
                = if ms1 == ms2 {
                    root((s1 + 2).pow(2) - ms1.pow(2))
                } else if ms1 + 2 == ms2 {
                    -root((s1 + ms1 + 2) * (s1 + ms1 + 4)) / 2.0
                } else if ms1 - 2 == ms2 {
                    -root((s1 - ms1 + 2) * (s1 - ms1 + 4)) / 2.0
                } else {
                    0.0
                };
            (c, (s + 1.0) * (2.0 * s + 1.0) * (2.0 * s + 3.0) / 2.0)
        } else if s1 - 2 == s2 {
            let c
                = if ms1 == ms2 {
                    root(s1.pow(2) - ms1.pow(2))
                } else if ms1 + 2 == ms2 {
                    root((s1 - ms1) * (s1 - ms1 - 2)) / 2.0
                } else if ms1 - 2 == ms2 {
                    root((s1 + ms1) * (s1 + ms1 - 2)) / 2.0
                } else {
                    0.0
                };
            (c, s * (2.0 * s - 1.0) * (2.0 * s + 1.0) / 2.0)
        } else {
            return 0.0;
        };
    c / norm.sqrt()
}

/// Expand a spin-free vector operator into the wavefunction basis as the
/// scalar coupling with the electron spin.
///
/// `op` is `(3, n, n)` over all spin-free states and `mults[i]` is the
/// multiplicity of state `i`. Within a multiplet the result is
/// `Σ_c A_c ⊗ S_c / sqrt(S (S + 1) (2S + 1))`. Blocks between spins `S` and
/// `S + 1` carry the rank-1 spin couplings and blocks further apart vanish.
pub fn sf2ws_spin(op: &nd::Array3<C64>, mults: &[usize])
    -> AngmomResult<nd::Array2<C64>>
{
    let n = mults.len();
    if op.dim() != (3, n, n) {
        return Err(AngmomError::shape(&[3, n, n], op.shape()));
    }
    if mults.contains(&0) {
        return Err(AngmomError::domain("spin multiplicities must be positive"));
    }
    // (spin-free state, 2S, 2M_S)
    let states: Vec<(usize, i32, i32)>
        = mults.iter().enumerate()
        .flat_map(|(i, &mult)| {
            let s = mult as i32 - 1;
            (0..mult as i32).map(move |k| (i, s, 2 * k - s))
        })
        .collect();
    let dim = states.len();
    let out
        = nd::Array2::from_shape_fn((dim, dim), |(r, c)| {
            let (i, s1, ms1) = states[r];
            let (j, s2, ms2) = states[c];
            let spatial
                = if ms1 == ms2 {
                    op[[2, i, j]]
                } else if ms1 + 2 == ms2 {
                    op[[0, i, j]] + C64::i() * op[[1, i, j]]
                } else if ms1 - 2 == ms2 {
                    -op[[0, i, j]] + C64::i() * op[[1, i, j]]
                } else {
                    return C64::from(0.0);
                };
            spatial * spin_coeff(s1, ms1, s2, ms2)
        });
    Ok(out)
}

// spin coupling coefficients of the q-th spherical component between
// multiplets s1 (rows) and s2 (columns), sign-adjusted so that the expanded
// operator is Hermitian
fn amfi_coeff(q: i32, s1: SpinTotal, s2: SpinTotal) -> nd::Array2<C64> {
    let sign = if s2 > s1 { -1.0 } else { 1.0 };
    let tj1 = s1.halves() as i32;
    let tj2 = s2.halves() as i32;
    nd::Array2::from_shape_fn((s1.mult(), s2.mult()), |(i, j)| {
        let tm1 = -tj1 + 2 * i as i32;
        let tm2 = -tj2 + 2 * j as i32;
        let symbol
            = match (
                Spin::new(tj2 as u32, tm2),
                Spin::new(2, 2 * q),
                Spin::new(tj1 as u32, -tm1),
            ) {
                (Some(a), Some(b), Some(c)) => w3j(a, b, c),
                _ => 0.0,
            };
        if symbol == 0.0 { return C64::from(0.0); }
        C64::from(parity_sign(tj2 + tm1 - 2) * sign * symbol)
    })
}

fn expand_amfi(op: &nd::Array3<C64>, mult1: usize, mult2: usize) -> nd::Array2<C64> {
    let (_, n1, n2) = op.dim();
    let s1 = SpinTotal::from_mult(mult1);
    let s2 = SpinTotal::from_mult(mult2);
    if s1.halves().abs_diff(s2.halves()) > 2 {
        return nd::Array2::zeros((n1 * mult1, n2 * mult2));
    }
    let iop = op.mapv(|z| C64::i() * z);
    let x = iop.index_axis(nd::Axis(0), 0);
    let y = iop.index_axis(nd::Axis(0), 1);
    let z = iop.index_axis(nd::Axis(0), 2).to_owned();
    let minus = (&x + &y.mapv(|v| C64::i() * v)).mapv(|v| v / SQRT_2);
    let plus = (&x - &y.mapv(|v| C64::i() * v)).mapv(|v| v / SQRT_2);
    kron(&minus, &amfi_coeff(-1, s1, s2))
        + kron(&z, &amfi_coeff(0, s1, s2))
        - kron(&plus, &amfi_coeff(1, s1, s2))
}

/// Assemble the spin-orbit coupling matrix in the wavefunction basis from
/// spin-free AMFI integrals.
///
/// `grid[i][j]` holds the `(3, n_i, n_j)` spatial integrals between the
/// states of multiplicities `mults[i]` and `mults[j]`. Blocks whose spins
/// differ by more than one vanish. Within a single multiplet the result is
/// `Σ_c i A_c ⊗ S_c / sqrt(S (S + 1) (2S + 1))`.
pub fn sf2ws_amfi(grid: &[Vec<nd::Array3<C64>>], mults: &[usize])
    -> AngmomResult<nd::Array2<C64>>
{
    if grid.len() != mults.len() {
        return Err(AngmomError::shape(&[mults.len()], &[grid.len()]));
    }
    let sizes: Vec<usize>
        = grid.iter().enumerate()
        .map(|(i, row)| row.get(i).map(|b| b.shape()[1]).unwrap_or(0))
        .collect();
    let offsets: Vec<usize>
        = sizes.iter().zip(mults)
        .scan(0, |acc, (n, m)| { let off = *acc; *acc += n * m; Some(off) })
        .collect();
    let dim: usize = sizes.iter().zip(mults).map(|(n, m)| n * m).sum();
    let mut out: nd::Array2<C64> = nd::Array2::zeros((dim, dim));
    for (i, row) in grid.iter().enumerate() {
        if row.len() != mults.len() {
            return Err(AngmomError::shape(&[mults.len()], &[row.len()]));
        }
        for (j, op) in row.iter().enumerate() {
            if op.shape() != [3, sizes[i], sizes[j]] {
                return Err(AngmomError::shape(&[3, sizes[i], sizes[j]], op.shape()));
            }
            let blk = expand_amfi(op, mults[i], mults[j]);
            let (r, c) = (offsets[i], offsets[j]);
            out.slice_mut(nd::s![r..r + blk.nrows(), c..c + blk.ncols()]).assign(&blk);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::assert::close_l2;
    use crate::angmom::calc_ang_mom_ops;

    #[test]
    fn sf2ws_repeats_spin_partners() {
        let a = nd::array![[C64::from(2.0)]];
        let b = nd::array![[C64::from(1.0), C64::from(3.0)]];
        let ws = sf2ws(&[a, b], &[2, 1]).unwrap();
        assert_eq!(ws.dim(), (3, 4));
        assert_eq!(ws[[0, 0]], C64::from(2.0));
        assert_eq!(ws[[1, 1]], C64::from(2.0));
        assert_eq!(ws[[0, 1]], C64::from(0.0));
        assert_eq!(ws[[2, 3]], C64::from(3.0));
    }

    #[test]
    fn same_spin_amfi_is_scaled_l_dot_s() {
        let n = 2;
        let mut amfi: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
        for c in 0..3 {
            let v = 0.3 + 0.1 * c as f64;
            amfi[[c, 0, 1]] = C64::from(v);
            amfi[[c, 1, 0]] = C64::from(-v);
        }
        let ws = sf2ws_amfi(&[vec![amfi.clone()]], &[3]).unwrap();

        let spin = calc_ang_mom_ops(SpinTotal::new(2)).cart();
        let norm = (1.0_f64 * 2.0 * 3.0).sqrt();
        let mut truth: nd::Array2<C64> = nd::Array2::zeros((3 * n, 3 * n));
        for c in 0..3 {
            let a = amfi.index_axis(nd::Axis(0), c).mapv(|z| C64::i() * z / norm);
            truth += &kron(&a, &spin.index_axis(nd::Axis(0), c).to_owned());
        }
        close_l2(&ws, &truth, 1e-12);
        close_l2(&ws.t().mapv(|z| z.conj()), &ws, 1e-12);
    }

    #[test]
    fn distant_multiplets_do_not_couple() {
        let grid = vec![
            vec![nd::Array3::zeros((3, 1, 1)), nd::Array3::from_elem((3, 1, 1), C64::from(1.0))],
            vec![nd::Array3::from_elem((3, 1, 1), C64::from(1.0)), nd::Array3::zeros((3, 1, 1))],
        ];
        let ws = sf2ws_amfi(&grid, &[1, 5]).unwrap();
        assert_eq!(ws.dim(), (6, 6));
        assert!(ws.iter().all(|z| z.norm() == 0.0));
    }

    #[test]
    fn spin_expansion_within_multiplet_is_spin_operator() {
        // two triplet states; the spatial part is a scaled identity per
        // component
        let a = [0.3, -0.2, 0.5];
        let norm = (1.0_f64 * 2.0 * 3.0).sqrt();
        let op: nd::Array3<C64>
            = nd::Array3::from_shape_fn((3, 2, 2), |(c, i, j)| {
                if i == j { C64::from(norm * a[c]) } else { C64::from(0.0) }
            });
        let ws = sf2ws_spin(&op, &[3, 3]).unwrap();
        let spin = calc_ang_mom_ops(SpinTotal::new(2)).cart();
        let mut truth: nd::Array2<C64> = nd::Array2::zeros((6, 6));
        for (c, ac) in a.iter().enumerate() {
            truth += &kron(&eye(2), &spin.index_axis(nd::Axis(0), c).mapv(|z| z * *ac));
        }
        close_l2(&ws, &truth, 1e-12);
    }

    #[test]
    fn spin_expansion_couples_neighbouring_spins_only() {
        let op: nd::Array3<C64> = nd::Array3::from_elem((3, 3, 3), C64::from(1.0));
        // singlet, triplet, quintet
        let ws = sf2ws_spin(&op, &[1, 3, 5]).unwrap();
        assert_eq!(ws.dim(), (9, 9));
        // singlet M_S = 0 with triplet M_S = 0
        assert!((ws[[0, 2]] - C64::from(2.0 / 1.5_f64.sqrt())).norm() < 1e-12);
        // nothing between singlet and quintet
        assert!(ws.slice(nd::s![0..1, 4..9]).iter().all(|z| z.norm() == 0.0));
        assert!(ws.slice(nd::s![4..9, 0..1]).iter().all(|z| z.norm() == 0.0));
        // a lone singlet has no spin
        assert!(ws[[0, 0]].norm() == 0.0);
        assert!(sf2ws_spin(&op, &[1, 3]).is_err());
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let grid = vec![vec![nd::Array3::zeros((3, 2, 2))]];
        assert!(sf2ws_amfi(&grid, &[2, 3]).is_err());
    }
}
