//! Projection onto irreducible representations of SO(3).
//!
//! The group integral over Euler angles `(φ, θ, ψ)` of the character-weighted
//! rotation operator is carried out one angle at a time. Each one-dimensional
//! integral of the form `∫ exp((t - s) A) B exp(s C) ds` is read off the
//! upper-right block of a block-triangular matrix exponential, so no
//! quadrature grid is needed.
//!
//! Generators are passed in anti-Hermitian form `A = -i L`, so that
//! `exp(α A)` is the rotation by `α` about the corresponding axis.

use std::f64::consts::PI;
use ndarray::{ self as nd, s };
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    angmom::phase,
    error::{ AngmomError, AngmomResult },
    linalg::{ block_triangular_expm, expm, eye, hermitize, unitary_transform, unitary_transform3 },
    spin::SpinTotal,
};

/* Integrals ******************************************************************/

/// `∫_0^t exp(s A) ds`.
pub fn integrate_expm(A: &nd::Array2<C64>, t: f64) -> AngmomResult<nd::Array2<C64>> {
    let n = A.nrows();
    block_triangular_expm(A, &eye(n), &nd::Array2::zeros((n, n)), t)
}

/// `∫_0^t exp(s A) cos(k s) ds`.
pub fn integrate_cosk_expm(k: f64, A: &nd::Array2<C64>, t: f64)
    -> AngmomResult<nd::Array2<C64>>
{
    let n = A.nrows();
    let shift = eye(n) * C64::new(0.0, k);
    let plus = integrate_expm(&(A + &shift), t)?;
    let minus = integrate_expm(&(A - &shift), t)?;
    Ok((plus + minus).mapv(|z| z * 0.5))
}

/// Integral over the third Euler angle of the (reduced) character of the
/// `j` irrep times the rotation about `z`.
pub fn integrate_so3_char_psi(j: SpinTotal, Jz: &nd::Array2<C64>)
    -> AngmomResult<nd::Array2<C64>>
{
    let j = j.f();
    let lo = integrate_cosk_expm(j, Jz, PI)?;
    let hi = integrate_cosk_expm(j + 1.0, Jz, PI)?;
    Ok((lo - hi).mapv(|z| z * 0.5))
}

/// `∫_0^π exp(-θ J_y) B exp(θ J_y) sin θ dθ`.
pub fn integrate_so3_theta(Jy: &nd::Array2<C64>, B: &nd::Array2<C64>)
    -> AngmomResult<nd::Array2<C64>>
{
    let n = Jy.nrows();
    let shift = eye(n) * C64::i();
    let plus = block_triangular_expm(Jy, B, &(Jy + &shift), PI)?;
    let minus = block_triangular_expm(Jy, B, &(Jy - &shift), PI)?;
    let sine = (plus - minus).mapv(|z| z / (2.0 * C64::i()));
    Ok(sine.dot(&expm(&Jy.mapv(|z| -PI * z))?))
}

/// `∫_0^{2π} exp((2π - φ) J_z) B exp(φ J_z) dφ · exp(-2π J_z)`.
pub fn integrate_so3_phi(Jz: &nd::Array2<C64>, B: &nd::Array2<C64>)
    -> AngmomResult<nd::Array2<C64>>
{
    let int = block_triangular_expm(Jz, B, Jz, 2.0 * PI)?;
    Ok(int.dot(&expm(&Jz.mapv(|z| -2.0 * PI * z))?))
}

/* Projectors *****************************************************************/

/// Number of copies of the `j` irrep contained in the representation
/// generated by `Jz`.
pub fn count_so3_irrep(j: SpinTotal, Jz: &nd::Array2<C64>) -> AngmomResult<f64> {
    let psi = integrate_so3_char_psi(j, Jz)?;
    Ok(2.0 / PI * psi.diag().sum().re)
}

/// Group projector onto the `j` irrep:
/// `P_j = (2j + 1) / (8π²) ∫ χ_j(g)* D(g) dg`.
///
/// Only integer `j` is supported; the Euler angle ranges cover SO(3), not its
/// double cover.
pub fn project_so3_irrep(j: SpinTotal, Jy: &nd::Array2<C64>, Jz: &nd::Array2<C64>)
    -> AngmomResult<nd::Array2<C64>>
{
    if !j.is_integer() {
        return Err(AngmomError::domain(
            format!("cannot project onto half-integer irrep j = {}", j)
        ));
    }
    let psi = integrate_so3_char_psi(j, Jz)?;
    let theta = integrate_so3_theta(Jy, &psi)?;
    let phi = integrate_so3_phi(Jz, &theta)?;
    let norm = (2.0 * j.f() + 1.0) / (2.0 * PI.powi(2));
    Ok(phi.mapv(|z| z * norm))
}

fn generator(angm: &nd::Array3<C64>, comp: usize) -> nd::Array2<C64> {
    angm.index_axis(nd::Axis(0), comp).mapv(|z| -C64::i() * z)
}

/// Build a basis of `|L m>` states out of the space spanned by a Cartesian
/// orbital angular momentum operator `angm`.
///
/// For each `L` in order, the irrep subspace is taken from the leading
/// eigenvectors of the group projector, `L_z` is diagonalised inside it
/// (`m` ascending) and phases are fixed so that `L_x` has a real positive
/// sub-diagonal. The next `L` is extracted from the orthogonal complement of
/// everything taken so far. With `complete`, the remaining complement is
/// appended as extra columns.
pub fn project_angm_basis(
    ls: &[SpinTotal],
    angm: &nd::Array3<C64>,
    complete: bool,
) -> AngmomResult<nd::Array2<C64>>
{
    let n = angm.shape()[1];
    let mut ops = angm.clone();
    let mut compl_total: nd::Array2<C64> = eye(n);
    let mut parts: Vec<nd::Array2<C64>> = Vec::with_capacity(ls.len() + 1);
    for &l in ls.iter() {
        let dim = ops.shape()[1];
        let needed = l.mult();
        if needed > dim {
            return Err(AngmomError::Subspace { j: l.f(), needed, available: dim });
        }
        let P = project_so3_irrep(l, &generator(&ops, 1), &generator(&ops, 2))?;
        let (_, V) = hermitize(&P).eigh_into(UPLO::Lower)?;
        let irrep = V.slice(s![.., dim - needed..]).to_owned();
        let compl = V.slice(s![.., ..dim - needed]).to_owned();

        let Lz = unitary_transform(&ops.index_axis(nd::Axis(0), 2).to_owned(), &irrep);
        let (_, D) = hermitize(&Lz).eigh_into(UPLO::Lower)?;
        let irrep_z = irrep.dot(&D);
        let Lx = unitary_transform(&ops.index_axis(nd::Axis(0), 0).to_owned(), &irrep_z);
        let irrep_basis = irrep_z.dot(&phase(&Lx));

        parts.push(compl_total.dot(&irrep_basis));
        ops = unitary_transform3(&ops, &compl);
        compl_total = compl_total.dot(&compl);
    }
    if complete { parts.push(compl_total); }

    let cols: usize = parts.iter().map(|p| p.ncols()).sum();
    let mut out: nd::Array2<C64> = nd::Array2::zeros((n, cols));
    let mut c = 0;
    for p in parts.iter() {
        out.slice_mut(s![.., c..c + p.ncols()]).assign(p);
        c += p.ncols();
    }
    Ok(out)
}

/// Spectral projector onto the `J² = j(j + 1)` eigenspace of `j2`.
///
/// Each eigenvector of `j2` is assigned to the nearest `j`, so slightly
/// perturbed operators still give a clean decomposition.
pub fn project_angm(j: SpinTotal, j2: &nd::Array2<C64>) -> AngmomResult<nd::Array2<C64>> {
    let (E, V) = hermitize(j2).eigh_into(UPLO::Lower)?;
    let n = j2.nrows();
    let mut P: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for (e, v) in E.iter().zip(V.columns()) {
        let nearest = SpinTotal::from_f64(((1.0 + 4.0 * e.max(0.0)).sqrt() - 1.0) / 2.0);
        if nearest != j { continue; }
        let v = v.to_owned().insert_axis(nd::Axis(1));
        let vd = v.t().mapv(|z| z.conj());
        P += &v.dot(&vd);
    }
    Ok(P)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::assert::close_l2;
    use crate::{
        angmom::calc_ang_mom_ops,
        linalg::{ block_diag3, dagger },
    };

    fn l_ops(l: u32) -> nd::Array3<C64> {
        calc_ang_mom_ops(SpinTotal::new(2 * l)).cart()
    }

    // L = 1 ⊕ L = 0 ⊕ L = 2, scrambled by a fixed unitary
    fn mixed_space() -> (nd::Array3<C64>, nd::Array2<C64>) {
        let ops = block_diag3(&[l_ops(1), l_ops(0), l_ops(2)]);
        let n = ops.shape()[1];
        let mut gen: nd::Array2<C64> = nd::Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                gen[[i, j]] = C64::new(0.1 * (i as f64 - j as f64), 0.05 * (i + j) as f64);
            }
        }
        let herm = hermitize(&gen);
        let U = expm(&herm.mapv(|z| C64::i() * z)).unwrap();
        (unitary_transform3(&ops, &U), U)
    }

    #[test]
    fn integrate_expm_of_zero_is_time() {
        let z: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        close_l2(&integrate_expm(&z, 1.5).unwrap(), &(eye(2) * 1.5), 1e-12);
    }

    #[test]
    fn counts_irreps() {
        let (ops, _) = mixed_space();
        let Jz = generator(&ops, 2);
        for (j, expected) in [(0, 1.0), (1, 1.0), (2, 1.0), (3, 0.0)] {
            let count = count_so3_irrep(SpinTotal::new(2 * j), &Jz).unwrap();
            assert!((count - expected).abs() < 1e-8, "j = {}: {}", j, count);
        }
    }

    #[test]
    fn projector_is_idempotent_with_irrep_trace() {
        let (ops, _) = mixed_space();
        let P = project_so3_irrep(SpinTotal::new(2), &generator(&ops, 1), &generator(&ops, 2))
            .unwrap();
        close_l2(&P.dot(&P), &P, 1e-8);
        assert!((P.diag().sum().re - 3.0).abs() < 1e-8);
    }

    #[test]
    fn scalar_projector_is_identity_on_singlet() {
        let ops = l_ops(0);
        let P = project_so3_irrep(SpinTotal::new(0), &generator(&ops, 1), &generator(&ops, 2))
            .unwrap();
        close_l2(&P, &eye(1), 1e-10);
    }

    #[test]
    fn half_integer_projection_is_rejected() {
        let ops = calc_ang_mom_ops(SpinTotal::new(1)).cart();
        assert!(
            project_so3_irrep(SpinTotal::new(1), &generator(&ops, 1), &generator(&ops, 2))
                .is_err()
        );
    }

    #[test]
    fn angm_basis_recovers_standard_operators() {
        let (ops, _) = mixed_space();
        let ls = [SpinTotal::new(4), SpinTotal::new(2)];
        let vecs = project_angm_basis(&ls, &ops, false).unwrap();
        assert_eq!(vecs.dim(), (9, 8));
        close_l2(&dagger(&vecs).dot(&vecs), &eye(8), 1e-8);
        let projected = unitary_transform3(&ops, &vecs);
        let truth = block_diag3(&[l_ops(2), l_ops(1)]);
        close_l2(&projected, &truth, 1e-7);

        let full = project_angm_basis(&ls, &ops, true).unwrap();
        assert_eq!(full.dim(), (9, 9));
    }

    #[test]
    fn angm_basis_rejects_oversized_irrep() {
        let ops = l_ops(1);
        let err = project_angm_basis(&[SpinTotal::new(4)], &ops, false);
        assert!(matches!(err, Err(AngmomError::Subspace { needed: 5, available: 3, .. })));
    }

    #[test]
    fn spectral_projector_counts_states() {
        let (ops, _) = mixed_space();
        let j2 = crate::linalg::cartesian_op_squared(&ops);
        let P1 = project_angm(SpinTotal::new(2), &j2).unwrap();
        let P2 = project_angm(SpinTotal::new(4), &j2).unwrap();
        assert!((P1.diag().sum().re - 3.0).abs() < 1e-10);
        assert!((P2.diag().sum().re - 5.0).abs() < 1e-10);
        assert!(P1.dot(&P2).iter().all(|z| z.norm() < 1e-10));
    }
}
