//! Matrix representations of angular momentum operators in the standard
//! `|j m>` basis, with `m` ascending from `-j` to `j`.

use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    linalg::{ block_diag3, eye },
    spin::SpinTotal,
};

/// Angular momentum operators of a single `j` manifold.
#[derive(Clone, Debug, PartialEq)]
pub struct AngMomOps {
    pub x: nd::Array2<C64>,
    pub y: nd::Array2<C64>,
    pub z: nd::Array2<C64>,
    /// Raising operator `J₊`.
    pub p: nd::Array2<C64>,
    /// Lowering operator `J₋`.
    pub m: nd::Array2<C64>,
    /// `J² = Jx² + Jy² + Jz²`.
    pub sq: nd::Array2<C64>,
}

impl AngMomOps {
    /// Dimension of the manifold.
    pub fn dim(&self) -> usize { self.z.nrows() }

    /// Stack `(x, y, z)` into a `(3, n, n)` array.
    pub fn cart(&self) -> nd::Array3<C64> {
        let n = self.dim();
        let mut out: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
        out.index_axis_mut(nd::Axis(0), 0).assign(&self.x);
        out.index_axis_mut(nd::Axis(0), 1).assign(&self.y);
        out.index_axis_mut(nd::Axis(0), 2).assign(&self.z);
        out
    }

    /// Identity on the manifold.
    pub fn identity(&self) -> nd::Array2<C64> { eye(self.dim()) }

    /// Complete Cartesian `(3, n, n)` operators with ladder operators and
    /// `J²`, in whatever basis they are given.
    pub fn from_cart(ops: &nd::Array3<C64>) -> Self {
        let x = ops.index_axis(nd::Axis(0), 0).to_owned();
        let y = ops.index_axis(nd::Axis(0), 1).to_owned();
        let z = ops.index_axis(nd::Axis(0), 2).to_owned();
        let iy = y.mapv(|v| C64::i() * v);
        let p = &x + &iy;
        let m = &x - &iy;
        let sq = x.dot(&x) + y.dot(&y) + z.dot(&z);
        Self { x, y, z, p, m, sq }
    }
}

/// Compute `Jx, Jy, Jz, J₊, J₋, J²` for total angular momentum `j`.
pub fn calc_ang_mom_ops(j: SpinTotal) -> AngMomOps {
    let n = j.mult();
    let jj = j.casimir();
    let ms: Vec<f64> = j.projections().map(|s| s.proj().f()).collect();
    let z: nd::Array2<C64>
        = nd::Array2::from_diag(&ms.iter().map(|m| C64::from(*m)).collect::<nd::Array1<C64>>());
    let mut p: nd::Array2<C64> = nd::Array2::zeros((n, n));
    let mut m: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for k in 0..n.saturating_sub(1) {
        // <m+1| J₊ |m> and <m| J₋ |m+1>
        let lo = ms[k];
        let hi = ms[k + 1];
        p[[k + 1, k]] = C64::from((jj - lo * (lo + 1.0)).max(0.0).sqrt());
        m[[k, k + 1]] = C64::from((jj - hi * (hi - 1.0)).max(0.0).sqrt());
    }
    let x = (&p + &m).mapv(|v| v * 0.5);
    let y = (&p - &m).mapv(|v| v / (2.0 * C64::i()));
    let sq = x.dot(&x) + y.dot(&y) + z.dot(&z);
    AngMomOps { x, y, z, p, m, sq }
}

/// Block-diagonal spin operators for a sequence of spin multiplicities,
/// each block repeated `count` times.
pub fn make_angmom_ops_from_mult(mults: &[(usize, usize)]) -> nd::Array3<C64> {
    let blocks: Vec<nd::Array3<C64>>
        = mults.iter()
        .flat_map(|&(mult, count)| {
            let ops = calc_ang_mom_ops(SpinTotal::from_mult(mult)).cart();
            std::iter::repeat(ops).take(count)
        })
        .collect();
    block_diag3(&blocks)
}

/// Phase matrix `diag(exp(i φ))` that renders the first sub-diagonal of
/// `op` real and positive.
///
/// `φ` is fixed to zero on the last state.
pub fn phase(op: &nd::Array2<C64>) -> nd::Array2<C64> {
    let n = op.nrows();
    let mut phi: Vec<f64> = vec![0.0; n];
    for k in (0..n.saturating_sub(1)).rev() {
        let theta = op[[k + 1, k]].arg();
        phi[k] = phi[k + 1] - theta;
    }
    nd::Array2::from_diag(
        &phi.iter()
            .map(|f| C64::from_polar(1.0, *f))
            .collect::<nd::Array1<C64>>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::assert::close_l2;
    use crate::linalg::{ dagger, unitary_transform };

    fn commutator(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> nd::Array2<C64> {
        a.dot(b) - b.dot(a)
    }

    #[test]
    fn spin_half_is_pauli_over_two() {
        let ops = calc_ang_mom_ops(SpinTotal::new(1));
        let h = C64::from(0.5);
        let z = C64::from(0.0);
        close_l2(&ops.x, &nd::array![[z, h], [h, z]], 1e-14);
        close_l2(&ops.y, &nd::array![[z, h * C64::i()], [-h * C64::i(), z]], 1e-14);
        close_l2(&ops.z, &nd::array![[-h, z], [z, h]], 1e-14);
        close_l2(&ops.sq, &(eye(2) * 0.75), 1e-14);
    }

    #[test]
    fn algebra_holds_for_integer_and_half_integer() {
        for twice_j in 1..=7_u32 {
            let ops = calc_ang_mom_ops(SpinTotal::new(twice_j));
            let iz = ops.z.mapv(|v| v * C64::i());
            close_l2(&commutator(&ops.x, &ops.y), &iz, 1e-12);
            let jj = SpinTotal::new(twice_j).casimir();
            close_l2(&ops.sq, &(eye(ops.dim()) * jj), 1e-12);
            close_l2(&dagger(&ops.p), &ops.m, 1e-14);
        }
    }

    #[test]
    fn phase_makes_subdiagonal_positive() {
        let ops = calc_ang_mom_ops(SpinTotal::new(4));
        let ph: nd::Array2<C64>
            = nd::Array2::from_diag(&nd::array![
                C64::from_polar(1.0, 0.3),
                C64::from_polar(1.0, -1.2),
                C64::from_polar(1.0, 2.0),
                C64::from_polar(1.0, 0.7),
                C64::from_polar(1.0, -2.9),
            ]);
        let scrambled = unitary_transform(&ops.x, &ph);
        let fixed = phase(&scrambled);
        let restored = unitary_transform(&scrambled, &fixed);
        for k in 0..4 {
            let v = restored[[k + 1, k]];
            assert!(v.re > 0.0 && v.im.abs() < 1e-12);
        }
        assert!((fixed[[4, 4]] - C64::from(1.0)).norm() < 1e-14);
    }

    #[test]
    fn ladder_operators_from_cartesian() {
        let ops = calc_ang_mom_ops(SpinTotal::new(3));
        let rebuilt = AngMomOps::from_cart(&ops.cart());
        close_l2(&rebuilt.p, &ops.p, 1e-14);
        close_l2(&rebuilt.m, &ops.m, 1e-14);
        close_l2(&rebuilt.sq, &ops.sq, 1e-12);
    }

    #[test]
    fn spin_blocks_from_multiplicities() {
        let ops = make_angmom_ops_from_mult(&[(2, 1), (3, 2)]);
        assert_eq!(ops.dim(), (3, 8, 8));
        assert!((ops[[2, 0, 0]].re + 0.5).abs() < 1e-14);
        assert!((ops[[2, 7, 7]].re - 1.0).abs() < 1e-14);
    }
}
