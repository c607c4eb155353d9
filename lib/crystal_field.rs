//! Crystal-field utilities on top of [`StevensOps`]: Hamiltonian assembly,
//! parameter index conventions, conversion to the Wybourne normalisation and
//! the derived strength parameters.
//!
//! Parameter vectors are ordered `k = 2, q = -2..=2, k = 4, q = -4..=4, ...`
//! unless stated otherwise.

use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    error::{ AngmomError, AngmomResult },
    spin::{ parity_sign, w3j_f, w6j, SpinTotal },
    stevens::{ StevensOps, K_MAX },
};

/// Number of even-rank parameters up to and including rank 2, 4 and 6.
pub fn n_total_cfp_by_rank(k: usize) -> Option<usize> {
    match k {
        2 => Some(5),
        4 => Some(14),
        6 => Some(27),
        _ => None,
    }
}

/// Highest even rank described by a parameter vector of the given length.
pub fn max_rank(n_params: usize) -> AngmomResult<usize> {
    match n_params {
        5 => Ok(2),
        14 => Ok(4),
        27 => Ok(6),
        n => Err(AngmomError::domain(format!("incorrect number of crystal-field parameters: {}", n))),
    }
}

/// Index of `(k, q)` in a vector holding only even ranks.
pub fn even_kq_to_num(k: usize, q: i32) -> usize {
    let offset: usize = (1..k / 2).map(|kn| 2 * (k - 2 * kn) + 1).sum();
    (k as i32 + q) as usize + offset
}

/// Index of `(k, q)` in a vector holding only odd ranks.
pub fn odd_kq_to_num(k: usize, q: i32) -> usize {
    let offset: usize = (1..k).step_by(2).map(|kn| 2 * kn + 1).sum();
    (k as i32 + q) as usize + offset
}

/// Index of `(k, q)` in a vector holding every rank from 1.
pub fn kq_to_num(k: usize, q: i32) -> usize {
    let offset: usize = (1..k).map(|kn| 2 * kn + 1).sum();
    (k as i32 + q) as usize + offset
}

/// Crystal-field Hamiltonian `Σ_{k even} Σ_q θ_kq B_kq O_k^q`, its
/// eigenvalues shifted so that the lowest is zero, and its eigenvectors.
///
/// `k_max` defaults to the largest even rank not exceeding `2J` (and 12);
/// `oef` defaults to unity.
pub fn calc_hcf(
    j: SpinTotal,
    cfps: &[f64],
    stev_ops: &StevensOps,
    k_max: Option<usize>,
    oef: Option<&[f64]>,
) -> AngmomResult<(nd::Array2<C64>, nd::Array1<f64>, nd::Array2<C64>)>
{
    let k_max
        = k_max.unwrap_or_else(|| {
            let k = j.halves() as usize;
            (k - k % 2).min(K_MAX)
        });
    let n = j.mult();
    if stev_ops.dim() != n {
        return Err(AngmomError::shape(&[n, n], &[stev_ops.dim(), stev_ops.dim()]));
    }
    let needed = even_kq_to_num(k_max, k_max as i32) + 1;
    if k_max >= 2 && cfps.len() < needed {
        return Err(AngmomError::shape(&[needed], &[cfps.len()]));
    }
    let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
    for k in (2..=k_max).step_by(2) {
        for q in -(k as i32)..=(k as i32) {
            let idx = even_kq_to_num(k, q);
            let theta = oef.and_then(|o| o.get(idx).copied()).unwrap_or(1.0);
            let op
                = stev_ops.get(k, q)
                .ok_or_else(|| AngmomError::domain(format!("no Stevens operator for k = {}", k)))?;
            H.scaled_add(C64::from(cfps[idx] * theta), &op);
        }
    }
    let (mut E, V) = H.clone().eigh_into(UPLO::Lower)?;
    let e0 = E.first().copied().unwrap_or(0.0);
    E.mapv_inplace(|e| e - e0);
    Ok((H, E, V))
}

/// Operator equivalent factors of a `|J m_J>` basis for every even-rank
/// parameter up to rank 6 (27 values), for `n` electrons in an f shell.
pub fn calc_oef(n: usize, j: SpinTotal, l: SpinTotal, s: SpinTotal) -> Vec<f64> {
    let (jf, lf) = (j.f(), l.f());
    let lambda = |p: usize| {
        let sign = parity_sign(j.halves() as i32 + l.halves() as i32 + s.halves() as i32 + 2 * p as i32);
        let sixj = w6j(j, j, SpinTotal::new(2 * p as u32), l, l, s);
        let threej = w3j_f(p as f64, 0.0, lf, lf, lf, -lf);
        sign * (2.0 * jf + 1.0) * sixj / threej
    };
    let reduced_k = |p: usize| {
        let mut K = 7.0 * w3j_f(p as f64, 0.0, 3.0, 0.0, 3.0, 0.0);
        let n_max
            = if n <= 7 {
                n
            } else {
                if p == 0 { K -= 7.0_f64.sqrt(); }
                n - 7
            };
        let kay: f64
            = (1..=n_max)
            .map(|jj| {
                let sign = if jj % 2 == 0 { 1.0 } else { -1.0 };
                let m = 4.0 - jj as f64;
                sign * w3j_f(p as f64, 0.0, 3.0, m, 3.0, -m)
            })
            .sum();
        K * kay
    };
    let red_j = |p: usize| {
        // (2J + p + 1)! / (2J - p)!
        let lo = j.halves() as i64 - p as i64 + 1;
        let hi = j.halves() as i64 + p as i64 + 1;
        let ratio: f64 = (lo.max(1)..=hi).map(|i| i as f64).product();
        ratio.sqrt() / 2.0_f64.powi(p as i32)
    };
    let mut oef = vec![0.0; 27];
    let k_max = (j.halves() as usize).min(6);
    for k in (2..=k_max).step_by(2) {
        let value = lambda(k) * reduced_k(k) / red_j(k);
        let start = even_kq_to_num(k, -(k as i32));
        oef[start..start + 2 * k + 1].iter_mut().for_each(|o| { *o = value; });
    }
    oef
}

// Mulak and Gajek conversion factors for k = 2, 4, 6
fn wybourne_lambda() -> [f64; 27] {
    let r = f64::sqrt;
    [
        r(6.0) / 3.0,
        -r(6.0) / 6.0,
        2.0,
        -r(6.0) / 6.0,
        r(6.0) / 3.0,
        4.0 * r(70.0) / 35.0,
        -2.0 * r(35.0) / 35.0,
        2.0 * r(10.0) / 5.0,
        -2.0 * r(5.0) / 5.0,
        8.0,
        -2.0 * r(5.0) / 5.0,
        2.0 * r(10.0) / 5.0,
        -2.0 * r(35.0) / 35.0,
        4.0 * r(70.0) / 35.0,
        16.0 * r(231.0) / 231.0,
        -8.0 * r(77.0) / 231.0,
        8.0 * r(14.0) / 21.0,
        -8.0 * r(105.0) / 105.0,
        16.0 * r(105.0) / 105.0,
        -4.0 * r(42.0) / 21.0,
        16.0,
        -4.0 * r(42.0) / 21.0,
        16.0 * r(105.0) / 105.0,
        -8.0 * r(105.0) / 105.0,
        8.0 * r(14.0) / 21.0,
        -8.0 * r(77.0) / 231.0,
        16.0 * r(231.0) / 231.0,
    ]
}

/// Convert even-rank Stevens parameters to (complex) Wybourne parameters.
pub fn stevens_to_wybourne(cfps: &[f64], k_max: usize) -> AngmomResult<Vec<C64>> {
    let n = n_total_cfp_by_rank(k_max)
        .ok_or_else(|| AngmomError::domain(format!("cannot convert rank {} parameters to Wybourne", k_max)))?;
    if cfps.len() < n {
        return Err(AngmomError::shape(&[n], &[cfps.len()]));
    }
    let lambda = wybourne_lambda();
    let mut w = vec![C64::from(0.0); n];
    for k in (2..=k_max).step_by(2) {
        for q in -(k as i32)..=(k as i32) {
            let idx = even_kq_to_num(k, q);
            let neg = even_kq_to_num(k, -q);
            w[idx]
                = if q == 0 {
                    C64::from(lambda[idx] * cfps[idx])
                } else if q > 0 {
                    lambda[idx] * C64::new(cfps[idx], cfps[neg])
                } else {
                    let sign = if q % 2 == 0 { 1.0 } else { -1.0 };
                    lambda[idx] * sign * C64::new(cfps[neg], -cfps[idx])
                };
        }
    }
    Ok(w)
}

/// Per-rank strength parameters `S^k` for `k = 2, 4, 6`.
pub fn calc_rank_strength(cfps: &[f64]) -> AngmomResult<[f64; 3]> {
    let k_max = max_rank(cfps.len())?;
    let w = stevens_to_wybourne(cfps, k_max)?;
    let rank = |lo: usize, hi: usize, norm: f64| {
        let sq: f64 = w.get(lo..hi.min(w.len())).unwrap_or(&[]).iter().map(|z| z.norm_sqr()).sum();
        (sq / norm).sqrt()
    };
    Ok([rank(0, 5, 5.0), rank(5, 14, 9.0), rank(14, 27, 13.0)])
}

/// Per-order strength parameters `S_q` for `|q| = 0..=6`.
pub fn calc_order_strength(cfps: &[f64]) -> AngmomResult<[f64; 7]> {
    let k_max = max_rank(cfps.len())?;
    let w = stevens_to_wybourne(cfps, k_max)?;
    let mut sq = [0.0; 7];
    for k in (2..=k_max).step_by(2) {
        let norm = (2 * k + 1) as f64;
        for (q, s) in sq.iter_mut().enumerate().take(k + 1) {
            *s += w[even_kq_to_num(k, q as i32)].norm_sqr() / norm;
        }
    }
    Ok(sq.map(f64::sqrt))
}

/// Total strength parameter `S`.
pub fn calc_total_strength(cfps: &[f64]) -> AngmomResult<f64> {
    let sk = calc_rank_strength(cfps)?;
    Ok((sk.iter().map(|s| s * s).sum::<f64>() / 3.0).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stevens::{ stevens_ops, RyabovCache };

    #[test]
    fn index_conventions() {
        assert_eq!(even_kq_to_num(2, -2), 0);
        assert_eq!(even_kq_to_num(4, 0), 9);
        assert_eq!(even_kq_to_num(6, 6), 26);
        assert_eq!(odd_kq_to_num(1, -1), 0);
        assert_eq!(odd_kq_to_num(3, -3), 3);
        assert_eq!(kq_to_num(1, -1), 0);
        assert_eq!(kq_to_num(2, -2), 3);
        assert_eq!(kq_to_num(3, 3), 14);
    }

    #[test]
    fn axial_field_spectrum() {
        // B20 O20 on J = 1: eigenvalues B20 (3 m^2 - 2)
        let j = SpinTotal::new(2);
        let stev = stevens_ops(2, j, &mut RyabovCache::new()).unwrap();
        let mut cfps = vec![0.0; 5];
        cfps[2] = 10.0;
        let (_, E, _) = calc_hcf(j, &cfps, &stev, None, None).unwrap();
        let truth = [0.0, 30.0, 30.0];
        for (e, t) in E.iter().zip(truth) {
            assert!((e - t).abs() < 1e-10);
        }
    }

    #[test]
    fn wybourne_axial() {
        let mut cfps = vec![0.0; 5];
        cfps[2] = 1.5;
        cfps[4] = 0.5;
        cfps[0] = 0.25;
        let w = stevens_to_wybourne(&cfps, 2).unwrap();
        assert!((w[2].re - 3.0).abs() < 1e-12);
        let lam = 6.0_f64.sqrt() / 3.0;
        assert!((w[4] - C64::new(lam * 0.5, lam * 0.25)).norm() < 1e-12);
        assert!(stevens_to_wybourne(&cfps, 8).is_err());
    }

    #[test]
    fn strengths_of_single_parameter() {
        let mut cfps = vec![0.0; 27];
        cfps[even_kq_to_num(4, 0)] = 1.0;
        let sk = calc_rank_strength(&cfps).unwrap();
        assert!(sk[0].abs() < 1e-14 && sk[2].abs() < 1e-14);
        assert!((sk[1] - 8.0 / 3.0).abs() < 1e-12);
        let sq = calc_order_strength(&cfps).unwrap();
        assert!((sq[0] - 8.0 / 3.0).abs() < 1e-12);
        let s = calc_total_strength(&cfps).unwrap();
        assert!((s - 8.0 / 3.0 / 3.0_f64.sqrt()).abs() < 1e-12);
        assert!(calc_rank_strength(&cfps[..10]).is_err());
    }

    #[test]
    fn oef_for_dy() {
        // Dy3+ 6H15/2: the rank-2 factor is Stevens' alpha_J = -2/315
        let oef = calc_oef(9, SpinTotal::new(15), SpinTotal::new(10), SpinTotal::new(5));
        assert_eq!(oef.len(), 27);
        assert!((oef[0] + 2.0 / 315.0).abs() < 1e-9);
        assert!(oef[..5].iter().all(|o| (o - oef[0]).abs() < 1e-15));
    }
}
