//! Stevens operator equivalents `O_k^q` from the Ryabov recursion.
//!
//! The operators are polynomials in `J₊`, `J₋` and `J_z` whose coefficients
//! `a(k, q, m)` are themselves polynomials in `X = J(J + 1)`. The coefficients
//! are generated recursively and memoised in a [`RyabovCache`] owned by the
//! caller; nothing is cached globally.

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use rustc_hash::FxHashMap as HashMap;
use crate::{
    angmom::calc_ang_mom_ops,
    error::{ AngmomError, AngmomResult },
    linalg::matrix_power,
    spin::SpinTotal,
};

/// Highest rank reachable at double precision.
pub const K_MAX: usize = 12;

fn binomial(n: i32, k: i32) -> f64 {
    if k < 0 || n < 0 || k > n { return 0.0; }
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * f64::from(n - i) / f64::from(i + 1))
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Memoised Ryabov coefficients `a(k, q, m)`, each a vector of length `k + 1`
/// over powers of `X = J(J + 1)`.
#[derive(Clone, Debug, Default)]
pub struct RyabovCache {
    memo: HashMap<(i32, i32, i32), nd::Array1<f64>>,
}

impl RyabovCache {
    pub fn new() -> Self { Self::default() }

    /// Number of memoised triples.
    pub fn len(&self) -> usize { self.memo.len() }

    pub fn is_empty(&self) -> bool { self.memo.is_empty() }

    /// Coefficient vector `a(k, q, m)`.
    ///
    /// Requires `1 <= k <= 12`, `0 <= q <= k` and `m >= 0`; `a` vanishes for
    /// `q + m > k`.
    pub fn a(&mut self, k: usize, q: usize, m: usize) -> AngmomResult<nd::Array1<f64>> {
        if !(1..=K_MAX).contains(&k) {
            return Err(AngmomError::domain(format!("rank k = {} outside 1..={}", k, K_MAX)));
        }
        if q > k {
            return Err(AngmomError::domain(format!("order q = {} exceeds rank k = {}", q, k)));
        }
        Ok(self.a_rec(k as i32, q as i32, m as i32))
    }

    fn a_rec(&mut self, k: i32, q: i32, m: i32) -> nd::Array1<f64> {
        if let Some(coeff) = self.memo.get(&(k, q, m)) { return coeff.clone(); }
        let n_pow = (k + 1) as usize;
        let mut coeff: nd::Array1<f64> = nd::Array1::zeros(n_pow);
        if q == k && m == 0 {
            coeff[0] = 1.0;
        } else if q + m > k || m < 0 {
            // recursion terminates on zero
        } else {
            let (qf, mf) = (f64::from(q), f64::from(m));
            coeff.scaled_add(2.0 * qf + mf + 1.0, &self.a_rec(k, q + 1, m - 1));
            coeff.scaled_add(qf * (qf + 1.0) - mf * (mf + 1.0) / 2.0, &self.a_rec(k, q + 1, m));
            for n in 1..=(k - q - m - 1) {
                let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
                let next = self.a_rec(k, q + 1, m + n);
                coeff.slice_mut(s![1..])
                    .scaled_add(sign * binomial(m + n, m), &next.slice(s![..n_pow - 1]));
                coeff.scaled_add(
                    sign * (-binomial(m + n, m - 1) - binomial(m + n, m - 2)),
                    &next,
                );
            }
        }
        self.memo.insert((k, q, m), coeff.clone());
        coeff
    }

    /// Tabulate every `a(k, q, m)` for `k <= k_max`, with their common
    /// factors.
    pub fn coeffs(&mut self, k_max: usize) -> AngmomResult<RyabovTable> {
        if !(1..=K_MAX).contains(&k_max) {
            return Err(AngmomError::domain(format!("k_max = {} outside 1..={}", k_max, K_MAX)));
        }
        let mut a: nd::Array4<f64> = nd::Array4::zeros((k_max, k_max + 1, k_max + 1, k_max + 1));
        let mut f: nd::Array2<f64> = nd::Array2::zeros((k_max, k_max + 1));
        for k in 1..=k_max {
            for q in 0..=k {
                for m in 0..=(k - q) {
                    let coeff = self.a_rec(k as i32, q as i32, m as i32);
                    a.slice_mut(s![k - 1, q, m, ..=k]).assign(&coeff);
                }
                // coefficients are integral; their gcd normalises the operator
                let g
                    = a.slice(s![k - 1, q, .., ..]).iter()
                    .filter(|v| **v != 0.0)
                    .fold(0_i64, |acc, v| gcd(acc, v.round() as i64));
                f[[k - 1, q]] = g as f64;
            }
        }
        Ok(RyabovTable { k_max, a, f })
    }
}

/// All Ryabov coefficients up to a maximum rank.
#[derive(Clone, Debug)]
pub struct RyabovTable {
    k_max: usize,
    a: nd::Array4<f64>,
    f: nd::Array2<f64>,
}

impl RyabovTable {
    pub fn k_max(&self) -> usize { self.k_max }

    /// Coefficient of `X^i` in `a(k, q, m)`.
    pub fn a(&self, k: usize, q: usize, m: usize, i: usize) -> f64 {
        self.a[[k - 1, q, m, i]]
    }

    /// Greatest common factor of all non-zero `a(k, q, :, :)`; zero if none.
    pub fn f(&self, k: usize, q: usize) -> f64 { self.f[[k - 1, q]] }

    /// `a(k, q, m)` evaluated at `X`.
    pub fn a_at(&self, k: usize, q: usize, m: usize, x: f64) -> f64 {
        self.a.slice(s![k - 1, q, m, ..]).iter().rev()
            .fold(0.0, |acc, c| acc * x + c)
    }
}

/// Stevens operators `O_k^q` for `k = 1..=k_max` and `q = -k..=k` on a single
/// `J` manifold.
#[derive(Clone, Debug)]
pub struct StevensOps {
    k_max: usize,
    ops: nd::Array4<C64>,
}

impl StevensOps {
    pub fn k_max(&self) -> usize { self.k_max }

    /// Dimension of the manifold.
    pub fn dim(&self) -> usize { self.ops.shape()[2] }

    /// `O_k^q`, or `None` outside `1 <= k <= k_max`, `|q| <= k`.
    pub fn get(&self, k: usize, q: i32) -> Option<nd::ArrayView2<'_, C64>> {
        if k == 0 || k > self.k_max || q.unsigned_abs() as usize > k { return None; }
        let idx = (k as i32 + q) as usize;
        Some(self.ops.slice(s![k - 1, idx, .., ..]))
    }

    /// The raw `(k_max, 2 k_max + 1, n, n)` array, indexed by `[k - 1, k + q]`.
    pub fn as_array(&self) -> &nd::Array4<C64> { &self.ops }
}

/// Compute Stevens operators from the ladder operators of a `J` manifold.
///
/// `k_max` is clamped to [`K_MAX`].
pub fn calc_stev_ops(
    k_max: usize,
    j: SpinTotal,
    jp: &nd::Array2<C64>,
    jm: &nd::Array2<C64>,
    jz: &nd::Array2<C64>,
    cache: &mut RyabovCache,
) -> AngmomResult<StevensOps>
{
    let k_max = k_max.min(K_MAX);
    let n = j.mult();
    if k_max == 0 {
        return Ok(StevensOps { k_max, ops: nd::Array4::zeros((0, 1, n, n)) });
    }
    let table = cache.coeffs(k_max)?;
    let x = j.casimir();
    let jp_pow: Vec<nd::Array2<C64>>
        = (0..=k_max as u32).map(|p| matrix_power(jp, p)).collect();
    let jm_pow: Vec<nd::Array2<C64>>
        = (0..=k_max as u32).map(|p| matrix_power(jm, p)).collect();
    let jz_pow: Vec<nd::Array2<C64>>
        = (0..=k_max as u32).map(|p| matrix_power(jz, p)).collect();
    let mut ops: nd::Array4<C64> = nd::Array4::zeros((k_max, 2 * k_max + 1, n, n));
    for k in 1..=k_max {
        for q in 0..=k {
            let f = table.f(k, q);
            if f == 0.0 { continue; }
            let alpha = if k % 2 == 1 || q % 2 == 0 { 1.0 } else { 0.5 };
            let mut pos: nd::Array2<C64> = nd::Array2::zeros((n, n));
            let mut neg: nd::Array2<C64> = nd::Array2::zeros((n, n));
            for m in 0..=(k - q) {
                let a = table.a_at(k, q, m, x);
                if a == 0.0 { continue; }
                let sign = if (k - q - m) % 2 == 0 { 1.0 } else { -1.0 };
                let plus = (&jp_pow[q] + &jm_pow[q].mapv(|v| v * sign)).dot(&jz_pow[m]);
                let minus = (&jp_pow[q] - &jm_pow[q].mapv(|v| v * sign)).dot(&jz_pow[m]);
                pos.scaled_add(C64::from(a), &plus);
                neg.scaled_add(C64::from(a), &minus);
            }
            let pos_scale = C64::from(alpha / (2.0 * f));
            ops.slice_mut(s![k - 1, k + q, .., ..]).assign(&pos.mapv(|v| v * pos_scale));
            if q != 0 {
                let neg_scale = C64::from(alpha) / C64::new(0.0, 2.0 * f);
                ops.slice_mut(s![k - 1, k - q, .., ..]).assign(&neg.mapv(|v| v * neg_scale));
            }
        }
    }
    Ok(StevensOps { k_max, ops })
}

/// [`calc_stev_ops`] using the standard ladder operators of `j`.
pub fn stevens_ops(k_max: usize, j: SpinTotal, cache: &mut RyabovCache)
    -> AngmomResult<StevensOps>
{
    let ops = calc_ang_mom_ops(j);
    calc_stev_ops(k_max, j, &ops.p, &ops.m, &ops.z, cache)
}
