//! Half-integer angular momentum quantum numbers and the vector-coupling
//! coefficients built from them.
//!
//! Both [`SpinTotal`] and [`SpinProj`] are stored as a whole number of halves
//! so that equality and hashing are exact.

use std::{ fmt, hash::Hash, str::FromStr };
use wigner_symbols::{ ClebschGordan, Wigner3jm, Wigner6j };
use crate::error::AngmomError;

/// A single angular momentum projection quantum number.
///
/// This type is backed by a single `i32` representing the number of halves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpinProj(i32);

impl SpinProj {
    /// Create a new projection from a number of halves.
    pub fn new(m: i32) -> Self { Self(m) }

    /// Return `self` as a bare number of halves.
    pub fn halves(self) -> i32 { self.0 }

    /// Return `self` as an `f64`.
    pub fn f(self) -> f64 { f64::from(self.0) / 2.0 }

    /// Create a projection from a `f64` value, rounding to the nearest
    /// half-integer.
    pub fn from_f64(f: f64) -> Self { Self((2.0 * f).round() as i32) }

    /// Return a copy with the opposite sign.
    pub fn reflected(self) -> Self { Self(-self.0) }
}

impl From<SpinProj> for f64 {
    fn from(m: SpinProj) -> Self { m.f() }
}

/// A single total angular momentum quantum number.
///
/// This type is backed by a single `u32` representing the number of halves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpinTotal(u32);

impl SpinTotal {
    /// Create a new total from a number of halves.
    pub fn new(j: u32) -> Self { Self(j) }

    /// Return `self` as a bare number of halves.
    pub fn halves(self) -> u32 { self.0 }

    /// Return `self` as an `f64`.
    pub fn f(self) -> f64 { f64::from(self.0) / 2.0 }

    /// Create a total from a `f64` value, rounding to the nearest
    /// half-integer.
    ///
    /// Negative inputs are passed through [`f64::abs`] before rounding.
    pub fn from_f64(f: f64) -> Self { Self((2.0 * f.abs()).round() as u32) }

    /// Create a total from a spin multiplicity `2j + 1`.
    ///
    /// A multiplicity of zero is mapped to `j = 0`.
    pub fn from_mult(mult: usize) -> Self {
        Self(mult.saturating_sub(1) as u32)
    }

    /// Number of projection states, `2j + 1`.
    pub fn mult(self) -> usize { self.0 as usize + 1 }

    /// `j (j + 1)`.
    pub fn casimir(self) -> f64 {
        let j = self.f();
        j * (j + 1.0)
    }

    /// Return `true` if `self` is a whole number.
    pub fn is_integer(self) -> bool { self.0 % 2 == 0 }

    /// Return an iterator over available projections in ascending order.
    pub fn projections(self) -> SpinProjections {
        SpinProjections { j: self, next: -(self.0 as i32) }
    }

    /// Return every total reachable by coupling `self` with `other`, i.e.
    /// `|j1 - j2|, ..., j1 + j2` in unit steps.
    pub fn coupled_with(self, other: Self) -> impl Iterator<Item = SpinTotal> {
        let lo = self.0.abs_diff(other.0);
        let hi = self.0 + other.0;
        (lo..=hi).step_by(2).map(SpinTotal)
    }
}

impl From<SpinTotal> for f64 {
    fn from(j: SpinTotal) -> Self { j.f() }
}

impl fmt::Display for SpinTotal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_integer() {
            write!(f, "{}", self.0 / 2)
        } else {
            write!(f, "{}/2", self.0)
        }
    }
}

impl FromStr for SpinTotal {
    type Err = AngmomError;

    /// Accept `"3"`, `"1.5"` and `"3/2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AngmomError::Format(s.to_string(), "'3', '1.5' or '3/2'");
        let s = s.trim();
        if let Some((num, den)) = s.split_once('/') {
            let num: u32 = num.trim().parse().map_err(|_| err())?;
            let den: u32 = den.trim().parse().map_err(|_| err())?;
            match den {
                1 => Ok(Self(2 * num)),
                2 => Ok(Self(num)),
                _ => Err(err()),
            }
        } else {
            let f: f64 = s.parse().map_err(|_| err())?;
            let halves = 2.0 * f;
            (f >= 0.0 && (halves - halves.round()).abs() < 1e-9)
                .then_some(Self(halves.round() as u32))
                .ok_or_else(err)
        }
    }
}

/// A `(total, projection)` quantum number pair.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Spin(SpinTotal, SpinProj);

impl Spin {
    /// Create a new pair if the projection is valid for the given total.
    pub fn new(j: u32, m: i32) -> Option<Self> {
        let j_i64 = i64::from(j);
        let m_i64 = i64::from(m);
        (
            (-j_i64..=j_i64).contains(&m_i64)
            && (m_i64 - j_i64) % 2 == 0
        )
        .then_some(Self(SpinTotal(j), SpinProj(m)))
    }

    /// Return the [total][SpinTotal] quantum number.
    pub fn total(self) -> SpinTotal { self.0 }

    /// Return the [projection][SpinProj] quantum number.
    pub fn proj(self) -> SpinProj { self.1 }

    /// Return `self` as a bare pair of halves.
    pub fn halves(self) -> (u32, i32) { (self.0.halves(), self.1.halves()) }

    /// Return `self` as a `(f64, f64)`.
    pub fn f(self) -> (f64, f64) { (self.0.f(), self.1.f()) }
}

/// Iterator over projection states for a fixed total, in ascending order.
#[derive(Copy, Clone, Debug)]
pub struct SpinProjections {
    j: SpinTotal,
    next: i32,
}

impl Iterator for SpinProjections {
    type Item = Spin;

    fn next(&mut self) -> Option<Self::Item> {
        let spin = Spin::new(self.j.0, self.next)?;
        self.next += 2;
        Some(spin)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = ((self.j.0 as i32 - self.next) / 2 + 1).max(0) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SpinProjections { }

fn triangle(tj1: u32, tj2: u32, tj3: u32) -> bool {
    tj3 >= tj1.abs_diff(tj2) && tj3 <= tj1 + tj2 && (tj1 + tj2 + tj3) % 2 == 0
}

/// Calculate the Clebsch-Gordan coefficient `<j1 m1; j2 m2 | j3 m3>`.
///
/// Vanishes identically if the selection rules are not met.
pub fn cg(s1: Spin, s2: Spin, s3: Spin) -> f64 {
    let (tj1, tm1) = s1.halves();
    let (tj2, tm2) = s2.halves();
    let (tj3, tm3) = s3.halves();
    if tm1 + tm2 != tm3 || !triangle(tj1, tj2, tj3) { return 0.0; }
    ClebschGordan {
        tj1: tj1 as i32,
        tm1,
        tj2: tj2 as i32,
        tm2,
        tj12: tj3 as i32,
        tm12: tm3,
    }
    .value()
    .into()
}

/// Calculate the Wigner 3j symbol for columns (left to right) `s1..s3`.
///
/// Vanishes identically if the selection rules are not met.
pub fn w3j(s1: Spin, s2: Spin, s3: Spin) -> f64 {
    let (tj1, tm1) = s1.halves();
    let (tj2, tm2) = s2.halves();
    let (tj3, tm3) = s3.halves();
    if tm1 + tm2 + tm3 != 0 || !triangle(tj1, tj2, tj3) { return 0.0; }
    Wigner3jm {
        tj1: tj1 as i32,
        tm1,
        tj2: tj2 as i32,
        tm2,
        tj3: tj3 as i32,
        tm3,
    }
    .value()
    .into()
}

/// Like [`w3j`], but taking `f64` quantum numbers `(j, m)` that are rounded
/// to the nearest half-integers; invalid projections give zero.
pub fn w3j_f(j1: f64, m1: f64, j2: f64, m2: f64, j3: f64, m3: f64) -> f64 {
    let spin = |j: f64, m: f64| {
        Spin::new(SpinTotal::from_f64(j).halves(), SpinProj::from_f64(m).halves())
    };
    match (spin(j1, m1), spin(j2, m2), spin(j3, m3)) {
        (Some(s1), Some(s2), Some(s3)) => w3j(s1, s2, s3),
        _ => 0.0,
    }
}

/// Calculate the Wigner 6j symbol for total angular momenta (by row)
/// `{j00 j01 j02; j10 j11 j12}`.
pub fn w6j(
    j00: SpinTotal,
    j01: SpinTotal,
    j02: SpinTotal,
    j10: SpinTotal,
    j11: SpinTotal,
    j12: SpinTotal,
) -> f64
{
    let admissible
        = triangle(j00.0, j01.0, j02.0)
        && triangle(j00.0, j11.0, j12.0)
        && triangle(j10.0, j01.0, j12.0)
        && triangle(j10.0, j11.0, j02.0);
    if !admissible { return 0.0; }
    Wigner6j {
        tj1: j00.halves() as i32,
        tj2: j01.halves() as i32,
        tj3: j02.halves() as i32,
        tj4: j10.halves() as i32,
        tj5: j11.halves() as i32,
        tj6: j12.halves() as i32,
    }
    .value()
    .into()
}

/// `(-1)^x` for a whole number of halves `2x`; `x` must be an integer.
pub(crate) fn parity_sign(twice: i32) -> f64 {
    if (twice / 2).rem_euclid(2) == 0 { 1.0 } else { -1.0 }
}
