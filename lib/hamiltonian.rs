//! Parametrised model spin Hamiltonians and their projection onto ab-initio
//! Hamiltonians.
//!
//! A model is a sum `H = Σ_t Σ_p c_{t,p} O_{t,p}` over terms `t` (diagonal
//! shift, spin-orbit coupling, crystal field, exchange, Zeeman) acting on
//! selected angular momenta of a [`Symbol`], where every term contributes a
//! fixed set of operators `O_{t,p}` with real coefficients in cm⁻¹.

use std::{ fmt, ops::{ Deref, DerefMut }, str::FromStr };
use indexmap::IndexMap;
use itertools::Itertools;
use log::{ debug, info };
use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    angmom::{ calc_ang_mom_ops, AngMomOps },
    constants::{ AU2MT, G_E, HARTREE2INVCM, MU_B },
    crystal_field::{ calc_oef, even_kq_to_num },
    error::{ AngmomError, AngmomResult },
    linalg::{ eye, frobenius_inner, frobenius_sq, kron_all },
    spin::SpinTotal,
    stevens::{ calc_stev_ops, RyabovCache, StevensOps, K_MAX },
    symbol::Symbol,
    term::{ ANGM_SYMBOLS, TOTJ_SYMBOLS },
};

/* Keys ***********************************************************************/

/// Kind of contribution to a model Hamiltonian.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TermKind {
    /// Constant diagonal shift.
    Diag,
    /// Spin-orbit coupling `λ L·S`.
    Soc,
    /// Crystal field `Σ B_kq O_k^q`.
    Cf,
    /// Exchange between two or more angular momenta.
    Ex,
    /// Orbital Zeeman interaction.
    LZee,
    /// Spin Zeeman interaction.
    SZee,
}

impl TermKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Diag => "diag",
            Self::Soc => "soc",
            Self::Cf => "cf",
            Self::Ex => "ex",
            Self::LZee => "Lzee",
            Self::SZee => "Szee",
        }
    }
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TermKind {
    type Err = AngmomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diag" => Ok(Self::Diag),
            "soc" => Ok(Self::Soc),
            "cf" => Ok(Self::Cf),
            "ex" => Ok(Self::Ex),
            "Lzee" => Ok(Self::LZee),
            "Szee" => Ok(Self::SZee),
            _ => Err(AngmomError::domain(format!("unknown model term '{}'", s))),
        }
    }
}

/// Cartesian component.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cart { X, Y, Z }

impl Cart {
    pub const ALL: [Cart; 3] = [Cart::X, Cart::Y, Cart::Z];

    /// Position along the first axis of a `(3, n, n)` operator array.
    pub fn index(self) -> usize {
        match self {
            Self::X => 0,
            Self::Y => 1,
            Self::Z => 2,
        }
    }

    // rank-1 Stevens operators: O_1^{-1} = Jy, O_1^0 = Jz, O_1^1 = Jx
    fn from_rank1_order(q: i32) -> Option<Self> {
        match q {
            -1 => Some(Self::Y),
            0 => Some(Self::Z),
            1 => Some(Self::X),
            _ => None,
        }
    }
}

impl fmt::Display for Cart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::X => f.write_str("x"),
            Self::Y => f.write_str("y"),
            Self::Z => f.write_str("z"),
        }
    }
}

/// Index of a single angular momentum within an exchange parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExIndex {
    /// Cartesian component of a spin-1/2 partner `R`.
    Alpha(Cart),
    /// Stevens operator rank and order.
    Rank { k: usize, q: i32 },
}

/// Name of a single model parameter within a term.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Shift,
    /// Spin-orbit coupling constant, optionally per Cartesian component.
    Lamb(Option<Cart>),
    /// Crystal-field parameter.
    B { k: usize, q: i32 },
    /// Zeeman field component.
    Zee(Cart),
    /// Exchange parameter, one index per participating angular momentum.
    Ex(Vec<ExIndex>),
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shift => f.write_str("shift"),
            Self::Lamb(None) => f.write_str("lamb"),
            Self::Lamb(Some(c)) => write!(f, "lamb(component={})", c),
            Self::B { k, q } => write!(f, "B(k={}, q={})", k, q),
            Self::Zee(c) => write!(f, "B(comp={})", c),
            Self::Ex(idx) => {
                const NAMES: [(&str, &str); 2] = [("k", "q"), ("n", "m")];
                let mut rank = 0;
                let items
                    = idx.iter()
                    .map(|i| match i {
                        ExIndex::Alpha(c) => format!("alpha={}", c),
                        ExIndex::Rank { k, q } => {
                            let (nk, nq) = NAMES.get(rank).copied().unwrap_or(("k", "q"));
                            rank += 1;
                            format!("{}={}, {}={}", nk, k, nq, q)
                        },
                    })
                    .join(", ");
                write!(f, "J({})", items)
            },
        }
    }
}

/// A term kind together with the angular momenta it acts on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TermLabel {
    pub kind: TermKind,
    pub ops: Vec<char>,
}

impl TermLabel {
    pub fn new<I>(kind: TermKind, ops: I) -> Self
    where I: IntoIterator<Item = char>
    {
        Self { kind, ops: ops.into_iter().collect() }
    }
}

impl fmt::Display for TermLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.ops.iter().join(", "))
    }
}

/// Fitted or user-supplied model parameters, in model order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelParameters(IndexMap<TermLabel, IndexMap<ParamKey, f64>>);

impl Deref for ModelParameters {
    type Target = IndexMap<TermLabel, IndexMap<ParamKey, f64>>;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl DerefMut for ModelParameters {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.0 }
}

impl FromIterator<(TermLabel, IndexMap<ParamKey, f64>)> for ModelParameters {
    fn from_iter<I>(iter: I) -> Self
    where I: IntoIterator<Item = (TermLabel, IndexMap<ParamKey, f64>)>
    {
        Self(iter.into_iter().collect())
    }
}

impl ModelParameters {
    pub fn new() -> Self { Self::default() }

    /// Look up a single parameter.
    pub fn param(&self, label: &TermLabel, key: &ParamKey) -> Option<f64> {
        self.0.get(label).and_then(|params| params.get(key)).copied()
    }
}

impl fmt::Display for ModelParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, params) in self.0.iter() {
            let values
                = params.iter()
                .map(|(key, value)| format!("{} = {:.2}", key, value))
                .join(", ");
            writeln!(f, "{}: {}", label, values)?;
        }
        Ok(())
    }
}

/* Settings *******************************************************************/

/// Exchange terms admitted by their behaviour under time reversal.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TimeReversal {
    /// Only terms with even total rank.
    #[default]
    Even,
    /// Only terms with odd total rank.
    Odd,
    /// No restriction.
    Any,
}

impl TimeReversal {
    /// Return `true` if a term with total rank `rank_sum` is admitted.
    pub fn admits(self, rank_sum: usize) -> bool {
        match self {
            Self::Even => rank_sum % 2 == 0,
            Self::Odd => rank_sum % 2 == 1,
            Self::Any => true,
        }
    }
}

impl FromStr for TimeReversal {
    type Err = AngmomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "even" => Ok(Self::Even),
            "odd" => Ok(Self::Odd),
            "any" => Ok(Self::Any),
            _ => Err(AngmomError::domain(
                format!("time_reversal_symm must be 'even', 'odd' or 'any', got '{}'", s)
            )),
        }
    }
}

/// Operator equivalent factors of an ion, indexed by rank `k`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ion {
    theta_l: Option<Vec<f64>>,
    theta_j: Option<Vec<f64>>,
}

impl Ion {
    pub fn new() -> Self { Self::default() }

    /// Set the factors used for orbital angular momenta.
    pub fn with_theta_l(mut self, theta: Vec<f64>) -> Self {
        self.theta_l = Some(theta);
        self
    }

    /// Set the factors used for total angular momenta.
    pub fn with_theta_j(mut self, theta: Vec<f64>) -> Self {
        self.theta_j = Some(theta);
        self
    }

    /// Free-ion factors of the `J` ground level of `n` f electrons.
    pub fn free_ion(n: usize, j: SpinTotal, l: SpinTotal, s: SpinTotal) -> Self {
        let oef = calc_oef(n, j, l, s);
        let theta: Vec<f64>
            = (0..=6)
            .map(|k| if k >= 2 && k % 2 == 0 { oef[even_kq_to_num(k, 0)] } else { 0.0 })
            .collect();
        Self::new().with_theta_j(theta)
    }

    pub fn theta_l(&self) -> Option<&[f64]> { self.theta_l.as_deref() }

    pub fn theta_j(&self) -> Option<&[f64]> { self.theta_j.as_deref() }
}

/// Construction options for a [`SpinHamiltonian`].
#[derive(Clone, Debug, PartialEq)]
pub struct SpinHamiltonianParams {
    /// Highest crystal-field rank.
    pub k_max: usize,
    /// Scale crystal-field operators by operator equivalent factors.
    pub theta: bool,
    /// Source of operator equivalent factors.
    pub ion: Option<Ion>,
    /// Include a constant diagonal shift.
    pub diag: bool,
    /// Describe spin-orbit coupling by a single isotropic constant.
    pub iso_soc: bool,
    pub time_reversal_symm: TimeReversal,
    /// Terms to include, each with the lists of angular momentum labels it
    /// acts on, e.g. `soc: [[L, S]]` or `cf: [[L]]`.
    pub terms: IndexMap<TermKind, Vec<Vec<char>>>,
}

impl Default for SpinHamiltonianParams {
    fn default() -> Self {
        Self {
            k_max: 6,
            theta: false,
            ion: None,
            diag: true,
            iso_soc: true,
            time_reversal_symm: TimeReversal::Even,
            terms: IndexMap::new(),
        }
    }
}

/* Model **********************************************************************/

/// Operators of a single term, keyed by parameter.
pub type TermOps = Vec<(ParamKey, nd::Array2<C64>)>;

/// A model Hamiltonian over an angular momentum space with all of its
/// operators built.
#[derive(Clone, Debug)]
pub struct SpinHamiltonian {
    symbol: Symbol,
    params: SpinHamiltonianParams,
    ops: Vec<(TermLabel, TermOps)>,
}

struct OpBuilder<'a> {
    symbol: &'a Symbol,
    params: &'a SpinHamiltonianParams,
    angm: IndexMap<char, AngMomOps>,
    cache: &'a mut RyabovCache,
}

impl<'a> OpBuilder<'a> {
    fn angm(&self, label: char) -> AngmomResult<&AngMomOps> {
        self.angm.get(&label).ok_or(AngmomError::UndefinedLabel(label))
    }

    // Kronecker product over the independent labels, with identities for
    // every label not among `factors`
    fn embed(&self, factors: &[(char, &nd::Array2<C64>)]) -> AngmomResult<nd::Array2<C64>> {
        for (l, _) in factors.iter() {
            if self.symbol.mult_of(*l).is_none() {
                return Err(AngmomError::UndefinedLabel(*l));
            }
        }
        let idents: Vec<nd::Array2<C64>>
            = self.symbol.mult().values().map(|m| eye(*m)).collect();
        let mats
            = self.symbol.mult().keys().zip(idents.iter())
            .map(|(l, id)| {
                factors.iter()
                    .find(|(f, _)| f == l)
                    .map(|(_, op)| *op)
                    .unwrap_or(id)
            });
        Ok(kron_all(mats))
    }

    fn stevens(&mut self, label: char, k_max: usize) -> AngmomResult<StevensOps> {
        let j = self.symbol.qn_of(label).ok_or(AngmomError::UndefinedLabel(label))?;
        let ops = self.angm.get(&label).ok_or(AngmomError::UndefinedLabel(label))?;
        calc_stev_ops(k_max, j, &ops.p, &ops.m, &ops.z, self.cache)
    }

    fn build(&mut self, label: &TermLabel) -> AngmomResult<TermOps> {
        match label.kind {
            TermKind::Diag => self.build_diag(&label.ops),
            TermKind::Soc => self.build_soc(&label.ops),
            TermKind::Cf => self.build_cf(&label.ops),
            TermKind::Ex => self.build_ex(&label.ops),
            TermKind::LZee => self.build_zee(&label.ops, true),
            TermKind::SZee => self.build_zee(&label.ops, false),
        }
    }

    fn build_diag(&self, ops: &[char]) -> AngmomResult<TermOps> {
        if !ops.is_empty() {
            return Err(AngmomError::domain("the diagonal shift acts on no angular momenta"));
        }
        Ok(vec![(ParamKey::Shift, eye(self.symbol.multiplicity()))])
    }

    fn component(&self, ops: &[char], c: Cart) -> AngmomResult<nd::Array2<C64>> {
        let comps: Vec<(char, nd::Array2<C64>)>
            = ops.iter()
            .map(|l| self.angm(*l).map(|a| (*l, a.cart().index_axis(nd::Axis(0), c.index()).to_owned())))
            .collect::<AngmomResult<_>>()?;
        let factors: Vec<(char, &nd::Array2<C64>)>
            = comps.iter().map(|(l, op)| (*l, op)).collect();
        self.embed(&factors)
    }

    fn build_soc(&self, ops: &[char]) -> AngmomResult<TermOps> {
        if self.params.iso_soc {
            let n = self.symbol.multiplicity();
            let mut total: nd::Array2<C64> = nd::Array2::zeros((n, n));
            for c in Cart::ALL {
                total += &self.component(ops, c)?;
            }
            Ok(vec![(ParamKey::Lamb(None), total)])
        } else {
            Cart::ALL.into_iter()
                .map(|c| Ok((ParamKey::Lamb(Some(c)), self.component(ops, c)?)))
                .collect()
        }
    }

    fn theta(&self, label: char) -> AngmomResult<Option<Vec<f64>>> {
        if !self.params.theta { return Ok(None); }
        let upper = label.to_ascii_uppercase();
        let ion
            = self.params.ion.as_ref()
            .ok_or_else(|| AngmomError::domain("operator equivalent factors need an ion"))?;
        let table
            = if ANGM_SYMBOLS.contains(&upper) {
                ion.theta_l()
            } else if TOTJ_SYMBOLS.contains(&upper) {
                ion.theta_j()
            } else {
                return Err(AngmomError::domain(
                    format!("unknown angular momentum identifier: {}", label)
                ));
            };
        table
            .map(|t| Some(t.to_vec()))
            .ok_or_else(|| AngmomError::domain(
                format!("ion has no operator equivalent factors for '{}'", label)
            ))
    }

    fn build_cf(&mut self, ops: &[char]) -> AngmomResult<TermOps> {
        let [op] = ops else {
            return Err(AngmomError::domain("the crystal field acts on a single angular momentum"));
        };
        let k_max = self.params.k_max;
        let okq = self.stevens(*op, k_max)?;
        let theta = self.theta(*op)?;
        let mut out: TermOps = Vec::new();
        for k in (2..=k_max).step_by(2) {
            let factor
                = match &theta {
                    Some(t) => *t.get(k).ok_or_else(|| {
                        AngmomError::domain(format!("no operator equivalent factor for k = {}", k))
                    })?,
                    None => 1.0,
                };
            for q in -(k as i32)..=(k as i32) {
                let o
                    = okq.get(k, q)
                    .ok_or_else(|| AngmomError::domain(format!("no Stevens operator for k = {}", k)))?
                    .mapv(|v| v * factor);
                out.push((ParamKey::B { k, q }, self.embed(&[(*op, &o)])?));
            }
        }
        Ok(out)
    }

    fn build_zee(&self, ops: &[char], orbital: bool) -> AngmomResult<TermOps> {
        let g = if orbital { 1.0 } else { G_E };
        let prefactor = HARTREE2INVCM * MU_B / AU2MT * g;
        let n = self.symbol.multiplicity();
        Cart::ALL.into_iter()
            .map(|c| {
                let mut total: nd::Array2<C64> = nd::Array2::zeros((n, n));
                for l in ops.iter() {
                    total += &self.component(&[*l], c)?;
                }
                Ok((ParamKey::Zee(c), total.mapv(|v| v * prefactor)))
            })
            .collect()
    }

    fn build_ex(&mut self, ops: &[char]) -> AngmomResult<TermOps> {
        let mut okqs: Vec<(char, usize, StevensOps)> = Vec::with_capacity(ops.len());
        for l in ops.iter() {
            let j = self.symbol.qn_of(*l).ok_or(AngmomError::UndefinedLabel(*l))?;
            let k_max = (j.halves() as usize).min(K_MAX);
            if *l == 'R' && k_max > 1 {
                return Err(AngmomError::domain("exchange partner 'R' must be a spin 1/2"));
            }
            okqs.push((*l, k_max, self.stevens(*l, k_max)?));
        }
        let mut out: TermOps = Vec::new();
        let ranks
            = okqs.iter()
            .map(|(_, k_max, _)| 1..=*k_max)
            .multi_cartesian_product();
        for ks in ranks {
            if !self.params.time_reversal_symm.admits(ks.iter().sum()) { continue; }
            let orders
                = ks.iter()
                .map(|k| -(*k as i32)..=(*k as i32))
                .multi_cartesian_product();
            for qs in orders {
                let mut key: Vec<ExIndex> = Vec::with_capacity(ops.len());
                let mut factors: Vec<(char, nd::Array2<C64>)> = Vec::with_capacity(ops.len());
                for ((l, _, okq), (k, q)) in okqs.iter().zip(ks.iter().zip(qs.iter())) {
                    let missing = || AngmomError::domain(format!("no Stevens operator for k = {}", k));
                    let o = okq.get(*k, *q).ok_or_else(missing)?;
                    if *l == 'R' {
                        let c = Cart::from_rank1_order(*q).ok_or_else(missing)?;
                        key.push(ExIndex::Alpha(c));
                        factors.push((*l, o.to_owned()));
                    } else {
                        let o0 = okq.get(*k, 0).ok_or_else(missing)?;
                        let n = o0.nrows();
                        let norm = o0[[n - 1, n - 1]];
                        key.push(ExIndex::Rank { k: *k, q: *q });
                        factors.push((*l, o.mapv(|v| v / norm)));
                    }
                }
                let refs: Vec<(char, &nd::Array2<C64>)>
                    = factors.iter().map(|(l, o)| (*l, o)).collect();
                out.push((ParamKey::Ex(key), self.embed(&refs)?.mapv(|v| -v)));
            }
        }
        Ok(out)
    }
}

impl SpinHamiltonian {
    /// Build every operator of the model over `symbol`.
    pub fn new(symbol: Symbol, params: SpinHamiltonianParams) -> AngmomResult<Self> {
        let mut cache = RyabovCache::new();
        Self::with_cache(symbol, params, &mut cache)
    }

    /// Like [`Self::new`], reusing Stevens-operator coefficients from `cache`.
    pub fn with_cache(
        symbol: Symbol,
        params: SpinHamiltonianParams,
        cache: &mut RyabovCache,
    ) -> AngmomResult<Self>
    {
        Self::with_angm_ops(symbol, params, IndexMap::new(), cache)
    }

    /// Build the model from caller-supplied angular momentum operators.
    ///
    /// Labels missing from `angm_ops` get the standard operators of their
    /// quantum number. Supplied operators enter every term, including the
    /// Stevens operators of crystal-field and exchange terms.
    pub fn with_angm_ops(
        symbol: Symbol,
        params: SpinHamiltonianParams,
        mut angm_ops: IndexMap<char, AngMomOps>,
        cache: &mut RyabovCache,
    ) -> AngmomResult<Self>
    {
        for (l, ops) in angm_ops.iter() {
            let mult
                = symbol.qn_of(*l)
                .ok_or(AngmomError::UndefinedLabel(*l))?
                .mult();
            if ops.dim() != mult {
                return Err(AngmomError::shape(&[mult, mult], ops.z.shape()));
            }
        }
        if params.k_max > K_MAX {
            return Err(AngmomError::domain(
                format!("k_max = {} exceeds the highest supported rank {}", params.k_max, K_MAX)
            ));
        }
        let labels: Vec<TermLabel>
            = params.diag.then(|| TermLabel::new(TermKind::Diag, []))
            .into_iter()
            .chain(
                params.terms.iter()
                    .filter(|(kind, _)| **kind != TermKind::Diag)
                    .flat_map(|(kind, sub)| {
                        sub.iter().map(move |ops| TermLabel::new(*kind, ops.iter().copied()))
                    })
            )
            .collect();
        let angm: IndexMap<char, AngMomOps>
            = symbol.qn().iter()
            .map(|(l, j)| {
                let ops = angm_ops.swap_remove(l).unwrap_or_else(|| calc_ang_mom_ops(*j));
                (*l, ops)
            })
            .collect();
        let mut builder = OpBuilder { symbol: &symbol, params: &params, angm, cache };
        let mut ops: Vec<(TermLabel, TermOps)> = Vec::with_capacity(labels.len());
        for label in labels.into_iter() {
            debug!("building model operators for {}", label);
            let term_ops = builder.build(&label)?;
            ops.push((label, term_ops));
        }
        Ok(Self { symbol, params, ops })
    }

    pub fn symbol(&self) -> &Symbol { &self.symbol }

    pub fn params(&self) -> &SpinHamiltonianParams { &self.params }

    /// Dimension of the model space.
    pub fn dim(&self) -> usize { self.symbol.multiplicity() }

    /// All terms with their operators, in model order.
    pub fn terms(&self) -> &[(TermLabel, TermOps)] { &self.ops }

    /// Number of free parameters.
    pub fn num_params(&self) -> usize {
        self.ops.iter().map(|(_, ops)| ops.len()).sum()
    }

    /// Project an ab-initio Hamiltonian (in Hartree) onto the model.
    ///
    /// Every parameter is the overlap of the Hamiltonian (in cm⁻¹) with its
    /// operator, `Re Σ H O* / ‖O‖²`. This is exact least squares only if the
    /// model operators are mutually orthogonal. Operators that vanish on the
    /// model space get a zero parameter. With `verbose`, fit residuals and
    /// both spectra are logged.
    pub fn project(&self, H_ai: &nd::Array2<C64>, verbose: bool)
        -> AngmomResult<ModelParameters>
    {
        let n = self.dim();
        if H_ai.dim() != (n, n) {
            return Err(AngmomError::shape(&[n, n], H_ai.shape()));
        }
        let H = H_ai.mapv(|v| v * HARTREE2INVCM);
        let params: ModelParameters
            = self.ops.iter()
            .map(|(label, ops)| {
                let values: IndexMap<ParamKey, f64>
                    = ops.iter()
                    .map(|(key, op)| {
                        let norm = frobenius_sq(op);
                        if norm == 0.0 {
                            debug!("{} {} vanishes on the model space", label, key);
                            return (key.clone(), 0.0);
                        }
                        (key.clone(), frobenius_inner(&H, op).re / norm)
                    })
                    .collect();
                (label.clone(), values)
            })
            .collect();

        if verbose {
            let H_fit = self.parametrise(&params, None)?;
            let err = frobenius_sq(&(&H_fit - &H));
            info!(
                "absolute error (RMSD, sqrt[1/N^2 * sum of squared residuals]): {:10.4}",
                (err / H.len() as f64).sqrt(),
            );
            info!(
                "relative error (sqrt[sum of squared residuals] / norm of ab initio Hamiltonian): {:10.4}%",
                100.0 * err.sqrt() / frobenius_sq(&H).sqrt(),
            );
            let shift
                = params.param(&TermLabel::new(TermKind::Diag, []), &ParamKey::Shift)
                .unwrap_or(0.0);
            let diag_shift = eye(n) * shift;
            let (eig_a, _) = (&H - &diag_shift).eigh_into(UPLO::Lower)?;
            let (eig_m, _) = (&H_fit - &diag_shift).eigh_into(UPLO::Lower)?;
            info!("eigenvalues of the ab initio and model Hamiltonian (diagonal shift subtracted):");
            for (i, (a, m)) in eig_a.iter().zip(eig_m.iter()).enumerate() {
                info!("{:4} {:16.6} {:16.6}", i + 1, a, m);
            }
        }
        Ok(params)
    }

    /// Rebuild the model Hamiltonian (in cm⁻¹) from parameters, optionally
    /// scaling whole term kinds.
    pub fn parametrise(
        &self,
        params: &ModelParameters,
        scale: Option<&IndexMap<TermKind, f64>>,
    ) -> AngmomResult<nd::Array2<C64>>
    {
        let n = self.dim();
        let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
        for (label, ops) in self.ops.iter() {
            let factor = scale.and_then(|s| s.get(&label.kind)).copied().unwrap_or(1.0);
            for (key, op) in ops.iter() {
                let value
                    = params.param(label, key)
                    .ok_or_else(|| AngmomError::MissingParameter(format!("{} {}", label, key)))?;
                H.scaled_add(C64::from(value * factor), op);
            }
        }
        Ok(H)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::assert::close_l2;
    use crate::{
        linalg::{ kron, unitary_transform, unitary_transform3 },
        term::{ Level, Term },
    };

    fn terms(entries: &[(TermKind, &[&str])]) -> IndexMap<TermKind, Vec<Vec<char>>> {
        entries.iter()
            .map(|(kind, ops)| {
                (*kind, ops.iter().map(|o| o.chars().collect()).collect())
            })
            .collect()
    }

    #[test]
    fn parses_settings() {
        assert_eq!("soc".parse::<TermKind>().unwrap(), TermKind::Soc);
        assert_eq!("Szee".parse::<TermKind>().unwrap(), TermKind::SZee);
        assert!("zee".parse::<TermKind>().is_err());
        assert_eq!("odd".parse::<TimeReversal>().unwrap(), TimeReversal::Odd);
        assert!(matches!("both".parse::<TimeReversal>(), Err(AngmomError::Domain(_))));
    }

    #[test]
    fn key_display() {
        assert_eq!(ParamKey::B { k: 4, q: -3 }.to_string(), "B(k=4, q=-3)");
        assert_eq!(ParamKey::Lamb(Some(Cart::X)).to_string(), "lamb(component=x)");
        let ex = ParamKey::Ex(vec![
            ExIndex::Alpha(Cart::Z),
            ExIndex::Rank { k: 2, q: 1 },
            ExIndex::Rank { k: 1, q: 0 },
        ]);
        assert_eq!(ex.to_string(), "J(alpha=z, k=2, q=1, n=1, m=0)");
        let label = TermLabel::new(TermKind::Soc, ['L', 'S']);
        assert_eq!(label.to_string(), "soc(L, S)");
    }

    #[test]
    fn operator_counts() {
        let term = Term::parse("3P").unwrap();
        let params = SpinHamiltonianParams {
            k_max: 2,
            iso_soc: false,
            terms: terms(&[
                (TermKind::Soc, &["LS"]),
                (TermKind::Cf, &["L"]),
                (TermKind::SZee, &["S"]),
            ]),
            ..SpinHamiltonianParams::default()
        };
        let model = SpinHamiltonian::new(term.symbol().clone(), params).unwrap();
        let counts: Vec<usize> = model.terms().iter().map(|(_, ops)| ops.len()).collect();
        assert_eq!(counts, vec![1, 3, 5, 3]);
        assert_eq!(model.num_params(), 12);
    }

    #[test]
    fn exchange_respects_time_reversal() {
        let sym = Symbol::uncoupled([('R', SpinTotal::new(1)), ('S', SpinTotal::new(2))]).unwrap();
        let build = |trs| {
            let params = SpinHamiltonianParams {
                diag: false,
                time_reversal_symm: trs,
                terms: terms(&[(TermKind::Ex, &["RS"])]),
                ..SpinHamiltonianParams::default()
            };
            SpinHamiltonian::new(sym.clone(), params).unwrap().num_params()
        };
        // R: k = 1 (3 orders); S = 1: k = 1 (3 orders), k = 2 (5 orders)
        assert_eq!(build(TimeReversal::Even), 9);
        assert_eq!(build(TimeReversal::Odd), 15);
        assert_eq!(build(TimeReversal::Any), 24);
    }

    #[test]
    fn isotropic_exchange_with_spin_half_partner() {
        let sym = Symbol::uncoupled([('R', SpinTotal::new(1)), ('S', SpinTotal::new(1))]).unwrap();
        let params = SpinHamiltonianParams {
            diag: false,
            terms: terms(&[(TermKind::Ex, &["RS"])]),
            ..SpinHamiltonianParams::default()
        };
        let model = SpinHamiltonian::new(sym.clone(), params).unwrap();
        let (_, ops) = &model.terms()[0];
        let zz
            = ops.iter()
            .find(|(k, _)| *k == ParamKey::Ex(vec![ExIndex::Alpha(Cart::Z), ExIndex::Rank { k: 1, q: 0 }]))
            .map(|(_, o)| o.clone())
            .unwrap();
        // -R_z S_z / (S_z)_{max} = -R_z σ_z
        let truth = nd::Array2::from_diag(&nd::array![
            C64::from(-0.5), C64::from(0.5), C64::from(0.5), C64::from(-0.5),
        ]);
        close_l2(&zz, &truth, 1e-12);
    }

    #[test]
    fn soc_operator_is_l_dot_s() {
        let term = Term::parse("2P").unwrap();
        let params = SpinHamiltonianParams {
            diag: false,
            terms: terms(&[(TermKind::Soc, &["LS"])]),
            ..SpinHamiltonianParams::default()
        };
        let model = SpinHamiltonian::new(term.symbol().clone(), params).unwrap();
        let (_, ops) = &model.terms()[0];
        // L·S = (J² - L² - S²) / 2 in the coupled basis; check its trace and
        // eigenvalues -1 (x2) and 1/2 (x4)
        let (E, _) = ops[0].1.clone().eigh_into(UPLO::Lower).unwrap();
        let expected = [-1.0, -1.0, 0.5, 0.5, 0.5, 0.5];
        for (e, x) in E.iter().zip(expected) {
            assert!((e - x).abs() < 1e-12);
        }
    }

    #[test]
    fn project_then_parametrise_round_trip() {
        let level = Level::parse("6H15/2").unwrap();
        let sym = level.symbol().reduce(&['J']).unwrap();
        let params = SpinHamiltonianParams {
            k_max: 6,
            terms: terms(&[(TermKind::Cf, &["J"])]),
            ..SpinHamiltonianParams::default()
        };
        let model = SpinHamiltonian::new(sym, params).unwrap();

        // a Hamiltonian in the span of the (mutually orthogonal) model operators
        let mut truth = ModelParameters::new();
        let mut H: nd::Array2<C64> = nd::Array2::zeros((16, 16));
        for (i, (label, ops)) in model.terms().iter().enumerate() {
            let mut values: IndexMap<ParamKey, f64> = IndexMap::new();
            for (j, (key, op)) in ops.iter().enumerate() {
                let value = ((i + 1) as f64 * 0.37 + j as f64 * 0.113).sin() * 1e-3;
                H.scaled_add(C64::from(value), op);
                values.insert(key.clone(), value);
            }
            truth.insert(label.clone(), values);
        }
        let fitted = model.project(&H.mapv(|v| v / HARTREE2INVCM), true).unwrap();
        for (label, values) in truth.iter() {
            for (key, value) in values.iter() {
                let fit = fitted.param(label, key).unwrap();
                assert!((fit - value).abs() < 1e-9, "{} {}: {} vs {}", label, key, fit, value);
            }
        }
        let rebuilt = model.parametrise(&fitted, None).unwrap();
        close_l2(&rebuilt, &H, 1e-9);
    }

    #[test]
    fn supplied_operators_enter_every_term() {
        // orbital operators in reversed m_L order
        let term = Term::parse("2P").unwrap();
        let flip: nd::Array2<C64>
            = nd::Array2::from_shape_fn((3, 3), |(i, j)| {
                if i + j == 2 { C64::from(1.0) } else { C64::from(0.0) }
            });
        let l_ops = calc_ang_mom_ops(SpinTotal::new(2));
        let flipped = AngMomOps::from_cart(&unitary_transform3(&l_ops.cart(), &flip));
        let mut angm_ops: IndexMap<char, AngMomOps> = IndexMap::new();
        angm_ops.insert('L', flipped);
        let params = SpinHamiltonianParams {
            k_max: 2,
            diag: false,
            terms: terms(&[(TermKind::Soc, &["LS"]), (TermKind::Cf, &["L"])]),
            ..SpinHamiltonianParams::default()
        };
        let mut cache = RyabovCache::new();
        let model
            = SpinHamiltonian::with_angm_ops(
                term.symbol().clone(), params.clone(), angm_ops, &mut cache,
            )
            .unwrap();
        let plain = SpinHamiltonian::new(term.symbol().clone(), params).unwrap();
        let U = kron(&flip, &eye(2));
        for ((_, ops), (_, plain_ops)) in model.terms().iter().zip(plain.terms()) {
            for ((_, op), (_, plain_op)) in ops.iter().zip(plain_ops) {
                close_l2(op, &unitary_transform(plain_op, &U), 1e-12);
            }
        }

        let mut wrong: IndexMap<char, AngMomOps> = IndexMap::new();
        wrong.insert('L', calc_ang_mom_ops(SpinTotal::new(4)));
        let res
            = SpinHamiltonian::with_angm_ops(
                term.symbol().clone(), SpinHamiltonianParams::default(), wrong, &mut cache,
            );
        assert!(matches!(res, Err(AngmomError::Shape { .. })));
    }

    #[test]
    fn parametrise_reports_missing_parameters() {
        let term = Term::parse("3P").unwrap();
        let model = SpinHamiltonian::new(term.symbol().clone(), SpinHamiltonianParams::default())
            .unwrap();
        let res = model.parametrise(&ModelParameters::new(), None);
        assert!(matches!(res, Err(AngmomError::MissingParameter(_))));
    }

    #[test]
    fn theta_needs_ion_and_known_label() {
        let sym = Symbol::uncoupled([('X', SpinTotal::new(4))]).unwrap();
        let params = SpinHamiltonianParams {
            theta: true,
            ion: Some(Ion::new().with_theta_l(vec![0.0; 7])),
            terms: terms(&[(TermKind::Cf, &["X"])]),
            ..SpinHamiltonianParams::default()
        };
        let res = SpinHamiltonian::new(sym, params);
        assert!(matches!(res, Err(AngmomError::Domain(_))));

        let sym = Symbol::uncoupled([('J', SpinTotal::new(15))]).unwrap();
        let params = SpinHamiltonianParams {
            theta: true,
            ion: Some(Ion::new().with_theta_l(vec![0.0; 7])),
            terms: terms(&[(TermKind::Cf, &["J"])]),
            ..SpinHamiltonianParams::default()
        };
        assert!(SpinHamiltonian::new(sym, params).is_err());
    }

    #[test]
    fn free_ion_theta_scales_cf() {
        let j = SpinTotal::new(15);
        let ion = Ion::free_ion(9, j, SpinTotal::new(10), SpinTotal::new(5));
        let theta2 = ion.theta_j().unwrap()[2];
        assert!((theta2 + 2.0 / 315.0).abs() < 1e-9);
        let sym = Symbol::uncoupled([('J', j)]).unwrap();
        let params = SpinHamiltonianParams {
            k_max: 2,
            theta: true,
            ion: Some(ion),
            diag: false,
            terms: terms(&[(TermKind::Cf, &["J"])]),
            ..SpinHamiltonianParams::default()
        };
        let model = SpinHamiltonian::new(sym.clone(), params.clone()).unwrap();
        let plain
            = SpinHamiltonian::new(sym, SpinHamiltonianParams { theta: false, ..params })
            .unwrap();
        let scaled = &model.terms()[0].1[2].1;
        let bare = &plain.terms()[0].1[2].1;
        close_l2(scaled, &bare.mapv(|v| v * theta2), 1e-12);
    }
}
