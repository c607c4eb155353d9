//! Angular momentum spaces described by a set of labelled quantum numbers and
//! a coupling tree.
//!
//! A [`Symbol`] owns an ordered map from single-character labels to total
//! angular momenta. Labels that sit at the top of the coupling tree are
//! *independent*: they carry both a total (`"2"`) and a projection (`"z"`)
//! component in the basis. Labels buried inside a [`Coupling::Coupled`] node
//! only carry their total.
//!
//! ```text
//! Symbol(L=5, S=5/2, J=15/2)  with  J <- (L, S)
//! basis: L2, S2, J2, Jz
//! ```

use std::{ fmt, hash::{ Hash, Hasher }, str::FromStr, sync::OnceLock };
use indexmap::IndexMap;
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use regex::Regex;
use crate::{
    angmom::calc_ang_mom_ops,
    error::{ AngmomError, AngmomResult },
    linalg::{ block_diag, contract3, expm, eye, kron_all, rotation_vector, unitary_transform3 },
    spin::{ cg, Spin, SpinTotal },
};

/* Coupling tree **************************************************************/

/// A node of a coupling tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Coupling {
    /// An angular momentum that is not composed of others.
    Elementary(char),
    /// `label = left ⊗ right`.
    Coupled(char, Box<Coupling>, Box<Coupling>),
}

impl Coupling {
    /// Shorthand for a [`Coupling::Coupled`] node.
    pub fn coupled(label: char, left: Coupling, right: Coupling) -> Self {
        Self::Coupled(label, Box::new(left), Box::new(right))
    }

    /// Shorthand for coupling two elementary labels.
    pub fn pair(label: char, left: char, right: char) -> Self {
        Self::coupled(label, Self::Elementary(left), Self::Elementary(right))
    }

    /// Label of the node itself.
    pub fn label(&self) -> char {
        match self {
            Self::Elementary(l) => *l,
            Self::Coupled(l, ..) => *l,
        }
    }

    /// All labels in the subtree rooted at `self`, in depth-first order.
    pub fn labels(&self) -> Vec<char> {
        match self {
            Self::Elementary(l) => vec![*l],
            Self::Coupled(l, left, right) => {
                let mut acc = vec![*l];
                acc.append(&mut left.labels());
                acc.append(&mut right.labels());
                acc
            },
        }
    }

    /// Return `true` if `label` occurs anywhere in the subtree.
    pub fn contains(&self, label: char) -> bool {
        match self {
            Self::Elementary(l) => *l == label,
            Self::Coupled(l, left, right)
                => *l == label || left.contains(label) || right.contains(label),
        }
    }
}

/* Basis states ***************************************************************/

/// Kind of quantum number appearing in a basis state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// Total angular momentum `j` (eigenvalue label of the squared operator).
    Total,
    /// Projection `m` along the quantisation axis.
    Proj,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Total => write!(f, "2"),
            Self::Proj => write!(f, "z"),
        }
    }
}

/// A single basis state as an ordered tuple of `(label, component, halves)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct State(Vec<(char, Component, i32)>);

impl State {
    /// Value of a component in halves, if present.
    pub fn get(&self, label: char, comp: Component) -> Option<i32> {
        self.0.iter()
            .find(|(l, c, _)| *l == label && *c == comp)
            .map(|(.., v)| *v)
    }

    /// Value of a component as an `f64`, if present.
    pub fn get_f(&self, label: char, comp: Component) -> Option<f64> {
        self.get(label, comp).map(|v| f64::from(v) / 2.0)
    }

    /// `(j, m)` pair of an independent label.
    pub fn spin(&self, label: char) -> Option<Spin> {
        let j = self.get(label, Component::Total)?;
        let m = self.get(label, Component::Proj)?;
        Spin::new(j as u32, m)
    }

    pub fn components(&self) -> &[(char, Component, i32)] { &self.0 }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items
            = self.0.iter()
            .map(|(l, c, v)| {
                if v % 2 == 0 {
                    format!("{}{}={}", l, c, v / 2)
                } else {
                    format!("{}{}={}/2", l, c, v)
                }
            })
            .join(", ");
        write!(f, "({})", items)
    }
}

/* Symbol *********************************************************************/

/// An angular momentum space.
///
/// Equality and hashing only consider the quantum-number map, irrespective
/// of its order or of the coupling tree.
#[derive(Clone, Debug)]
pub struct Symbol {
    qn: IndexMap<char, SpinTotal>,
    coupling: Vec<Coupling>,
    mult: IndexMap<char, usize>,
    basis: Vec<(char, Component)>,
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool { self.qn == other.qn }
}

impl Eq for Symbol { }

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut items: Vec<(char, SpinTotal)>
            = self.qn.iter().map(|(l, j)| (*l, *j)).collect();
        items.sort();
        items.hash(state);
    }
}

impl Symbol {
    /// Create a new space from a quantum-number map and an optional coupling
    /// tree.
    ///
    /// Without a tree, every label is independent. With a tree, every label
    /// it mentions must be declared in `qn` and may appear only once.
    pub fn new(qn: IndexMap<char, SpinTotal>, coupling: Option<Vec<Coupling>>)
        -> AngmomResult<Self>
    {
        let coupling: Vec<Coupling>
            = coupling.unwrap_or_else(|| {
                qn.keys().map(|l| Coupling::Elementary(*l)).collect()
            });
        let mut seen: Vec<char> = Vec::new();
        for label in coupling.iter().flat_map(|node| node.labels()) {
            if !qn.contains_key(&label) {
                return Err(AngmomError::UndefinedLabel(label));
            }
            if seen.contains(&label) {
                return Err(AngmomError::DuplicateLabel(label));
            }
            seen.push(label);
        }
        let top: Vec<char> = coupling.iter().map(|node| node.label()).collect();
        let mult: IndexMap<char, usize>
            = qn.iter()
            .filter(|(l, _)| top.contains(l))
            .map(|(l, j)| (*l, j.mult()))
            .collect();
        let basis: Vec<(char, Component)>
            = qn.keys()
            .flat_map(|l| {
                let proj = top.contains(l).then_some((*l, Component::Proj));
                std::iter::once((*l, Component::Total)).chain(proj)
            })
            .collect();
        Ok(Self { qn, coupling, mult, basis })
    }

    /// Create an uncoupled space from `(label, j)` pairs.
    pub fn uncoupled<I>(qn: I) -> AngmomResult<Self>
    where I: IntoIterator<Item = (char, SpinTotal)>
    {
        Self::new(qn.into_iter().collect(), None)
    }

    /// The quantum-number map.
    pub fn qn(&self) -> &IndexMap<char, SpinTotal> { &self.qn }

    /// Total angular momentum of a label.
    pub fn qn_of(&self, label: char) -> Option<SpinTotal> {
        self.qn.get(&label).copied()
    }

    /// Top-level nodes of the coupling tree.
    pub fn coupling(&self) -> &[Coupling] { &self.coupling }

    /// Multiplicities `2j + 1` of the independent labels, in
    /// quantum-number-map order.
    pub fn mult(&self) -> &IndexMap<char, usize> { &self.mult }

    /// Multiplicity of a single independent label.
    pub fn mult_of(&self, label: char) -> Option<usize> {
        self.mult.get(&label).copied()
    }

    /// Dimension of the space.
    pub fn multiplicity(&self) -> usize { self.mult.values().product() }

    /// Ordered basis components.
    pub fn basis(&self) -> &[(char, Component)] { &self.basis }

    /// Return `true` if `label` is at the top of the coupling tree.
    pub fn is_independent(&self, label: char) -> bool {
        self.mult.contains_key(&label)
    }

    fn top_node(&self, label: char) -> Option<&Coupling> {
        self.coupling.iter().find(|node| node.label() == label)
    }

    /// All basis states, in lexicographic order of the basis components with
    /// projections ascending.
    pub fn states(&self) -> Vec<State> {
        if self.basis.is_empty() { return vec![State(Vec::new())]; }
        self.basis.iter()
            .map(|(l, c)| {
                let j = self.qn[l];
                let values: Vec<(char, Component, i32)>
                    = match c {
                        Component::Total => vec![(*l, *c, j.halves() as i32)],
                        Component::Proj => j.projections()
                            .map(|s| (*l, *c, s.proj().halves()))
                            .collect(),
                    };
                values
            })
            .multi_cartesian_product()
            .map(State)
            .collect()
    }

    /// Return `true` if every quantum number of `other` is present in `self`
    /// with the same value.
    pub fn contains(&self, other: &Symbol) -> bool {
        other.qn.iter().all(|(l, j)| self.qn.get(l) == Some(j))
    }

    /// New uncoupled space on a subset of labels, in the given order.
    pub fn reduce(&self, labels: &[char]) -> AngmomResult<Symbol> {
        let qn: IndexMap<char, SpinTotal>
            = labels.iter()
            .map(|l| {
                self.qn_of(*l)
                    .map(|j| (*l, j))
                    .ok_or(AngmomError::UndefinedLabel(*l))
            })
            .collect::<AngmomResult<_>>()?;
        Symbol::new(qn, None)
    }

    fn independent_op(&self, label: char) -> AngmomResult<nd::Array3<C64>> {
        let j = self.qn_of(label).ok_or(AngmomError::UndefinedLabel(label))?;
        let ops = calc_ang_mom_ops(j).cart();
        let idents: Vec<nd::Array2<C64>>
            = self.mult.values().map(|m| eye(*m)).collect();
        let n = self.multiplicity();
        let mut out: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
        for (c, mut o) in out.outer_iter_mut().enumerate() {
            let comp = ops.index_axis(nd::Axis(0), c).to_owned();
            let factors
                = self.mult.keys().zip(idents.iter())
                .map(|(l, id)| if *l == label { &comp } else { id });
            o.assign(&kron_all(factors));
        }
        Ok(out)
    }

    /// Replace the top-level coupled node `j` by its two children.
    fn split(&self, j: char) -> AngmomResult<Symbol> {
        let Some(Coupling::Coupled(_, left, right)) = self.top_node(j) else {
            return Err(AngmomError::domain(format!("'{}' is not a coupled top-level label", j)));
        };
        let qn: IndexMap<char, SpinTotal>
            = self.qn.iter()
            .filter(|(l, _)| **l != j)
            .map(|(l, q)| (*l, *q))
            .collect();
        let coupling: Vec<Coupling>
            = self.coupling.iter()
            .filter(|node| node.label() != j)
            .cloned()
            .chain([left.as_ref().clone(), right.as_ref().clone()])
            .collect();
        Symbol::new(qn, Some(coupling))
    }

    /// Cartesian `(x, y, z)` matrices of the angular momentum `label` in the
    /// basis of `self`.
    ///
    /// Operators of labels buried in a coupled node are obtained in the
    /// uncoupled space and transformed by the Clebsch-Gordan matrix, i.e.
    /// they are projected onto `self`.
    pub fn get_op(&self, label: char) -> AngmomResult<nd::Array3<C64>> {
        if !self.qn.contains_key(&label) {
            return Err(AngmomError::UndefinedLabel(label));
        }
        for node in self.coupling.iter() {
            if node.label() == label { return self.independent_op(label); }
            if let Coupling::Coupled(j, left, right) = node {
                if !node.contains(label) { continue; }
                let sub = self.split(*j)?;
                let op = sub.get_op(label)?;
                let (_, cg_vec)
                    = sub.couple(*j, left.label(), right.label(), Some(vec![self.clone()]))?;
                return Ok(unitary_transform3(&op, &cg_vec.mapv(C64::from)));
            }
        }
        Err(AngmomError::UndefinedLabel(label))
    }

    /// Coupled spaces obtained by combining the independent labels `j1` and
    /// `j2` into `j`, one per allowed total.
    pub fn levels(&self, j: char, j1: char, j2: char) -> AngmomResult<Vec<Symbol>> {
        let left = self.top_node(j1).ok_or(AngmomError::UndefinedLabel(j1))?;
        let right = self.top_node(j2).ok_or(AngmomError::UndefinedLabel(j2))?;
        let coupling: Vec<Coupling>
            = self.coupling.iter()
            .filter(|node| node.label() != j1 && node.label() != j2)
            .cloned()
            .chain([Coupling::coupled(j, left.clone(), right.clone())])
            .collect();
        let top: Vec<char> = coupling.iter().map(|node| node.label()).collect();
        let uncoupled: Vec<(char, SpinTotal)>
            = self.qn.iter()
            .filter(|(l, _)| !top.contains(l))
            .map(|(l, q)| (*l, *q))
            .collect();
        self.qn[&j1].coupled_with(self.qn[&j2])
            .map(|total| {
                let coupled
                    = top.iter()
                    .map(|l| (*l, if *l == j { total } else { self.qn[l] }));
                let qn: IndexMap<char, SpinTotal>
                    = uncoupled.iter().copied().chain(coupled).collect();
                Symbol::new(qn, Some(coupling.clone()))
            })
            .collect()
    }

    /// Couple the independent labels `j1` and `j2` into `j`.
    ///
    /// Returns the coupled spaces (either `levels` or [`Self::levels`]) and
    /// the Clebsch-Gordan matrix whose rows run over the states of `self` and
    /// columns over the states of all levels in order. Entries between states
    /// that differ in any spectator quantum number are exactly zero.
    pub fn couple(
        &self,
        j: char,
        j1: char,
        j2: char,
        levels: Option<Vec<Symbol>>,
    ) -> AngmomResult<(Vec<Symbol>, nd::Array2<f64>)>
    {
        if !self.is_independent(j1) { return Err(AngmomError::UndefinedLabel(j1)); }
        if !self.is_independent(j2) { return Err(AngmomError::UndefinedLabel(j2)); }
        let levels = match levels {
            Some(levels) => levels,
            None => self.levels(j, j1, j2)?,
        };
        let extra: Vec<(char, Component)>
            = self.basis.iter()
            .filter(|(l, _)| *l != j1 && *l != j2)
            .copied()
            .collect();
        let rows = self.states();
        let cols: Vec<State> = levels.iter().flat_map(|lvl| lvl.states()).collect();
        let col_spins: Vec<Spin>
            = cols.iter()
            .map(|st| {
                st.spin(j).ok_or_else(|| {
                    AngmomError::domain(format!("level has no independent '{}'", j))
                })
            })
            .collect::<AngmomResult<_>>()?;
        let mut cg_vec: nd::Array2<f64> = nd::Array2::zeros((rows.len(), cols.len()));
        for (r, row) in rows.iter().enumerate() {
            let (Some(s1), Some(s2)) = (row.spin(j1), row.spin(j2)) else { continue; };
            for (c, (col, s12)) in cols.iter().zip(col_spins.iter()).enumerate() {
                let spectators_match
                    = extra.iter()
                    .all(|(l, comp)| {
                        let v = row.get(*l, *comp);
                        v.is_some() && v == col.get(*l, *comp)
                    });
                if spectators_match {
                    cg_vec[[r, c]] = cg(s1, s2, *s12);
                }
            }
        }
        Ok((levels, cg_vec))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let items = self.qn.iter().map(|(l, j)| format!("{}={}", l, j)).join(", ");
        write!(f, "Symbol({})", items)
    }
}

static WRAPPED_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static ITEM_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

impl FromStr for Symbol {
    type Err = AngmomError;

    /// Parse an uncoupled space from `"L=1, S=1/2"` or `"Symbol(L=1, S=0.5)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const EXPECTED: &str = "'L=1, S=1/2'";
        let err = || AngmomError::Format(s.to_string(), EXPECTED);
        let wrapped
            = WRAPPED_RE.get_or_init(|| Regex::new(r"^\s*Symbol\((.*)\)\s*$"))
            .as_ref().map_err(|_| err())?;
        let item
            = ITEM_RE.get_or_init(|| Regex::new(r"^\s*([A-Za-z])\s*=\s*([0-9./]+)\s*$"))
            .as_ref().map_err(|_| err())?;
        let body
            = wrapped.captures(s)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(s);
        let mut qn: IndexMap<char, SpinTotal> = IndexMap::new();
        for part in body.split(',') {
            let caps = item.captures(part).ok_or_else(err)?;
            let label = caps[1].chars().next().ok_or_else(err)?;
            let j: SpinTotal = caps[2].parse().map_err(|_| err())?;
            if qn.insert(label, j).is_some() {
                return Err(AngmomError::DuplicateLabel(label));
            }
        }
        Symbol::new(qn, None)
    }
}

/* Operations on spaces *******************************************************/

/// Apply a sequence of couplings `(j, j1, j2)` to a space, in order.
///
/// Returns every resulting level and the accumulated transformation from the
/// states of `space` to the concatenated states of the levels.
pub fn couple_space(space: &Symbol, couplings: &[(char, char, char)])
    -> AngmomResult<(Vec<Symbol>, nd::Array2<f64>)>
{
    let mut levels = vec![space.clone()];
    let mut cg_vec: nd::Array2<f64> = nd::Array2::eye(space.multiplicity());
    for &(j, j1, j2) in couplings.iter() {
        let mut next: Vec<Symbol> = Vec::new();
        let mut blocks: Vec<nd::Array2<f64>> = Vec::with_capacity(levels.len());
        for lvl in levels.iter() {
            let (mut lvls, blk) = lvl.couple(j, j1, j2, None)?;
            next.append(&mut lvls);
            blocks.push(blk);
        }
        cg_vec = cg_vec.dot(&block_diag(&blocks));
        levels = next;
    }
    Ok((levels, cg_vec))
}

/// Rotation operator `exp(-i θ·J)` taking the quantisation frame of `space`
/// to the axes given as the columns of `quax`.
///
/// `J` is the sum of the angular momenta named in `labels`, or of all
/// independent labels if `None`.
pub fn rotate(space: &Symbol, quax: &nd::Array2<f64>, labels: Option<&[char]>)
    -> AngmomResult<nd::Array2<C64>>
{
    let rotvec = rotation_vector(&quax.t().to_owned())?;
    let labels: Vec<char>
        = match labels {
            Some(ls) => ls.to_vec(),
            None => space.coupling().iter().map(|node| node.label()).collect(),
        };
    let n = space.multiplicity();
    let mut total: nd::Array3<C64> = nd::Array3::zeros((3, n, n));
    for l in labels.into_iter() {
        total += &space.get_op(l)?;
    }
    let v = [
        C64::new(0.0, -rotvec[0]),
        C64::new(0.0, -rotvec[1]),
        C64::new(0.0, -rotvec[2]),
    ];
    expm(&contract3(&v, &total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_linalg::assert::close_l2;

    fn ls(l: u32, twice_s: u32) -> Symbol {
        Symbol::uncoupled([('L', SpinTotal::new(2 * l)), ('S', SpinTotal::new(twice_s))])
            .unwrap()
    }

    #[test]
    fn basis_and_states() {
        let sym = ls(1, 1);
        assert_eq!(sym.multiplicity(), 6);
        assert_eq!(sym.basis().len(), 4);
        let states = sym.states();
        assert_eq!(states.len(), 6);
        assert_eq!(states[0].get('L', Component::Proj), Some(-2));
        assert_eq!(states[0].get('S', Component::Proj), Some(-1));
        assert_eq!(states[1].get('S', Component::Proj), Some(1));
        assert_eq!(states[5].get('L', Component::Proj), Some(2));
    }

    #[test]
    fn undeclared_coupling_label() {
        let qn: IndexMap<char, SpinTotal>
            = [('L', SpinTotal::new(2)), ('J', SpinTotal::new(1))].into_iter().collect();
        let res = Symbol::new(qn, Some(vec![Coupling::pair('J', 'L', 'S')]));
        assert!(matches!(res, Err(AngmomError::UndefinedLabel('S'))));
    }

    #[test]
    fn coupling_is_orthogonal() {
        let sym = ls(5, 5);
        let (levels, C) = sym.couple('J', 'L', 'S', None).unwrap();
        assert_eq!(levels.len(), 6);
        let dims: usize = levels.iter().map(|l| l.multiplicity()).sum();
        assert_eq!(dims, 66);
        assert_eq!(C.dim(), (66, 66));
        let I: nd::Array2<f64> = nd::Array2::eye(66);
        close_l2(&C.t().dot(&C), &I, 1e-12);
        close_l2(&C.dot(&C.t()), &I, 1e-12);
    }

    #[test]
    fn coupled_ops_add_up_within_a_level() {
        let sym = ls(2, 2);
        let levels = sym.levels('J', 'L', 'S').unwrap();
        for lvl in levels.iter() {
            let J = lvl.get_op('J').unwrap();
            let L = lvl.get_op('L').unwrap();
            let S = lvl.get_op('S').unwrap();
            close_l2(&(&L + &S), &J, 1e-10);
        }
    }

    #[test]
    fn sequential_couplings() {
        let sym = Symbol::uncoupled([
            ('L', SpinTotal::new(2)),
            ('S', SpinTotal::new(1)),
            ('I', SpinTotal::new(1)),
        ]).unwrap();
        let (levels, C) = couple_space(&sym, &[('J', 'L', 'S'), ('F', 'J', 'I')]).unwrap();
        let fs: Vec<u32> = levels.iter().map(|l| l.qn_of('F').unwrap().halves()).collect();
        assert_eq!(fs, vec![0, 2, 2, 4]);
        let I: nd::Array2<f64> = nd::Array2::eye(12);
        close_l2(&C.t().dot(&C), &I, 1e-12);
        // nested projection back down to L
        let Lz = levels[3].get_op('L').unwrap();
        assert_eq!(Lz.dim(), (3, 5, 5));
    }

    #[test]
    fn rotation_about_z_is_diagonal() {
        let sym = ls(1, 0);
        let a = 0.7_f64;
        let quax = nd::array![
            [a.cos(), -a.sin(), 0.0],
            [a.sin(), a.cos(), 0.0],
            [0.0, 0.0, 1.0],
        ];
        let U = rotate(&sym, &quax, None).unwrap();
        // rotation vector of quaxᵀ is -a ẑ, so U = exp(i a Lz)
        for (k, m) in [-1.0, 0.0, 1.0].into_iter().enumerate() {
            assert!((U[[k, k]] - C64::from_polar(1.0, a * m)).norm() < 1e-10);
        }
    }

    #[test]
    fn parse_and_reduce() {
        let sym: Symbol = "L=1, S=1/2".parse().unwrap();
        assert_eq!(sym, ls(1, 1));
        assert_eq!(sym.to_string(), "Symbol(L=1, S=1/2)");
        let wrapped: Symbol = "Symbol(S=0.5, L=1)".parse().unwrap();
        assert_eq!(wrapped, sym);
        let red = sym.reduce(&['S']).unwrap();
        assert_eq!(red.multiplicity(), 2);
        assert!(sym.contains(&red));
        assert!(!red.contains(&sym));
    }
}
