//! Russell-Saunders terms (`6H`) and levels (`6H15/2`).
//!
//! Both are thin wrappers around a [`Symbol`] that add parsing, the
//! spectroscopic letter, and the spin multiplicity. They [`Deref`] to the
//! underlying space, so every [`Symbol`] operation is available on them.

use std::{ fmt, ops::Deref, str::FromStr, sync::OnceLock };
use indexmap::IndexMap;
use regex::Regex;
use crate::{
    error::{ AngmomError, AngmomResult },
    spin::SpinTotal,
    symbol::{ Coupling, Symbol },
};

/// Spectroscopic letters for `L = 0, 1, ...`; `J` is skipped.
pub const ANGM_LETTERS: [char; 14] = [
    'S', 'P', 'D', 'F', 'G', 'H', 'I', 'K', 'L', 'M', 'N', 'O', 'Q', 'R',
];

/// Labels conventionally used for spin angular momenta.
pub const SPIN_SYMBOLS: [char; 6] = ['R', 'S', 'T', 'U', 'V', 'W'];

/// Labels conventionally used for orbital angular momenta.
pub const ANGM_SYMBOLS: [char; 6] = ['L', 'M', 'N', 'O', 'P', 'Q'];

/// Labels conventionally used for total angular momenta.
pub const TOTJ_SYMBOLS: [char; 6] = ['F', 'G', 'H', 'I', 'J', 'K'];

/// Orbital angular momentum of a spectroscopic letter.
pub fn spec2angm(letter: char) -> Option<u32> {
    ANGM_LETTERS.iter().position(|c| *c == letter).map(|k| k as u32)
}

/// Spectroscopic letter of an orbital angular momentum.
pub fn angm2spec(l: SpinTotal) -> Option<char> {
    if !l.is_integer() { return None; }
    ANGM_LETTERS.get((l.halves() / 2) as usize).copied()
}

static TERM_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static LEVEL_RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn spin_from_mult(mult: u32) -> Option<SpinTotal> {
    (mult > 0).then(|| SpinTotal::new(mult - 1))
}

/* Term ***********************************************************************/

/// A spectroscopic term: an uncoupled `L ⊗ S` space.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Term(Symbol);

impl Deref for Term {
    type Target = Symbol;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl AsRef<Symbol> for Term {
    fn as_ref(&self) -> &Symbol { &self.0 }
}

impl Term {
    /// Create a new term with `L` ordered before `S`.
    pub fn new(l: u32, s: SpinTotal) -> AngmomResult<Self> {
        Self::from_symbol(Symbol::uncoupled([('L', SpinTotal::new(2 * l)), ('S', s)])?)
    }

    /// Wrap a space; it must define integral `L` (with a spectroscopic
    /// letter) and `S`.
    pub fn from_symbol(symbol: Symbol) -> AngmomResult<Self> {
        let l = symbol.qn_of('L').ok_or(AngmomError::UndefinedLabel('L'))?;
        symbol.qn_of('S').ok_or(AngmomError::UndefinedLabel('S'))?;
        angm2spec(l)
            .ok_or_else(|| AngmomError::domain(format!("no spectroscopic letter for L = {}", l)))?;
        Ok(Self(symbol))
    }

    /// Parse a term like `"6H"`.
    ///
    /// `spin_major` orders the quantum numbers `L, S` (`true`) or `S, L`
    /// (`false`), which fixes the Kronecker order of the basis.
    pub fn parse_with(s: &str, spin_major: bool) -> AngmomResult<Self> {
        let err = || AngmomError::Format(s.to_string(), "'6H'");
        let re
            = TERM_RE.get_or_init(|| Regex::new(r"^(\d+)([A-Z])$"))
            .as_ref().map_err(|_| err())?;
        let caps = re.captures(s.trim()).ok_or_else(err)?;
        let mult: u32 = caps[1].parse().map_err(|_| err())?;
        let letter = caps[2].chars().next().ok_or_else(err)?;
        let l = SpinTotal::new(2 * spec2angm(letter).ok_or_else(err)?);
        let spin = spin_from_mult(mult).ok_or_else(err)?;
        let qn: Vec<(char, SpinTotal)>
            = if spin_major {
                vec![('L', l), ('S', spin)]
            } else {
                vec![('S', spin), ('L', l)]
            };
        Self::from_symbol(Symbol::uncoupled(qn)?)
    }

    /// Parse a term like `"6H"` with `L` ordered before `S`.
    pub fn parse(s: &str) -> AngmomResult<Self> { Self::parse_with(s, true) }

    pub fn symbol(&self) -> &Symbol { &self.0 }

    pub fn into_symbol(self) -> Symbol { self.0 }

    /// Orbital angular momentum.
    pub fn l(&self) -> SpinTotal { self.0.qn()[&'L'] }

    /// Spin angular momentum.
    pub fn s(&self) -> SpinTotal { self.0.qn()[&'S'] }

    /// `2S + 1`.
    pub fn spin_mult(&self) -> usize { self.s().mult() }

    /// Spectroscopic letter of `L`.
    pub fn orb_letter(&self) -> char {
        angm2spec(self.l()).unwrap_or('?')
    }

    /// Levels `J = L ⊗ S` of the term.
    pub fn levels(&self) -> AngmomResult<Vec<Level>> {
        self.0.levels('J', 'L', 'S')?
            .into_iter()
            .map(Level::from_symbol)
            .collect()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.spin_mult(), self.orb_letter())
    }
}

impl FromStr for Term {
    type Err = AngmomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

/* Level **********************************************************************/

/// A spectroscopic level: a space whose top-level node couples `L` and `S`
/// to `J`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Level(Symbol);

impl Deref for Level {
    type Target = Symbol;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl AsRef<Symbol> for Level {
    fn as_ref(&self) -> &Symbol { &self.0 }
}

impl Level {
    /// Create a new level `J <- (L, S)` with quantum numbers ordered
    /// `S, L, J`.
    pub fn new(l: u32, s: SpinTotal, j: SpinTotal) -> AngmomResult<Self> {
        Self::build(SpinTotal::new(2 * l), s, j, true)
    }

    fn build(l: SpinTotal, s: SpinTotal, j: SpinTotal, spin_major: bool)
        -> AngmomResult<Self>
    {
        if !l.coupled_with(s).any(|jj| jj == j) {
            return Err(AngmomError::domain(
                format!("J = {} cannot be reached by coupling L = {} and S = {}", j, l, s)
            ));
        }
        let (qn, coupling): (IndexMap<char, SpinTotal>, Coupling)
            = if spin_major {
                (
                    [('S', s), ('L', l), ('J', j)].into_iter().collect(),
                    Coupling::pair('J', 'L', 'S'),
                )
            } else {
                (
                    [('L', l), ('S', s), ('J', j)].into_iter().collect(),
                    Coupling::pair('J', 'S', 'L'),
                )
            };
        Self::from_symbol(Symbol::new(qn, Some(vec![coupling]))?)
    }

    /// Wrap a space; it must have a top-level coupled `J` node and define
    /// `L` and `S`.
    pub fn from_symbol(symbol: Symbol) -> AngmomResult<Self> {
        let has_j
            = symbol.coupling().iter()
            .any(|node| matches!(node, Coupling::Coupled('J', ..)));
        if !has_j { return Err(AngmomError::MissingJCoupling); }
        let l = symbol.qn_of('L').ok_or(AngmomError::UndefinedLabel('L'))?;
        symbol.qn_of('S').ok_or(AngmomError::UndefinedLabel('S'))?;
        angm2spec(l)
            .ok_or_else(|| AngmomError::domain(format!("no spectroscopic letter for L = {}", l)))?;
        Ok(Self(symbol))
    }

    /// Parse a level like `"6H15/2"` or `"3F4"`.
    ///
    /// `spin_major` couples `J <- (L, S)` (`true`) or `J <- (S, L)`
    /// (`false`).
    pub fn parse_with(s: &str, spin_major: bool) -> AngmomResult<Self> {
        let err = || AngmomError::Format(s.to_string(), "'6H15/2'");
        let re
            = LEVEL_RE.get_or_init(|| Regex::new(r"^(\d+)([A-Z])(\d+)(?:/(\d+))?$"))
            .as_ref().map_err(|_| err())?;
        let caps = re.captures(s.trim()).ok_or_else(err)?;
        let mult: u32 = caps[1].parse().map_err(|_| err())?;
        let letter = caps[2].chars().next().ok_or_else(err)?;
        let l = SpinTotal::new(2 * spec2angm(letter).ok_or_else(err)?);
        let spin = spin_from_mult(mult).ok_or_else(err)?;
        let j: SpinTotal
            = match caps.get(4) {
                Some(den) => format!("{}/{}", &caps[3], den.as_str()).parse()?,
                None => caps[3].parse()?,
            };
        Self::build(l, spin, j, spin_major)
    }

    /// Parse a level like `"6H15/2"` with `J <- (L, S)`.
    pub fn parse(s: &str) -> AngmomResult<Self> { Self::parse_with(s, true) }

    pub fn symbol(&self) -> &Symbol { &self.0 }

    pub fn into_symbol(self) -> Symbol { self.0 }

    pub fn l(&self) -> SpinTotal { self.0.qn()[&'L'] }

    pub fn s(&self) -> SpinTotal { self.0.qn()[&'S'] }

    pub fn j(&self) -> SpinTotal { self.0.qn()[&'J'] }

    pub fn spin_mult(&self) -> usize { self.s().mult() }

    pub fn orb_letter(&self) -> char {
        angm2spec(self.l()).unwrap_or('?')
    }

    /// The parent term.
    pub fn term(&self) -> AngmomResult<Term> {
        Term::new(self.l().halves() / 2, self.s())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.spin_mult(), self.orb_letter(), self.j())
    }
}

impl FromStr for Level {
    type Err = AngmomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

/* Generic parsing ************************************************************/

/// Result of [`parse_termsymbol`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TermSymbol {
    Level(Level),
    Term(Term),
    Symbol(Symbol),
}

impl TermSymbol {
    /// The underlying space.
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Level(level) => level.symbol(),
            Self::Term(term) => term.symbol(),
            Self::Symbol(sym) => sym,
        }
    }
}

impl fmt::Display for TermSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Level(level) => level.fmt(f),
            Self::Term(term) => term.fmt(f),
            Self::Symbol(sym) => sym.fmt(f),
        }
    }
}

/// Parse a level (`"6H15/2"`), then a term (`"6H"`), then an explicit
/// quantum-number list (`"L=1, S=1/2"`), returning the first that succeeds.
pub fn parse_termsymbol(s: &str) -> AngmomResult<TermSymbol> {
    Level::parse(s).map(TermSymbol::Level)
        .or_else(|_| Term::parse(s).map(TermSymbol::Term))
        .or_else(|_| s.parse::<Symbol>().map(TermSymbol::Symbol))
}
