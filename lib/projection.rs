//! End-to-end projection of spin-free ab-initio data onto a model spin
//! Hamiltonian.
//!
//! The spin-free data are grouped by spin multiplicity. For every group we
//! need the spin-free energy matrix, the orbital angular momentum and the
//! spin-orbit (AMFI) integrals with every other group. The pipeline
//! resolves the model space into spectroscopic terms, builds term vectors
//! with consistent phases, expands them into the spin-orbit basis and
//! projects the resulting Hamiltonian onto a [`SpinHamiltonian`].

use std::fmt;
use indexmap::{ map::Entry, IndexMap };
use itertools::Itertools;
use log::{ debug, info };
use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    angmom::make_angmom_ops_from_mult,
    constants::HARTREE2INVCM,
    error::{ AngmomError, AngmomResult },
    group::project_angm,
    hamiltonian::{
        ModelParameters,
        SpinHamiltonian,
        SpinHamiltonianParams,
        TimeReversal,
    },
    linalg::{
        block_diag3,
        cartesian_op_squared,
        from_block_grid3,
        rotate_cart,
        unitary_transform,
        unitary_transform3,
    },
    spin::SpinTotal,
    stevens::RyabovCache,
    symbol::Symbol,
    term::{ Level, Term, TermSymbol },
    term_trafo::{ evaluate_term_space, evaluate_term_trafo, Generator, TermBlock },
    wavefunction::{ sf2ws, sf2ws3, sf2ws_amfi },
};

/// Highest orbital angular momentum considered in term-content reports.
pub const MAX_ANGM: u32 = 13;

/// Weights below this are left out of term-content reports.
const CONTENT_THRESH: f64 = 0.1;

/* Input **********************************************************************/

/// Spin-free ab-initio operators in atomic units, grouped by spin
/// multiplicity.
#[derive(Clone, Debug)]
pub struct SpinFreeData {
    /// Spin multiplicity `2S + 1` of every group.
    pub mults: Vec<usize>,
    /// Energy matrix of every group.
    pub energies: Vec<nd::Array2<C64>>,
    /// Orbital angular momentum `(3, n, n)` of every group.
    pub angm: Vec<nd::Array3<C64>>,
    /// AMFI integrals `(3, n_i, n_j)` between every pair of groups.
    pub amfi: Vec<Vec<nd::Array3<C64>>>,
}

impl SpinFreeData {
    /// Check that all blocks agree on the group sizes.
    pub fn validate(&self) -> AngmomResult<()> {
        let n = self.mults.len();
        if self.energies.len() != n {
            return Err(AngmomError::shape(&[n], &[self.energies.len()]));
        }
        if self.angm.len() != n {
            return Err(AngmomError::shape(&[n], &[self.angm.len()]));
        }
        if self.amfi.len() != n {
            return Err(AngmomError::shape(&[n], &[self.amfi.len()]));
        }
        let sizes = self.sizes();
        for ((ener, angm), size) in self.energies.iter().zip(&self.angm).zip(&sizes) {
            if ener.dim() != (*size, *size) {
                return Err(AngmomError::shape(&[*size, *size], ener.shape()));
            }
            if angm.dim() != (3, *size, *size) {
                return Err(AngmomError::shape(&[3, *size, *size], angm.shape()));
            }
        }
        for (row, n1) in self.amfi.iter().zip(&sizes) {
            if row.len() != n {
                return Err(AngmomError::shape(&[n], &[row.len()]));
            }
            for (blk, n2) in row.iter().zip(&sizes) {
                if blk.dim() != (3, *n1, *n2) {
                    return Err(AngmomError::shape(&[3, *n1, *n2], blk.shape()));
                }
            }
        }
        Ok(())
    }

    /// Number of spin-free states in every group.
    pub fn sizes(&self) -> Vec<usize> {
        self.energies.iter().map(|e| e.nrows()).collect()
    }

    /// Spin of every spin-free state.
    pub fn spins(&self) -> Vec<SpinTotal> {
        self.mults.iter().zip(self.sizes())
            .flat_map(|(mult, n)| std::iter::repeat(SpinTotal::from_mult(*mult)).take(n))
            .collect()
    }

    /// Dimension of the spin-orbit basis.
    pub fn ws_dim(&self) -> usize {
        self.mults.iter().zip(self.sizes()).map(|(m, n)| m * n).sum()
    }

    /// Spin-orbit Hamiltonian `sf2ws_amfi(AMFI) + sf2ws(energies)`.
    pub fn ws_hamiltonian(&self) -> AngmomResult<nd::Array2<C64>> {
        Ok(sf2ws_amfi(&self.amfi, &self.mults)? + sf2ws(&self.energies, &self.mults)?)
    }

    /// Rotate the quantisation axis of every Cartesian operator.
    pub fn rotated(&self, quax: &nd::Array2<f64>) -> AngmomResult<Self> {
        if quax.dim() != (3, 3) {
            return Err(AngmomError::shape(&[3, 3], quax.shape()));
        }
        let angm: Vec<nd::Array3<C64>>
            = self.angm.iter().map(|op| rotate_cart(op, quax)).collect();
        let amfi: Vec<Vec<nd::Array3<C64>>>
            = self.amfi.iter()
            .map(|row| row.iter().map(|op| rotate_cart(op, quax)).collect())
            .collect();
        Ok(Self {
            mults: self.mults.clone(),
            energies: self.energies.clone(),
            angm,
            amfi,
        })
    }

    /// Spin and orbital angular momentum in the spin-orbit basis.
    pub fn ws_angmom(&self) -> AngmomResult<(nd::Array3<C64>, nd::Array3<C64>)> {
        let counts: Vec<(usize, usize)>
            = self.mults.iter().copied().zip(self.sizes()).collect();
        let spin = make_angmom_ops_from_mult(&counts);
        let angm = sf2ws3(&self.angm, &self.mults)?;
        Ok((spin, angm))
    }

    /// Spectroscopic-term composition of every spin-free state, and level
    /// composition of every spin-orbit state.
    pub fn term_content(&self) -> AngmomResult<TermContent> {
        self.validate()?;
        let sections
            = self.mults.iter().zip(&self.energies).zip(&self.angm)
            .map(|((mult, ener), angm)| {
                let spin = SpinTotal::from_mult(*mult);
                let e0 = ener.get((0, 0)).map(|e| e.re).unwrap_or(0.0);
                let energies: Vec<f64>
                    = ener.diag().iter().map(|e| (e.re - e0) * HARTREE2INVCM).collect();
                let l2 = cartesian_op_squared(angm);
                let terms
                    = (0..MAX_ANGM)
                    .map(|l| {
                        let proj = project_angm(SpinTotal::new(2 * l), &l2)?;
                        let weights: Vec<f64> = proj.diag().iter().map(|z| z.re).collect();
                        Ok((Term::new(l, spin)?, weights))
                    })
                    .collect::<AngmomResult<Vec<_>>>()?;
                Ok(SpinSection { spin, energies, terms })
            })
            .collect::<AngmomResult<Vec<_>>>()?;

        let (E, V) = self.ws_hamiltonian()?.eigh_into(UPLO::Lower)?;
        let e0 = E.first().copied().unwrap_or(0.0);
        let energies: Vec<f64> = E.iter().map(|e| (e - e0) * HARTREE2INVCM).collect();
        let (spin, angm) = self.ws_angmom()?;
        let spin_orbit
            = so_level_content(
                &unitary_transform3(&spin, &V),
                &unitary_transform3(&angm, &V),
                &energies,
                &self.mults,
            )?;
        Ok(TermContent { sections, spin_orbit })
    }
}

/* Term content ***************************************************************/

/// Term composition of the states of a single spin multiplicity.
#[derive(Clone, Debug)]
pub struct SpinSection {
    pub spin: SpinTotal,
    /// State energies relative to the first, in cm⁻¹.
    pub energies: Vec<f64>,
    /// Weight of every state in every term.
    pub terms: Vec<(Term, Vec<f64>)>,
}

impl SpinSection {
    /// Number of complete terms contained in the section, per term.
    pub fn term_counts(&self) -> Vec<(&Term, f64)> {
        self.terms.iter()
            .map(|(term, weights)| {
                (term, weights.iter().sum::<f64>() / term.l().mult() as f64)
            })
            .collect()
    }
}

/// Level composition of spin-orbit states.
#[derive(Clone, Debug)]
pub struct SpinOrbitSection {
    /// State energies relative to the ground state, in cm⁻¹.
    pub energies: Vec<f64>,
    /// Weight of every state in every level.
    pub levels: Vec<(Level, Vec<f64>)>,
}

impl SpinOrbitSection {
    /// Number of complete levels contained in the states, per level.
    pub fn level_counts(&self) -> Vec<(&Level, f64)> {
        self.levels.iter()
            .map(|(level, weights)| {
                (level, weights.iter().sum::<f64>() / level.j().mult() as f64)
            })
            .collect()
    }
}

/// Decompose spin-orbit states into levels `2S+1 L_J`.
///
/// `spin` and `angm` are given in the basis of the states, `mults` lists the
/// spin multiplicities present. Weights are the diagonal of
/// `P_J P_L P_S` for every level with `L < MAX_ANGM`.
pub fn so_level_content(
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
    energies: &[f64],
    mults: &[usize],
) -> AngmomResult<SpinOrbitSection>
{
    let n = energies.len();
    for op in [spin, angm] {
        if op.dim() != (3, n, n) {
            return Err(AngmomError::shape(&[3, n, n], op.shape()));
        }
    }
    let s2 = cartesian_op_squared(spin);
    let l2 = cartesian_op_squared(angm);
    let j2 = cartesian_op_squared(&(spin + angm));
    let proj_l: Vec<nd::Array2<C64>>
        = (0..MAX_ANGM)
        .map(|l| project_angm(SpinTotal::new(2 * l), &l2))
        .collect::<AngmomResult<_>>()?;
    let mut spins: Vec<SpinTotal> = mults.iter().map(|m| SpinTotal::from_mult(*m)).collect();
    spins.sort();
    spins.dedup();

    let mut proj_j: IndexMap<SpinTotal, nd::Array2<C64>> = IndexMap::new();
    let mut levels: Vec<(Level, Vec<f64>)> = Vec::new();
    for s in spins.into_iter() {
        let proj_s = project_angm(s, &s2)?;
        for (l, p_l) in (0..MAX_ANGM).zip(proj_l.iter()) {
            let p_ls = p_l.dot(&proj_s);
            for j in SpinTotal::new(2 * l).coupled_with(s) {
                let p_j
                    = match proj_j.entry(j) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => e.insert(project_angm(j, &j2)?),
                    };
                let weights: Vec<f64> = p_j.dot(&p_ls).diag().iter().map(|z| z.re).collect();
                levels.push((Level::new(l, s, j)?, weights));
            }
        }
    }
    Ok(SpinOrbitSection { energies: energies.to_vec(), levels })
}

/// Spectroscopic-term composition of spin-free states and level
/// composition of spin-orbit states.
#[derive(Clone, Debug)]
pub struct TermContent {
    pub sections: Vec<SpinSection>,
    pub spin_orbit: SpinOrbitSection,
}

fn write_composition(
    f: &mut fmt::Formatter<'_>,
    entries: &[(String, f64, &[f64])],
    energies: &[f64],
) -> fmt::Result
{
    let rule = "=".repeat(33);
    let thin = "-".repeat(33);
    writeln!(f, "{}", rule)?;
    writeln!(f, "Term composition:")?;
    writeln!(f, "{}", thin)?;
    for (name, count, weights) in entries.iter() {
        if *count <= CONTENT_THRESH { continue; }
        let content
            = weights.iter().enumerate()
            .filter(|(_, w)| **w > CONTENT_THRESH)
            .map(|(idx, w)| format!("{:4.2}|{}>", w, idx + 1))
            .join(" + ");
        writeln!(f, "{:4.2} |{}> = {}", count, name, content)?;
    }
    writeln!(f, "{}", rule)?;
    writeln!(f, "State composition:")?;
    writeln!(f, "{}", thin)?;
    for (state, ener) in energies.iter().enumerate() {
        let content
            = entries.iter()
            .filter(|(_, _, w)| w.get(state).is_some_and(|w| *w > CONTENT_THRESH))
            .map(|(name, _, w)| format!("{:4.2}|{}>", w[state], name))
            .join(" + ");
        writeln!(f, "|State {:3}> ({:8.2}) = {}", state + 1, ener, content)?;
    }
    writeln!(f, "{}", rule)
}

impl fmt::Display for TermContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Spin-free section:")?;
        for section in self.sections.iter() {
            writeln!(f, "S = {}", section.spin)?;
            let entries: Vec<(String, f64, &[f64])>
                = section.terms.iter().zip(section.term_counts())
                .map(|((term, w), (_, count))| (term.to_string(), count, w.as_slice()))
                .collect();
            write_composition(f, &entries, &section.energies)?;
        }
        writeln!(f, "Spin-orbit section:")?;
        let so = &self.spin_orbit;
        let entries: Vec<(String, f64, &[f64])>
            = so.levels.iter().zip(so.level_counts())
            .map(|((level, w), (_, count))| (level.to_string(), count, w.as_slice()))
            .collect();
        write_composition(f, &entries, &so.energies)
    }
}

/* Pipeline *******************************************************************/

/// Settings of a model projection.
#[derive(Clone, Debug)]
pub struct ProjectionConfig {
    /// Space of the model Hamiltonian.
    pub model_space: TermSymbol,
    /// Explicit `(j, j1, j2)` couplings leading from the terms to the model
    /// space.
    pub coupling: Vec<(char, char, char)>,
    /// Terms whose phase is inverted; required whenever the model space
    /// contains more than one term.
    pub flip_phase: Option<Vec<Symbol>>,
    /// Rotation into the quantisation frame.
    pub quax: Option<nd::Array2<f64>>,
    /// Model Hamiltonian settings. Exchange time-reversal symmetry is always
    /// taken to be even.
    pub hamiltonian: SpinHamiltonianParams,
    /// Log fit diagnostics.
    pub verbose: bool,
}

impl ProjectionConfig {
    pub fn new(model_space: TermSymbol) -> Self {
        Self {
            model_space,
            coupling: Vec::new(),
            flip_phase: None,
            quax: None,
            hamiltonian: SpinHamiltonianParams::default(),
            verbose: false,
        }
    }
}

/// Result of one phasing choice, as evaluated by
/// [`ModelProjection::phase_flip_diagnostic`].
#[derive(Clone, Debug)]
pub struct PhaseFlipOption {
    /// Terms whose phase was inverted.
    pub flip_phase: Vec<Symbol>,
    pub params: ModelParameters,
}

impl fmt::Display for PhaseFlipOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flip_phase.is_empty() {
            writeln!(f, "no phase flip")?;
        } else {
            let terms
                = self.flip_phase.iter()
                .map(|t| Term::from_symbol(t.clone()).map(|t| t.to_string()).unwrap_or(t.to_string()))
                .join(", ");
            writeln!(f, "flip phase: {}", terms)?;
        }
        write!(f, "{}", self.params)
    }
}

// order of the two labels of a term, which fixes the position of the state
// (m_L, M_S) among the term states
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TermLayout {
    OrbitalOuter,
    SpinOuter,
}

impl TermLayout {
    fn of(term: &Symbol) -> AngmomResult<Self> {
        let labels: Vec<char> = term.qn().keys().copied().collect();
        match labels.as_slice() {
            ['L', 'S'] => Ok(Self::OrbitalOuter),
            ['S', 'L'] => Ok(Self::SpinOuter),
            _ => Err(AngmomError::domain(
                format!("{} is not an uncoupled term of L and S", term)
            )),
        }
    }

    fn column(self, c: usize, ms: usize, n_l: usize, mult: usize) -> usize {
        match self {
            Self::OrbitalOuter => c * mult + ms,
            Self::SpinOuter => ms * n_l + c,
        }
    }
}

/// Projection of spin-free ab-initio data onto a model Hamiltonian.
#[derive(Clone, Debug)]
pub struct ModelProjection {
    data: SpinFreeData,
    config: ProjectionConfig,
    terms: Vec<Symbol>,
    cg_vecs: nd::Array2<C64>,
    model: SpinHamiltonian,
}

impl ModelProjection {
    /// Resolve the term space and build the model Hamiltonian.
    pub fn new(data: SpinFreeData, config: ProjectionConfig) -> AngmomResult<Self> {
        let mut cache = RyabovCache::new();
        Self::with_cache(data, config, &mut cache)
    }

    /// Like [`Self::new`], reusing Stevens-operator coefficients from `cache`.
    pub fn with_cache(
        data: SpinFreeData,
        config: ProjectionConfig,
        cache: &mut RyabovCache,
    ) -> AngmomResult<Self>
    {
        data.validate()?;
        let (terms, cg_vecs) = evaluate_term_space(&config.model_space, &config.coupling)?;
        let cg_vecs = cg_vecs.mapv(C64::from);
        let data
            = match &config.quax {
                Some(quax) => data.rotated(quax)?,
                None => data,
            };
        let params = SpinHamiltonianParams {
            time_reversal_symm: TimeReversal::Even,
            ..config.hamiltonian.clone()
        };
        let model = SpinHamiltonian::with_cache(config.model_space.symbol().clone(), params, cache)?;
        debug!(
            "model space {} spanned by {} term(s): {}",
            config.model_space,
            terms.len(),
            terms.iter().join(", "),
        );
        Ok(Self { data, config, terms, cg_vecs, model })
    }

    /// Spin-free data, in the quantisation frame.
    pub fn data(&self) -> &SpinFreeData { &self.data }

    pub fn config(&self) -> &ProjectionConfig { &self.config }

    /// Terms spanning the model space.
    pub fn terms(&self) -> &[Symbol] { &self.terms }

    pub fn model(&self) -> &SpinHamiltonian { &self.model }

    /// Term composition of the spin-free states.
    pub fn term_content(&self) -> AngmomResult<TermContent> {
        self.data.term_content()
    }

    /// Fit the model parameters.
    ///
    /// Fails if the model space spans more than one term and no phasing is
    /// given; see [`Self::phase_flip_diagnostic`] for the candidates.
    pub fn evaluate(&self) -> AngmomResult<ModelParameters> {
        let flip_phase: &[Symbol]
            = match (&self.config.flip_phase, self.terms.len()) {
                (Some(flip), _) => flip.as_slice(),
                (None, 0..=1) => &[],
                (None, _) => {
                    return Err(AngmomError::domain(
                        "the relative phase of multiple terms is ambiguous; \
                        choose flip_phase from the phase flip diagnostic"
                    ));
                },
            };
        self.fit(flip_phase)
    }

    /// Fit the model for every choice of inverting the phase of up to half
    /// of the terms.
    pub fn phase_flip_diagnostic(&self) -> AngmomResult<Vec<PhaseFlipOption>> {
        let mut options: Vec<PhaseFlipOption> = Vec::new();
        for num in 0..=self.terms.len() / 2 {
            for flip_phase in self.terms.iter().cloned().combinations(num) {
                let params = self.fit(&flip_phase)?;
                let option = PhaseFlipOption { flip_phase, params };
                info!("{}", option);
                options.push(option);
            }
        }
        Ok(options)
    }

    /// Term vectors in the spin-orbit basis, spanning the model space.
    pub fn ws_term_vecs(&self, flip_phase: &[Symbol]) -> AngmomResult<nd::Array2<C64>> {
        let amfi = from_block_grid3(&self.data.amfi)?;
        let chain = vec![
            ('L', Generator::Angm(block_diag3(&self.data.angm))),
            ('S', Generator::Irreps(self.data.spins())),
        ];
        let blocks
            = evaluate_term_trafo(&self.terms, &amfi, &chain, Some(flip_phase))?
            .into_blocks()?;
        let term_vecs = self.expand_term_blocks(&blocks)?;
        Ok(term_vecs.dot(&self.cg_vecs))
    }

    // place the spin-free term vectors of every block into the spin-orbit
    // basis; spin-orbit rows run over spin-free states with M_S fastest,
    // columns over the states of every term in its own (L, S) order
    fn expand_term_blocks(&self, blocks: &[TermBlock]) -> AngmomResult<nd::Array2<C64>> {
        let layouts: Vec<TermLayout>
            = self.terms.iter().map(TermLayout::of).collect::<AngmomResult<_>>()?;
        let state_mults: Vec<usize>
            = self.data.mults.iter().zip(self.data.sizes())
            .flat_map(|(mult, n)| std::iter::repeat(*mult).take(n))
            .collect();
        let row_offsets: Vec<usize>
            = state_mults.iter()
            .scan(0, |acc, m| { let off = *acc; *acc += m; Some(off) })
            .collect();
        let col_offsets: Vec<usize>
            = self.terms.iter()
            .scan(0, |acc, t| { let off = *acc; *acc += t.multiplicity(); Some(off) })
            .collect();
        let n_cols: usize = self.terms.iter().map(|t| t.multiplicity()).sum();
        let mut out: nd::Array2<C64> = nd::Array2::zeros((self.data.ws_dim(), n_cols));
        let mut placed = vec![false; self.terms.len()];

        for block in blocks.iter() {
            let mult = block.qn.mult();
            let mut c0 = 0;
            for term in block.terms.iter() {
                let idx
                    = self.terms.iter().enumerate()
                    .position(|(i, t)| t == term && !placed[i])
                    .ok_or_else(|| AngmomError::domain(format!("unexpected term {}", term)))?;
                placed[idx] = true;
                let n_l = term.multiplicity() / mult;
                for (r_local, r) in block.rows.iter().enumerate() {
                    if state_mults[*r] != mult {
                        return Err(AngmomError::domain(
                            format!("state {} does not have multiplicity {}", r, mult)
                        ));
                    }
                    for c in 0..n_l {
                        let v = block.vecs[[r_local, c0 + c]];
                        if v == C64::from(0.0) { continue; }
                        for ms in 0..mult {
                            let col = col_offsets[idx] + layouts[idx].column(c, ms, n_l, mult);
                            out[[row_offsets[*r] + ms, col]] = v;
                        }
                    }
                }
                c0 += n_l;
            }
        }
        if let Some(idx) = placed.iter().position(|p| !p) {
            return Err(AngmomError::domain(
                format!("no spin-free states of the spin of term {}", self.terms[idx])
            ));
        }
        Ok(out)
    }

    /// Spin-orbit Hamiltonian (Hartree) in the basis of the model space.
    pub fn model_hamiltonian(&self, flip_phase: &[Symbol]) -> AngmomResult<nd::Array2<C64>> {
        let vecs = self.ws_term_vecs(flip_phase)?;
        Ok(unitary_transform(&self.data.ws_hamiltonian()?, &vecs))
    }

    fn fit(&self, flip_phase: &[Symbol]) -> AngmomResult<ModelParameters> {
        let hamiltonian = self.model_hamiltonian(flip_phase)?;
        self.model.project(&hamiltonian, self.config.verbose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        angmom::calc_ang_mom_ops,
        hamiltonian::{ ParamKey, TermKind, TermLabel },
        linalg::{ dagger, expm, hermitize },
        term::parse_termsymbol,
    };
    use rand::{ rngs::StdRng, Rng, SeedableRng };

    // a P term of the given multiplicity with orbital operators scrambled by
    // a random unitary, a spin-orbit coupling constant `zeta` and an energy
    // offset
    fn p_term_data(mult: usize, zeta: f64, seed: u64) -> SpinFreeData {
        let mut rng = StdRng::seed_from_u64(seed);
        let gen: nd::Array2<C64>
            = nd::Array2::from_shape_fn((3, 3), |_| C64::new(rng.gen(), rng.gen()));
        let U = expm(&hermitize(&gen).mapv(|z| C64::i() * z)).unwrap();
        let l_ops = calc_ang_mom_ops(SpinTotal::new(2)).cart();
        let mut angm: nd::Array3<C64> = nd::Array3::zeros((3, 3, 3));
        let mut amfi: nd::Array3<C64> = nd::Array3::zeros((3, 3, 3));
        let s = SpinTotal::from_mult(mult).f();
        let norm = (s * (s + 1.0) * (2.0 * s + 1.0)).sqrt();
        for c in 0..3 {
            let l = l_ops.index_axis(nd::Axis(0), c).to_owned();
            let rot = unitary_transform(&l, &dagger(&U));
            angm.index_axis_mut(nd::Axis(0), c).assign(&rot);
            // same-spin AMFI reproduces zeta L·S with A = -i zeta norm L
            amfi.index_axis_mut(nd::Axis(0), c)
                .assign(&rot.mapv(|z| -C64::i() * z * zeta * norm));
        }
        SpinFreeData {
            mults: vec![mult],
            energies: vec![nd::Array2::eye(3).mapv(|z: C64| z * 0.25)],
            angm: vec![angm],
            amfi: vec![vec![amfi]],
        }
    }

    fn soc_params() -> SpinHamiltonianParams {
        let mut terms: IndexMap<TermKind, Vec<Vec<char>>> = IndexMap::new();
        terms.insert(TermKind::Soc, vec![vec!['L', 'S']]);
        SpinHamiltonianParams { terms, ..SpinHamiltonianParams::default() }
    }

    #[test]
    fn recovers_spin_orbit_coupling() {
        let zeta = 1e-3;
        let data = p_term_data(3, zeta, 17);
        let mut config = ProjectionConfig::new(parse_termsymbol("3P").unwrap());
        config.hamiltonian = soc_params();
        let proj = ModelProjection::new(data, config).unwrap();
        let params = proj.evaluate().unwrap();
        let shift
            = params.param(&TermLabel::new(TermKind::Diag, []), &ParamKey::Shift)
            .unwrap();
        let lamb
            = params.param(&TermLabel::new(TermKind::Soc, ['L', 'S']), &ParamKey::Lamb(None))
            .unwrap();
        assert!((shift - 0.25 * HARTREE2INVCM).abs() < 1e-5);
        assert!((lamb - zeta * HARTREE2INVCM).abs() < 1e-5);
    }

    #[test]
    fn level_model_space_is_diagonal() {
        // 2P3/2 of a 2P term: the spin-orbit Hamiltonian restricted to J = 3/2
        // is a constant shift E0 + zeta / 2
        let zeta = 2e-3;
        let data = p_term_data(2, zeta, 5);
        let level = Level::parse("2P3/2").unwrap();
        let config = ProjectionConfig::new(TermSymbol::Level(level));
        let proj = ModelProjection::new(data, config).unwrap();
        let H = proj.model_hamiltonian(&[]).unwrap();
        assert_eq!(H.dim(), (4, 4));
        let e = 0.25 + zeta / 2.0;
        for ((i, j), h) in H.indexed_iter() {
            let truth = if i == j { e } else { 0.0 };
            assert!((h - C64::from(truth)).norm() < 1e-10);
        }
        let params = proj.evaluate().unwrap();
        let shift
            = params.param(&TermLabel::new(TermKind::Diag, []), &ParamKey::Shift)
            .unwrap();
        assert!((shift - e * HARTREE2INVCM).abs() < 1e-5);
    }

    #[test]
    fn term_content_finds_p_term() {
        let data = p_term_data(3, 1e-3, 3);
        let content = data.term_content().unwrap();
        assert_eq!(content.sections.len(), 1);
        let counts = content.sections[0].term_counts();
        for (term, count) in counts {
            let truth = if term.l() == SpinTotal::new(2) { 1.0 } else { 0.0 };
            assert!((count - truth).abs() < 1e-8, "{}: {}", term, count);
        }
        let report = content.to_string();
        assert!(report.contains("|3P>"));
    }

    #[test]
    fn spin_orbit_content_finds_levels() {
        let zeta = 1e-3;
        let data = p_term_data(2, zeta, 8);
        let so = data.term_content().unwrap().spin_orbit;
        assert_eq!(so.energies.len(), 6);
        assert!(so.energies[0].abs() < 1e-12);
        assert!((so.energies[2] - 1.5 * zeta * HARTREE2INVCM).abs() < 1e-6);
        for (level, count) in so.level_counts() {
            let truth = if level.l() == SpinTotal::new(2) { 1.0 } else { 0.0 };
            assert!((count - truth).abs() < 1e-8, "{}: {}", level, count);
        }
        // the two lowest states form 2P1/2
        let (_, weights)
            = so.levels.iter()
            .find(|(lvl, _)| lvl.l() == SpinTotal::new(2) && lvl.j() == SpinTotal::new(1))
            .unwrap();
        assert!((weights[0] - 1.0).abs() < 1e-8);
        assert!((weights[1] - 1.0).abs() < 1e-8);
        assert!(weights[2].abs() < 1e-8);
    }

    #[test]
    fn term_layout_follows_label_order() {
        let term = Term::parse("3P").unwrap().into_symbol();
        assert_eq!(TermLayout::of(&term).unwrap(), TermLayout::OrbitalOuter);
        assert_eq!(TermLayout::OrbitalOuter.column(1, 2, 3, 3), 5);
        let swapped = Term::parse_with("3P", false).unwrap().into_symbol();
        assert_eq!(TermLayout::of(&swapped).unwrap(), TermLayout::SpinOuter);
        assert_eq!(TermLayout::SpinOuter.column(1, 2, 3, 3), 7);
        let level = Level::parse("3P2").unwrap().into_symbol();
        assert!(TermLayout::of(&level).is_err());
    }

    #[test]
    fn spin_outer_term_gives_same_coupling() {
        let zeta = 1e-3;
        let term = Term::parse_with("3P", false).unwrap();
        let mut config = ProjectionConfig::new(TermSymbol::Term(term));
        config.hamiltonian = soc_params();
        let proj = ModelProjection::new(p_term_data(3, zeta, 17), config).unwrap();
        let params = proj.evaluate().unwrap();
        let lamb
            = params.param(&TermLabel::new(TermKind::Soc, ['L', 'S']), &ParamKey::Lamb(None))
            .unwrap();
        assert!((lamb - zeta * HARTREE2INVCM).abs() < 1e-5);
        // levels 3P0, 3P1, 3P2 at E0 - 2 zeta, E0 - zeta, E0 + zeta
        let H = proj.model_hamiltonian(&[]).unwrap();
        let (E, _) = H.eigh_into(UPLO::Lower).unwrap();
        let truth = [
            -2.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
        ];
        for (e, t) in E.iter().zip(truth) {
            assert!((e - (0.25 + t * zeta)).abs() < 1e-10);
        }
    }

    #[test]
    fn inconsistent_data_is_rejected() {
        let mut data = p_term_data(3, 1e-3, 3);
        data.energies.push(nd::Array2::eye(2));
        let config = ProjectionConfig::new(parse_termsymbol("3P").unwrap());
        assert!(matches!(
            ModelProjection::new(data, config),
            Err(AngmomError::Shape { .. }),
        ));
    }

    #[test]
    fn missing_spin_is_an_error() {
        let data = p_term_data(3, 1e-3, 3);
        let config = ProjectionConfig::new(parse_termsymbol("1P").unwrap());
        let proj = ModelProjection::new(data, config).unwrap();
        assert!(proj.evaluate().is_err());
    }
}
