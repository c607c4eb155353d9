//! Magnetic moment, Zeeman interaction, EPR g-tensors and thermal
//! magnetic response.
//!
//! All operators are Cartesian `(3, n, n)` arrays in atomic units. Fields
//! are given in mT, temperatures in K.

use std::f64::consts::PI;
use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use crate::{
    constants::{ AU2MT, AVOGADRO, BOHR_RADIUS, C0, G_E, K_B, MU_B },
    error::{ AngmomError, AngmomResult },
    linalg::{ block_diag, contract3, submatrix, submatrix3, unitary_transform3 },
};

/// Consecutive eigenvalues closer than this are taken to be degenerate.
pub const DEGENERACY_TOL: f64 = 1e-8;

/// Field step (mT) of the central differences behind the differential
/// susceptibility.
pub const FIELD_STEP_MT: f64 = 0.1;

fn check_pair(spin: &nd::Array3<C64>, angm: &nd::Array3<C64>) -> AngmomResult<()> {
    let (c, n, m) = spin.dim();
    if c != 3 || n != m {
        return Err(AngmomError::shape(&[3, n, n], spin.shape()));
    }
    if angm.dim() != spin.dim() {
        return Err(AngmomError::shape(spin.shape(), angm.shape()));
    }
    Ok(())
}

fn check_system(
    hamiltonian: &nd::Array2<C64>,
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
) -> AngmomResult<()>
{
    check_pair(spin, angm)?;
    let n = spin.shape()[1];
    if hamiltonian.dim() != (n, n) {
        return Err(AngmomError::shape(&[n, n], hamiltonian.shape()));
    }
    Ok(())
}

fn check_temperature(temp: f64) -> AngmomResult<()> {
    if temp > 0.0 && temp.is_finite() {
        Ok(())
    } else {
        Err(AngmomError::domain(format!("temperature must be positive, got {} K", temp)))
    }
}

/// Magnetic moment operator `μ_B (L + g_e S)`.
pub fn magmom(spin: &nd::Array3<C64>, angm: &nd::Array3<C64>)
    -> AngmomResult<nd::Array3<C64>>
{
    check_pair(spin, angm)?;
    Ok((angm + &spin.mapv(|z| z * G_E)).mapv(|z| z * MU_B))
}

/// Zeeman Hamiltonian for a magnetic field given in mT.
pub fn zeeman_hamiltonian(
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
    field_mT: [f64; 3],
) -> AngmomResult<nd::Array2<C64>>
{
    let field = field_mT.map(|b| C64::from(b / AU2MT));
    Ok(contract3(&field, &magmom(spin, angm)?))
}

/* G-tensors ******************************************************************/

/// Complex G-tensor `(2 / μ_B) Σ_uv μ_k[u, v] μ_l[v, u]` of a (pseudo-spin)
/// block, with `μ` from [`magmom`].
pub fn g_tensor(spin: &nd::Array3<C64>, angm: &nd::Array3<C64>)
    -> AngmomResult<nd::Array2<C64>>
{
    let magm = magmom(spin, angm)?;
    let G
        = nd::Array2::from_shape_fn((3, 3), |(k, l)| {
            let mk = magm.index_axis(nd::Axis(0), k);
            let ml = magm.index_axis(nd::Axis(0), l);
            mk.iter().zip(ml.t().iter()).map(|(a, b)| a * b).sum::<C64>() * (2.0 / MU_B)
        });
    Ok(G)
}

/// EPR G-tensor `2 Re Σ_ij μ_k[i, j] μ_l[j, i]` of a (pseudo-spin) block,
/// with `μ` in units of `μ_B`.
pub fn eprg_tensor(spin: &nd::Array3<C64>, angm: &nd::Array3<C64>)
    -> AngmomResult<nd::Array2<f64>>
{
    Ok(g_tensor(spin, angm)?.mapv(|z| z.re / MU_B))
}

/// Principal values (ascending) and axes (columns) of a G-tensor.
pub fn eprg_principal(G: &nd::Array2<f64>) -> AngmomResult<(nd::Array1<f64>, nd::Array2<f64>)> {
    if G.dim() != (3, 3) {
        return Err(AngmomError::shape(&[3, 3], G.shape()));
    }
    Ok(G.to_owned().eigh_into(UPLO::Lower)?)
}

/// Split an ascending spectrum into runs of degenerate levels.
///
/// A run is broken wherever two consecutive eigenvalues differ by more than
/// `tol`, so a cluster is never cut in two by where it sits on the energy
/// axis.
pub fn degenerate_blocks(energies: &[f64], tol: f64) -> Vec<Vec<usize>> {
    let mut blocks: Vec<Vec<usize>> = Vec::new();
    for (k, e) in energies.iter().enumerate() {
        if k > 0 && (e - energies[k - 1]).abs() <= tol {
            if let Some(block) = blocks.last_mut() {
                block.push(k);
                continue;
            }
        }
        blocks.push(vec![k]);
    }
    blocks
}

/// G-tensors of every degenerate eigenspace of `hamiltonian`, in order of
/// ascending energy.
pub fn eprg_tensors(
    hamiltonian: &nd::Array2<C64>,
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
) -> AngmomResult<Vec<nd::Array2<f64>>>
{
    check_system(hamiltonian, spin, angm)?;
    let (E, V) = hamiltonian.to_owned().eigh_into(UPLO::Lower)?;
    let spin = unitary_transform3(spin, &V);
    let angm = unitary_transform3(angm, &V);
    degenerate_blocks(&E.to_vec(), DEGENERACY_TOL).into_iter()
        .map(|idx| {
            eprg_tensor(&submatrix3(&spin, &idx, &idx), &submatrix3(&angm, &idx, &idx))
        })
        .collect()
}

/// Eigenvectors that split degenerate (e.g. Kramers) levels along z.
///
/// `energies` must be ascending and `spin`, `angm` given in their
/// eigenbasis. Without a field, each degenerate block is rotated into
/// eigenstates of `S_z + L_z`; with a field (mT) along z, the full
/// `diag(energies) + H_Z` is diagonalised instead.
pub fn perturb_doublets(
    energies: &[f64],
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
    field_mT: Option<f64>,
) -> AngmomResult<nd::Array2<C64>>
{
    check_pair(spin, angm)?;
    let n = energies.len();
    if spin.shape()[1] != n {
        return Err(AngmomError::shape(&[3, n, n], spin.shape()));
    }
    if energies.windows(2).any(|w| w[1] < w[0]) {
        return Err(AngmomError::domain("energies must be in ascending order"));
    }
    match field_mT {
        Some(b) => {
            let diag: nd::Array1<C64> = energies.iter().map(|e| C64::from(*e)).collect();
            let H = nd::Array2::from_diag(&diag) + zeeman_hamiltonian(spin, angm, [0.0, 0.0, b])?;
            let (_, V) = H.eigh_into(UPLO::Lower)?;
            Ok(V)
        },
        None => {
            let jz = &spin.index_axis(nd::Axis(0), 2) + &angm.index_axis(nd::Axis(0), 2);
            let blocks: Vec<nd::Array2<C64>>
                = degenerate_blocks(energies, DEGENERACY_TOL).into_iter()
                .map(|idx| Ok(submatrix(&jz, &idx, &idx).eigh_into(UPLO::Lower)?.1))
                .collect::<AngmomResult<_>>()?;
            Ok(block_diag(&blocks))
        },
    }
}

/* Thermal response ***********************************************************/

// spectrum of a Hamiltonian in a static field and the diagonal of the
// magnetic moment in its eigenbasis; enough to evaluate the magnetisation at
// any temperature
#[derive(Clone, Debug)]
struct ThermalEnsemble {
    // relative to the lowest level
    energies: nd::Array1<f64>,
    // (3, n)
    moments: nd::Array2<f64>,
}

impl ThermalEnsemble {
    fn new(
        hamiltonian: &nd::Array2<C64>,
        spin: &nd::Array3<C64>,
        angm: &nd::Array3<C64>,
        field_mT: [f64; 3],
    ) -> AngmomResult<Self>
    {
        let H = hamiltonian + &zeeman_hamiltonian(spin, angm, field_mT)?;
        let (E, V) = H.eigh_into(UPLO::Lower)?;
        let e0 = E.first().copied().unwrap_or(0.0);
        let mu = unitary_transform3(&magmom(spin, angm)?, &V);
        let moments = nd::Array2::from_shape_fn((3, E.len()), |(c, k)| mu[[c, k, k]].re);
        Ok(Self { energies: E.mapv(|e| e - e0), moments })
    }

    // molar magnetisation in Hartree / (mT mol)
    fn magnetisation(&self, temp: f64) -> [f64; 3] {
        let beta = 1.0 / (K_B * temp);
        let pop = self.energies.mapv(|e| (-beta * e).exp());
        let z = pop.sum();
        std::array::from_fn(|c| -AVOGADRO * self.moments.row(c).dot(&pop) / (z * AU2MT))
    }
}

/// Molar magnetisation (Hartree / (mT mol)) at temperature `temp` under a
/// field (mT), as a Boltzmann average over the eigenstates of
/// `hamiltonian + H_Z`.
pub fn molecular_magnetisation(
    temp: f64,
    hamiltonian: &nd::Array2<C64>,
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
    field_mT: [f64; 3],
) -> AngmomResult<[f64; 3]>
{
    check_system(hamiltonian, spin, angm)?;
    check_temperature(temp)?;
    Ok(ThermalEnsemble::new(hamiltonian, spin, angm, field_mT)?.magnetisation(temp))
}

// ensembles at the fields that fix the susceptibility tensor: one per axis
// for the conventional tensor, a (+, -) pair per axis around (0, 0, B) for
// the differential one
#[derive(Clone, Debug)]
struct ChiStencil {
    field_mT: f64,
    differential: bool,
    ensembles: Vec<ThermalEnsemble>,
}

impl ChiStencil {
    fn new(
        hamiltonian: &nd::Array2<C64>,
        spin: &nd::Array3<C64>,
        angm: &nd::Array3<C64>,
        field_mT: f64,
        differential: bool,
    ) -> AngmomResult<Self>
    {
        check_system(hamiltonian, spin, angm)?;
        let fields: Vec<[f64; 3]>
            = if differential {
                (0..3)
                    .flat_map(|c| {
                        [1.0, -1.0].map(|sign| {
                            let mut b = [0.0, 0.0, field_mT];
                            b[c] += sign * FIELD_STEP_MT;
                            b
                        })
                    })
                    .collect()
            } else {
                if field_mT == 0.0 {
                    return Err(AngmomError::domain(
                        "conventional susceptibility needs a non-zero field"
                    ));
                }
                (0..3)
                    .map(|c| {
                        let mut b = [0.0; 3];
                        b[c] = field_mT;
                        b
                    })
                    .collect()
            };
        let ensembles: Vec<ThermalEnsemble>
            = fields.into_iter()
            .map(|b| ThermalEnsemble::new(hamiltonian, spin, angm, b))
            .collect::<AngmomResult<_>>()?;
        Ok(Self { field_mT, differential, ensembles })
    }

    fn tensor(&self, temp: f64) -> AngmomResult<nd::Array2<f64>> {
        check_temperature(temp)?;
        let columns: Vec<[f64; 3]>
            = if self.differential {
                self.ensembles.chunks(2)
                    .map(|pair| {
                        let up = pair[0].magnetisation(temp);
                        let down = pair[1].magnetisation(temp);
                        std::array::from_fn(|m| (up[m] - down[m]) / (2.0 * FIELD_STEP_MT))
                    })
                    .collect()
            } else {
                self.ensembles.iter()
                    .map(|ens| ens.magnetisation(temp).map(|m| m / self.field_mT))
                    .collect()
            };
        // μ0 = 4π / c² in atomic units, result in cm³ / mol
        let mu0 = 4.0 * PI / C0.powi(2);
        let scale = mu0 * (BOHR_RADIUS * 100.0).powi(3) * AU2MT.powi(2) / (4.0 * PI);
        Ok(nd::Array2::from_shape_fn((3, 3), |(m, c)| scale * columns[c][m]))
    }
}

/// Molar susceptibility tensor (cm³ / mol) at temperature `temp`.
///
/// The conventional tensor has column `c` equal to `μ0 M(B e_c) / B`. The
/// differential tensor is `μ0 ∂M_m / ∂B_c` at `(0, 0, B)`, taken by central
/// differences with step [`FIELD_STEP_MT`].
pub fn susceptibility_tensor(
    temp: f64,
    hamiltonian: &nd::Array2<C64>,
    spin: &nd::Array3<C64>,
    angm: &nd::Array3<C64>,
    field_mT: f64,
    differential: bool,
) -> AngmomResult<nd::Array2<f64>>
{
    ChiStencil::new(hamiltonian, spin, angm, field_mT, differential)?.tensor(temp)
}

/// Susceptibility at one temperature.
#[derive(Clone, Debug, PartialEq)]
pub enum Susceptibility {
    /// Trace of the tensor over 3.
    Iso(f64),
    Tensor(nd::Array2<f64>),
}

/// Temperature-dependent molar susceptibility.
#[derive(Clone, Debug)]
pub struct MagneticSusceptibility {
    /// Temperatures in K.
    pub temperatures: Vec<f64>,
    /// Field in mT.
    pub field_mT: f64,
    /// Use `∂M/∂B` instead of `M/B`.
    pub differential: bool,
    /// Report the isotropic average instead of the full tensor.
    pub iso: bool,
    /// Multiply by the temperature.
    pub chi_T: bool,
}

impl MagneticSusceptibility {
    /// Isotropic conventional susceptibility at `field_mT`.
    pub fn new(temperatures: Vec<f64>, field_mT: f64) -> Self {
        Self { temperatures, field_mT, differential: false, iso: true, chi_T: false }
    }

    pub fn differential(mut self, differential: bool) -> Self {
        self.differential = differential;
        self
    }

    pub fn iso(mut self, iso: bool) -> Self {
        self.iso = iso;
        self
    }

    pub fn chi_T(mut self, chi_T: bool) -> Self {
        self.chi_T = chi_T;
        self
    }

    /// Susceptibility at every temperature, paired with the temperature.
    ///
    /// Every Hamiltonian is diagonalised once for all temperatures.
    pub fn evaluate(
        &self,
        hamiltonian: &nd::Array2<C64>,
        spin: &nd::Array3<C64>,
        angm: &nd::Array3<C64>,
    ) -> AngmomResult<Vec<(f64, Susceptibility)>>
    {
        let stencil
            = ChiStencil::new(hamiltonian, spin, angm, self.field_mT, self.differential)?;
        self.temperatures.iter()
            .map(|&temp| {
                let factor = if self.chi_T { temp } else { 1.0 };
                let chi = stencil.tensor(temp)?.mapv(|x| x * factor);
                let value
                    = if self.iso {
                        Susceptibility::Iso(chi.diag().sum() / 3.0)
                    } else {
                        Susceptibility::Tensor(chi)
                    };
                Ok((temp, value))
            })
            .collect()
    }
}
