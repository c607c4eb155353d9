//! Physical constants and unit conversion factors.
//!
//! Quantities without an explicit unit are in Hartree atomic units.

// energy [cm^-1 / Hartree]
pub const HARTREE2INVCM: f64 = 219474.6;

// magnetic field [mT / atomic unit]
pub const AU2MT: f64 = 2.35051756758e8;

// free electron g-factor [dimensionless]
pub const G_E: f64 = 2.002319;

// Bohr magneton [atomic units]
pub const MU_B: f64 = 0.5;

// Bohr radius [m]
pub const BOHR_RADIUS: f64 = 5.29177210903e-11;

// speed of light [atomic units]
pub const C0: f64 = 137.036;

// Avogadro constant [1 / mol]
pub const AVOGADRO: f64 = 6.02214076e23;

// Boltzmann constant [Hartree / K]
pub const K_B: f64 = 3.166811563e-6;
