#![allow(non_snake_case, non_upper_case_globals)]

pub mod error;
pub mod constants;
pub mod spin;
pub mod linalg;
pub mod angmom;
pub mod symbol;
pub mod term;
pub mod stevens;
pub mod crystal_field;
pub mod group;
pub mod wavefunction;
pub mod term_trafo;
pub mod hamiltonian;
pub mod projection;
pub mod magnetism;
pub mod config;

pub use error::{ AngmomError, AngmomResult };
