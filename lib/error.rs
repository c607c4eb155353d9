//! Error type shared by all fallible operations in the crate.

use num_complex::Complex64 as C64;
use thiserror::Error;

/// Everything that can go wrong while building angular-momentum spaces,
/// transforming term bases, or fitting model Hamiltonians.
#[derive(Debug, Error)]
pub enum AngmomError {
    /// A string could not be read as a term, level, or quantum-number list.
    #[error("invalid term symbol '{0}': expected a form like {1}")]
    Format(String, &'static str),

    /// A label is not part of the quantum-number map.
    #[error("angular momentum label '{0}' is undefined")]
    UndefinedLabel(char),

    /// A label appears more than once in a coupling tree.
    #[error("angular momentum label '{0}' is used more than once in the coupling tree")]
    DuplicateLabel(char),

    /// A [`Level`][crate::term::Level] was requested for a space without a
    /// top-level `J` node.
    #[error("level needs to include J-coupling")]
    MissingJCoupling,

    /// The non-vanishing Wigner-Eckart reduced elements of a block disagree.
    #[error("non-zero Wigner-Eckart reduced elements are not equal: {0:?}")]
    WignerEckart(Vec<C64>),

    /// The fitted relative term phases leave an imaginary part in the
    /// reduced spin-orbit elements.
    #[error("large imaginary residual in AMFI integrals: {0:e}")]
    ImaginaryResidual(f64),

    /// An operator subspace is too small to hold the requested irrep.
    #[error("cannot extract {needed} states of L = {j} from a {available}-dimensional space")]
    Subspace { j: f64, needed: usize, available: usize },

    /// Arrays with incompatible shapes were combined.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    Shape { expected: Vec<usize>, got: Vec<usize> },

    /// A parameter needed to rebuild a Hamiltonian is absent.
    #[error("missing model parameter {0}")]
    MissingParameter(String),

    /// An argument is outside the domain of the requested operation.
    #[error("{0}")]
    Domain(String),

    /// Malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("linear algebra error: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

impl AngmomError {
    pub(crate) fn domain<S>(msg: S) -> Self
    where S: Into<String>
    {
        Self::Domain(msg.into())
    }

    pub(crate) fn shape(expected: &[usize], got: &[usize]) -> Self {
        Self::Shape { expected: expected.to_vec(), got: got.to_vec() }
    }
}

pub type AngmomResult<T> = Result<T, AngmomError>;
