//! TOML configuration of a model projection.
//!
//! ```toml
//! model_space = "6H15/2"
//! k_max = 6
//! theta = true
//! iso_soc = true
//! time_reversal_symm = "even"
//! diag = true
//! verbose = false
//! flip_phase = ["6H"]
//! quax = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
//!
//! [coupling]
//! J = ["L", "S"]
//!
//! [terms]
//! cf = [["J"]]
//!
//! [ion]
//! n_electrons = 9
//! ```
//!
//! Only `model_space` is required. The `[ion]` table either gives explicit
//! operator equivalent factors per rank (`theta_l`, `theta_j`) or the number
//! of f electrons of a free ion whose ground level is the model space.

use std::ops::Deref;
use indexmap::IndexMap;
use ndarray as nd;
use toml::{ Table, Value };
use crate::{
    error::{ AngmomError, AngmomResult },
    hamiltonian::{ Ion, SpinHamiltonianParams, TermKind, TimeReversal },
    projection::ProjectionConfig,
    symbol::Symbol,
    term::{ parse_termsymbol, Term, TermSymbol },
};

fn err<S>(msg: S) -> AngmomError
where S: Into<String>
{
    AngmomError::Config(msg.into())
}

fn get_bool(table: &Table, key: &str, default: bool) -> AngmomResult<bool> {
    match table.get(key) {
        None => Ok(default),
        Some(Value::Boolean(b)) => Ok(*b),
        Some(_) => Err(err(format!("'{}' must be a boolean", key))),
    }
}

fn get_usize(table: &Table, key: &str, default: usize) -> AngmomResult<usize> {
    match table.get(key) {
        None => Ok(default),
        Some(Value::Integer(i)) if *i >= 0 => Ok(*i as usize),
        Some(_) => Err(err(format!("'{}' must be a non-negative integer", key))),
    }
}

fn as_str<'a>(value: &'a Value, what: &str) -> AngmomResult<&'a str> {
    value.as_str().ok_or_else(|| err(format!("{} must be a string", what)))
}

fn as_array<'a>(value: &'a Value, what: &str) -> AngmomResult<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| err(format!("{} must be an array", what)))
}

fn as_f64(value: &Value, what: &str) -> AngmomResult<f64> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Integer(i) => Ok(*i as f64),
        _ => Err(err(format!("{} must be a number", what))),
    }
}

fn as_label(value: &Value, what: &str) -> AngmomResult<char> {
    let s = as_str(value, what)?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(err(format!("{} must be a single-character label, got '{}'", what, s))),
    }
}

fn read_coupling(value: &Value) -> AngmomResult<Vec<(char, char, char)>> {
    let table = value.as_table().ok_or_else(|| err("'coupling' must be a table"))?;
    table.iter()
        .map(|(j, pair)| {
            let j = as_label(&Value::String(j.clone()), "coupled label")?;
            let pair = as_array(pair, "coupling pair")?;
            match pair.as_slice() {
                [j1, j2] => Ok((j, as_label(j1, "coupling label")?, as_label(j2, "coupling label")?)),
                _ => Err(err(format!("coupling of '{}' must list two labels", j))),
            }
        })
        .collect()
}

fn read_terms(value: &Value) -> AngmomResult<IndexMap<TermKind, Vec<Vec<char>>>> {
    let table = value.as_table().ok_or_else(|| err("'terms' must be a table"))?;
    table.iter()
        .map(|(kind, lists)| {
            let kind: TermKind = kind.parse()?;
            let lists
                = as_array(lists, "term operator lists")?.iter()
                .map(|ops| {
                    as_array(ops, "term operators")?.iter()
                        .map(|l| as_label(l, "term operator"))
                        .collect::<AngmomResult<Vec<char>>>()
                })
                .collect::<AngmomResult<Vec<_>>>()?;
            Ok((kind, lists))
        })
        .collect()
}

fn read_theta(value: &Value, what: &str) -> AngmomResult<Vec<f64>> {
    as_array(value, what)?.iter().map(|v| as_f64(v, what)).collect()
}

fn read_ion(value: &Value, model_space: &TermSymbol) -> AngmomResult<Ion> {
    let table = value.as_table().ok_or_else(|| err("'ion' must be a table"))?;
    if let Some(n) = table.get("n_electrons") {
        let n = match n {
            Value::Integer(i) if *i > 0 => *i as usize,
            _ => return Err(err("'n_electrons' must be a positive integer")),
        };
        let TermSymbol::Level(level) = model_space else {
            return Err(err("a free ion needs a level as model space"));
        };
        return Ok(Ion::free_ion(n, level.j(), level.l(), level.s()));
    }
    let mut ion = Ion::new();
    if let Some(theta) = table.get("theta_l") {
        ion = ion.with_theta_l(read_theta(theta, "'theta_l'")?);
    }
    if let Some(theta) = table.get("theta_j") {
        ion = ion.with_theta_j(read_theta(theta, "'theta_j'")?);
    }
    Ok(ion)
}

fn read_quax(value: &Value) -> AngmomResult<nd::Array2<f64>> {
    let rows = as_array(value, "'quax'")?;
    if rows.len() != 3 {
        return Err(err("'quax' must be a 3 x 3 matrix"));
    }
    let mut quax: nd::Array2<f64> = nd::Array2::zeros((3, 3));
    for (i, row) in rows.iter().enumerate() {
        let row = as_array(row, "'quax' row")?;
        if row.len() != 3 {
            return Err(err("'quax' must be a 3 x 3 matrix"));
        }
        for (j, v) in row.iter().enumerate() {
            quax[[i, j]] = as_f64(v, "'quax' element")?;
        }
    }
    Ok(quax)
}

fn read_flip_phase(value: &Value) -> AngmomResult<Vec<Symbol>> {
    as_array(value, "'flip_phase'")?.iter()
        .map(|t| Ok(Term::parse(as_str(t, "flip_phase term")?)?.into_symbol()))
        .collect()
}

/// Projection settings read from TOML.
#[derive(Clone, Debug)]
pub struct ModelConfig(ProjectionConfig);

impl Deref for ModelConfig {
    type Target = ProjectionConfig;

    fn deref(&self) -> &Self::Target { &self.0 }
}

impl From<ModelConfig> for ProjectionConfig {
    fn from(config: ModelConfig) -> Self { config.0 }
}

impl ModelConfig {
    /// Parse a configuration document.
    pub fn from_toml_str(s: &str) -> AngmomResult<Self> {
        let table: Table = s.parse()?;
        Self::from_table(&table)
    }

    /// Read a configuration from an already parsed table.
    pub fn from_table(table: &Table) -> AngmomResult<Self> {
        const KEYS: [&str; 12] = [
            "model_space", "k_max", "theta", "iso_soc", "time_reversal_symm",
            "diag", "verbose", "flip_phase", "quax", "coupling", "terms", "ion",
        ];
        if let Some(key) = table.keys().find(|k| !KEYS.contains(&k.as_str())) {
            return Err(err(format!("unknown key '{}'", key)));
        }
        let model_space
            = table.get("model_space")
            .ok_or_else(|| err("missing 'model_space'"))
            .and_then(|v| as_str(v, "'model_space'"))
            .and_then(parse_termsymbol)?;
        let defaults = SpinHamiltonianParams::default();
        let time_reversal_symm: TimeReversal
            = match table.get("time_reversal_symm") {
                Some(v) => as_str(v, "'time_reversal_symm'")?.parse()?,
                None => defaults.time_reversal_symm,
            };
        let ion
            = table.get("ion")
            .map(|v| read_ion(v, &model_space))
            .transpose()?;
        let terms
            = table.get("terms")
            .map(read_terms)
            .transpose()?
            .unwrap_or_default();
        let hamiltonian = SpinHamiltonianParams {
            k_max: get_usize(table, "k_max", defaults.k_max)?,
            theta: get_bool(table, "theta", defaults.theta)?,
            ion,
            diag: get_bool(table, "diag", defaults.diag)?,
            iso_soc: get_bool(table, "iso_soc", defaults.iso_soc)?,
            time_reversal_symm,
            terms,
        };
        let coupling
            = table.get("coupling")
            .map(read_coupling)
            .transpose()?
            .unwrap_or_default();
        let flip_phase = table.get("flip_phase").map(read_flip_phase).transpose()?;
        let quax = table.get("quax").map(read_quax).transpose()?;
        let verbose = get_bool(table, "verbose", false)?;
        Ok(Self(ProjectionConfig {
            model_space,
            coupling,
            flip_phase,
            quax,
            hamiltonian,
            verbose,
        }))
    }

    pub fn into_inner(self) -> ProjectionConfig { self.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_full_document() {
        let doc = r#"
            model_space = "6H15/2"
            k_max = 4
            theta = true
            flip_phase = ["6H"]
            quax = [[0, 1, 0], [0, 0, 1], [1, 0, 0]]

            [terms]
            cf = [["J"]]

            [ion]
            n_electrons = 9
        "#;
        let config = ModelConfig::from_toml_str(doc).unwrap();
        assert!(matches!(config.model_space, TermSymbol::Level(_)));
        assert_eq!(config.hamiltonian.k_max, 4);
        assert!(config.hamiltonian.theta);
        assert!(config.hamiltonian.diag);
        assert_eq!(config.hamiltonian.terms[&TermKind::Cf], vec![vec!['J']]);
        let theta = config.hamiltonian.ion.as_ref().unwrap().theta_j().unwrap();
        assert!((theta[2] + 2.0 / 315.0).abs() < 1e-9);
        assert_eq!(config.flip_phase.as_ref().unwrap().len(), 1);
        assert_eq!(config.quax.as_ref().unwrap()[[2, 0]], 1.0);
        assert!(!config.verbose);
    }

    #[test]
    fn reads_coupling() {
        let doc = r#"
            model_space = "3P"

            [coupling]
            J = ["L", "S"]
        "#;
        let config = ModelConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.coupling, vec![('J', 'L', 'S')]);
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            "k_max = 2",
            "model_space = \"3P\"\ntime_reversal_symm = \"both\"",
            "model_space = \"3P\"\nunknown = 1",
            "model_space = \"3P\"\ntheta = 1",
            "model_space = \"3P\"\n[terms]\nzee = [[\"L\"]]",
            "model_space = \"3P\"\n[ion]\nn_electrons = 2",
            "model_space = \"3P\"\nquax = [[1, 0], [0, 1]]",
            "model_space = [",
        ];
        for doc in bad {
            assert!(ModelConfig::from_toml_str(doc).is_err(), "{}", doc);
        }
    }
}
