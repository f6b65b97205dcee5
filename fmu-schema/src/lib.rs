//! Data model for the FMI 2.0 `modelDescription.xml` document.
//!
//! This crate only describes the document: attribute parsing, element
//! nesting and the defaults mandated by the standard. Derived indices
//! (value-reference maps, dependency graphs, state/derivative pairing)
//! live in the importing crate, where they can be built once against the
//! fully parsed table.

use std::{path::Path, str::FromStr};

use serde::{de, Deserialize, Deserializer};
use thiserror::Error;

pub mod model_description;
pub mod structure;
pub mod variable;

pub use model_description::{
    BaseUnit, CoSimulation, DefaultExperiment, LogCategory, ModelDescription, ModelExchange,
    SimpleType, TypedDefault, Unit,
};
pub use structure::{DependencyKind, ModelStructure, Unknown};
pub use variable::{Causality, Initial, ScalarVariable, TypedElement, Variability};

#[derive(Debug, Error)]
pub enum Error {
    #[error("error parsing modelDescription: {0}")]
    XmlParse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse a full model description from an XML string.
///
/// The `fmiVersion`, `modelName` and `guid` attributes are mandatory;
/// their absence is a parse error, not a default.
pub fn from_str(xml: &str) -> Result<ModelDescription, Error> {
    serde_xml_rs::from_str(xml).map_err(|e| Error::XmlParse(e.to_string()))
}

/// Parse a model description from a file on disk.
pub fn from_path(path: impl AsRef<Path>) -> Result<ModelDescription, Error> {
    let xml = std::fs::read_to_string(path)?;
    from_str(&xml)
}

/// Parse an XML attribute through its `FromStr` impl.
pub(crate) fn t_from_str<'de, T, D>(deser: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let s = String::deserialize(deser)?;
    T::from_str(&s).map_err(de::Error::custom)
}

/// Like [`t_from_str`], but for optional attributes.
pub(crate) fn opt_from_str<'de, T, D>(deser: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match Option::<String>::deserialize(deser)? {
        Some(s) => T::from_str(&s).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// Space-separated list attribute that may be absent entirely.
///
/// The distinction matters for `ModelStructure` dependencies: a missing
/// attribute means "depends on everything", an empty one means "depends
/// on nothing".
pub(crate) fn opt_vec_from_str<'de, T, D>(deser: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match Option::<String>::deserialize(deser)? {
        Some(s) => s
            .split_whitespace()
            .map(|i| T::from_str(i).map_err(de::Error::custom))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        None => Ok(None),
    }
}
