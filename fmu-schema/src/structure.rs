//! The `<ModelStructure>` element: ordered unknowns and their dependencies.

use std::str::FromStr;

use serde::Deserialize;

use crate::{opt_vec_from_str, t_from_str};

/// Kind tag attached to a single dependency of an `<Unknown>` entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    Dependent,
    Constant,
    Fixed,
    Tunable,
    Discrete,
}

impl FromStr for DependencyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dependent" => Ok(Self::Dependent),
            "constant" => Ok(Self::Constant),
            "fixed" => Ok(Self::Fixed),
            "tunable" => Ok(Self::Tunable),
            "discrete" => Ok(Self::Discrete),
            other => Err(format!("invalid dependenciesKind entry '{other}'")),
        }
    }
}

/// One computed unknown: a 1-based index into the variable table plus the
/// set of knowns it depends on.
///
/// `dependencies == None` (attribute absent) means the unknown may depend
/// on everything; `Some(vec![])` (attribute present but empty) declares it
/// depends on nothing. Consumers must preserve that distinction.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unknown {
    #[serde(deserialize_with = "t_from_str")]
    pub index: u32,

    #[serde(default, deserialize_with = "opt_vec_from_str")]
    pub dependencies: Option<Vec<u32>>,

    #[serde(default, deserialize_with = "opt_vec_from_str")]
    pub dependencies_kind: Option<Vec<DependencyKind>>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UnknownList {
    #[serde(default, rename = "Unknown")]
    pub unknowns: Vec<Unknown>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelStructure {
    #[serde(default)]
    pub outputs: UnknownList,

    #[serde(default)]
    pub derivatives: UnknownList,

    #[serde(default)]
    pub initial_unknowns: UnknownList,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_model_structure() {
        let s = r#"
            <ModelStructure>
                <Outputs> <Unknown index="3"/> <Unknown index="4"/> </Outputs>
                <Derivatives>
                    <Unknown index="7" dependencies="5 2" dependenciesKind="dependent fixed"/>
                    <Unknown index="8" dependencies=""/>
                </Derivatives>
                <InitialUnknowns/>
            </ModelStructure>
        "#;
        let ms: ModelStructure = serde_xml_rs::from_str(s).unwrap();
        assert_eq!(ms.outputs.unknowns.len(), 2);
        assert_eq!(ms.outputs.unknowns[0].index, 3);
        // Absent attribute: unconstrained.
        assert_eq!(ms.outputs.unknowns[0].dependencies, None);

        let der = &ms.derivatives.unknowns;
        assert_eq!(der[0].dependencies, Some(vec![5, 2]));
        assert_eq!(
            der[0].dependencies_kind,
            Some(vec![DependencyKind::Dependent, DependencyKind::Fixed])
        );
        // Empty attribute: depends on nothing.
        assert_eq!(der[1].dependencies, Some(vec![]));
        assert!(ms.initial_unknowns.unknowns.is_empty());
    }

    #[test]
    fn invalid_dependencies_kind() {
        let s = r#"<Unknown index="1" dependenciesKind="sometimes"/>"#;
        assert!(serde_xml_rs::from_str::<Unknown>(s).is_err());
    }
}
