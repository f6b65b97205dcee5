//! Uniform selection of variables by reference, name, or named group.
//!
//! Read/write verbs accept anything convertible into a [`Selector`].
//! Resolution is lossy by design: names that do not exist are logged and
//! omitted, so a request over a mixed list still serves the valid part.

use itertools::Itertools;

use crate::model::Model;

/// Structurally defined variable groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    States,
    Derivatives,
    Inputs,
    Outputs,
    Parameters,
    /// Every distinct value reference, in document order.
    All,
    None,
}

/// A set of variables to operate on.
#[derive(Debug, Clone, Default)]
pub enum Selector {
    #[default]
    None,
    Reference(u32),
    References(Vec<u32>),
    Name(String),
    Names(Vec<String>),
    Group(Group),
}

impl From<u32> for Selector {
    fn from(vr: u32) -> Self {
        Selector::Reference(vr)
    }
}

impl From<Vec<u32>> for Selector {
    fn from(vrs: Vec<u32>) -> Self {
        Selector::References(vrs)
    }
}

impl From<&[u32]> for Selector {
    fn from(vrs: &[u32]) -> Self {
        Selector::References(vrs.to_vec())
    }
}

impl From<&str> for Selector {
    fn from(name: &str) -> Self {
        Selector::Name(name.to_owned())
    }
}

impl From<String> for Selector {
    fn from(name: String) -> Self {
        Selector::Name(name)
    }
}

impl From<Vec<String>> for Selector {
    fn from(names: Vec<String>) -> Self {
        Selector::Names(names)
    }
}

impl From<&[&str]> for Selector {
    fn from(names: &[&str]) -> Self {
        Selector::Names(names.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Group> for Selector {
    fn from(group: Group) -> Self {
        Selector::Group(group)
    }
}

impl Selector {
    /// Resolve to an ordered value-reference list. Explicit lists keep
    /// their order and duplicates; unknown names are warned about and
    /// dropped, so the result may be shorter than the request.
    pub fn resolve(&self, model: &Model) -> Vec<u32> {
        match self {
            Selector::None => Vec::new(),
            Selector::Reference(vr) => vec![*vr],
            Selector::References(vrs) => vrs.clone(),
            Selector::Name(name) => resolve_names(model, std::slice::from_ref(name)),
            Selector::Names(names) => resolve_names(model, names),
            Selector::Group(group) => match group {
                Group::States => model.state_refs().to_vec(),
                Group::Derivatives => model.derivative_refs().to_vec(),
                Group::Inputs => model.input_refs().to_vec(),
                Group::Outputs => model.output_refs().to_vec(),
                Group::Parameters => model.parameter_refs().to_vec(),
                Group::All => model
                    .variables()
                    .iter()
                    .map(|v| v.value_reference)
                    .unique()
                    .collect(),
                Group::None => Vec::new(),
            },
        }
    }
}

fn resolve_names<S: AsRef<str>>(model: &Model, names: &[S]) -> Vec<u32> {
    names
        .iter()
        .filter_map(|name| {
            let name = name.as_ref();
            match model.variable_by_name(name) {
                Some(v) => Some(v.value_reference),
                None => {
                    log::warn!("no variable named `{name}` in model `{}`", model.name());
                    None
                }
            }
        })
        .collect()
}

/// The declaring variable name of each reference, for diagnostics and
/// result labelling.
pub fn names_for(model: &Model, vrs: &[u32]) -> Vec<String> {
    vrs.iter().map(|&vr| model.name_of(vr).to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"
        <fmiModelDescription fmiVersion="2.0" modelName="Sel" guid="{sel-1}">
            <ModelVariables>
                <ScalarVariable name="x" valueReference="0"><Real start="1.0"/></ScalarVariable>
                <ScalarVariable name="der(x)" valueReference="1"><Real derivative="1"/></ScalarVariable>
                <ScalarVariable name="u" valueReference="4" causality="input"><Real start="0.0"/></ScalarVariable>
                <ScalarVariable name="u_alias" valueReference="4"><Real/></ScalarVariable>
                <ScalarVariable name="y" valueReference="5" causality="output"><Real/></ScalarVariable>
            </ModelVariables>
        </fmiModelDescription>"#;

    fn model() -> Model {
        Model::new(fmu_schema::from_str(XML).unwrap())
    }

    #[test]
    fn explicit_lists_keep_order_and_duplicates() {
        let m = model();
        let sel: Selector = vec![5u32, 0, 5].into();
        assert_eq!(sel.resolve(&m), vec![5, 0, 5]);
    }

    #[test]
    fn unknown_names_are_dropped_not_fatal() {
        let m = model();
        let sel: Selector = vec!["y".to_string(), "nope".to_string(), "x".to_string()].into();
        assert_eq!(sel.resolve(&m), vec![5, 0]);
    }

    #[test]
    fn groups_resolve_structurally() {
        let m = model();
        assert_eq!(Selector::from(Group::States).resolve(&m), vec![0]);
        assert_eq!(Selector::from(Group::Derivatives).resolve(&m), vec![1]);
        assert_eq!(Selector::from(Group::Inputs).resolve(&m), vec![4]);
        assert_eq!(Selector::from(Group::Outputs).resolve(&m), vec![5]);
        assert!(Selector::from(Group::Parameters).resolve(&m).is_empty());
    }

    #[test]
    fn all_dedups_aliased_references() {
        let m = model();
        assert_eq!(Selector::from(Group::All).resolve(&m), vec![0, 1, 4, 5]);
    }

    #[test]
    fn none_is_empty() {
        let m = model();
        assert!(Selector::default().resolve(&m).is_empty());
        assert!(Selector::from(Group::None).resolve(&m).is_empty());
    }

    #[test]
    fn names_round_trip_through_references() {
        let m = model();
        assert_eq!(names_for(&m, &[4, 5]), vec!["u".to_owned(), "y".to_owned()]);
        // The full reverse lookup still sees both names of the alias pair.
        assert_eq!(m.names_of(4), vec!["u", "u_alias"]);
    }
}
