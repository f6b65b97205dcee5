//! The `<ScalarVariable>` element and its typed payloads.

use serde::Deserialize;

use crate::{opt_from_str, t_from_str};

/// Defines how the variable participates in the model interface.
///
/// The default, when the attribute is absent, is [`Causality::Local`].
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Causality {
    Parameter,
    CalculatedParameter,
    Input,
    Output,
    #[default]
    Local,
    Independent,
}

impl std::fmt::Display for Causality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Causality::Parameter => "parameter",
            Causality::CalculatedParameter => "calculatedParameter",
            Causality::Input => "input",
            Causality::Output => "output",
            Causality::Local => "local",
            Causality::Independent => "independent",
        };
        f.write_str(s)
    }
}

/// Defines the time instants at which the variable may change its value.
///
/// The default, when the attribute is absent, is [`Variability::Continuous`].
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Variability {
    Constant,
    Fixed,
    Tunable,
    Discrete,
    #[default]
    Continuous,
}

/// Defines how the variable obtains its initial value.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Initial {
    Exact,
    Approx,
    Calculated,
}

/// The typed payload of a scalar variable. Exactly one of these elements
/// is present per `<ScalarVariable>`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub enum TypedElement {
    #[serde(rename_all = "camelCase")]
    Real {
        #[serde(default)]
        declared_type: Option<String>,
        #[serde(default)]
        unit: Option<String>,
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<f64>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<f64>,
        #[serde(default, deserialize_with = "opt_from_str")]
        nominal: Option<f64>,
        #[serde(default, deserialize_with = "opt_from_str")]
        start: Option<f64>,
        /// 1-based table index of the variable this one is the derivative of.
        #[serde(default, deserialize_with = "opt_from_str")]
        derivative: Option<u32>,
        #[serde(default, deserialize_with = "t_from_str")]
        reinit: bool,
    },
    #[serde(rename_all = "camelCase")]
    Integer {
        #[serde(default)]
        declared_type: Option<String>,
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        start: Option<i32>,
    },
    #[serde(rename_all = "camelCase")]
    Boolean {
        #[serde(default)]
        declared_type: Option<String>,
        #[serde(default, deserialize_with = "opt_from_str")]
        start: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    String {
        #[serde(default)]
        declared_type: Option<String>,
        #[serde(default)]
        start: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Enumeration {
        #[serde(default)]
        declared_type: Option<String>,
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        start: Option<i32>,
    },
}

impl TypedElement {
    pub fn declared_type(&self) -> Option<&str> {
        match self {
            TypedElement::Real { declared_type, .. }
            | TypedElement::Integer { declared_type, .. }
            | TypedElement::Boolean { declared_type, .. }
            | TypedElement::String { declared_type, .. }
            | TypedElement::Enumeration { declared_type, .. } => declared_type.as_deref(),
        }
    }

    /// Short tag for diagnostics.
    pub fn base_type(&self) -> &'static str {
        match self {
            TypedElement::Real { .. } => "Real",
            TypedElement::Integer { .. } => "Integer",
            TypedElement::Boolean { .. } => "Boolean",
            TypedElement::String { .. } => "String",
            TypedElement::Enumeration { .. } => "Enumeration",
        }
    }
}

/// One `<ScalarVariable>` row of the model variable table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarVariable {
    /// The full, unique name of the variable.
    pub name: String,

    /// Handle identifying the variable value in the model interface. Not
    /// necessarily unique across the table: several variables of the same
    /// primitive type may alias one reference.
    #[serde(deserialize_with = "t_from_str")]
    pub value_reference: u32,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub causality: Causality,

    #[serde(default)]
    pub variability: Variability,

    /// Absent for most inputs/outputs; the effective policy is then derived
    /// from causality (see the importing crate).
    #[serde(default)]
    pub initial: Option<Initial>,

    #[serde(rename = "$value")]
    pub elem: TypedElement,
}

impl ScalarVariable {
    pub fn is_real(&self) -> bool {
        matches!(self.elem, TypedElement::Real { .. })
    }

    /// The `derivative` attribute of a Real payload, if any.
    pub fn derivative_index(&self) -> Option<u32> {
        match self.elem {
            TypedElement::Real { derivative, .. } => derivative,
            _ => None,
        }
    }

    pub fn real_start(&self) -> Option<f64> {
        match self.elem {
            TypedElement::Real { start, .. } => start,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_scalar_variable() {
        let s = r#"
            <ScalarVariable name="inertia1.J" valueReference="1073741824"
                description="Moment of load inertia" causality="parameter" variability="fixed">
                <Real declaredType="Modelica.SIunits.Inertia" start="1"/>
            </ScalarVariable>
        "#;
        let sv: ScalarVariable = serde_xml_rs::from_str(s).unwrap();
        assert_eq!(sv.name, "inertia1.J");
        assert_eq!(sv.value_reference, 1073741824);
        assert_eq!(sv.description.as_deref(), Some("Moment of load inertia"));
        assert_eq!(sv.causality, Causality::Parameter);
        assert_eq!(sv.variability, Variability::Fixed);
        assert_eq!(sv.initial, None);
        assert_eq!(
            sv.elem,
            TypedElement::Real {
                declared_type: Some("Modelica.SIunits.Inertia".to_string()),
                unit: None,
                min: None,
                max: None,
                nominal: None,
                start: Some(1.0),
                derivative: None,
                reinit: false,
            }
        );
    }

    #[test]
    fn attribute_defaults() {
        let s = r#"<ScalarVariable name="x" valueReference="0"><Real/></ScalarVariable>"#;
        let sv: ScalarVariable = serde_xml_rs::from_str(s).unwrap();
        assert_eq!(sv.causality, Causality::Local);
        assert_eq!(sv.variability, Variability::Continuous);
        assert!(sv.real_start().is_none());
    }

    #[test]
    fn derivative_attribute() {
        let s = r#"
            <ScalarVariable name="der(x)" valueReference="2">
                <Real derivative="5"/>
            </ScalarVariable>
        "#;
        let sv: ScalarVariable = serde_xml_rs::from_str(s).unwrap();
        assert_eq!(sv.derivative_index(), Some(5));
    }

    #[test]
    fn non_real_payloads() {
        let s = r#"<ScalarVariable name="n" valueReference="7" variability="discrete">
            <Integer start="3" min="0"/>
        </ScalarVariable>"#;
        let sv: ScalarVariable = serde_xml_rs::from_str(s).unwrap();
        assert!(!sv.is_real());
        assert_eq!(sv.elem.base_type(), "Integer");

        let s = r#"<ScalarVariable name="on" valueReference="8">
            <Boolean start="true"/>
        </ScalarVariable>"#;
        let sv: ScalarVariable = serde_xml_rs::from_str(s).unwrap();
        assert_eq!(
            sv.elem,
            TypedElement::Boolean {
                declared_type: None,
                start: Some(true)
            }
        );
    }
}
