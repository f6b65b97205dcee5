//! The `<fmiModelDescription>` root element and its non-variable children.

use serde::Deserialize;

use crate::{opt_from_str, structure::ModelStructure, t_from_str, variable::ScalarVariable};

/// Capability flags of the Model Exchange interface.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelExchange {
    /// Short class name according to C syntax; names the shared library.
    pub model_identifier: String,

    #[serde(default, deserialize_with = "t_from_str")]
    pub needs_execution_tool: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub completed_integrator_step_not_needed: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub can_be_instantiated_only_once_per_process: bool,

    #[serde(default, deserialize_with = "t_from_str", rename = "canGetAndSetFMUstate")]
    pub can_get_and_set_fmu_state: bool,

    #[serde(default, deserialize_with = "t_from_str", rename = "canSerializeFMUstate")]
    pub can_serialize_fmu_state: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub provides_directional_derivative: bool,
}

/// Capability flags of the Co-Simulation interface.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoSimulation {
    pub model_identifier: String,

    #[serde(default, deserialize_with = "t_from_str")]
    pub needs_execution_tool: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub can_handle_variable_communication_step_size: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub can_interpolate_inputs: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub max_output_derivative_order: u32,

    #[serde(default, deserialize_with = "t_from_str")]
    pub can_run_asynchronuously: bool,

    #[serde(default, deserialize_with = "t_from_str", rename = "canGetAndSetFMUstate")]
    pub can_get_and_set_fmu_state: bool,

    #[serde(default, deserialize_with = "t_from_str", rename = "canSerializeFMUstate")]
    pub can_serialize_fmu_state: bool,

    #[serde(default, deserialize_with = "t_from_str")]
    pub provides_directional_derivative: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultExperiment {
    #[serde(default, deserialize_with = "opt_from_str")]
    pub start_time: Option<f64>,

    #[serde(default, deserialize_with = "opt_from_str")]
    pub stop_time: Option<f64>,

    #[serde(default, deserialize_with = "opt_from_str")]
    pub tolerance: Option<f64>,

    #[serde(default, deserialize_with = "opt_from_str")]
    pub step_size: Option<f64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LogCategory {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogCategories {
    #[serde(default, rename = "Category")]
    pub categories: Vec<LogCategory>,
}

/// Conversion of a unit into SI base units: `si = factor * unit + offset`
/// with the listed base exponents.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BaseUnit {
    #[serde(default, deserialize_with = "t_from_str")]
    pub kg: i32,
    #[serde(default, deserialize_with = "t_from_str")]
    pub m: i32,
    #[serde(default, deserialize_with = "t_from_str")]
    pub s: i32,
    #[serde(default, deserialize_with = "t_from_str", rename = "A")]
    pub ampere: i32,
    #[serde(default, deserialize_with = "t_from_str", rename = "K")]
    pub kelvin: i32,
    #[serde(default, deserialize_with = "t_from_str")]
    pub mol: i32,
    #[serde(default, deserialize_with = "t_from_str")]
    pub cd: i32,
    #[serde(default, deserialize_with = "t_from_str")]
    pub rad: i32,

    #[serde(default = "one", deserialize_with = "t_from_str")]
    pub factor: f64,

    #[serde(default, deserialize_with = "t_from_str")]
    pub offset: f64,
}

fn one() -> f64 {
    1.0
}

#[derive(Clone, Debug, Deserialize)]
pub struct Unit {
    pub name: String,

    #[serde(default, rename = "BaseUnit")]
    pub base_unit: Option<BaseUnit>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UnitDefinitions {
    #[serde(default, rename = "Unit")]
    pub units: Vec<Unit>,
}

/// Attribute defaults a `<SimpleType>` provides to variables that declare it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub enum TypedDefault {
    #[serde(rename_all = "camelCase")]
    Real {
        #[serde(default)]
        unit: Option<String>,
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<f64>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<f64>,
        #[serde(default, deserialize_with = "opt_from_str")]
        nominal: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Integer {
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<i32>,
    },
    Boolean {},
    String {},
    #[serde(rename_all = "camelCase")]
    Enumeration {
        #[serde(default, deserialize_with = "opt_from_str")]
        min: Option<i32>,
        #[serde(default, deserialize_with = "opt_from_str")]
        max: Option<i32>,
    },
}

/// A named, reusable type declaration under `<TypeDefinitions>`.
#[derive(Clone, Debug, Deserialize)]
pub struct SimpleType {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(rename = "$value")]
    pub elem: TypedDefault,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TypeDefinitions {
    #[serde(default, rename = "SimpleType")]
    pub types: Vec<SimpleType>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelVariables {
    #[serde(default, rename = "ScalarVariable")]
    pub variables: Vec<ScalarVariable>,
}

/// The parsed `modelDescription.xml` document.
///
/// `fmi_version`, `model_name` and `guid` have no defaults on purpose:
/// a document missing any of them fails to parse.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescription {
    pub fmi_version: String,

    pub model_name: String,

    /// Fingerprint tying this document to the compiled binary; passed
    /// verbatim to the instantiate entry point.
    pub guid: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub generation_tool: Option<String>,

    #[serde(default)]
    pub generation_date_and_time: Option<String>,

    #[serde(default = "default_naming_convention")]
    pub variable_naming_convention: String,

    #[serde(default, deserialize_with = "t_from_str")]
    pub number_of_event_indicators: u32,

    #[serde(default, rename = "ModelExchange")]
    pub model_exchange: Option<ModelExchange>,

    #[serde(default, rename = "CoSimulation")]
    pub co_simulation: Option<CoSimulation>,

    #[serde(default, rename = "LogCategories")]
    pub log_categories: Option<LogCategories>,

    #[serde(default, rename = "DefaultExperiment")]
    pub default_experiment: Option<DefaultExperiment>,

    #[serde(default, rename = "UnitDefinitions")]
    pub unit_definitions: Option<UnitDefinitions>,

    #[serde(default, rename = "TypeDefinitions")]
    pub type_definitions: Option<TypeDefinitions>,

    #[serde(default, rename = "ModelVariables")]
    pub model_variables: ModelVariables,

    #[serde(default, rename = "ModelStructure")]
    pub model_structure: ModelStructure,
}

fn default_naming_convention() -> String {
    "flat".to_string()
}

impl ModelDescription {
    /// Variables in document order.
    pub fn variables(&self) -> &[ScalarVariable] {
        &self.model_variables.variables
    }

    /// Number of continuous states, given by the Derivatives unknown list.
    pub fn num_states(&self) -> usize {
        self.model_structure.derivatives.unknowns.len()
    }

    pub fn num_event_indicators(&self) -> usize {
        self.number_of_event_indicators as usize
    }

    pub fn log_category_names(&self) -> Vec<&str> {
        self.log_categories
            .as_ref()
            .map(|lc| lc.categories.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Look up a named simple type declared under `<TypeDefinitions>`.
    pub fn simple_type(&self, name: &str) -> Option<&SimpleType> {
        self.type_definitions
            .as_ref()
            .and_then(|td| td.types.iter().find(|t| t.name == name))
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.unit_definitions
            .as_ref()
            .and_then(|ud| ud.units.iter().find(|u| u.name == name))
    }
}
