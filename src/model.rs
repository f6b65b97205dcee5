//! Indexed view over a parsed model description.
//!
//! [`Model`] precomputes the lookups the rest of the crate needs constantly:
//! name and value-reference maps, the ordered state/derivative pairing, the
//! causality groups, and the dependency graph from `<ModelStructure>`.

use std::collections::{HashMap, HashSet};

use fmu_schema::{
    Causality, Initial, ModelDescription, ScalarVariable, TypedElement, Unknown, Variability,
};

/// Effective Real attributes after falling back to the variable's declared
/// `SimpleType`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RealAttributes {
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub nominal: Option<f64>,
}

#[derive(Debug)]
pub struct Model {
    md: ModelDescription,
    by_name: HashMap<String, usize>,
    by_vr: HashMap<u32, usize>,
    /// Continuous states, ordered to match `fmi2GetContinuousStates`.
    states: Vec<u32>,
    /// State derivatives, index-aligned with `states`.
    derivatives: Vec<u32>,
    inputs: Vec<u32>,
    outputs: Vec<u32>,
    parameters: Vec<u32>,
    /// Unknown vr -> knowns it depends on. `None` means the XML declared no
    /// dependency list, which must be read as "may depend on everything".
    deps: HashMap<u32, Option<HashSet<u32>>>,
}

impl Model {
    pub fn new(md: ModelDescription) -> Self {
        let vars = md.variables();

        let mut by_name = HashMap::with_capacity(vars.len());
        let mut by_vr = HashMap::with_capacity(vars.len());
        for (i, v) in vars.iter().enumerate() {
            if by_name.insert(v.name.clone(), i).is_some() {
                log::warn!("duplicate variable name `{}` in model description", v.name);
            }
            // Aliases share a value reference; the first declaration wins.
            by_vr.entry(v.value_reference).or_insert(i);
        }

        let (states, derivatives) = Self::pair_states(&md);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut parameters = Vec::new();
        for v in vars {
            match v.causality {
                Causality::Input => inputs.push(v.value_reference),
                Causality::Output => outputs.push(v.value_reference),
                Causality::Parameter => parameters.push(v.value_reference),
                _ => {}
            }
        }

        let mut deps = HashMap::new();
        Self::index_unknowns(&md, &md.model_structure.outputs.unknowns, &mut deps, true);
        Self::index_unknowns(&md, &md.model_structure.derivatives.unknowns, &mut deps, true);
        Self::index_unknowns(
            &md,
            &md.model_structure.initial_unknowns.unknowns,
            &mut deps,
            false,
        );

        Self {
            md,
            by_name,
            by_vr,
            states,
            derivatives,
            inputs,
            outputs,
            parameters,
            deps,
        }
    }

    /// Pair each derivative variable (via its Real `derivative` attribute,
    /// a 1-based variable index) with the state it differentiates. The
    /// `<Derivatives>` list fixes the ordering; without one, document order
    /// is used.
    fn pair_states(md: &ModelDescription) -> (Vec<u32>, Vec<u32>) {
        let vars = md.variables();
        let structure_order: Vec<usize> = md
            .model_structure
            .derivatives
            .unknowns
            .iter()
            .filter_map(|u| Self::checked_index(md, u.index))
            .collect();
        let scan_order: Vec<usize> = vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.derivative_index().is_some())
            .map(|(i, _)| i)
            .collect();
        let order = if structure_order.is_empty() {
            scan_order
        } else {
            structure_order
        };

        let mut states = Vec::with_capacity(order.len());
        let mut derivatives = Vec::with_capacity(order.len());
        for i in order {
            let dv = &vars[i];
            let Some(state_ix) = dv.derivative_index() else {
                log::warn!(
                    "`{}` is listed under <Derivatives> but carries no derivative attribute",
                    dv.name
                );
                continue;
            };
            match Self::checked_index(md, state_ix) {
                Some(si) => {
                    states.push(vars[si].value_reference);
                    derivatives.push(dv.value_reference);
                }
                None => log::warn!(
                    "derivative `{}` points at out-of-range variable index {state_ix}",
                    dv.name
                ),
            }
        }
        (states, derivatives)
    }

    fn checked_index(md: &ModelDescription, one_based: u32) -> Option<usize> {
        let i = (one_based as usize).checked_sub(1)?;
        (i < md.variables().len()).then_some(i)
    }

    fn index_unknowns(
        md: &ModelDescription,
        unknowns: &[Unknown],
        deps: &mut HashMap<u32, Option<HashSet<u32>>>,
        overwrite: bool,
    ) {
        for u in unknowns {
            let Some(i) = Self::checked_index(md, u.index) else {
                log::warn!("model structure references out-of-range variable index {}", u.index);
                continue;
            };
            let vr = md.variables()[i].value_reference;
            let entry = u.dependencies.as_ref().map(|ixs| {
                ixs.iter()
                    .filter_map(|&ix| Self::checked_index(md, ix))
                    .map(|ki| md.variables()[ki].value_reference)
                    .collect::<HashSet<u32>>()
            });
            if overwrite {
                deps.insert(vr, entry);
            } else {
                deps.entry(vr).or_insert(entry);
            }
        }
    }

    pub fn description(&self) -> &ModelDescription {
        &self.md
    }

    pub fn guid(&self) -> &str {
        &self.md.guid
    }

    pub fn name(&self) -> &str {
        &self.md.model_name
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn num_event_indicators(&self) -> usize {
        self.md.num_event_indicators()
    }

    pub fn state_refs(&self) -> &[u32] {
        &self.states
    }

    pub fn derivative_refs(&self) -> &[u32] {
        &self.derivatives
    }

    pub fn input_refs(&self) -> &[u32] {
        &self.inputs
    }

    pub fn output_refs(&self) -> &[u32] {
        &self.outputs
    }

    pub fn parameter_refs(&self) -> &[u32] {
        &self.parameters
    }

    pub fn variables(&self) -> &[ScalarVariable] {
        self.md.variables()
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&ScalarVariable> {
        self.by_name.get(name).map(|&i| &self.md.variables()[i])
    }

    /// The declaring variable for a value reference (first declaration wins
    /// for aliases).
    pub fn variable_by_vr(&self, vr: u32) -> Option<&ScalarVariable> {
        self.by_vr.get(&vr).map(|&i| &self.md.variables()[i])
    }

    pub fn name_of(&self, vr: u32) -> &str {
        self.variable_by_vr(vr).map_or("<unknown vr>", |v| &v.name)
    }

    /// Every name declared for a value reference, in document order.
    /// Aliased references yield more than one name.
    pub fn names_of(&self, vr: u32) -> Vec<&str> {
        self.md
            .variables()
            .iter()
            .filter(|v| v.value_reference == vr)
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Whether `unknown` may depend on `known`. Conservatively true when the
    /// model structure declares nothing for `unknown`.
    pub fn depends_on(&self, unknown: u32, known: u32) -> bool {
        match self.deps.get(&unknown) {
            Some(Some(set)) => set.contains(&known),
            Some(None) | None => true,
        }
    }

    /// Whether `unknown` has an explicit (possibly empty) dependency list.
    pub fn has_dependency_info(&self, unknown: u32) -> bool {
        matches!(self.deps.get(&unknown), Some(Some(_)))
    }

    /// Real attributes with `declaredType` fallback applied. A dangling
    /// `declaredType` is reported once per query and otherwise ignored.
    pub fn real_attributes(&self, var: &ScalarVariable) -> RealAttributes {
        let TypedElement::Real {
            declared_type,
            unit,
            min,
            max,
            nominal,
            ..
        } = &var.elem
        else {
            return RealAttributes::default();
        };

        let mut attrs = RealAttributes {
            unit: unit.clone(),
            min: *min,
            max: *max,
            nominal: *nominal,
        };
        if let Some(type_name) = declared_type {
            match self.md.simple_type(type_name) {
                Some(st) => {
                    if let fmu_schema::TypedDefault::Real {
                        unit: t_unit,
                        min: t_min,
                        max: t_max,
                        nominal: t_nominal,
                    } = &st.elem
                    {
                        attrs.unit = attrs.unit.or_else(|| t_unit.clone());
                        attrs.min = attrs.min.or(*t_min);
                        attrs.max = attrs.max.or(*t_max);
                        attrs.nominal = attrs.nominal.or(*t_nominal);
                    }
                }
                None => log::warn!(
                    "variable `{}` declares unknown type `{type_name}`",
                    var.name
                ),
            }
        }
        attrs
    }

    pub fn nominal(&self, vr: u32) -> f64 {
        self.variable_by_vr(vr)
            .map(|v| self.real_attributes(v))
            .and_then(|a| a.nominal)
            .unwrap_or(1.0)
    }

    /// The `initial` attribute, defaulted by causality when absent.
    pub fn effective_initial(var: &ScalarVariable) -> Initial {
        if let Some(initial) = var.initial {
            return initial;
        }
        match var.causality {
            Causality::Parameter | Causality::Input => Initial::Exact,
            Causality::CalculatedParameter | Causality::Output | Causality::Local => {
                Initial::Calculated
            }
            Causality::Independent => Initial::Calculated,
        }
    }

    /// Whether a start value for `var` may be written between instantiation
    /// and `enter_initialization_mode`.
    pub fn settable_before_initialization(var: &ScalarVariable) -> bool {
        if var.causality == Causality::Input {
            return true;
        }
        if var.variability == Variability::Constant {
            return false;
        }
        matches!(
            Self::effective_initial(var),
            Initial::Exact | Initial::Approx
        )
    }

    /// Whether a start value for `var` may still be written inside
    /// initialization mode. Stricter than the pre-initialization window:
    /// approximate guesses are frozen once initialization begins, and
    /// tunable parameters may only be written if they are exact.
    pub fn settable_in_initialization(var: &ScalarVariable) -> bool {
        if var.causality == Causality::Input {
            return true;
        }
        if var.variability == Variability::Constant {
            return false;
        }
        Self::effective_initial(var) == Initial::Exact
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OSCILLATOR_XML: &str = r#"
        <fmiModelDescription fmiVersion="2.0" modelName="Oscillator" guid="{osc-1}" numberOfEventIndicators="1">
            <ModelExchange modelIdentifier="oscillator" providesDirectionalDerivative="true"/>
            <TypeDefinitions>
                <SimpleType name="Position"><Real unit="m" nominal="0.5"/></SimpleType>
            </TypeDefinitions>
            <ModelVariables>
                <ScalarVariable name="x" valueReference="0" causality="local" variability="continuous" initial="exact">
                    <Real declaredType="Position" start="1.0"/>
                </ScalarVariable>
                <ScalarVariable name="der(x)" valueReference="1" causality="local" variability="continuous">
                    <Real derivative="1"/>
                </ScalarVariable>
                <ScalarVariable name="v" valueReference="2" causality="local" variability="continuous" initial="exact">
                    <Real start="0.0"/>
                </ScalarVariable>
                <ScalarVariable name="der(v)" valueReference="3" causality="local" variability="continuous">
                    <Real derivative="3"/>
                </ScalarVariable>
                <ScalarVariable name="u" valueReference="4" causality="input" variability="continuous">
                    <Real start="0.0"/>
                </ScalarVariable>
                <ScalarVariable name="y" valueReference="5" causality="output" variability="continuous">
                    <Real/>
                </ScalarVariable>
                <ScalarVariable name="k" valueReference="6" causality="parameter" variability="tunable">
                    <Real start="10.0"/>
                </ScalarVariable>
            </ModelVariables>
            <ModelStructure>
                <Outputs>
                    <Unknown index="6" dependencies="1" dependenciesKind="dependent"/>
                </Outputs>
                <Derivatives>
                    <Unknown index="2" dependencies="3" dependenciesKind="dependent"/>
                    <Unknown index="4" dependencies="1 5 7" dependenciesKind="dependent dependent fixed"/>
                </Derivatives>
            </ModelStructure>
        </fmiModelDescription>"#;

    fn model() -> Model {
        Model::new(fmu_schema::from_str(OSCILLATOR_XML).unwrap())
    }

    #[test]
    fn states_pair_with_derivatives_in_structure_order() {
        let m = model();
        assert_eq!(m.state_refs(), &[0, 2]);
        assert_eq!(m.derivative_refs(), &[1, 3]);
        assert_eq!(m.num_states(), 2);
        assert_eq!(m.num_event_indicators(), 1);
    }

    #[test]
    fn causality_groups_follow_document_order() {
        let m = model();
        assert_eq!(m.input_refs(), &[4]);
        assert_eq!(m.output_refs(), &[5]);
        assert_eq!(m.parameter_refs(), &[6]);
    }

    #[test]
    fn dependency_lookup_uses_declared_lists() {
        let m = model();
        // der(x) depends only on v.
        assert!(m.depends_on(1, 2));
        assert!(!m.depends_on(1, 0));
        assert!(!m.depends_on(1, 4));
        // der(v) depends on x, u and k.
        assert!(m.depends_on(3, 0));
        assert!(m.depends_on(3, 4));
        assert!(m.depends_on(3, 6));
        assert!(!m.depends_on(3, 2));
        // No declaration at all stays conservative.
        assert!(m.depends_on(99, 0));
        assert!(!m.has_dependency_info(99));
    }

    #[test]
    fn declared_type_fills_missing_real_attributes() {
        let m = model();
        let x = m.variable_by_name("x").unwrap();
        let attrs = m.real_attributes(x);
        assert_eq!(attrs.unit.as_deref(), Some("m"));
        assert_eq!(attrs.nominal, Some(0.5));
        assert_eq!(m.nominal(0), 0.5);
        // No declared type and no nominal falls back to 1.0.
        assert_eq!(m.nominal(2), 1.0);
    }

    #[test]
    fn start_value_windows_by_causality_and_initial() {
        let m = model();
        let input = m.variable_by_name("u").unwrap();
        let tunable = m.variable_by_name("k").unwrap();
        let exact_state = m.variable_by_name("x").unwrap();
        let output = m.variable_by_name("y").unwrap();

        assert!(Model::settable_before_initialization(input));
        assert!(Model::settable_in_initialization(input));
        assert!(Model::settable_before_initialization(tunable));
        assert!(Model::settable_in_initialization(tunable));
        assert!(Model::settable_before_initialization(exact_state));
        assert!(Model::settable_in_initialization(exact_state));
        assert!(!Model::settable_before_initialization(output));
        assert!(!Model::settable_in_initialization(output));
    }

    #[test]
    fn vr_and_name_lookups_agree() {
        let m = model();
        assert_eq!(m.variable_by_vr(6).unwrap().name, "k");
        assert_eq!(m.name_of(6), "k");
        assert_eq!(m.name_of(42), "<unknown vr>");
        assert_eq!(m.names_of(6), vec!["k"]);
        assert!(m.names_of(42).is_empty());
        assert!(m.variable_by_name("missing").is_none());
    }
}
