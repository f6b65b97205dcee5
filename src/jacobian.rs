//! Dependency-aware assembly of partial-derivative blocks.
//!
//! Blocks are keyed by an unknown group (derivatives or outputs) against a
//! known group (states, inputs, parameters, or time) and cached until a
//! write touches their knowns. Assembly prefers `fmi2GetDirectionalDerivative`
//! column by column and falls back to central finite differences, where the
//! `<ModelStructure>` dependency lists short-circuit provably zero columns.

use std::collections::HashMap;

use itertools::izip;

use crate::model::Model;
use crate::resolver::Group;
use crate::{Error, Result};

/// Row group of a Jacobian block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnknownGroup {
    Derivatives,
    Outputs,
}

/// Column group of a Jacobian block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownGroup {
    States,
    Inputs,
    Parameters,
    /// A single column: the partial with respect to independent time,
    /// available only from providers that can reposition time.
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub unknown: UnknownGroup,
    pub known: KnownGroup,
}

impl BlockKey {
    pub const fn new(unknown: UnknownGroup, known: KnownGroup) -> Self {
        Self { unknown, known }
    }
}

/// One dense row-major block, `unknown_refs.len()` rows by
/// `known_refs.len()` columns (one column for [`KnownGroup::Time`]).
#[derive(Debug, Clone)]
pub struct JacobianBlock {
    pub unknown_refs: Vec<u32>,
    pub known_refs: Vec<u32>,
    values: Vec<f64>,
    valid: bool,
}

impl JacobianBlock {
    pub fn rows(&self) -> usize {
        self.unknown_refs.len()
    }

    pub fn cols(&self) -> usize {
        if self.known_refs.is_empty() {
            usize::from(!self.values.is_empty())
        } else {
            self.known_refs.len()
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols() + col]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn column(&self, col: usize) -> Vec<f64> {
        (0..self.rows()).map(|r| self.get(r, col)).collect()
    }
}

/// The numeric backend a block is assembled against.
///
/// [`crate::Instance`] implements this over the native binary; tests drive
/// the assembly with pure in-process models.
pub trait SensitivityProvider {
    fn model(&self) -> &Model;

    fn read_reals(&mut self, vrs: &[u32]) -> Result<Vec<f64>>;

    fn write_reals(&mut self, vrs: &[u32], values: &[f64]) -> Result<()>;

    /// One directional-derivative evaluation, or `None` when the capability
    /// is unavailable and sampling must be used instead.
    fn directional_derivative(
        &mut self,
        unknowns: &[u32],
        knowns: &[u32],
        seed: &[f64],
    ) -> Option<Result<Vec<f64>>>;

    fn time(&self) -> f64;

    /// Whether [`SensitivityProvider::set_time_for_sampling`] may be called.
    fn supports_time_perturbation(&self) -> bool {
        false
    }

    fn set_time_for_sampling(&mut self, _t: f64) -> Result<()> {
        Err(Error::SymbolUnavailable {
            name: "fmi2SetTime",
            reason: "provider cannot reposition time",
        })
    }
}

/// Per-instance cache of assembled blocks plus evaluation counters.
#[derive(Debug, Default)]
pub struct JacobianCache {
    blocks: HashMap<BlockKey, JacobianBlock>,
    recomputes: HashMap<BlockKey, usize>,
    directional_evals: usize,
    sampled_evals: usize,
}

impl JacobianCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of native evaluations spent so far:
    /// `(directional calls, sampled model evaluations)`.
    pub fn evals(&self) -> (usize, usize) {
        (self.directional_evals, self.sampled_evals)
    }

    /// How many times the block for `key` has been (re)computed. Cache hits
    /// do not count.
    pub fn recompute_count(&self, key: BlockKey) -> usize {
        self.recomputes.get(&key).copied().unwrap_or(0)
    }

    pub fn invalidate_all(&mut self) {
        for block in self.blocks.values_mut() {
            block.valid = false;
        }
    }

    /// Invalidate every block whose known set intersects the written
    /// references. Writes that reposition the evaluation point itself
    /// (time, the state vector) must use [`JacobianCache::invalidate_all`].
    pub fn invalidate_written(&mut self, written: &[u32]) {
        for block in self.blocks.values_mut() {
            if block.known_refs.iter().any(|vr| written.contains(vr)) {
                block.valid = false;
            }
        }
    }

    pub fn is_valid(&self, key: BlockKey) -> bool {
        self.blocks.get(&key).map_or(false, |b| b.valid)
    }

    /// The cached block for `key`, assembling it first if missing or stale.
    ///
    /// `steps` overrides the per-column finite-difference step sizes; its
    /// length must match the known group when given.
    pub fn get_or_compute<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        key: BlockKey,
        steps: Option<&[f64]>,
    ) -> Result<&JacobianBlock> {
        if !self.is_valid(key) {
            let block = self.compute(provider, key, steps)?;
            self.blocks.insert(key, block);
            *self.recomputes.entry(key).or_default() += 1;
        }
        Ok(&self.blocks[&key])
    }

    fn compute<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        key: BlockKey,
        steps: Option<&[f64]>,
    ) -> Result<JacobianBlock> {
        let model = provider.model();
        let unknown_refs = match key.unknown {
            UnknownGroup::Derivatives => model.derivative_refs().to_vec(),
            UnknownGroup::Outputs => model.output_refs().to_vec(),
        };
        let known_refs = match key.known {
            KnownGroup::States => model.state_refs().to_vec(),
            KnownGroup::Inputs => model.input_refs().to_vec(),
            KnownGroup::Parameters => model.parameter_refs().to_vec(),
            KnownGroup::Time => Vec::new(),
        };

        let values = if key.known == KnownGroup::Time {
            self.time_column(provider, &unknown_refs)?
        } else {
            self.dense_block(provider, &unknown_refs, &known_refs, steps)?
        };

        Ok(JacobianBlock {
            unknown_refs,
            known_refs,
            values,
            valid: true,
        })
    }

    /// Column-major assembly loop; results transposed into row-major order.
    fn dense_block<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        unknowns: &[u32],
        knowns: &[u32],
        steps: Option<&[f64]>,
    ) -> Result<Vec<f64>> {
        let rows = unknowns.len();
        let cols = knowns.len();
        if let Some(s) = steps {
            if s.len() != cols {
                return Err(Error::LengthMismatch {
                    expected: cols,
                    got: s.len(),
                });
            }
        }
        let mut values = vec![0.0; rows * cols];

        for (j, &known) in knowns.iter().enumerate() {
            let step = steps.map(|s| s[j]);
            let column = self.one_column(provider, unknowns, known, step)?;
            for (i, v) in column.into_iter().enumerate() {
                values[i * cols + j] = v;
            }
        }
        Ok(values)
    }

    fn one_column<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        unknowns: &[u32],
        known: u32,
        step: Option<f64>,
    ) -> Result<Vec<f64>> {
        // Only explicit (possibly empty) dependency lists may prove a
        // column zero; an absent list is unconstrained.
        let structurally_zero = {
            let model = provider.model();
            unknowns
                .iter()
                .all(|&u| model.has_dependency_info(u) && !model.depends_on(u, known))
        };

        if let Some(result) = provider.directional_derivative(unknowns, &[known], &[1.0]) {
            self.directional_evals += 1;
            return result;
        }

        if structurally_zero {
            return Ok(vec![0.0; unknowns.len()]);
        }
        self.sample_column(provider, unknowns, known, step)
    }

    /// Central difference around the current value of `known`, restoring it
    /// whether or not sampling succeeds.
    fn sample_column<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        unknowns: &[u32],
        known: u32,
        step: Option<f64>,
    ) -> Result<Vec<f64>> {
        let name = provider.model().name_of(known).to_owned();
        let center = provider.read_reals(&[known])?[0];
        let h = step.unwrap_or_else(|| default_step(center));
        if h == 0.0 || !h.is_finite() {
            return Err(Error::ZeroPerturbation { name });
        }

        let sampled = (|| -> Result<Vec<f64>> {
            provider.write_reals(&[known], &[center + h])?;
            let plus = provider.read_reals(unknowns)?;
            provider.write_reals(&[known], &[center - h])?;
            let minus = provider.read_reals(unknowns)?;
            self.sampled_evals += 2;
            Ok(izip!(plus, minus).map(|(p, m)| (p - m) / (2.0 * h)).collect())
        })();
        let restored = provider.write_reals(&[known], &[center]);

        let column = sampled?;
        restored?;
        if column.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteSample { name });
        }
        Ok(column)
    }

    fn time_column<P: SensitivityProvider>(
        &mut self,
        provider: &mut P,
        unknowns: &[u32],
    ) -> Result<Vec<f64>> {
        if !provider.supports_time_perturbation() {
            return Err(Error::SymbolUnavailable {
                name: "fmi2SetTime",
                reason: "time sensitivities need a Model Exchange instance in continuous-time mode",
            });
        }
        let center = provider.time();
        let h = default_step(center);

        let sampled = (|| -> Result<Vec<f64>> {
            provider.set_time_for_sampling(center + h)?;
            let plus = provider.read_reals(unknowns)?;
            provider.set_time_for_sampling(center - h)?;
            let minus = provider.read_reals(unknowns)?;
            self.sampled_evals += 2;
            Ok(izip!(plus, minus).map(|(p, m)| (p - m) / (2.0 * h)).collect())
        })();
        let restored = provider.set_time_for_sampling(center);

        let column = sampled?;
        restored?;
        if column.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteSample {
                name: "time".to_owned(),
            });
        }
        Ok(column)
    }
}

/// √ε-scaled central-difference step around `center`.
fn default_step(center: f64) -> f64 {
    f64::EPSILON.sqrt() * center.abs().max(1.0)
}

impl From<UnknownGroup> for Group {
    fn from(g: UnknownGroup) -> Self {
        match g {
            UnknownGroup::Derivatives => Group::Derivatives,
            UnknownGroup::Outputs => Group::Outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::*;

    const XML: &str = r#"
        <fmiModelDescription fmiVersion="2.0" modelName="Linear" guid="{lin-1}">
            <ModelVariables>
                <ScalarVariable name="x1" valueReference="0"><Real start="1.0"/></ScalarVariable>
                <ScalarVariable name="x2" valueReference="1"><Real start="0.0"/></ScalarVariable>
                <ScalarVariable name="der(x1)" valueReference="2"><Real derivative="1"/></ScalarVariable>
                <ScalarVariable name="der(x2)" valueReference="3"><Real derivative="2"/></ScalarVariable>
                <ScalarVariable name="u" valueReference="4" causality="input"><Real start="0.0"/></ScalarVariable>
                <ScalarVariable name="y" valueReference="5" causality="output"><Real/></ScalarVariable>
            </ModelVariables>
            <ModelStructure>
                <Outputs>
                    <Unknown index="6" dependencies="1" dependenciesKind="dependent"/>
                </Outputs>
                <Derivatives>
                    <Unknown index="3" dependencies="2" dependenciesKind="dependent"/>
                    <Unknown index="4" dependencies="1 2 5" dependenciesKind="dependent dependent dependent"/>
                </Derivatives>
            </ModelStructure>
        </fmiModelDescription>"#;

    /// dx1 = x2, dx2 = -k x1 - d x2 + u, y = x1. Evaluated eagerly on
    /// every write so reads always see a consistent point.
    struct Oscillator {
        model: Model,
        x1: f64,
        x2: f64,
        u: f64,
        exact: bool,
        write_count: usize,
    }

    const K: f64 = 10.0;
    const D: f64 = 0.5;

    impl Oscillator {
        fn new(exact: bool) -> Self {
            Self {
                model: Model::new(fmu_schema::from_str(XML).unwrap()),
                x1: 1.0,
                x2: 0.0,
                u: 0.0,
                exact,
                write_count: 0,
            }
        }

        fn value(&self, vr: u32) -> f64 {
            match vr {
                0 => self.x1,
                1 => self.x2,
                2 => self.x2,
                3 => -K * self.x1 - D * self.x2 + self.u,
                4 => self.u,
                5 => self.x1,
                other => panic!("unexpected vr {other}"),
            }
        }
    }

    impl SensitivityProvider for Oscillator {
        fn model(&self) -> &Model {
            &self.model
        }

        fn read_reals(&mut self, vrs: &[u32]) -> Result<Vec<f64>> {
            Ok(vrs.iter().map(|&vr| self.value(vr)).collect())
        }

        fn write_reals(&mut self, vrs: &[u32], values: &[f64]) -> Result<()> {
            self.write_count += 1;
            for (&vr, &v) in vrs.iter().zip(values) {
                match vr {
                    0 => self.x1 = v,
                    1 => self.x2 = v,
                    4 => self.u = v,
                    other => panic!("write to read-only vr {other}"),
                }
            }
            Ok(())
        }

        fn directional_derivative(
            &mut self,
            unknowns: &[u32],
            knowns: &[u32],
            seed: &[f64],
        ) -> Option<Result<Vec<f64>>> {
            if !self.exact {
                return None;
            }
            // Exact linear sensitivities.
            let column = unknowns
                .iter()
                .map(|&u| {
                    knowns
                        .iter()
                        .zip(seed)
                        .map(|(&k, &s)| {
                            s * match (u, k) {
                                (2, 0) => 0.0,
                                (2, 1) => 1.0,
                                (3, 0) => -K,
                                (3, 1) => -D,
                                (2, 4) => 0.0,
                                (3, 4) => 1.0,
                                (5, 0) => 1.0,
                                (5, 1) => 0.0,
                                (5, 4) => 0.0,
                                _ => 0.0,
                            }
                        })
                        .sum()
                })
                .collect();
            Some(Ok(column))
        }

        fn time(&self) -> f64 {
            0.0
        }
    }

    const A_KEY: BlockKey = BlockKey::new(UnknownGroup::Derivatives, KnownGroup::States);
    const B_KEY: BlockKey = BlockKey::new(UnknownGroup::Derivatives, KnownGroup::Inputs);
    const C_KEY: BlockKey = BlockKey::new(UnknownGroup::Outputs, KnownGroup::States);

    #[test]
    fn sampled_block_matches_exact_linear_dynamics() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        let a = cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        assert_eq!(a.rows(), 2);
        assert_eq!(a.cols(), 2);
        assert_approx_eq!(a.get(0, 0), 0.0, 1e-6);
        assert_approx_eq!(a.get(0, 1), 1.0, 1e-6);
        assert_approx_eq!(a.get(1, 0), -K, 1e-6);
        assert_approx_eq!(a.get(1, 1), -D, 1e-6);
        let (directional, sampled) = cache.evals();
        assert_eq!(directional, 0);
        assert_eq!(sampled, 4);
    }

    #[test]
    fn directional_block_bypasses_sampling() {
        let mut osc = Oscillator::new(true);
        let mut cache = JacobianCache::new();
        let a = cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        assert_approx_eq!(a.get(1, 0), -K, 1e-12);
        let (directional, sampled) = cache.evals();
        assert_eq!(directional, 2);
        assert_eq!(sampled, 0);
        // No perturbation writes happened at all.
        assert_eq!(osc.write_count, 0);
    }

    #[test]
    fn declared_zero_columns_skip_sampling() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        // y depends only on x1, so the input column of C/D is provably zero.
        let d = cache
            .get_or_compute(
                &mut osc,
                BlockKey::new(UnknownGroup::Outputs, KnownGroup::Inputs),
                None,
            )
            .unwrap();
        assert_eq!(d.values(), &[0.0]);
        assert_eq!(cache.evals().1, 0);
        assert_eq!(osc.write_count, 0);
    }

    #[test]
    fn cache_hits_until_a_known_is_written() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        let after_first = cache.evals().1;
        cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        assert_eq!(cache.evals().1, after_first, "second query must hit the cache");

        // Writing the input leaves the state block alone but kills B.
        cache.get_or_compute(&mut osc, B_KEY, None).unwrap();
        cache.invalidate_written(&[4]);
        assert!(cache.is_valid(A_KEY));
        assert!(!cache.is_valid(B_KEY));

        cache.invalidate_all();
        assert!(!cache.is_valid(A_KEY));
    }

    #[test]
    fn recompute_counts_are_kept_per_block() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        assert_eq!(cache.recompute_count(A_KEY), 1, "cache hit must not count");
        assert_eq!(cache.recompute_count(B_KEY), 0);

        cache.invalidate_all();
        cache.get_or_compute(&mut osc, A_KEY, None).unwrap();
        cache.get_or_compute(&mut osc, B_KEY, None).unwrap();
        assert_eq!(cache.recompute_count(A_KEY), 2);
        assert_eq!(cache.recompute_count(B_KEY), 1);
    }

    #[test]
    fn step_override_must_cover_every_known_column() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        // Two state columns, one step supplied.
        let err = cache
            .get_or_compute(&mut osc, A_KEY, Some(&[1e-6]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::LengthMismatch {
                expected: 2,
                got: 1
            }
        ));
        assert_eq!(osc.write_count, 0, "nothing may be perturbed first");
    }

    #[test]
    fn explicit_zero_step_is_rejected() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        let err = cache
            .get_or_compute(&mut osc, A_KEY, Some(&[0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(err, Error::ZeroPerturbation { .. }));
    }

    #[test]
    fn restore_happens_even_when_sampling_fails() {
        struct Failing {
            inner: Oscillator,
            fail_reads: bool,
        }
        impl SensitivityProvider for Failing {
            fn model(&self) -> &Model {
                self.inner.model()
            }
            fn read_reals(&mut self, vrs: &[u32]) -> Result<Vec<f64>> {
                if self.fail_reads && vrs.len() > 1 {
                    return Err(Error::Status(crate::StatusError::Discard));
                }
                self.inner.read_reals(vrs)
            }
            fn write_reals(&mut self, vrs: &[u32], values: &[f64]) -> Result<()> {
                self.inner.write_reals(vrs, values)
            }
            fn directional_derivative(
                &mut self,
                _: &[u32],
                _: &[u32],
                _: &[f64],
            ) -> Option<Result<Vec<f64>>> {
                None
            }
            fn time(&self) -> f64 {
                0.0
            }
        }

        let mut failing = Failing {
            inner: Oscillator::new(false),
            fail_reads: true,
        };
        let mut cache = JacobianCache::new();
        let err = cache.get_or_compute(&mut failing, A_KEY, None).unwrap_err();
        assert!(matches!(err, Error::Status(_)));
        // The perturbed state was put back before the error surfaced.
        assert_approx_eq!(failing.inner.x1, 1.0, 1e-15);
        assert_approx_eq!(failing.inner.x2, 0.0, 1e-15);
    }

    #[test]
    fn time_column_requires_a_time_capable_provider() {
        let mut osc = Oscillator::new(false);
        let mut cache = JacobianCache::new();
        let err = cache
            .get_or_compute(
                &mut osc,
                BlockKey::new(UnknownGroup::Derivatives, KnownGroup::Time),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::SymbolUnavailable { .. }));
    }
}
