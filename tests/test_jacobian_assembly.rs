//! End-to-end exercise of the public sensitivity API against a pure
//! in-process oscillator model, cross-checking the directional and sampled
//! assembly paths and the caching behavior a simulation loop relies on.

use assert_approx_eq::assert_approx_eq;

use fmu_bind::{
    BlockKey, Group, JacobianCache, KnownGroup, Model, Selector, SensitivityProvider, Solution,
    UnknownGroup,
};

const XML: &str = r#"
    <fmiModelDescription fmiVersion="2.0" modelName="DampedOscillator" guid="{osc-2}">
        <ModelExchange modelIdentifier="damped_oscillator" providesDirectionalDerivative="true"/>
        <ModelVariables>
            <ScalarVariable name="x" valueReference="0" initial="exact"><Real start="1.0"/></ScalarVariable>
            <ScalarVariable name="v" valueReference="1" initial="exact"><Real start="0.0"/></ScalarVariable>
            <ScalarVariable name="der(x)" valueReference="2"><Real derivative="1"/></ScalarVariable>
            <ScalarVariable name="der(v)" valueReference="3"><Real derivative="2"/></ScalarVariable>
            <ScalarVariable name="u" valueReference="4" causality="input"><Real start="0.0"/></ScalarVariable>
            <ScalarVariable name="y" valueReference="5" causality="output"><Real/></ScalarVariable>
            <ScalarVariable name="k" valueReference="6" causality="parameter" variability="tunable"><Real start="10.0"/></ScalarVariable>
            <ScalarVariable name="d" valueReference="7" causality="parameter" variability="tunable"><Real start="0.5"/></ScalarVariable>
        </ModelVariables>
        <ModelStructure>
            <Outputs>
                <Unknown index="6" dependencies="1" dependenciesKind="dependent"/>
            </Outputs>
            <Derivatives>
                <Unknown index="3" dependencies="2" dependenciesKind="dependent"/>
                <Unknown index="4" dependencies="1 2 5 7 8" dependenciesKind="dependent dependent dependent fixed fixed"/>
            </Derivatives>
        </ModelStructure>
    </fmiModelDescription>"#;

/// dx = v, dv = -(k/m) x - d v + u with m = 1, y = x.
struct DampedOscillator {
    model: Model,
    x: f64,
    v: f64,
    u: f64,
    k: f64,
    d: f64,
    use_directional: bool,
}

impl DampedOscillator {
    fn new(use_directional: bool) -> Self {
        Self {
            model: Model::new(fmu_schema::from_str(XML).unwrap()),
            x: 1.0,
            v: 0.0,
            u: 0.0,
            k: 10.0,
            d: 0.5,
            use_directional,
        }
    }

    fn value(&self, vr: u32) -> f64 {
        match vr {
            0 => self.x,
            1 => self.v,
            2 => self.v,
            3 => -self.k * self.x - self.d * self.v + self.u,
            4 => self.u,
            5 => self.x,
            6 => self.k,
            7 => self.d,
            other => panic!("unexpected vr {other}"),
        }
    }

    /// Analytic partial of unknown `u_vr` with respect to known `k_vr` at
    /// the current point.
    fn partial(&self, u_vr: u32, k_vr: u32) -> f64 {
        match (u_vr, k_vr) {
            (2, 1) => 1.0,
            (3, 0) => -self.k,
            (3, 1) => -self.d,
            (3, 4) => 1.0,
            (3, 6) => -self.x,
            (3, 7) => -self.v,
            (5, 0) => 1.0,
            _ => 0.0,
        }
    }
}

impl SensitivityProvider for DampedOscillator {
    fn model(&self) -> &Model {
        &self.model
    }

    fn read_reals(&mut self, vrs: &[u32]) -> fmu_bind::Result<Vec<f64>> {
        Ok(vrs.iter().map(|&vr| self.value(vr)).collect())
    }

    fn write_reals(&mut self, vrs: &[u32], values: &[f64]) -> fmu_bind::Result<()> {
        for (&vr, &value) in vrs.iter().zip(values) {
            match vr {
                0 => self.x = value,
                1 => self.v = value,
                4 => self.u = value,
                6 => self.k = value,
                7 => self.d = value,
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
    ) -> Option<fmu_bind::Result<Vec<f64>>> {
        if !self.use_directional {
            return None;
        }
        Some(Ok(unknowns
            .iter()
            .map(|&u| {
                knowns
                    .iter()
                    .zip(seed)
                    .map(|(&k, &s)| s * self.partial(u, k))
                    .sum()
            })
            .collect()))
    }

    fn time(&self) -> f64 {
        0.0
    }
}

fn block_keys() -> [BlockKey; 4] {
    [
        BlockKey::new(UnknownGroup::Derivatives, KnownGroup::States),
        BlockKey::new(UnknownGroup::Derivatives, KnownGroup::Inputs),
        BlockKey::new(UnknownGroup::Outputs, KnownGroup::States),
        BlockKey::new(UnknownGroup::Outputs, KnownGroup::Inputs),
    ]
}

#[test_log::test]
fn sampled_and_directional_paths_agree_on_every_block() {
    let mut exact = DampedOscillator::new(true);
    let mut sampled = DampedOscillator::new(false);
    let mut exact_cache = JacobianCache::new();
    let mut sampled_cache = JacobianCache::new();

    for key in block_keys() {
        let a = exact_cache.get_or_compute(&mut exact, key, None).unwrap().clone();
        let b = sampled_cache.get_or_compute(&mut sampled, key, None).unwrap();
        assert_eq!(a.rows(), b.rows(), "{key:?}");
        assert_eq!(a.cols(), b.cols(), "{key:?}");
        for (&av, &bv) in a.values().iter().zip(b.values()) {
            assert_approx_eq!(av, bv, 1e-6);
        }
    }

    let (directional, _) = exact_cache.evals();
    let (_, samples) = sampled_cache.evals();
    assert!(directional > 0);
    assert!(samples > 0);
}

#[test_log::test]
fn parameter_block_reflects_the_operating_point() {
    let mut osc = DampedOscillator::new(false);
    osc.x = 2.0;
    osc.v = -1.0;
    let mut cache = JacobianCache::new();
    let block = cache
        .get_or_compute(
            &mut osc,
            BlockKey::new(UnknownGroup::Derivatives, KnownGroup::Parameters),
            None,
        )
        .unwrap();
    // Row 0 is der(x): no parameter dependence. Row 1 is der(v).
    assert_approx_eq!(block.get(0, 0), 0.0, 1e-6);
    assert_approx_eq!(block.get(0, 1), 0.0, 1e-6);
    assert_approx_eq!(block.get(1, 0), -2.0, 1e-6);
    assert_approx_eq!(block.get(1, 1), 1.0, 1e-6);
    // Sampling restored the operating point.
    assert_approx_eq!(osc.k, 10.0, 1e-12);
    assert_approx_eq!(osc.d, 0.5, 1e-12);
}

#[test_log::test]
fn declared_sparsity_saves_evaluations_on_the_sampled_path() {
    let mut osc = DampedOscillator::new(false);
    let mut cache = JacobianCache::new();
    // y depends on x only: both the v column of C and the whole D block
    // are declared zero, so only one column is ever sampled.
    cache
        .get_or_compute(&mut osc, BlockKey::new(UnknownGroup::Outputs, KnownGroup::States), None)
        .unwrap();
    cache
        .get_or_compute(&mut osc, BlockKey::new(UnknownGroup::Outputs, KnownGroup::Inputs), None)
        .unwrap();
    let (_, samples) = cache.evals();
    assert_eq!(samples, 2, "one sampled column costs two evaluations");
}

#[test_log::test]
fn cache_survives_unrelated_writes_and_tracks_related_ones() {
    let mut osc = DampedOscillator::new(false);
    let mut cache = JacobianCache::new();
    let a_key = BlockKey::new(UnknownGroup::Derivatives, KnownGroup::States);
    let b_key = BlockKey::new(UnknownGroup::Derivatives, KnownGroup::Inputs);

    cache.get_or_compute(&mut osc, a_key, None).unwrap();
    cache.get_or_compute(&mut osc, b_key, None).unwrap();
    let baseline = cache.evals().1;

    // An input write leaves the state block cached.
    osc.write_reals(&[4], &[0.5]).unwrap();
    cache.invalidate_written(&[4]);
    cache.get_or_compute(&mut osc, a_key, None).unwrap();
    assert_eq!(cache.evals().1, baseline);

    // The input block was recomputed at the new point.
    assert!(!cache.is_valid(b_key));
    let b = cache.get_or_compute(&mut osc, b_key, None).unwrap();
    assert_approx_eq!(b.get(1, 0), 1.0, 1e-6);
    assert!(cache.evals().1 > baseline);
}

#[test_log::test]
fn euler_trajectory_recording_with_linearization_snapshots() {
    let mut osc = DampedOscillator::new(true);
    let mut cache = JacobianCache::new();
    let mut solution = Solution::new(2, 1);

    let dt = 1e-3;
    let mut t = 0.0;
    for _ in 0..1000 {
        let states = osc.read_reals(&[0, 1]).unwrap();
        let outputs = osc.read_reals(&[5]).unwrap();
        solution.push(t, &states, &outputs);

        let dx = osc.read_reals(&[2, 3]).unwrap();
        osc.write_reals(&[0, 1], &[states[0] + dt * dx[0], states[1] + dt * dx[1]])
            .unwrap();
        cache.invalidate_all();
        t += dt;
    }
    let a = cache
        .get_or_compute(&mut osc, BlockKey::new(UnknownGroup::Derivatives, KnownGroup::States), None)
        .unwrap()
        .clone();
    let (directional, sampled) = cache.evals();
    solution.record_evals(directional, sampled);

    assert_eq!(solution.len(), 1000);
    // Damped oscillation: the energy envelope shrinks.
    let first = solution.states_at(0);
    let last = solution.states_at(999);
    let energy = |s: &[f64]| 10.0 * s[0] * s[0] + s[1] * s[1];
    assert!(energy(last) < energy(first));
    // The linearization is state independent for this model.
    assert_approx_eq!(a.get(1, 0), -10.0, 1e-9);
    assert_eq!(solution.evals(), (2, 0));
}

#[test_log::test]
fn selector_groups_and_jacobian_row_order_line_up() {
    let osc = DampedOscillator::new(true);
    let derivs = Selector::from(Group::Derivatives).resolve(osc.model());
    let mut cache = JacobianCache::new();
    let mut osc = osc;
    let block = cache
        .get_or_compute(&mut osc, BlockKey::new(UnknownGroup::Derivatives, KnownGroup::States), None)
        .unwrap();
    assert_eq!(block.unknown_refs, derivs);
    assert_eq!(block.known_refs, Selector::from(Group::States).resolve(osc.model()));
}
