//! Column-oriented recording of simulation trajectories.

/// Sampled time series: one time column plus the state and output columns
/// captured with it, and a snapshot of the sensitivity evaluation counters.
#[derive(Debug, Default, Clone)]
pub struct Solution {
    times: Vec<f64>,
    /// Row-major, `num_states` entries per sample.
    states: Vec<f64>,
    num_states: usize,
    /// Row-major, `num_outputs` entries per sample.
    outputs: Vec<f64>,
    num_outputs: usize,
    directional_evals: usize,
    sampled_evals: usize,
}

impl Solution {
    pub fn new(num_states: usize, num_outputs: usize) -> Self {
        Self {
            num_states,
            num_outputs,
            ..Self::default()
        }
    }

    pub fn push(&mut self, time: f64, states: &[f64], outputs: &[f64]) {
        debug_assert_eq!(states.len(), self.num_states);
        debug_assert_eq!(outputs.len(), self.num_outputs);
        self.times.push(time);
        self.states.extend_from_slice(states);
        self.outputs.extend_from_slice(outputs);
    }

    pub fn record_evals(&mut self, directional: usize, sampled: usize) {
        self.directional_evals = directional;
        self.sampled_evals = sampled;
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn states_at(&self, sample: usize) -> &[f64] {
        let start = sample * self.num_states;
        &self.states[start..start + self.num_states]
    }

    pub fn outputs_at(&self, sample: usize) -> &[f64] {
        let start = sample * self.num_outputs;
        &self.outputs[start..start + self.num_outputs]
    }

    pub fn evals(&self) -> (usize, usize) {
        (self.directional_evals, self.sampled_evals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_keep_their_columns_aligned() {
        let mut sol = Solution::new(2, 1);
        sol.push(0.0, &[1.0, 0.0], &[1.0]);
        sol.push(0.1, &[0.9, -0.5], &[0.9]);
        assert_eq!(sol.len(), 2);
        assert_eq!(sol.times(), &[0.0, 0.1]);
        assert_eq!(sol.states_at(1), &[0.9, -0.5]);
        assert_eq!(sol.outputs_at(0), &[1.0]);
    }

    #[test]
    fn eval_snapshot_is_overwritten_not_accumulated() {
        let mut sol = Solution::new(0, 0);
        sol.record_evals(3, 8);
        sol.record_evals(5, 8);
        assert_eq!(sol.evals(), (5, 8));
    }
}
