//! The Model Exchange surface: mode switches, the event iteration, and the
//! continuous-time protocol driven by an external integrator.

use crate::binding::{self, fmi2EventInfo};
use crate::{Error, Result, Success};

use super::{Instance, ModelState, Op, ME};

/// Result of one `fmi2NewDiscreteStates` round.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStep {
    pub new_discrete_states_needed: bool,
    pub terminate_simulation: bool,
    pub nominals_changed: bool,
    pub values_changed: bool,
    pub next_event_time: Option<f64>,
}

impl From<fmi2EventInfo> for EventStep {
    fn from(info: fmi2EventInfo) -> Self {
        Self {
            new_discrete_states_needed: info.newDiscreteStatesNeeded != binding::fmi2False,
            terminate_simulation: info.terminateSimulation != binding::fmi2False,
            nominals_changed: info.nominalsOfContinuousStatesChanged != binding::fmi2False,
            values_changed: info.valuesOfContinuousStatesChanged != binding::fmi2False,
            next_event_time: (info.nextEventTimeDefined != binding::fmi2False)
                .then_some(info.nextEventTime),
        }
    }
}

/// Aggregated outcome of a whole event iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSummary {
    pub rounds: usize,
    pub terminate_simulation: bool,
    pub nominals_changed: bool,
    pub values_changed: bool,
    pub next_event_time: Option<f64>,
}

/// Drive `round` until the binary reports convergence, a termination
/// request, or the round budget runs out.
pub(crate) fn run_event_iteration(
    max_rounds: usize,
    mut round: impl FnMut() -> Result<EventStep>,
) -> Result<EventSummary> {
    let mut summary = EventSummary::default();
    loop {
        if summary.rounds >= max_rounds {
            return Err(Error::EventLoopStalled { limit: max_rounds });
        }
        let step = round()?;
        summary.rounds += 1;
        summary.terminate_simulation |= step.terminate_simulation;
        summary.nominals_changed |= step.nominals_changed;
        summary.values_changed |= step.values_changed;
        if step.next_event_time.is_some() {
            summary.next_event_time = step.next_event_time;
        }
        if step.terminate_simulation || !step.new_discrete_states_needed {
            return Ok(summary);
        }
    }
}

/// Whether a write of `next` may be skipped because it repeats the last
/// value the binary already holds.
pub(crate) fn elide_repeat<T: PartialEq + ?Sized>(
    skip_redundant: bool,
    force: bool,
    last: Option<&T>,
    next: &T,
) -> bool {
    !force && skip_redundant && last == Some(next)
}

/// Requests raised by `fmi2CompletedIntegratorStep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegratorStepOutcome {
    pub enter_event_mode: bool,
    pub terminate_simulation: bool,
}

impl<'a> Instance<'a, ME> {
    pub fn enter_event_mode(&mut self) -> Result<Success> {
        self.require(Op::EnterEventMode)?;
        let f = self.fmu.api().enter_event_mode.get()?;
        let raw = unsafe { f(self.component()?) };
        let success = self.consume_status(Op::EnterEventMode, raw)?;
        self.state = ModelState::EventMode;
        Ok(success)
    }

    pub fn enter_continuous_time_mode(&mut self) -> Result<Success> {
        self.require(Op::EnterContinuousTimeMode)?;
        let f = self.fmu.api().enter_continuous_time_mode.get()?;
        let raw = unsafe { f(self.component()?) };
        let success = self.consume_status(Op::EnterContinuousTimeMode, raw)?;
        self.state = ModelState::ContinuousTimeMode;
        Ok(success)
    }

    /// One `fmi2NewDiscreteStates` round.
    pub fn new_discrete_states(&mut self) -> Result<EventStep> {
        self.require(Op::NewDiscreteStates)?;
        let f = self.fmu.api().new_discrete_states.get()?;
        let mut info = fmi2EventInfo::default();
        let raw = unsafe { f(self.component()?, &mut info) };
        self.consume_status(Op::NewDiscreteStates, raw)?;
        Ok(EventStep::from(info))
    }

    /// Iterate `fmi2NewDiscreteStates` until convergence, bounded by
    /// [`super::Config::max_event_iterations`]. A termination request from
    /// the binary is honored by terminating the instance.
    pub fn do_event_iteration(&mut self) -> Result<EventSummary> {
        let max_rounds = self.config.max_event_iterations;
        let summary = run_event_iteration(max_rounds, || self.new_discrete_states())?;
        if summary.values_changed {
            self.last_states = None;
            self.jacobian.invalidate_all();
        }
        if summary.terminate_simulation {
            log::debug!("`{}`: binary requested termination during events", self.name);
            self.terminate()?;
        }
        Ok(summary)
    }

    /// Handle pending events and return to continuous-time mode.
    ///
    /// Enters event mode when called from continuous-time mode, runs the
    /// event iteration, and leaves the instance in continuous-time mode
    /// unless the binary asked to terminate (the summary's
    /// `terminate_simulation` flag tells the two outcomes apart).
    pub fn handle_events(&mut self) -> Result<EventSummary> {
        if self.state == ModelState::ContinuousTimeMode {
            self.enter_event_mode()?;
        }
        let summary = self.do_event_iteration()?;
        if !summary.terminate_simulation {
            self.enter_continuous_time_mode()?;
        }
        Ok(summary)
    }

    /// Set independent time. Repeats of the last written value are elided
    /// unless [`super::Config::skip_redundant_writes`] is off; a successful
    /// write invalidates every cached Jacobian block.
    pub fn set_time(&mut self, time: f64) -> Result<Success> {
        self.set_time_impl(time, false)
    }

    /// [`Instance::set_time`] without redundant-write elision.
    pub fn set_time_force(&mut self, time: f64) -> Result<Success> {
        self.set_time_impl(time, true)
    }

    fn set_time_impl(&mut self, time: f64, force: bool) -> Result<Success> {
        self.require(Op::SetTime)?;
        if elide_repeat(
            self.config.skip_redundant_writes,
            force,
            self.last_time.as_ref(),
            &time,
        ) {
            log::trace!("`{}`: eliding redundant fmi2SetTime({time})", self.name);
            self.time = time;
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_time.get()?;
        let raw = unsafe { f(self.component()?, time) };
        let success = self.consume_status(Op::SetTime, raw)?;
        self.time = time;
        self.last_time = Some(time);
        self.jacobian.invalidate_all();
        Ok(success)
    }

    /// Write the continuous state vector, with the same elision and
    /// whole-cache invalidation rules as [`Instance::set_time`].
    pub fn set_continuous_states(&mut self, states: &[f64]) -> Result<Success> {
        self.set_continuous_states_impl(states, false)
    }

    pub fn set_continuous_states_force(&mut self, states: &[f64]) -> Result<Success> {
        self.set_continuous_states_impl(states, true)
    }

    fn set_continuous_states_impl(&mut self, states: &[f64], force: bool) -> Result<Success> {
        let nx = self.fmu.model().num_states();
        if states.len() != nx {
            return Err(Error::LengthMismatch {
                expected: nx,
                got: states.len(),
            });
        }
        self.require(Op::SetContinuousStates)?;
        if elide_repeat(
            self.config.skip_redundant_writes,
            force,
            self.last_states.as_deref(),
            states,
        ) {
            log::trace!("`{}`: eliding redundant fmi2SetContinuousStates", self.name);
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_continuous_states.get()?;
        let raw = unsafe { f(self.component()?, states.as_ptr(), states.len()) };
        let success = self.consume_status(Op::SetContinuousStates, raw)?;
        self.last_states = Some(states.to_vec());
        self.jacobian.invalidate_all();
        Ok(success)
    }

    pub fn get_continuous_states(&mut self) -> Result<Vec<f64>> {
        self.require(Op::ReadDerivatives)?;
        let f = self.fmu.api().get_continuous_states.get()?;
        let mut states = vec![0.0; self.fmu.model().num_states()];
        let raw = unsafe { f(self.component()?, states.as_mut_ptr(), states.len()) };
        self.consume_status(Op::ReadDerivatives, raw)?;
        Ok(states)
    }

    pub fn get_derivatives(&mut self) -> Result<Vec<f64>> {
        self.require(Op::ReadDerivatives)?;
        let f = self.fmu.api().get_derivatives.get()?;
        let mut dx = vec![0.0; self.fmu.model().num_states()];
        let raw = unsafe { f(self.component()?, dx.as_mut_ptr(), dx.len()) };
        self.consume_status(Op::ReadDerivatives, raw)?;
        Ok(dx)
    }

    pub fn get_event_indicators(&mut self) -> Result<Vec<f64>> {
        self.require(Op::ReadDerivatives)?;
        let f = self.fmu.api().get_event_indicators.get()?;
        let mut indicators = vec![0.0; self.fmu.model().num_event_indicators()];
        let raw = unsafe { f(self.component()?, indicators.as_mut_ptr(), indicators.len()) };
        self.consume_status(Op::ReadDerivatives, raw)?;
        Ok(indicators)
    }

    pub fn get_nominals_of_continuous_states(&mut self) -> Result<Vec<f64>> {
        self.require(Op::ReadDerivatives)?;
        let f = self.fmu.api().get_nominals_of_continuous_states.get()?;
        let mut nominals = vec![1.0; self.fmu.model().num_states()];
        let raw = unsafe { f(self.component()?, nominals.as_mut_ptr(), nominals.len()) };
        self.consume_status(Op::ReadDerivatives, raw)?;
        Ok(nominals)
    }

    /// Notify the binary that an accepted integrator step is complete.
    pub fn completed_integrator_step(
        &mut self,
        no_set_state_prior: bool,
    ) -> Result<IntegratorStepOutcome> {
        self.require(Op::CompletedIntegratorStep)?;
        let f = self.fmu.api().completed_integrator_step.get()?;
        let mut enter_event_mode: binding::fmi2Boolean = binding::fmi2False;
        let mut terminate: binding::fmi2Boolean = binding::fmi2False;
        let raw = unsafe {
            f(
                self.component()?,
                no_set_state_prior as binding::fmi2Boolean,
                &mut enter_event_mode,
                &mut terminate,
            )
        };
        self.consume_status(Op::CompletedIntegratorStep, raw)?;
        Ok(IntegratorStepOutcome {
            enter_event_mode: enter_event_mode != binding::fmi2False,
            terminate_simulation: terminate != binding::fmi2False,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_stops_when_the_binary_converges() {
        let mut rounds = 0;
        let summary = run_event_iteration(10, || {
            rounds += 1;
            Ok(EventStep {
                new_discrete_states_needed: rounds < 3,
                values_changed: rounds == 1,
                ..Default::default()
            })
        })
        .unwrap();
        assert_eq!(summary.rounds, 3);
        assert!(summary.values_changed);
        assert!(!summary.terminate_simulation);
    }

    #[test]
    fn iteration_that_never_converges_is_bounded() {
        let err = run_event_iteration(5, || {
            Ok(EventStep {
                new_discrete_states_needed: true,
                ..Default::default()
            })
        })
        .unwrap_err();
        assert!(matches!(err, Error::EventLoopStalled { limit: 5 }));
    }

    #[test]
    fn termination_request_short_circuits() {
        let mut rounds = 0;
        let summary = run_event_iteration(10, || {
            rounds += 1;
            Ok(EventStep {
                new_discrete_states_needed: true,
                terminate_simulation: true,
                ..Default::default()
            })
        })
        .unwrap();
        assert_eq!(summary.rounds, 1);
        assert!(summary.terminate_simulation);
    }

    #[test]
    fn last_defined_event_time_wins() {
        let mut rounds = 0;
        let summary = run_event_iteration(10, || {
            rounds += 1;
            Ok(EventStep {
                new_discrete_states_needed: rounds < 3,
                next_event_time: match rounds {
                    1 => Some(1.0),
                    2 => None,
                    _ => Some(2.5),
                },
                ..Default::default()
            })
        })
        .unwrap();
        assert_eq!(summary.next_event_time, Some(2.5));
    }

    #[test]
    fn round_errors_propagate_immediately() {
        let mut rounds = 0;
        let err = run_event_iteration(10, || {
            rounds += 1;
            Err(Error::Status(crate::StatusError::Error))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Status(_)));
        assert_eq!(rounds, 1);
    }

    /// Drive a sequence of unforced writes through the elision predicate
    /// the way `set_time` does, counting the writes that reach the binary.
    fn count_writes(skip_redundant: bool, force: bool, values: &[f64]) -> usize {
        let mut last: Option<f64> = None;
        let mut writes = 0;
        for &v in values {
            if elide_repeat(skip_redundant, force, last.as_ref(), &v) {
                continue;
            }
            writes += 1;
            last = Some(v);
        }
        writes
    }

    #[test]
    fn repeated_time_value_is_written_exactly_once() {
        assert_eq!(count_writes(true, false, &[1.0, 1.0]), 1);
        assert_eq!(count_writes(true, false, &[1.0, 1.0, 2.0, 2.0, 1.0]), 3);
    }

    #[test]
    fn force_and_config_defeat_elision() {
        assert_eq!(count_writes(true, true, &[1.0, 1.0]), 2);
        assert_eq!(count_writes(false, false, &[1.0, 1.0]), 2);
        // A write never elides against an unknown last value.
        assert!(!elide_repeat::<f64>(true, false, None, &1.0));
    }

    #[test]
    fn state_vectors_elide_by_value_not_identity() {
        let last = vec![1.0, 2.0];
        assert!(elide_repeat(true, false, Some(last.as_slice()), &[1.0, 2.0][..]));
        assert!(!elide_repeat(true, false, Some(last.as_slice()), &[1.0, 2.5][..]));
    }

    #[test]
    fn event_info_flags_convert_losslessly() {
        let info = fmi2EventInfo {
            newDiscreteStatesNeeded: binding::fmi2True,
            terminateSimulation: binding::fmi2False,
            nominalsOfContinuousStatesChanged: binding::fmi2True,
            valuesOfContinuousStatesChanged: binding::fmi2False,
            nextEventTimeDefined: binding::fmi2True,
            nextEventTime: 4.25,
        };
        let step = EventStep::from(info);
        assert!(step.new_discrete_states_needed);
        assert!(!step.terminate_simulation);
        assert!(step.nominals_changed);
        assert_eq!(step.next_event_time, Some(4.25));
    }
}
