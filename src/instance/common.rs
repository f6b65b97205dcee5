//! Verbs shared by both interface kinds: experiment setup, initialization,
//! termination and reset, the typed get/set protocol, FMU state capture and
//! directional derivatives.

use std::ffi::{CStr, CString};

use crate::binding::{self, fmi2FMUstate};
use crate::jacobian::{BlockKey, JacobianBlock, SensitivityProvider};
use crate::model::Model;
use crate::resolver::Selector;
use crate::{Error, Result, Success};

use super::{allowed, InterfaceTag, Instance, ModelState, Op};

pub(crate) fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::InvalidCString(s.to_owned()))
}

/// Which window of the pre-run protocol a start-value write belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// Between `fmi2Instantiate` and `fmi2EnterInitializationMode`.
    BeforeInitialization,
    /// Inside initialization mode, where approximate guesses are frozen.
    InInitialization,
}

/// A captured native FMU state.
///
/// Freeing requires the owning instance, so dropping an unfreed capture can
/// only log; call [`Instance::free_fmu_state`] to release the native memory.
pub struct FmuState {
    ptr: fmi2FMUstate,
    captured_in: ModelState,
}

impl Drop for FmuState {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            log::debug!("FMU state dropped without free_fmu_state; native memory leaks");
        }
    }
}

impl<'a, Tag: InterfaceTag> Instance<'a, Tag> {
    pub fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<Success> {
        self.require(Op::SetupExperiment)?;
        let f = self.fmu.api().setup_experiment.get()?;
        let raw = unsafe {
            f(
                self.component()?,
                tolerance.is_some() as binding::fmi2Boolean,
                tolerance.unwrap_or(0.0),
                start_time,
                stop_time.is_some() as binding::fmi2Boolean,
                stop_time.unwrap_or(0.0),
            )
        };
        let success = self.consume_status(Op::SetupExperiment, raw)?;
        self.time = start_time;
        Ok(success)
    }

    pub fn enter_initialization_mode(&mut self) -> Result<Success> {
        self.require(Op::EnterInitialization)?;
        let f = self.fmu.api().enter_initialization_mode.get()?;
        let raw = unsafe { f(self.component()?) };
        let success = self.consume_status(Op::EnterInitialization, raw)?;
        self.state = ModelState::InitializationMode;
        Ok(success)
    }

    pub fn exit_initialization_mode(&mut self) -> Result<Success> {
        self.require(Op::ExitInitialization)?;
        let f = self.fmu.api().exit_initialization_mode.get()?;
        let raw = unsafe { f(self.component()?) };
        let success = self.consume_status(Op::ExitInitialization, raw)?;
        self.state = Tag::AFTER_INIT;
        Ok(success)
    }

    pub fn terminate(&mut self) -> Result<Success> {
        self.require(Op::Terminate)?;
        let f = self.fmu.api().terminate.get()?;
        let raw = unsafe { f(self.component()?) };
        let success = self.consume_status(Op::Terminate, raw)?;
        self.state = ModelState::Terminated;
        Ok(success)
    }

    /// Terminate if the state machine allows it, otherwise do nothing.
    /// For teardown paths that must not mask an earlier error.
    pub fn terminate_soft(&mut self) -> Result<Success> {
        if allowed(Op::Terminate, self.state) {
            self.terminate()
        } else {
            log::trace!("`{}`: skipping terminate in state {:?}", self.name, self.state);
            Ok(Success::Ok)
        }
    }

    /// Return to the `Instantiated` state, discarding all progress.
    ///
    /// Uses native `fmi2Reset` when exported, and otherwise frees and
    /// re-instantiates the native instance behind the same handle.
    pub fn reset(&mut self) -> Result<Success> {
        self.require(Op::Reset)?;
        let success = if self.fmu.api().reset.is_resolved() {
            let f = self.fmu.api().reset.get()?;
            let raw = unsafe { f(self.component()?) };
            self.consume_status(Op::Reset, raw)?
        } else {
            self.reinstantiate()?;
            Success::Ok
        };
        self.state = ModelState::Instantiated;
        self.time = 0.0;
        self.last_time = None;
        self.last_states = None;
        self.jacobian.invalidate_all();
        Ok(success)
    }

    /// Reset if the state machine allows it, otherwise do nothing.
    pub fn reset_soft(&mut self) -> Result<Success> {
        if allowed(Op::Reset, self.state) {
            self.reset()
        } else {
            log::trace!("`{}`: skipping reset in state {:?}", self.name, self.state);
            Ok(Success::Ok)
        }
    }

    fn reinstantiate(&mut self) -> Result<()> {
        log::debug!(
            "`{}`: fmi2Reset not exported, re-instantiating instead",
            self.name
        );
        let f = self.fmu.api().instantiate.get()?;
        let free = self.fmu.api().free_instance.get()?;
        let name_c = cstring(&self.name)?;
        let guid_c = cstring(self.fmu.model().guid())?;
        let resource_c = cstring(self.fmu.resource_url().as_str())?;

        let ptr = unsafe {
            f(
                name_c.as_ptr(),
                Tag::KIND,
                guid_c.as_ptr(),
                resource_c.as_ptr(),
                &*self.callbacks,
                self.visible as binding::fmi2Boolean,
                self.logging_on as binding::fmi2Boolean,
            )
        };
        if ptr.is_null() {
            return Err(Error::Instantiation {
                name: self.name.clone(),
            });
        }
        // The old native instance is released only once its replacement
        // exists, so a failed reset leaves the instance usable.
        let old = self.fmu.handles().replace(self.handle, ptr)?;
        unsafe { free(old) };
        Ok(())
    }

    pub fn set_debug_logging(&mut self, logging_on: bool, categories: &[&str]) -> Result<Success> {
        self.require(Op::SetDebugLogging)?;
        let f = self.fmu.api().set_debug_logging.get()?;
        let cstrs = categories
            .iter()
            .map(|c| cstring(c))
            .collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<binding::fmi2String> = cstrs.iter().map(|c| c.as_ptr()).collect();
        let raw = unsafe {
            f(
                self.component()?,
                logging_on as binding::fmi2Boolean,
                ptrs.len(),
                ptrs.as_ptr(),
            )
        };
        self.consume_status(Op::SetDebugLogging, raw)
    }

    // ------------------------------------------------------------------
    // Typed value protocol.

    pub fn get_real(&mut self, selector: impl Into<Selector>) -> Result<Vec<f64>> {
        let vrs = selector.into().resolve(self.fmu.model());
        self.read_real_refs(&vrs)
    }

    pub fn set_real(&mut self, selector: impl Into<Selector>, values: &[f64]) -> Result<Success> {
        let vrs = selector.into().resolve(self.fmu.model());
        self.write_real_refs(&vrs, values)
    }

    pub(crate) fn read_real_refs(&mut self, vrs: &[u32]) -> Result<Vec<f64>> {
        self.require(Op::Read)?;
        if vrs.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fmu.api().get_real.get()?;
        let mut values = vec![0.0; vrs.len()];
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), values.as_mut_ptr()) };
        self.consume_status(Op::Read, raw)?;
        Ok(values)
    }

    pub(crate) fn write_real_refs(&mut self, vrs: &[u32], values: &[f64]) -> Result<Success> {
        check_lengths(vrs, values.len())?;
        self.require(Op::Write)?;
        if vrs.is_empty() {
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_real.get()?;
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), values.as_ptr()) };
        let success = self.consume_status(Op::Write, raw)?;
        self.jacobian.invalidate_written(vrs);
        Ok(success)
    }

    pub fn get_integer(&mut self, selector: impl Into<Selector>) -> Result<Vec<i32>> {
        let vrs = selector.into().resolve(self.fmu.model());
        self.require(Op::Read)?;
        if vrs.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fmu.api().get_integer.get()?;
        let mut values = vec![0; vrs.len()];
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), values.as_mut_ptr()) };
        self.consume_status(Op::Read, raw)?;
        Ok(values)
    }

    pub fn set_integer(&mut self, selector: impl Into<Selector>, values: &[i32]) -> Result<Success> {
        let vrs = selector.into().resolve(self.fmu.model());
        check_lengths(&vrs, values.len())?;
        self.require(Op::Write)?;
        if vrs.is_empty() {
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_integer.get()?;
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), values.as_ptr()) };
        let success = self.consume_status(Op::Write, raw)?;
        self.jacobian.invalidate_written(&vrs);
        Ok(success)
    }

    pub fn get_boolean(&mut self, selector: impl Into<Selector>) -> Result<Vec<bool>> {
        let vrs = selector.into().resolve(self.fmu.model());
        self.require(Op::Read)?;
        if vrs.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fmu.api().get_boolean.get()?;
        let mut values: Vec<binding::fmi2Boolean> = vec![binding::fmi2False; vrs.len()];
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), values.as_mut_ptr()) };
        self.consume_status(Op::Read, raw)?;
        Ok(values.into_iter().map(|v| v != binding::fmi2False).collect())
    }

    pub fn set_boolean(&mut self, selector: impl Into<Selector>, values: &[bool]) -> Result<Success> {
        let vrs = selector.into().resolve(self.fmu.model());
        check_lengths(&vrs, values.len())?;
        self.require(Op::Write)?;
        if vrs.is_empty() {
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_boolean.get()?;
        let raw_values: Vec<binding::fmi2Boolean> = values
            .iter()
            .map(|&v| if v { binding::fmi2True } else { binding::fmi2False })
            .collect();
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), raw_values.as_ptr()) };
        let success = self.consume_status(Op::Write, raw)?;
        self.jacobian.invalidate_written(&vrs);
        Ok(success)
    }

    /// Strings are copied out immediately; the native buffers are only
    /// valid until the next call into the binary.
    pub fn get_string(&mut self, selector: impl Into<Selector>) -> Result<Vec<String>> {
        let vrs = selector.into().resolve(self.fmu.model());
        self.require(Op::Read)?;
        if vrs.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fmu.api().get_string.get()?;
        let mut raw_values: Vec<binding::fmi2String> = vec![std::ptr::null(); vrs.len()];
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), raw_values.as_mut_ptr()) };
        self.consume_status(Op::Read, raw)?;
        Ok(raw_values
            .into_iter()
            .map(|p| {
                if p.is_null() {
                    String::new()
                } else {
                    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
                }
            })
            .collect())
    }

    pub fn set_string(&mut self, selector: impl Into<Selector>, values: &[&str]) -> Result<Success> {
        let vrs = selector.into().resolve(self.fmu.model());
        check_lengths(&vrs, values.len())?;
        self.require(Op::Write)?;
        if vrs.is_empty() {
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_string.get()?;
        let cstrs = values.iter().map(|v| cstring(v)).collect::<Result<Vec<_>>>()?;
        let ptrs: Vec<binding::fmi2String> = cstrs.iter().map(|c| c.as_ptr()).collect();
        let raw = unsafe { f(self.component()?, vrs.as_ptr(), vrs.len(), ptrs.as_ptr()) };
        let success = self.consume_status(Op::Write, raw)?;
        self.jacobian.invalidate_written(&vrs);
        Ok(success)
    }

    /// Push every eligible XML start value to the native instance.
    /// Returns the number of variables written.
    pub fn apply_start_values(&mut self, phase: StartPhase) -> Result<usize> {
        let model = self.fmu.model();
        let mut reals: (Vec<u32>, Vec<f64>) = Default::default();
        let mut integers: (Vec<u32>, Vec<i32>) = Default::default();
        let mut booleans: (Vec<u32>, Vec<bool>) = Default::default();
        let mut strings: (Vec<u32>, Vec<String>) = Default::default();

        for v in model.variables() {
            let eligible = match phase {
                StartPhase::BeforeInitialization => Model::settable_before_initialization(v),
                StartPhase::InInitialization => Model::settable_in_initialization(v),
            };
            if !eligible {
                continue;
            }
            use fmu_schema::TypedElement::*;
            match &v.elem {
                Real { start: Some(s), .. } => {
                    reals.0.push(v.value_reference);
                    reals.1.push(*s);
                }
                Integer { start: Some(s), .. } | Enumeration { start: Some(s), .. } => {
                    integers.0.push(v.value_reference);
                    integers.1.push(*s);
                }
                Boolean { start: Some(s), .. } => {
                    booleans.0.push(v.value_reference);
                    booleans.1.push(*s);
                }
                String { start: Some(s), .. } => {
                    strings.0.push(v.value_reference);
                    strings.1.push(s.clone());
                }
                _ => {}
            }
        }

        let count = reals.0.len() + integers.0.len() + booleans.0.len() + strings.0.len();
        self.set_real(reals.0, &reals.1)?;
        self.set_integer(integers.0, &integers.1)?;
        self.set_boolean(booleans.0, &booleans.1)?;
        let str_refs: Vec<&str> = strings.1.iter().map(|s| s.as_str()).collect();
        self.set_string(strings.0, &str_refs)?;
        log::debug!("`{}`: applied {count} start values ({phase:?})", self.name);
        Ok(count)
    }

    // ------------------------------------------------------------------
    // FMU state capture.

    pub fn get_fmu_state(&mut self) -> Result<FmuState> {
        self.require(Op::GetState)?;
        let f = self.fmu.api().get_fmu_state.get()?;
        let mut ptr: fmi2FMUstate = std::ptr::null_mut();
        let raw = unsafe { f(self.component()?, &mut ptr) };
        self.consume_status(Op::GetState, raw)?;
        Ok(FmuState {
            ptr,
            captured_in: self.state,
        })
    }

    /// Restore a captured state. The instance rejoins the state-machine
    /// position the capture was taken in; all host caches are dropped.
    pub fn set_fmu_state(&mut self, state: &FmuState) -> Result<Success> {
        self.require(Op::SetState)?;
        let f = self.fmu.api().set_fmu_state.get()?;
        let raw = unsafe { f(self.component()?, state.ptr) };
        let success = self.consume_status(Op::SetState, raw)?;
        self.state = state.captured_in;
        self.last_time = None;
        self.last_states = None;
        self.jacobian.invalidate_all();
        Ok(success)
    }

    pub fn free_fmu_state(&mut self, state: FmuState) -> Result<Success> {
        let mut state = state;
        let f = self.fmu.api().free_fmu_state.get()?;
        let raw = unsafe { f(self.component()?, &mut state.ptr) };
        state.ptr = std::ptr::null_mut();
        self.consume_status(Op::GetState, raw)
    }

    pub fn serialize_fmu_state(&mut self, state: &FmuState) -> Result<Vec<u8>> {
        self.require(Op::SerializeState)?;
        let size_f = self.fmu.api().serialized_fmu_state_size.get()?;
        let ser_f = self.fmu.api().serialize_fmu_state.get()?;
        let component = self.component()?;

        let mut size: usize = 0;
        let raw = unsafe { size_f(component, state.ptr, &mut size) };
        self.consume_status(Op::SerializeState, raw)?;

        let mut buf = vec![0u8; size];
        let raw = unsafe {
            ser_f(
                component,
                state.ptr,
                buf.as_mut_ptr() as *mut binding::fmi2Byte,
                size,
            )
        };
        self.consume_status(Op::SerializeState, raw)?;
        Ok(buf)
    }

    pub fn deserialize_fmu_state(&mut self, data: &[u8]) -> Result<FmuState> {
        self.require(Op::SerializeState)?;
        let f = self.fmu.api().de_serialize_fmu_state.get()?;
        let mut ptr: fmi2FMUstate = std::ptr::null_mut();
        let raw = unsafe {
            f(
                self.component()?,
                data.as_ptr() as *const binding::fmi2Byte,
                data.len(),
                &mut ptr,
            )
        };
        self.consume_status(Op::SerializeState, raw)?;
        Ok(FmuState {
            ptr,
            captured_in: self.state,
        })
    }

    // ------------------------------------------------------------------
    // Sensitivities.

    /// One raw `fmi2GetDirectionalDerivative` evaluation.
    pub fn directional_derivative(
        &mut self,
        unknowns: &[u32],
        knowns: &[u32],
        seed: &[f64],
    ) -> Result<Vec<f64>> {
        check_lengths(knowns, seed.len())?;
        self.require(Op::DirectionalDerivative)?;
        let f = self.fmu.api().get_directional_derivative.get()?;
        let mut out = vec![0.0; unknowns.len()];
        let raw = unsafe {
            f(
                self.component()?,
                unknowns.as_ptr(),
                unknowns.len(),
                knowns.as_ptr(),
                knowns.len(),
                seed.as_ptr(),
                out.as_mut_ptr(),
            )
        };
        self.consume_status(Op::DirectionalDerivative, raw)?;
        Ok(out)
    }

    /// The cached Jacobian block for `key`, assembled on demand via the
    /// best available path (directional derivatives, declared-zero
    /// short-circuit, central differences).
    pub fn jacobian_block(
        &mut self,
        key: BlockKey,
        steps: Option<&[f64]>,
    ) -> Result<JacobianBlock> {
        let mut cache = std::mem::take(&mut self.jacobian);
        let result = cache
            .get_or_compute(self, key, steps)
            .map(|block| block.clone());
        self.jacobian = cache;
        result
    }

    // ------------------------------------------------------------------
    // Recording.

    /// Capture the current time, states and outputs into the solution
    /// buffer, snapshotting the sensitivity counters with them.
    pub fn record(&mut self) -> Result<()> {
        let model = self.fmu.model();
        let states = self.read_real_refs(model.state_refs())?;
        let outputs = self.read_real_refs(model.output_refs())?;
        let time = self.time;
        self.solution.push(time, &states, &outputs);
        let (directional, sampled) = self.jacobian.evals();
        self.solution.record_evals(directional, sampled);
        Ok(())
    }
}

impl<'a, Tag: InterfaceTag> SensitivityProvider for Instance<'a, Tag> {
    fn model(&self) -> &Model {
        self.fmu.model()
    }

    fn read_reals(&mut self, vrs: &[u32]) -> Result<Vec<f64>> {
        self.read_real_refs(vrs)
    }

    fn write_reals(&mut self, vrs: &[u32], values: &[f64]) -> Result<()> {
        self.write_real_refs(vrs, values).map(|_| ())
    }

    fn directional_derivative(
        &mut self,
        unknowns: &[u32],
        knowns: &[u32],
        seed: &[f64],
    ) -> Option<Result<Vec<f64>>> {
        if !self.fmu.api().get_directional_derivative.is_resolved() {
            return None;
        }
        Some(Instance::directional_derivative(self, unknowns, knowns, seed))
    }

    fn time(&self) -> f64 {
        self.time
    }

    fn supports_time_perturbation(&self) -> bool {
        Tag::CAN_SET_TIME
            && self.fmu.api().set_time.is_resolved()
            && allowed(Op::SetTime, self.state)
    }

    /// Raw time move for sampling; deliberately bypasses elision and cache
    /// invalidation since the caller restores the center afterwards.
    fn set_time_for_sampling(&mut self, t: f64) -> Result<()> {
        let f = self.fmu.api().set_time.get()?;
        let raw = unsafe { f(self.component()?, t) };
        self.consume_status(Op::SetTime, raw)?;
        Ok(())
    }
}

pub(crate) fn check_lengths(vrs: &[u32], values: usize) -> Result<()> {
    if vrs.len() == values {
        Ok(())
    } else {
        Err(Error::LengthMismatch {
            expected: vrs.len(),
            got: values,
        })
    }
}
