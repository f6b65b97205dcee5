//! The Co-Simulation surface: communication steps, step cancellation and
//! the slave status queries.

use crate::binding;
use crate::{Error, Result, Status, StatusError, Success};

use super::common::check_lengths;
use super::{Instance, Op, CS};

impl<'a> Instance<'a, CS> {
    /// Advance the slave by one communication step.
    ///
    /// `fmi2Discard` surfaces as an error without advancing host time; use
    /// [`Instance::last_successful_time`] to find out how far the slave
    /// got. A `Pending` return (asynchronous slaves) also leaves host time
    /// untouched until the step is polled to completion.
    pub fn do_step(&mut self, current_communication_point: f64, step_size: f64) -> Result<Success> {
        self.require(Op::DoStep)?;
        let f = self.fmu.api().do_step.get()?;
        let raw = unsafe {
            f(
                self.component()?,
                current_communication_point,
                step_size,
                binding::fmi2True,
            )
        };
        let success = match self.consume_status(Op::DoStep, raw) {
            Err(Error::Status(StatusError::Discard)) => {
                log::debug!(
                    "`{}`: fmi2DoStep discarded at t={current_communication_point}",
                    self.name
                );
                return Err(Error::Status(StatusError::Discard));
            }
            other => other?,
        };
        if success != Success::Pending {
            self.time = current_communication_point + step_size;
        }
        Ok(success)
    }

    /// Cancel an asynchronous step that reported `Pending`.
    pub fn cancel_step(&mut self) -> Result<Success> {
        self.require(Op::CancelStep)?;
        let f = self.fmu.api().cancel_step.get()?;
        let raw = unsafe { f(self.component()?) };
        self.consume_status(Op::CancelStep, raw)
    }

    /// Poll the status of the last asynchronous `fmi2DoStep`.
    pub fn do_step_status(&mut self) -> Result<Status> {
        self.require(Op::ReadStatus)?;
        let f = self.fmu.api().get_status.get()?;
        let mut value: binding::fmi2Status = binding::fmi2OK;
        let raw = unsafe { f(self.component()?, binding::fmi2DoStepStatus, &mut value) };
        self.consume_status(Op::ReadStatus, raw)?;
        Ok(Status::from_raw(value))
    }

    /// How far the slave actually advanced, meaningful after a discarded or
    /// cancelled step.
    pub fn last_successful_time(&mut self) -> Result<f64> {
        self.require(Op::ReadStatus)?;
        let f = self.fmu.api().get_real_status.get()?;
        let mut value = 0.0;
        let raw = unsafe { f(self.component()?, binding::fmi2LastSuccessfulTime, &mut value) };
        self.consume_status(Op::ReadStatus, raw)?;
        Ok(value)
    }

    /// Whether the slave stopped at an internally detected end of the
    /// simulation.
    pub fn terminated_by_slave(&mut self) -> Result<bool> {
        self.require(Op::ReadStatus)?;
        let f = self.fmu.api().get_boolean_status.get()?;
        let mut value = binding::fmi2False;
        let raw = unsafe { f(self.component()?, binding::fmi2Terminated, &mut value) };
        self.consume_status(Op::ReadStatus, raw)?;
        Ok(value != binding::fmi2False)
    }

    /// Provide input derivatives for interpolation inside the next step.
    pub fn set_real_input_derivatives(
        &mut self,
        vrs: &[u32],
        orders: &[i32],
        values: &[f64],
    ) -> Result<Success> {
        check_lengths(vrs, orders.len())?;
        check_lengths(vrs, values.len())?;
        self.require(Op::Write)?;
        if vrs.is_empty() {
            return Ok(Success::Ok);
        }
        let f = self.fmu.api().set_real_input_derivatives.get()?;
        let raw = unsafe {
            f(
                self.component()?,
                vrs.as_ptr(),
                vrs.len(),
                orders.as_ptr(),
                values.as_ptr(),
            )
        };
        self.consume_status(Op::Write, raw)
    }

    /// Read output derivatives up to the order the binary advertises in
    /// `maxOutputDerivativeOrder`.
    pub fn get_real_output_derivatives(
        &mut self,
        vrs: &[u32],
        orders: &[i32],
    ) -> Result<Vec<f64>> {
        check_lengths(vrs, orders.len())?;
        self.require(Op::Read)?;
        if vrs.is_empty() {
            return Ok(Vec::new());
        }
        let f = self.fmu.api().get_real_output_derivatives.get()?;
        let mut values = vec![0.0; vrs.len()];
        let raw = unsafe {
            f(
                self.component()?,
                vrs.as_ptr(),
                vrs.len(),
                orders.as_ptr(),
                values.as_mut_ptr(),
            )
        };
        self.consume_status(Op::Read, raw)?;
        Ok(values)
    }
}
