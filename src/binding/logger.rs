//! Routes the variadic FMI logger callback into the `log` crate.
//!
//! The printf-style expansion cannot be done in Rust, so a small C shim
//! (`logger.c`, compiled by the build script) formats the message with
//! `vsnprintf` and hands the finished string to [`logger_sink`].

use std::ffi::CStr;

use super::{fmi2ComponentEnvironment, fmi2Status, fmi2String};
use crate::Status;

extern "C" {
    /// The variadic entry handed to the binary in `fmi2CallbackFunctions`.
    pub fn callback_logger(
        component_environment: fmi2ComponentEnvironment,
        instance_name: fmi2String,
        status: fmi2Status,
        category: fmi2String,
        message: fmi2String,
        ...
    );
}

/// Safety: `ptr` must be null or a valid nul-terminated string outliving `'a`.
unsafe fn cstr_or<'a>(ptr: fmi2String, fallback: &'a str) -> &'a str {
    if ptr.is_null() {
        fallback
    } else {
        CStr::from_ptr(ptr).to_str().unwrap_or(fallback)
    }
}

/// Called by the C shim with the fully formatted message.
#[no_mangle]
extern "C" fn logger_sink(
    _component_environment: fmi2ComponentEnvironment,
    instance_name: fmi2String,
    status: fmi2Status,
    category: fmi2String,
    message: fmi2String,
) {
    let instance_name = unsafe { cstr_or(instance_name, "?") };
    let category = unsafe { cstr_or(category, "") };
    let message = unsafe { cstr_or(message, "") };

    let level = match Status::from_raw(status) {
        Status::Ok => log::Level::Info,
        Status::Warning => log::Level::Warn,
        Status::Discard => log::Level::Warn,
        Status::Error | Status::Fatal => log::Level::Error,
        Status::Pending => log::Level::Trace,
    };

    log::logger().log(
        &log::Record::builder()
            .level(level)
            .target(instance_name)
            .args(format_args!("[{category}] {message}"))
            .build(),
    );
}
