//! Per-context logging.
//!
//! The original ties a single process-wide logger to `osdp_logger_init(name,
//! level, puts_fn)`, so every `osdp_t *` in the process shares one name tag.
//! Since this crate can host several independent [`crate::Cp`]/[`crate::Pd`]
//! instances in one process, `Logger` is instead a small value carried on
//! each PD record, tagging every `log` crate line with that instance's name
//! rather than reaching for a `static`.

use core::fmt;

/// Tags `log` crate output with this instance's configured name.
#[derive(Debug, Clone, Copy)]
pub struct Logger {
	name: &'static str,
}

impl Logger {
	pub const fn new(name: &'static str) -> Self {
		Self { name }
	}

	pub fn name(&self) -> &'static str {
		self.name
	}
}

impl Default for Logger {
	fn default() -> Self {
		Self::new("osdp")
	}
}

impl fmt::Display for Logger {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.name)
	}
}

/// Emits a `log::Level` record prefixed with a [`Logger`]'s name.
///
/// Used internally by `pd`/`cp` instead of calling `log::info!` etc.
/// directly, so every line carries the owning instance's tag the way the
/// original's `TAG "PD: "` prefix does per translation unit.
macro_rules! osdp_log {
	($level:expr, $logger:expr, $($arg:tt)+) => {
		log::log!($level, "[{}] {}", $logger.name(), format_args!($($arg)+))
	};
}

macro_rules! osdp_trace {
	($logger:expr, $($arg:tt)+) => { osdp_log!(log::Level::Trace, $logger, $($arg)+) };
}

macro_rules! osdp_debug {
	($logger:expr, $($arg:tt)+) => { osdp_log!(log::Level::Debug, $logger, $($arg)+) };
}

macro_rules! osdp_info {
	($logger:expr, $($arg:tt)+) => { osdp_log!(log::Level::Info, $logger, $($arg)+) };
}

macro_rules! osdp_warn {
	($logger:expr, $($arg:tt)+) => { osdp_log!(log::Level::Warn, $logger, $($arg)+) };
}

macro_rules! osdp_error {
	($logger:expr, $($arg:tt)+) => { osdp_log!(log::Level::Error, $logger, $($arg)+) };
}

pub(crate) use osdp_debug;
pub(crate) use osdp_error;
pub(crate) use osdp_info;
pub(crate) use osdp_trace;
pub(crate) use osdp_warn;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_logger_names_itself_osdp() {
		let logger = Logger::default();
		assert_eq!(logger.name(), "osdp");
	}

	#[test]
	fn custom_logger_keeps_its_name() {
		let logger = Logger::new("front-door");
		assert_eq!(logger.name(), "front-door");
	}
}
