use gossa_core::error::Error;
use gossa_core::span::Span;

/// Create an error for ill-formed input found while building `function`
pub fn input_error(function: impl Into<String>, span: Span, message: impl Into<String>) -> Error {
    Error::input(function, span, message)
}

/// Create an error for a broken invariant of the SSA form of `function`
pub fn invariant_error(function: impl Into<String>, message: impl Into<String>) -> Error {
    Error::invariant(function, message)
}

// Convenience macros for reporting build errors

/// Macro to return early with an input error
#[macro_export]
macro_rules! build_bail {
    ($function:expr, $span:expr, $($arg:tt)*) => {
        return Err($crate::error::input_error($function, $span, format!($($arg)*)))
    };
}

/// Macro to ensure a condition holds for the input, or return an input error
#[macro_export]
macro_rules! build_ensure {
    ($cond:expr, $function:expr, $span:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::build_bail!($function, $span, $($arg)*);
        }
    };
}

/// Macro to return early with an invariant violation
#[macro_export]
macro_rules! invariant_bail {
    ($function:expr, $($arg:tt)*) => {
        return Err($crate::error::invariant_error($function, format!($($arg)*)))
    };
}
