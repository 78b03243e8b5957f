//! Fiber-tagged trace output
//!
//! `fiber_debug!(tag, ...)` emits a trace line prefixed with the current
//! fiber's identity and an operation tag, e.g. `[shared-stack-7/yield]`.
//! The macro compiles to nothing unless the `debug-logging` feature is
//! enabled; format arguments are not even evaluated in production builds.

#[cfg(feature = "debug-logging")]
pub(crate) fn print(tag: &str, args: std::fmt::Arguments<'_>) {
    let ctx = crate::context::get();
    unsafe {
        if ctx.is_null() || (*ctx).current.is_null() {
            weft_core::ktrace!("[none/{}] {}", tag, args);
        } else {
            weft_core::ktrace!("[{}/{}] {}", &*(*ctx).current, tag, args);
        }
    }
}

#[cfg(feature = "debug-logging")]
macro_rules! fiber_debug {
    ($tag:expr, $($arg:tt)*) => {
        $crate::debug::print($tag, format_args!($($arg)*))
    };
}

#[cfg(not(feature = "debug-logging"))]
macro_rules! fiber_debug {
    ($tag:expr, $($arg:tt)*) => {{
        let _ = $tag;
    }};
}

pub(crate) use fiber_debug;
