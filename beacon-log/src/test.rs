use tracing_subscriber::EnvFilter;

#[doc(hidden)]
pub fn __init_test(module_path: &'static str, crates: &[&str]) {
    let calling_crate = module_path.split("::").next().unwrap_or(module_path);

    let directives = std::iter::once(calling_crate)
        .chain(crates.iter().copied())
        .map(|name| format!("{name}=trace"))
        .collect::<Vec<_>>()
        .join(",");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

/// Initializes logging for a test.
///
/// Logs go to the output captured by the test runner. Trace logs of the calling crate are
/// enabled, as well as those of every additional crate name given to the macro. Calling this
/// more than once is harmless.
///
/// ```
/// beacon_log::init_test!();
/// beacon_log::init_test!("beacon_seer", "beacon_metrics");
/// ```
#[macro_export]
macro_rules! init_test {
    ($($krate:literal),* $(,)?) => {
        $crate::__init_test(::std::module_path!(), &[$($krate),*])
    };
}
