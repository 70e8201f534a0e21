//! Testing utilities and end-to-end tests.
//!
//! [`mock_server`] hosts an in-process memcached speaking either wire
//! dialect; the test modules drive the full client pipeline against it
//! over real loopback TCP.

pub mod mock_server;

pub use mock_server::MockServer;

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call from
/// every test; only the first call wins.
#[cfg(test)]
pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod adaptor_tests;
#[cfg(test)]
mod blocking_tests;
#[cfg(test)]
mod client_tests;
#[cfg(test)]
mod recovery_tests;
#[cfg(test)]
mod text_tests;
