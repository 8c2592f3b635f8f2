//! # Test Utilities for mdoc Verification
//!
//! Issuer, holder and reader fixtures that produce real, signed mdoc
//! presentations for testing.
//!
//! This crate provides common utilities for the project's tests and is not
//! intended to be used directly.

pub mod holder;
pub mod issuer;
pub mod verifier;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

// initalise tracing once for all tests
static INIT: Once = Once::new();

/// Initialise tracing for tests. The filter is read from `RUST_LOG`,
/// defaulting to `error`.
///
/// # Panics
///
/// Panics if the tracing subscriber cannot be set.
pub fn init_tracer() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().finish();
        tracing::subscriber::set_global_default(subscriber).expect("subscriber set");
    });
}
