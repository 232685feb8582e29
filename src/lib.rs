//! Client-side model synchronization.
//!
//! Records declared in a [`schema::Registry`] are loaded through an
//! [`adapter::Adapter`] into an identity-mapped [`store::Store`], edited
//! locally and committed back. A [`state::StateManager`] tracks which view
//! is active and [`view`] controllers keep rendered content current.

pub mod adapter;
pub mod app;
pub mod cli;
pub mod config;
pub mod events;
pub mod record;
pub mod schema;
pub mod serializer;
pub mod state;
pub mod store;
pub mod view;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Calling it twice is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .try_init();
}
