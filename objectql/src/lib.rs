//! ObjectQL — a metadata-driven data-access runtime.
//!
//! A schema registry describing objects (typed fields, validation
//! rules, state machines, actions, hooks, permissions) is bound to
//! pluggable storage drivers and exposed through a uniform operation
//! surface plus REST / JSON-RPC adapters.
//!
//! This facade crate re-exports the sub-crates behind feature flags.
//! Import everything you need with:
//!
//! ```ignore
//! use objectql::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature        | Default | Crate                   |
//! |----------------|---------|-------------------------|
//! | `memory`       | **yes** | `objectql-data-memory`  |
//! | `remote`       | no      | `objectql-data-remote`  |
//! | `http`         | no      | `objectql-http`         |
//! | `tracing-init` | no      | `tracing-subscriber`    |
//! | `full`         | no      | All of the above        |

pub use objectql_core;
pub use objectql_data;

// Re-export everything from the core runtime at the top level.
pub use objectql_core::*;

#[cfg(feature = "memory")]
pub use objectql_data_memory;
#[cfg(feature = "memory")]
pub use objectql_data_memory::MemoryDriver;

#[cfg(feature = "remote")]
pub use objectql_data_remote;
#[cfg(feature = "remote")]
pub use objectql_data_remote::RemoteDriver;

#[cfg(feature = "http")]
pub use objectql_http;

/// Install a `tracing` subscriber honoring `RUST_LOG`, for binaries
/// that have no logging setup of their own.
#[cfg(feature = "tracing-init")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

/// Re-exports of the most commonly used types.
pub mod prelude {
    pub use objectql_core::prelude::*;

    #[cfg(feature = "memory")]
    pub use objectql_data_memory::MemoryDriver;
    #[cfg(feature = "remote")]
    pub use objectql_data_remote::RemoteDriver;
    #[cfg(feature = "http")]
    pub use objectql_http::{routes, AuthUser};
}
