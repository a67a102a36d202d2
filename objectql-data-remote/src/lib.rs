//! # objectql-data-remote — Remote federation driver
//!
//! Adapts a remote ObjectQL endpoint as a first-class local driver:
//! `connect` fetches the remote's object catalog and injects every
//! definition into the local registry (tagged
//! `datasource = "remote:<base_url>"`); CRUD on those objects proxies
//! to the remote's `/api/objectql` operation endpoint.
//!
//! Federation is a driver, not a fallback — remote objects keep the
//! uniform hook and validation path of local ones.
//!
//! Transient connection failures retry with exponential backoff
//! (100 ms initial, doubling, capped, 10 attempts by default);
//! `VALIDATION_ERROR`, `UNAUTHORIZED`, `FORBIDDEN`, and `NOT_FOUND`
//! never retry. An unreachable remote at startup logs a warning and
//! mounts nothing.

mod client;
mod driver;

pub use client::{RemoteClient, RetryPolicy};
pub use driver::{RemoteDriver, RemoteOptions};
