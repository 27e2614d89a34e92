//! Async Rust client for the Apple Business Manager and Apple School Manager APIs.
//!
//! Provides ES256 client-assertion signing, a file-backed access-token cache,
//! a token broker that only talks to the token endpoint when the cache is
//! stale, and a paginated fetcher with bounded per-page retry.
//!
//! # Modules
//!
//! - [`assertion`] — Signed JWT client assertions.
//! - [`auth`] — Token broker: cache first, exchange on miss.
//! - [`cache`] — Single-record token cache with atomic writes.
//! - [`client`] — Authenticated HTTP fetcher that follows `links.next`.
//! - [`config`] — Service mode, identity, and run configuration.
//! - [`devices`] — The `orgDevices` collection.
//! - [`error`] — Typed error hierarchy (`AbmError`) for all library operations.
//!
//! # Quick Start
//!
//! ```ignore
//! use abm_client::config::{Config, Identity, ServiceMode};
//! use abm_client::devices::fetch_org_devices;
//!
//! let identity = Identity::from_pem_file(path, "BUSINESSAPI.xxxx", "BUSINESSAPI.xxxx", "key-id")?;
//! let config = Config::new(ServiceMode::Business);
//! let devices = fetch_org_devices(&config, identity).await?;
//! ```

#![warn(missing_docs)]

pub mod assertion;
pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod devices;
pub mod error;
