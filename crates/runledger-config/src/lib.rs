//! # runledger-config
//!
//! Loads [`ServiceConfig`] from `~/.runledger/config.yaml` (or an explicit
//! path), applies environment overrides and validates the result.
//!
//! ```no_run
//! use runledger_config::ServiceConfig;
//!
//! let config = ServiceConfig::load(None)?;
//! println!("listening on {}", config.listen_addr);
//! # Ok::<(), runledger_core::CoreError>(())
//! ```

pub mod service;

pub use service::{DEFAULT_PORT, ServiceConfig, config_path, env};
