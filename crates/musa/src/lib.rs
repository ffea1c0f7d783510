//! # Musa
//!
//! A lean bootstrapper process for libp2p DHT networks. The library exposes
//! the daemon's building blocks for the binary and for integration tests.
//!
//! ## Modules
//!
//! - `config` - flags, `MUSA_*` environment variables and defaults
//! - `identity` - the process keypair, generated or decoded
//! - `dht` - the Kademlia routing delegate, its record store and metrics
//! - `host` - libp2p host construction and listen addresses
//! - `bootstrap` - DHT bootstrap and the serving loop
//! - `shutdown` - the process lifetime and signal handling
//! - `daemon` - startup orchestration

pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod dht;
pub mod error;
pub mod host;
pub mod identity;
pub mod shutdown;

pub use config::{Cli, Command, Config, ConfigError};
pub use error::DaemonError;
pub use identity::{Identity, IdentityError};
pub use shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownState};
