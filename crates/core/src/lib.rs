//! # igw core
//!
//! Shared building blocks for the iSCSI gateway operator: the error
//! taxonomy, layered configuration, the relation data model handed over by
//! the host substrate, and the seam through which external commands run.
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. Use:
//! - `?` operator for propagation
//! - `map`, `and_then` combinators for transformation
//! - `unwrap_or_default()`, `unwrap_or_else()` for defaults

pub mod config;
mod error;
pub mod relation;
mod result;
pub mod runner;
pub mod unit;

pub use config::{CharmConfig, Config, PathsConfig, Release, load_config};
pub use error::Error;
pub use relation::{DataBag, RelationData};
pub use result::{Result, ResultExt};
pub use runner::{CommandOutput, CommandRunner, Invocation, RecordingRunner, SystemRunner};
pub use unit::{Binding, UnitInfo};
