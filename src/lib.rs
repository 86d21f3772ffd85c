#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # igw
//!
//! Host-side adapters for the iSCSI gateway operator: the JSON snapshot
//! substrate backing the peer bus, storage broker and certificate authority,
//! the on-disk state store, and file templates.
//!
//! The reconciliation engine itself lives in `igw-reconciler`.

pub use igw_core;
pub use igw_reconciler;

pub mod substrate;
pub mod templates;
