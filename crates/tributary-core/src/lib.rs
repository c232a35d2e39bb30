//! # Tributary Core
//!
//! Leaf components of the Tributary extraction engine. Nothing in this crate
//! performs I/O; connectors build on it through `tributary-connectors`.
//!
//! This crate provides:
//! - **Reservations**: A fixed capacity budget (typically memory) shared by
//!   concurrent readers, with blocking, serialized reservation attempts
//! - **Queries**: A structured description of a bounded read, compiled into
//!   a parameterized SQL string with typed bindings
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tributary_core::reservation::ReservationManager;
//!
//! let manager = Arc::new(ReservationManager::new(1024));
//! let reservation = manager.reserve_for(512, "partition-0")?;
//! assert_eq!(manager.reserved(), 512);
//! drop(reservation); // capacity is returned on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::float_cmp, clippy::cast_possible_truncation))]

pub mod query;
pub mod reservation;

pub use query::{SelectQuery, SelectQueryGenerator, SelectQueryRoot};
pub use reservation::{Reservation, ReservationManager};

/// Result type for tributary-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tributary-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reservation errors
    #[error("Reservation error: {0}")]
    Reservation(#[from] reservation::ReservationError),

    /// Query compilation errors
    #[error("Query error: {0}")]
    Query(#[from] query::QueryError),
}
