//! osl_supermarket — a two-process supermarket concurrency simulator.
//!
//! A `Supermarket` peer runs many concurrent shoppers and cash registers;
//! a `Manager` peer observes register queue lengths and drives open/close
//! decisions, coupled over a fixed-frame ASCII protocol on a Unix stream
//! socket.
//!
//! # Modules
//!
//! - [`config`] - INI-loaded configuration for both peers
//! - [`cancel`] - process-wide graceful/brutal shutdown context
//! - [`queue`] - the closable concurrent FIFO ("CQ") underlying every handoff
//! - [`protocol`] - fixed-frame wire format and message codec
//! - [`customer`] - Customer state machine and task
//! - [`register`] - Cashier/Register state machine and task
//! - [`scheduler`] - minimum-queue scheduling (`reschedule`)
//! - [`reshuffle`] - periodic load-balancing task
//! - [`supermarket`] - the Supermarket peer's task assembly
//! - [`manager`] - the Manager peer's task assembly
//! - [`logging`] - tracing setup and the statistics sink
//! - [`error`] - error types shared by both peers

pub mod cancel;
pub mod config;
pub mod customer;
pub mod error;
pub mod logging;
pub mod manager;
pub mod protocol;
pub mod queue;
pub mod register;
pub mod reshuffle;
pub mod scheduler;
pub mod supermarket;

pub use cancel::CancelContext;
pub use error::{ManagerError, SupermarketError};
