//! # relayq
//!
//! A minimal work queue on top of an ordered-list store: producers push JSON
//! job envelopes onto named queues, a worker loop atomically moves each job
//! into an in-flight list, dispatches it to a registered handler, and records
//! the outcome in a bounded success or failure history list.
//!
//! Backends implement the [`store::ListStore`] contract; an in-process store
//! and a Postgres store ship with the crate.

pub mod config;
pub mod envelope;
pub mod error;
pub mod history;
pub mod producer;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod worker;
