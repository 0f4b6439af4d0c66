//! Concurrency-safe seat allocation and booking conflict detection for
//! academic record keeping.
//!
//! Classes and teachers are lockable rows. [`engine::Engine::allocate`]
//! assigns requesters to capacity-bounded classes and
//! [`engine::Engine::schedule`] books lessons, exams and leave without
//! overlaps. Every operation runs inside a serializable
//! [`engine::Transaction`] under the retry executor.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod interval;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;
