//! Outbox polling worker (`spec.md` §4.8).

mod worker;

pub use worker::OutboxWorker;
