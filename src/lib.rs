//! Court scheduling and availability for sports arenas: business hours,
//! blackouts, price bands and race-free reservations over a pluggable store.

pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod store;
pub mod wal;
