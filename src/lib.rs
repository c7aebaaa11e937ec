//! Floodgate - Sliding-Window Admission Control
//!
//! This crate implements the rate limiting layer of a multi-tenant HTTP
//! service. Requests are counted per tenant or per client address against a
//! normalized endpoint signature, using a two-window sliding estimate kept in a
//! shared counter store. When the store is unreachable, requests are admitted.

pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
pub mod store;
