//! Tollgate - dual-layer request throttling
//!
//! This crate paces calls to an expensive downstream (an AI chat endpoint)
//! at two points. A persisted client-side token bucket smooths a caller
//! before its request leaves, and an in-memory server-side fixed-window
//! limiter authoritatively caps inbound requests per caller and per route.
//! The two share no state; each server process limits independently.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
