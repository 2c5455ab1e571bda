//! Crudprobe - CRUD and data-integrity checks for multi-tenant applications
//!
//! Command-line surface over `crudprobe-core`.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

pub mod cli;
