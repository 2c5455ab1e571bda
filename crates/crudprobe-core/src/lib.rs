//! Crudprobe-core - multi-tenant CRUD and data-integrity validation engine
//!
//! This crate provides:
//! - Entity registry and synthetic test data
//! - System-under-test drivers (HTTP, WebDriver, in-process twin)
//! - Structural, tenant-isolation and cascade validators
//! - Cleanup tracking, concurrency stress and the test orchestrator

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod artifacts;
pub mod cascade;
pub mod config;
pub mod crud;
pub mod datagen;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod lifecycle;
pub mod ops;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod run;
pub mod shape;
pub mod stress;
pub mod suite;
pub mod tracker;

pub use config::{load_config, ProbeConfig};
pub use driver::{Driver, TenantId};
pub use error::{Error, OperationError, Result};
pub use orchestrator::{Orchestrator, RunSummary, TestCase, TestCaseRecord, Verdict};
pub use registry::{EntityDescriptor, EntityRegistry, EntityType};
pub use run::TestRun;
pub use suite::{build_suite, SuiteName};
