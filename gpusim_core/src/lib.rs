//! Cycle-driven timing model for an AMD Evergreen-class GPU (`spec.md`).
//!
//! [`gpusim_isa`] owns the decoded instruction records and the uop pool
//! (C1); this crate adds everything stateful that runs them: the CF/ALU/TEX
//! pipeline triple inside one compute unit (C5-C8), the occupancy
//! calculator (C3), the event simulator (C4 glue), the GPU-wide scheduler
//! (C9), the driver ABI host calls through to launch and suspend on a grid
//! (C10), and the config/report/trace ambient stack.
//!
//! Modules are layered bottom-up: [`ndrange`] and [`config`] have no
//! dependents inside the crate; [`cf_engine`], [`alu_engine`], [`tex_engine`]
//! each own one pipeline stage; [`compute_unit`] composes the three;
//! [`gpu`] owns every compute unit plus ND-Range dispatch; [`driver`] is the
//! host-facing entry point above all of it.

pub mod alu_engine;
pub mod cf_engine;
pub mod compute_unit;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod gpu;
pub mod memory;
pub mod ndrange;
pub mod occupancy;
pub mod report;
pub mod tex_engine;
pub mod trace;

pub use config::Config;
pub use error::{ConfigError, DecodeError, Error, OccupancyError, Result, TerminationReason};
pub use gpu::Gpu;
