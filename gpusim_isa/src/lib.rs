//! Decoded instruction records and the micro-op pool (C1).
//!
//! This crate is deliberately thin: it owns the data that the external
//! decoder would hand to a CF/ALU/TEX engine, plus the arena that engines use
//! to track in-flight uops. `gpusim_core` depends on it and adds everything
//! stateful (engines, compute units, the GPU scheduler).

pub mod inst;
pub mod uop;

pub use inst::{AluBundle, AluSlot, CfInst, ClauseId, DecodedText, TexInst};
pub use uop::{Uop, UopId, UopKind, UopPool, WavefrontId, WorkGroupId, WorkItemId};
