//! The ALU engine (C6): VLIW bundle issue and stream-core time-multiplexing.
//!
//! One clause job is processed at a time (the ALU engine is a single shared
//! resource per compute unit); additional triggered clauses queue FIFO.
//! Pipeline stages per bundle: `FETCH_BUNDLE -> DECODE_BUNDLE -> READ ->
//! EXECUTE -> WRITE`.

use std::collections::VecDeque;

use gpusim_isa::{AluBundle, ClauseId, DecodedText};

use crate::error::DecodeError;
use crate::memory::{AccessKind, MemoryModule};
use crate::ndrange::WavefrontId;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Fetch { remaining: u32 },
    Decode,
    Read,
    Execute { remaining: u32 },
    Write,
}

#[derive(Debug, Clone, Copy)]
struct ClauseJob {
    wavefront: WavefrontId,
    clause: ClauseId,
    bundle_index: usize,
    phase: Phase,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AluStats {
    pub wavefront_count: u64,
    /// Number of VLIW bundles executed.
    pub instructions: u64,
    /// Sum of occupied slots across all executed bundles.
    pub instruction_slots: u64,
    pub local_mem_slots: u64,
    pub vliw_histogram: [u64; 5],
    pub cycles: u64,
}

pub struct AluEngineConfig {
    pub inst_mem_latency: u32,
    pub pe_latency: u32,
    pub num_stream_cores: u32,
    pub wavefront_size: u32,
    pub fetch_queue_size: u32,
}

pub struct AluEngine {
    queue: VecDeque<ClauseJob>,
    active: Option<ClauseJob>,
    config: AluEngineConfig,
    pub stats: AluStats,
}

/// Outcome of one `step` call.
pub enum AluOutcome {
    ClauseComplete { wavefront: WavefrontId },
}

impl AluEngine {
    #[must_use]
    pub fn new(config: AluEngineConfig) -> Self {
        AluEngine {
            queue: VecDeque::new(),
            active: None,
            config,
            stats: AluStats::default(),
        }
    }

    pub fn trigger_clause(&mut self, wavefront: WavefrontId, clause: ClauseId) {
        self.stats.wavefront_count += 1;
        self.queue.push_back(ClauseJob {
            wavefront,
            clause,
            bundle_index: 0,
            phase: Phase::Fetch {
                remaining: self.config.inst_mem_latency.saturating_sub(1),
            },
        });
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    fn fetch_stage_cycles(&self, bundle: &AluBundle) -> Result<u32, DecodeError> {
        if bundle.encoded_size() as u32 > self.config.fetch_queue_size {
            return Err(DecodeError::Malformed {
                pc: 0,
                reason: "bundle exceeds ALU fetch queue capacity".to_string(),
            });
        }
        Ok(self.config.inst_mem_latency)
    }

    fn execute_stage_cycles(&self) -> u32 {
        let replays = self
            .config
            .wavefront_size
            .div_ceil(self.config.num_stream_cores.max(1));
        self.config.pe_latency * replays
    }

    /// Advances the active (or next-queued) clause job by one phase. Local
    /// memory traffic is recorded through `local_memory` immediately;
    /// completion timing for those accesses is absorbed into the WRITE
    /// stage rather than separately tracked, since the ALU engine's own
    /// pipeline latency already dominates.
    pub fn step(
        &mut self,
        decoded: &DecodedText,
        local_memory: &mut dyn MemoryModule,
        now: u64,
    ) -> Result<Option<AluOutcome>, DecodeError> {
        if self.active.is_none() {
            self.active = self.queue.pop_front();
        }
        let Some(mut job) = self.active.take() else {
            return Ok(None);
        };
        self.stats.cycles += 1;

        let bundle = &decoded.alu_clause(job.clause)[job.bundle_index];
        let outcome = match job.phase {
            Phase::Fetch { remaining } => {
                // Validated on every cycle spent in Fetch, not only while
                // `remaining > 0` — at `InstructionMemoryLatency = 1` the job
                // starts at `remaining == 0` and this is the only check the
                // bundle ever gets before advancing to Decode.
                let cycles = self.fetch_stage_cycles(bundle)?;
                if remaining == 0 {
                    job.phase = Phase::Decode;
                } else {
                    job.phase = Phase::Fetch {
                        remaining: remaining.min(cycles.saturating_sub(1)).saturating_sub(1),
                    };
                }
                None
            }
            Phase::Decode => {
                self.stats.local_mem_slots += bundle.local_mem_slot_count() as u64;
                for _ in 0..bundle.local_mem_slot_count() {
                    local_memory.begin_access(now, AccessKind::Read, 1);
                }
                job.phase = Phase::Read;
                None
            }
            Phase::Read => {
                job.phase = Phase::Execute {
                    remaining: self.execute_stage_cycles().saturating_sub(1),
                };
                None
            }
            Phase::Execute { remaining } => {
                if remaining == 0 {
                    job.phase = Phase::Write;
                } else {
                    job.phase = Phase::Execute {
                        remaining: remaining - 1,
                    };
                }
                None
            }
            Phase::Write => {
                let k = bundle.slot_count();
                self.stats.instructions += 1;
                self.stats.instruction_slots += k as u64;
                if k >= 1 {
                    self.stats.vliw_histogram[k - 1] += 1;
                }
                let bundle_count = decoded.alu_clause(job.clause).len();
                if job.bundle_index + 1 < bundle_count {
                    job.bundle_index += 1;
                    job.phase = Phase::Fetch {
                        remaining: self.config.inst_mem_latency.saturating_sub(1),
                    };
                    None
                } else {
                    self.active = None;
                    return Ok(Some(AluOutcome::ClauseComplete {
                        wavefront: job.wavefront,
                    }));
                }
            }
        };
        self.active = Some(job);
        Ok(outcome)
    }
}
