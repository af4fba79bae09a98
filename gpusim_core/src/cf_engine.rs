//! The CF engine (C5): drives each wavefront's control-flow stream through
//! `IDLE -> FETCH -> DECODE -> EXECUTE -> (COMPLETE | WAIT_CLAUSE)` until its
//! terminator executes.
//!
//! Simplification note: the real engine overlaps FETCH/DECODE on one
//! wavefront with EXECUTE on another via two independent cursors
//! (`decode_index`/`execute_index`). This model advances one resident
//! wavefront's state machine by one phase per engine step instead, selected
//! by the configured [`WavefrontPicker`] — it keeps round-robin/greedy
//! fairness and per-wavefront instruction latencies identical, at the cost
//! of losing cross-wavefront FETCH/EXECUTE overlap within a single cycle.

use gpusim_isa::DecodedText;
use rustc_hash::FxHashMap;

use crate::error::DecodeError;
use crate::ndrange::{ClauseKind, Wavefront, WavefrontId};
use gpusim_isa::CfInst;

/// Picks which resident, ready wavefront advances next.
pub trait WavefrontPicker {
    fn pick(&mut self, resident: &[WavefrontId], is_ready: &dyn Fn(WavefrontId) -> bool) -> Option<WavefrontId>;
}

/// Cyclic over resident wavefronts, skipping those not ready.
#[derive(Debug, Default)]
pub struct RoundRobinPicker {
    cursor: usize,
}

impl WavefrontPicker for RoundRobinPicker {
    fn pick(&mut self, resident: &[WavefrontId], is_ready: &dyn Fn(WavefrontId) -> bool) -> Option<WavefrontId> {
        if resident.is_empty() {
            return None;
        }
        for offset in 0..resident.len() {
            let idx = (self.cursor + offset) % resident.len();
            if is_ready(resident[idx]) {
                self.cursor = (idx + 1) % resident.len();
                return Some(resident[idx]);
            }
        }
        None
    }
}

/// Keeps running the most-recently-executed wavefront while it stays ready;
/// falls back to the lowest-id ready wavefront otherwise.
#[derive(Debug, Default)]
pub struct GreedyPicker {
    last: Option<WavefrontId>,
}

impl WavefrontPicker for GreedyPicker {
    fn pick(&mut self, resident: &[WavefrontId], is_ready: &dyn Fn(WavefrontId) -> bool) -> Option<WavefrontId> {
        if let Some(last) = self.last {
            if resident.contains(&last) && is_ready(last) {
                return Some(last);
            }
        }
        let picked = resident.iter().copied().filter(|&id| is_ready(id)).min();
        self.last = picked;
        picked
    }
}

#[derive(Debug, Clone, Copy)]
enum CfWfState {
    Idle,
    Fetching { remaining: u32 },
    ReadyDecode,
    ReadyExecute { inst: CfInst },
    WaitClause,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CfStats {
    pub instructions: u64,
    pub alu_clause_triggers: u64,
    pub tex_clause_triggers: u64,
    pub global_mem_writes: u64,
}

/// Effect of one wavefront's EXECUTE phase, for the owning compute unit to
/// route to the ALU/TEX engines or to global-memory bookkeeping.
#[derive(Debug, Clone, Copy)]
pub enum CfOutcome {
    TriggerAlu { wavefront: WavefrontId, clause: usize },
    TriggerTex { wavefront: WavefrontId, clause: usize },
    GlobalMemWrite { wavefront: WavefrontId },
    Finished { wavefront: WavefrontId },
}

pub struct CfEngine {
    resident: Vec<WavefrontId>,
    wf_state: FxHashMap<WavefrontId, CfWfState>,
    picker: Box<dyn WavefrontPicker>,
    pub stats: CfStats,
    inst_mem_latency: u32,
}

impl CfEngine {
    #[must_use]
    pub fn new(picker: Box<dyn WavefrontPicker>, inst_mem_latency: u32) -> Self {
        CfEngine {
            resident: Vec::new(),
            wf_state: FxHashMap::default(),
            picker,
            stats: CfStats::default(),
            inst_mem_latency,
        }
    }

    pub fn admit(&mut self, wavefront: WavefrontId) {
        self.resident.push(wavefront);
        self.wf_state.insert(wavefront, CfWfState::Idle);
    }

    pub fn retire(&mut self, wavefront: WavefrontId) {
        self.resident.retain(|&id| id != wavefront);
        self.wf_state.remove(&wavefront);
    }

    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }

    /// Called by the ALU/TEX engine when a triggered clause has fully
    /// retired, returning the wavefront to `Idle` so CF can fetch its next
    /// instruction.
    pub fn notify_clause_complete(&mut self, wavefront: WavefrontId) {
        self.wf_state.insert(wavefront, CfWfState::Idle);
    }

    /// Advances exactly one ready resident wavefront by one phase. Returns
    /// its outcome if the EXECUTE phase produced one this cycle.
    pub fn step(
        &mut self,
        decoded: &DecodedText,
        wavefronts: &mut FxHashMap<WavefrontId, Wavefront>,
    ) -> Result<Option<CfOutcome>, DecodeError> {
        let wf_state = &self.wf_state;
        let is_ready = |id: WavefrontId| matches!(wf_state.get(&id), Some(s) if !matches!(s, CfWfState::WaitClause));
        let Some(wf_id) = self.picker.pick(&self.resident, &is_ready) else {
            return Ok(None);
        };

        let state = *self.wf_state.get(&wf_id).expect("resident wavefront has state");
        match state {
            CfWfState::Idle => {
                self.wf_state.insert(
                    wf_id,
                    CfWfState::Fetching {
                        remaining: self.inst_mem_latency.saturating_sub(1),
                    },
                );
                Ok(None)
            }
            CfWfState::Fetching { remaining } => {
                self.wf_state.insert(
                    wf_id,
                    if remaining == 0 {
                        CfWfState::ReadyDecode
                    } else {
                        CfWfState::Fetching {
                            remaining: remaining - 1,
                        }
                    },
                );
                Ok(None)
            }
            CfWfState::ReadyDecode => {
                let wf = wavefronts.get_mut(&wf_id).expect("wavefront exists");
                let inst = *decoded
                    .cf_stream
                    .get(wf.pc)
                    .unwrap_or(&CfInst::Terminator);
                if matches!(inst, CfInst::DecLoopIdx) && wf.adjust_loop_depth(-1).is_err() {
                    return Err(DecodeError::LoopUnderflow);
                }
                self.wf_state.insert(wf_id, CfWfState::ReadyExecute { inst });
                Ok(None)
            }
            CfWfState::ReadyExecute { inst } => {
                let wf = wavefronts.get_mut(&wf_id).expect("wavefront exists");
                self.stats.instructions += 1;
                wf.pc += 1;
                let outcome = match inst {
                    CfInst::AluClause { clause } => {
                        self.stats.alu_clause_triggers += 1;
                        wf.clause_kind = ClauseKind::Alu;
                        self.wf_state.insert(wf_id, CfWfState::WaitClause);
                        Some(CfOutcome::TriggerAlu {
                            wavefront: wf_id,
                            clause,
                        })
                    }
                    CfInst::TexClause { clause } => {
                        self.stats.tex_clause_triggers += 1;
                        wf.clause_kind = ClauseKind::Tex;
                        self.wf_state.insert(wf_id, CfWfState::WaitClause);
                        Some(CfOutcome::TriggerTex {
                            wavefront: wf_id,
                            clause,
                        })
                    }
                    CfInst::GlobalMemWrite => {
                        self.stats.global_mem_writes += 1;
                        self.wf_state.insert(wf_id, CfWfState::Idle);
                        Some(CfOutcome::GlobalMemWrite { wavefront: wf_id })
                    }
                    CfInst::IncLoopIdx => {
                        let _ = wf.adjust_loop_depth(1);
                        self.wf_state.insert(wf_id, CfWfState::Idle);
                        None
                    }
                    CfInst::DecLoopIdx => {
                        self.wf_state.insert(wf_id, CfWfState::Idle);
                        None
                    }
                    CfInst::Terminator => {
                        wf.finished = true;
                        self.retire(wf_id);
                        Some(CfOutcome::Finished { wavefront: wf_id })
                    }
                };
                Ok(outcome)
            }
            CfWfState::WaitClause => Ok(None),
        }
    }
}

#[must_use]
pub fn instructions_per_cycle(instructions: u64, cycles: u64) -> f64 {
    if cycles == 0 {
        0.0
    } else {
        instructions as f64 / cycles as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpusim_isa::DecodedText;

    fn single_wavefront(decoded: &DecodedText, latency: u32) -> (CfEngine, FxHashMap<WavefrontId, Wavefront>) {
        let mut engine = CfEngine::new(Box::new(RoundRobinPicker::default()), latency);
        engine.admit(0);
        let mut wavefronts = FxHashMap::default();
        wavefronts.insert(
            0,
            Wavefront {
                id: 0,
                owning_work_group: 0,
                first_work_item: 0,
                work_item_count: 64,
                pc: 0,
                clause_kind: ClauseKind::None,
                loop_depth: 0,
                ready_next_cycle: 0,
                finished: false,
            },
        );
        (engine, wavefronts)
    }

    #[test]
    fn s1_trivial_kernel_takes_latency_plus_two_steps() {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);
        let (mut engine, mut wavefronts) = single_wavefront(&decoded, 2);

        let mut steps = 0;
        let mut finished = None;
        while finished.is_none() {
            steps += 1;
            finished = engine.step(&decoded, &mut wavefronts).unwrap();
            assert!(steps < 100, "did not terminate");
        }
        assert_eq!(steps, 4); // latency(2) + decode(1) + execute(1)
        assert_eq!(engine.stats.instructions, 1);
        assert!(matches!(finished, Some(CfOutcome::Finished { wavefront: 0 })));
    }

    #[test]
    fn loop_depth_decrement_during_decode_increment_after_execute() {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::IncLoopIdx);
        decoded.cf_stream.push(CfInst::Terminator);
        let (mut engine, mut wavefronts) = single_wavefront(&decoded, 1);

        // Drive to ReadyDecode for IncLoopIdx.
        engine.step(&decoded, &mut wavefronts).unwrap(); // Idle -> Fetching(0)
        engine.step(&decoded, &mut wavefronts).unwrap(); // Fetching -> ReadyDecode
        assert_eq!(wavefronts[&0].loop_depth, 0);
        engine.step(&decoded, &mut wavefronts).unwrap(); // decode: no-op for Inc at decode time
        assert_eq!(wavefronts[&0].loop_depth, 0);
        engine.step(&decoded, &mut wavefronts).unwrap(); // execute: increment applied here
        assert_eq!(wavefronts[&0].loop_depth, 1);
    }

    #[test]
    fn dec_loop_idx_underflow_is_rejected_at_decode() {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::DecLoopIdx);
        let (mut engine, mut wavefronts) = single_wavefront(&decoded, 1);
        engine.step(&decoded, &mut wavefronts).unwrap();
        engine.step(&decoded, &mut wavefronts).unwrap();
        let err = engine.step(&decoded, &mut wavefronts).unwrap_err();
        assert!(matches!(err, DecodeError::LoopUnderflow));
    }

    #[test]
    fn round_robin_alternates_between_two_ready_wavefronts() {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);
        let mut engine = CfEngine::new(Box::new(RoundRobinPicker::default()), 1);
        engine.admit(0);
        engine.admit(1);
        let is_ready = |_: WavefrontId| true;
        let first = engine.picker.pick(&engine.resident.clone(), &is_ready);
        let second = engine.picker.pick(&engine.resident.clone(), &is_ready);
        assert_ne!(first, second);
    }
}
