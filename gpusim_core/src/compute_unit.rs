//! The compute unit (C8): one CF/ALU/TEX pipeline triple plus local memory,
//! holding its own slice of the current ND-Range's resident wavefronts.
//!
//! A uop is allocated from the shared-shape [`UopPool`] (C1) the moment CF
//! triggers a clause and freed the moment the owning engine reports that
//! clause complete — this is the only place in the crate C1 is exercised,
//! mirroring how the original compute unit owns one uop per in-flight
//! instruction slot.

use rustc_hash::FxHashMap;

use gpusim_isa::{DecodedText, UopKind, UopPool};

use crate::alu_engine::{AluEngine, AluEngineConfig, AluOutcome, AluStats};
use crate::cf_engine::{CfEngine, CfOutcome, CfStats, WavefrontPicker};
use crate::error::DecodeError;
use crate::memory::{LocalMemory, LocalMemoryStats, MemoryModule};
use crate::ndrange::{ComputeUnitId, WavefrontId, WorkGroup, WorkGroupId, Wavefront};
use crate::tex_engine::{TexEngine, TexEngineConfig, TexOutcome, TexStats};

#[derive(Debug, Default, Clone, Copy)]
pub struct ComputeUnitStats {
    pub work_group_count: u64,
    pub instructions: u64,
    pub cycles: u64,
}

/// Tracks how many of a resident work-group's wavefronts have not yet hit
/// their terminator, so the compute unit knows when the whole group retires.
struct ResidentWorkGroup {
    remaining_wavefronts: u32,
}

pub struct ComputeUnit {
    pub id: ComputeUnitId,
    cf_engine: CfEngine,
    alu_engine: AluEngine,
    tex_engine: TexEngine,
    local_memory: LocalMemory,
    uop_pool: UopPool,
    /// Uop allocated for each wavefront's currently in-flight ALU/TEX clause.
    clause_uop: FxHashMap<WavefrontId, usize>,
    wavefronts: FxHashMap<WavefrontId, Wavefront>,
    resident_work_groups: FxHashMap<WorkGroupId, ResidentWorkGroup>,
    /// Work-groups admitted this ND-Range that may take no more wavefronts.
    pub capacity: u32,
    pub stats: ComputeUnitStats,
    cycle: u64,
}

/// Effects a [`ComputeUnit::step`] call may have on its owner (the GPU),
/// which alone knows about other compute units and the ND-Range's pending
/// queue.
#[derive(Debug, Default)]
pub struct StepEffects {
    pub finished_work_groups: Vec<WorkGroupId>,
    pub global_mem_writes: u64,
}

impl ComputeUnit {
    #[must_use]
    pub fn new(
        id: ComputeUnitId,
        picker: Box<dyn WavefrontPicker>,
        cf_inst_mem_latency: u32,
        alu_config: AluEngineConfig,
        tex_config: TexEngineConfig,
    ) -> Self {
        ComputeUnit {
            id,
            cf_engine: CfEngine::new(picker, cf_inst_mem_latency),
            alu_engine: AluEngine::new(alu_config),
            tex_engine: TexEngine::new(tex_config),
            local_memory: LocalMemory::new(),
            uop_pool: UopPool::new(),
            clause_uop: FxHashMap::default(),
            wavefronts: FxHashMap::default(),
            resident_work_groups: FxHashMap::default(),
            capacity: 0,
            stats: ComputeUnitStats::default(),
            cycle: 0,
        }
    }

    /// Resets per-ND-Range state and sets this CU's capacity for the launch,
    /// computed once by the occupancy calculator and applied uniformly to
    /// every compute unit (`evg_gpu_map_ndrange`'s behavior: one shape, one
    /// occupancy figure, shared by the whole device).
    pub fn map_ndrange(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    #[must_use]
    pub fn mapped_work_groups(&self) -> u32 {
        self.resident_work_groups.len() as u32
    }

    #[must_use]
    pub fn has_free_capacity(&self) -> bool {
        self.mapped_work_groups() < self.capacity
    }

    #[must_use]
    pub fn has_resident_work(&self) -> bool {
        !self.resident_work_groups.is_empty()
    }

    /// Admits one work-group: its wavefronts become resident and enter the
    /// CF engine's ready rotation. Panics if the CU has no free capacity;
    /// the caller (the GPU's admission step) must check first.
    pub fn map_work_group(&mut self, work_group: &WorkGroup, wavefronts: &[Wavefront]) {
        assert!(
            self.has_free_capacity(),
            "compute unit {} admitted beyond capacity",
            self.id
        );
        self.stats.work_group_count += 1;
        self.resident_work_groups.insert(
            work_group.id,
            ResidentWorkGroup {
                remaining_wavefronts: work_group.wavefront_count,
            },
        );
        for wf in wavefronts {
            self.wavefronts.insert(wf.id, wf.clone());
            self.cf_engine.admit(wf.id);
        }
    }

    #[must_use]
    pub fn wavefront(&self, id: WavefrontId) -> &Wavefront {
        &self.wavefronts[&id]
    }

    fn route_cf_outcome(&mut self, outcome: CfOutcome, effects: &mut StepEffects) {
        match outcome {
            CfOutcome::TriggerAlu { wavefront, clause } => {
                let uop = self.uop_pool.alloc(
                    wavefront,
                    UopKind::Alu { bundle_index: 0 },
                    self.cycle,
                    self.cycle,
                    0,
                );
                self.clause_uop.insert(wavefront, uop);
                self.alu_engine.trigger_clause(wavefront, clause);
            }
            CfOutcome::TriggerTex { wavefront, clause } => {
                let uop = self.uop_pool.alloc(
                    wavefront,
                    UopKind::Tex { inst_index: 0 },
                    self.cycle,
                    self.cycle,
                    0,
                );
                self.clause_uop.insert(wavefront, uop);
                self.tex_engine.trigger_clause(wavefront, clause);
            }
            CfOutcome::GlobalMemWrite { .. } => {
                effects.global_mem_writes += 1;
            }
            CfOutcome::Finished { wavefront } => {
                let wf = self.wavefronts.remove(&wavefront).expect("resident wavefront");
                let group = self
                    .resident_work_groups
                    .get_mut(&wf.owning_work_group)
                    .expect("owning work-group resident");
                group.remaining_wavefronts -= 1;
                if group.remaining_wavefronts == 0 {
                    self.resident_work_groups.remove(&wf.owning_work_group);
                    effects.finished_work_groups.push(wf.owning_work_group);
                }
            }
        }
    }

    /// Advances this compute unit by one cycle, in the exact stage order
    /// `spec.md` §4.6 prescribes: CF, then ALU, then TEX, then the local
    /// memory module, then uop retirement. List-linkage update (the stage's
    /// final sub-step) is the GPU's job, since it alone owns the
    /// ready/busy/drained lists.
    pub fn step(&mut self, decoded: &DecodedText) -> Result<StepEffects, DecodeError> {
        self.cycle += 1;
        self.stats.cycles += 1;
        let mut effects = StepEffects::default();

        if let Some(outcome) = self.cf_engine.step(decoded, &mut self.wavefronts)? {
            self.stats.instructions += 1;
            self.route_cf_outcome(outcome, &mut effects);
        }

        if let Some(AluOutcome::ClauseComplete { wavefront }) =
            self.alu_engine.step(decoded, &mut self.local_memory, self.cycle)?
        {
            if let Some(uop) = self.clause_uop.remove(&wavefront) {
                self.uop_pool.free(uop);
            }
            self.cf_engine.notify_clause_complete(wavefront);
        }

        if let Some(TexOutcome::ClauseComplete { wavefront }) =
            self.tex_engine.step(decoded, &mut self.local_memory, self.cycle)
        {
            if let Some(uop) = self.clause_uop.remove(&wavefront) {
                self.uop_pool.free(uop);
            }
            self.cf_engine.notify_clause_complete(wavefront);
        }

        self.local_memory.poll_complete(self.cycle);

        Ok(effects)
    }

    #[must_use]
    pub fn cf_stats(&self) -> &CfStats {
        &self.cf_engine.stats
    }

    #[must_use]
    pub fn alu_stats(&self) -> &AluStats {
        &self.alu_engine.stats
    }

    #[must_use]
    pub fn tex_stats(&self) -> &TexStats {
        &self.tex_engine.stats
    }

    #[must_use]
    pub fn local_memory_stats(&self) -> &LocalMemoryStats {
        &self.local_memory.stats
    }

    #[must_use]
    pub fn uop_pool_len(&self) -> usize {
        self.uop_pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alu_engine::AluEngineConfig;
    use crate::cf_engine::RoundRobinPicker;
    use crate::ndrange::{ClauseKind, WorkGroupState};
    use crate::tex_engine::TexEngineConfig;
    use gpusim_isa::CfInst;

    fn alu_config() -> AluEngineConfig {
        AluEngineConfig {
            inst_mem_latency: 1,
            pe_latency: 1,
            num_stream_cores: 64,
            wavefront_size: 64,
            fetch_queue_size: 64,
        }
    }

    fn tex_config() -> TexEngineConfig {
        TexEngineConfig {
            inst_mem_latency: 1,
            fetch_queue_size: 32,
            load_queue_size: 8,
        }
    }

    fn cu() -> ComputeUnit {
        ComputeUnit::new(
            0,
            Box::new(RoundRobinPicker::default()),
            2,
            alu_config(),
            tex_config(),
        )
    }

    fn one_wavefront_work_group() -> (WorkGroup, Vec<Wavefront>) {
        let wg = WorkGroup {
            id: 0,
            first_work_item: 0,
            work_item_count: 64,
            first_wavefront: 0,
            wavefront_count: 1,
            cu_owner: Some(0),
            state: WorkGroupState::Running,
        };
        let wf = Wavefront {
            id: 0,
            owning_work_group: 0,
            first_work_item: 0,
            work_item_count: 64,
            pc: 0,
            clause_kind: ClauseKind::None,
            loop_depth: 0,
            ready_next_cycle: 0,
            finished: false,
        };
        (wg, vec![wf])
    }

    #[test]
    fn s1_single_work_group_trivial_kernel_completes() {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);

        let mut unit = cu();
        unit.map_ndrange(8);
        let (wg, wfs) = one_wavefront_work_group();
        unit.map_work_group(&wg, &wfs);

        let mut finished = Vec::new();
        let mut cycle = 0;
        while finished.is_empty() {
            cycle += 1;
            let effects = unit.step(&decoded).unwrap();
            finished.extend(effects.finished_work_groups);
            assert!(cycle < 100, "did not complete");
        }
        assert_eq!(finished, vec![0]);
        assert_eq!(unit.stats.instructions, 1);
        assert_eq!(unit.stats.cycles, 4); // latency(2) + decode(1) + execute(1)
        assert!(unit.uop_pool_len() == 0, "no uop should leak past completion");
    }

    #[test]
    fn map_work_group_beyond_capacity_panics() {
        let mut unit = cu();
        unit.map_ndrange(1);
        let (wg, wfs) = one_wavefront_work_group();
        unit.map_work_group(&wg, &wfs);
        assert!(!unit.has_free_capacity());

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            unit.map_work_group(&wg, &wfs);
        }));
        assert!(result.is_err());
    }
}
