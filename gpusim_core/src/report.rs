//! The statistics report (`spec.md` §6): a sectioned, human-readable
//! dump of the machine configuration plus every compute unit's final
//! engine/memory counters, in the same `[Section]` / `Key = Value` shape
//! [`crate::config::Config`] parses. A `json` feature mirrors the same
//! figures as a [`serde`]-derived tree for tooling that wants structured
//! output instead of text.

use std::fmt::Write as _;

use crate::cf_engine::instructions_per_cycle;
use crate::config::{Config, RegisterAllocGranularity, SchedulingPolicy};
use crate::gpu::Gpu;

#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeUnitReport {
    pub work_group_count: u64,
    pub instructions: u64,
    pub cycles: u64,
    pub cf_instructions: u64,
    pub cf_alu_clause_triggers: u64,
    pub cf_tex_clause_triggers: u64,
    pub cf_global_mem_writes: u64,
    pub alu_wavefront_count: u64,
    pub alu_instructions: u64,
    pub alu_instruction_slots: u64,
    pub alu_local_mem_slots: u64,
    pub alu_vliw_histogram: [u64; 5],
    pub alu_cycles: u64,
    pub tex_wavefront_count: u64,
    pub tex_instructions: u64,
    pub tex_cycles: u64,
    pub local_mem_accesses: u64,
    pub local_mem_reads: u64,
    pub local_mem_writes: u64,
    pub local_mem_effective_reads: u64,
    pub local_mem_effective_writes: u64,
    pub local_mem_coalesced_reads: u64,
    pub local_mem_coalesced_writes: u64,
}

#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub cycles: u64,
    pub ndrange_count: u64,
    pub instructions: u64,
    pub compute_units: Vec<ComputeUnitReport>,
}

impl Report {
    /// Snapshots every figure a finished (or still-running) [`Gpu`] can
    /// report right now. Safe to call mid-run; figures simply reflect
    /// whatever has happened so far.
    #[must_use]
    pub fn capture(gpu: &Gpu, config: &Config) -> Self {
        let compute_units = gpu
            .compute_units()
            .iter()
            .map(|cu| {
                let cf = cu.cf_stats();
                let alu = cu.alu_stats();
                let tex = cu.tex_stats();
                let local_memory = cu.local_memory_stats();
                ComputeUnitReport {
                    work_group_count: cu.stats.work_group_count,
                    // Must agree with `Gpu::total_instructions`'s per-device sum
                    // (`spec.md` §8 invariant 5): CF instruction count plus every
                    // occupied ALU slot plus TEX instruction count, not the
                    // coarser per-CF-outcome count `cu.stats.instructions` tracks.
                    instructions: cf.instructions + alu.instruction_slots + tex.instructions,
                    cycles: cu.stats.cycles,
                    cf_instructions: cf.instructions,
                    cf_alu_clause_triggers: cf.alu_clause_triggers,
                    cf_tex_clause_triggers: cf.tex_clause_triggers,
                    cf_global_mem_writes: cf.global_mem_writes,
                    alu_wavefront_count: alu.wavefront_count,
                    alu_instructions: alu.instructions,
                    alu_instruction_slots: alu.instruction_slots,
                    alu_local_mem_slots: alu.local_mem_slots,
                    alu_vliw_histogram: alu.vliw_histogram,
                    alu_cycles: alu.cycles,
                    tex_wavefront_count: tex.wavefront_count,
                    tex_instructions: tex.instructions,
                    tex_cycles: tex.cycles,
                    local_mem_accesses: local_memory.accesses(),
                    local_mem_reads: local_memory.reads,
                    local_mem_writes: local_memory.writes,
                    local_mem_effective_reads: local_memory.effective_reads(config.local_mem_ports),
                    local_mem_effective_writes: local_memory.effective_writes(config.local_mem_ports),
                    local_mem_coalesced_reads: local_memory.coalesced_reads(config.local_mem_ports),
                    local_mem_coalesced_writes: local_memory.coalesced_writes(config.local_mem_ports),
                }
            })
            .collect();
        Report {
            cycles: gpu.cycle,
            ndrange_count: gpu.stats.ndrange_count,
            instructions: gpu.total_instructions(),
            compute_units,
        }
    }

    /// Renders the sectioned text report `spec.md` §6 lays out: one
    /// `[Config.*]` section per config group, a `[Device]` summary, then one
    /// `[ComputeUnit N]` section per compute unit with its `CFEngine.*`,
    /// `ALUEngine.*`, `TEXEngine.*`, and `LocalMemory.*` sub-sections.
    #[must_use]
    pub fn render_text(&self, config: &Config) -> String {
        let mut out = String::new();

        writeln!(out, "[Config.Device]").unwrap();
        writeln!(out, "NumComputeUnits = {}", config.num_compute_units).unwrap();
        writeln!(out, "NumStreamCores = {}", config.num_stream_cores).unwrap();
        writeln!(out, "NumRegisters = {}", config.num_registers).unwrap();
        writeln!(out, "RegisterAllocSize = {}", config.register_alloc_size).unwrap();
        writeln!(
            out,
            "RegisterAllocGranularity = {}",
            match config.register_alloc_granularity {
                RegisterAllocGranularity::Wavefront => "Wavefront",
                RegisterAllocGranularity::WorkGroup => "WorkGroup",
            }
        )
        .unwrap();
        writeln!(out, "WavefrontSize = {}", config.wavefront_size).unwrap();
        writeln!(
            out,
            "MaxWorkGroupsPerComputeUnit = {}",
            config.max_work_groups_per_cu
        )
        .unwrap();
        writeln!(
            out,
            "MaxWavefrontsPerComputeUnit = {}",
            config.max_wavefronts_per_cu
        )
        .unwrap();
        writeln!(
            out,
            "SchedulingPolicy = {}",
            match config.scheduling_policy {
                SchedulingPolicy::RoundRobin => "RoundRobin",
                SchedulingPolicy::Greedy => "Greedy",
            }
        )
        .unwrap();
        writeln!(out).unwrap();

        writeln!(out, "[Config.LocalMemory]").unwrap();
        writeln!(out, "Size = {}", config.local_mem_size).unwrap();
        writeln!(out, "AllocSize = {}", config.local_mem_alloc_size).unwrap();
        writeln!(out, "BlockSize = {}", config.local_mem_block_size).unwrap();
        writeln!(out, "Latency = {}", config.local_mem_latency).unwrap();
        writeln!(out, "Ports = {}", config.local_mem_ports).unwrap();
        writeln!(out).unwrap();

        writeln!(out, "[Config.CFEngine]").unwrap();
        writeln!(
            out,
            "InstructionMemoryLatency = {}",
            config.cf_inst_mem_latency
        )
        .unwrap();
        writeln!(out).unwrap();

        writeln!(out, "[Config.ALUEngine]").unwrap();
        writeln!(
            out,
            "InstructionMemoryLatency = {}",
            config.alu_inst_mem_latency
        )
        .unwrap();
        writeln!(out, "FetchQueueSize = {}", config.alu_fetch_queue_size).unwrap();
        writeln!(
            out,
            "ProcessingElementLatency = {}",
            config.alu_pe_latency
        )
        .unwrap();
        writeln!(out).unwrap();

        writeln!(out, "[Config.TEXEngine]").unwrap();
        writeln!(
            out,
            "InstructionMemoryLatency = {}",
            config.tex_inst_mem_latency
        )
        .unwrap();
        writeln!(out, "FetchQueueSize = {}", config.tex_fetch_queue_size).unwrap();
        writeln!(out, "LoadQueueSize = {}", config.tex_load_queue_size).unwrap();
        writeln!(out).unwrap();

        writeln!(out, "[Device]").unwrap();
        writeln!(out, "NDRangeCount = {}", self.ndrange_count).unwrap();
        writeln!(out, "Instructions = {}", self.instructions).unwrap();
        writeln!(out, "Cycles = {}", self.cycles).unwrap();
        writeln!(
            out,
            "InstructionsPerCycle = {:.4}",
            instructions_per_cycle(self.instructions, self.cycles)
        )
        .unwrap();
        writeln!(out).unwrap();

        for (id, cu) in self.compute_units.iter().enumerate() {
            writeln!(out, "[ComputeUnit {id}]").unwrap();
            writeln!(out, "WorkGroupCount = {}", cu.work_group_count).unwrap();
            writeln!(out, "Instructions = {}", cu.instructions).unwrap();
            writeln!(out, "Cycles = {}", cu.cycles).unwrap();
            writeln!(
                out,
                "InstructionsPerCycle = {:.4}",
                instructions_per_cycle(cu.instructions, cu.cycles)
            )
            .unwrap();
            writeln!(out).unwrap();

            writeln!(out, "[ComputeUnit {id}.CFEngine]").unwrap();
            writeln!(out, "Instructions = {}", cu.cf_instructions).unwrap();
            writeln!(
                out,
                "InstructionsPerCycle = {:.4}",
                instructions_per_cycle(cu.cf_instructions, cu.cycles)
            )
            .unwrap();
            writeln!(out, "ALUClauseTriggers = {}", cu.cf_alu_clause_triggers).unwrap();
            writeln!(out, "TEXClauseTriggers = {}", cu.cf_tex_clause_triggers).unwrap();
            writeln!(out, "GlobalMemWrites = {}", cu.cf_global_mem_writes).unwrap();
            writeln!(out).unwrap();

            writeln!(out, "[ComputeUnit {id}.ALUEngine]").unwrap();
            writeln!(out, "WavefrontCount = {}", cu.alu_wavefront_count).unwrap();
            writeln!(out, "Instructions = {}", cu.alu_instructions).unwrap();
            writeln!(out, "InstructionSlots = {}", cu.alu_instruction_slots).unwrap();
            writeln!(out, "LocalMemorySlots = {}", cu.alu_local_mem_slots).unwrap();
            writeln!(
                out,
                "VLIWOccupancy = {}",
                cu.alu_vliw_histogram
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            )
            .unwrap();
            writeln!(out, "Cycles = {}", cu.alu_cycles).unwrap();
            writeln!(
                out,
                "InstructionsPerCycle = {:.4}",
                instructions_per_cycle(cu.alu_instructions, cu.alu_cycles)
            )
            .unwrap();
            writeln!(out).unwrap();

            writeln!(out, "[ComputeUnit {id}.TEXEngine]").unwrap();
            writeln!(out, "WavefrontCount = {}", cu.tex_wavefront_count).unwrap();
            writeln!(out, "Instructions = {}", cu.tex_instructions).unwrap();
            writeln!(out, "Cycles = {}", cu.tex_cycles).unwrap();
            writeln!(
                out,
                "InstructionsPerCycle = {:.4}",
                instructions_per_cycle(cu.tex_instructions, cu.tex_cycles)
            )
            .unwrap();
            writeln!(out).unwrap();

            writeln!(out, "[ComputeUnit {id}.LocalMemory]").unwrap();
            writeln!(out, "Accesses = {}", cu.local_mem_accesses).unwrap();
            writeln!(out, "Reads = {}", cu.local_mem_reads).unwrap();
            writeln!(out, "EffectiveReads = {}", cu.local_mem_effective_reads).unwrap();
            writeln!(out, "CoalescedReads = {}", cu.local_mem_coalesced_reads).unwrap();
            writeln!(out, "Writes = {}", cu.local_mem_writes).unwrap();
            writeln!(out, "EffectiveWrites = {}", cu.local_mem_effective_writes).unwrap();
            writeln!(out, "CoalescedWrites = {}", cu.local_mem_coalesced_writes).unwrap();
            writeln!(out).unwrap();
        }

        out
    }

    /// Renders the same figures as a JSON document, for tooling that wants
    /// structured output instead of the sectioned text report.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn render_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("report serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::occupancy::OccupancyRequest;
    use gpusim_isa::{CfInst, DecodedText};
    use std::rc::Rc;

    #[test]
    fn text_report_has_one_section_per_compute_unit() {
        let config = Config {
            num_compute_units: 2,
            ..Config::default()
        };
        let mut gpu = Gpu::new(&config);
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);
        gpu.launch_ndrange(
            crate::ndrange::NDRange::new(0, Rc::new(decoded), 128, 64, 0, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 1,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(|| {}),
        )
        .unwrap();
        gpu.run().unwrap();

        let report = Report::capture(&gpu, &config);
        let text = report.render_text(&config);
        assert!(text.contains("[ComputeUnit 0]"));
        assert!(text.contains("[ComputeUnit 1]"));
        assert!(text.contains("VLIWOccupancy ="));
        assert!(text.contains("[Config.CFEngine]"));
        assert!(text.contains("[Config.ALUEngine]"));
        assert!(text.contains("[Config.TEXEngine]"));
        assert!(text.contains("Accesses ="));
        assert!(text.contains("CoalescedReads ="));
        assert!(text.contains("CoalescedWrites ="));
        assert!(text.contains("[ComputeUnit 0.TEXEngine]\nWavefrontCount"));
        assert!(!text.contains("IPC ="));
    }

    #[test]
    fn ipc_guard_against_zero_cycles() {
        let report = ComputeUnitReport::default();
        assert_eq!(instructions_per_cycle(report.alu_instructions, report.alu_cycles), 0.0);
    }

    #[test]
    fn per_cu_instructions_matches_device_sum_for_a_multi_slot_alu_bundle() {
        use gpusim_isa::{AluBundle, AluSlot};

        let config = Config {
            num_compute_units: 1,
            ..Config::default()
        };
        let mut gpu = Gpu::new(&config);
        let mut decoded = DecodedText::new();
        let clause = decoded.push_alu_clause(vec![AluBundle::new(vec![
            AluSlot { is_local_mem_access: false };
            5
        ])]);
        decoded.cf_stream.push(CfInst::AluClause { clause });
        decoded.cf_stream.push(CfInst::Terminator);
        gpu.launch_ndrange(
            crate::ndrange::NDRange::new(0, Rc::new(decoded), 64, 64, 0, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 1,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(|| {}),
        )
        .unwrap();
        gpu.run().unwrap();

        let report = Report::capture(&gpu, &config);
        let cu = &report.compute_units[0];
        // spec.md §8 invariant 5: device.Instructions = Σ_cu cu.Instructions.
        assert_eq!(cu.instructions, report.instructions);
        assert_eq!(cu.instructions, cu.cf_instructions + cu.alu_instruction_slots + cu.tex_instructions);
    }
}
