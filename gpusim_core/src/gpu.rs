//! The GPU scheduler (C9): three intrusive doubly-linked lists of compute
//! units (ready/busy/drained), work-group dispatch, and the per-cycle main
//! loop (`spec.md` §4.7).
//!
//! The lists are realized as a `Vec<ComputeUnit>` arena plus `prev`/`next`
//! indices and head/tail cursors per state, exactly as `spec.md` §9
//! prescribes — no per-transition allocation.

use log::{debug, trace, warn};

use crate::alu_engine::AluEngineConfig;
use crate::cf_engine::{GreedyPicker, RoundRobinPicker, WavefrontPicker};
use crate::compute_unit::ComputeUnit;
use crate::config::{Config, SchedulingPolicy};
use crate::error::{DecodeError, TerminationReason};
use crate::event::EventSimulator;
use crate::ndrange::{ComputeUnitId, NDRange, WorkGroupState};
use crate::occupancy::{compute_occupancy, OccupancyRequest};
use crate::tex_engine::TexEngineConfig;

/// Invoked once per cycle, after every compute unit has stepped, ahead of
/// the event drain (`spec.md` §4.7 item 5). Defaults to a no-op.
pub trait FaultInjector {
    fn inject(&mut self, cycle: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CuListState {
    Ready,
    Busy,
    Drained,
}

#[derive(Debug, Clone, Copy)]
struct CuLink {
    state: CuListState,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Events the GPU schedules on itself. Currently just the one-cycle-delayed
/// grid-completion notification the driver ABI relies on (`spec.md` §4.8):
/// the completion hook must not fire in the same cycle the last work-group
/// retires, so the grid can be detached cleanly first.
pub enum GpuEvent {
    GridComplete,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GpuStats {
    pub ndrange_count: u64,
}

fn make_picker(policy: SchedulingPolicy) -> Box<dyn WavefrontPicker> {
    match policy {
        SchedulingPolicy::RoundRobin => Box::new(RoundRobinPicker::default()),
        SchedulingPolicy::Greedy => Box::new(GreedyPicker::default()),
    }
}

pub struct Gpu {
    pub cycle: u64,
    pub ndrange: Option<NDRange>,
    compute_units: Vec<ComputeUnit>,
    links: Vec<CuLink>,
    ready_head: Option<usize>,
    ready_tail: Option<usize>,
    busy_head: Option<usize>,
    busy_tail: Option<usize>,
    drained_head: Option<usize>,
    drained_tail: Option<usize>,
    events: EventSimulator<GpuEvent>,
    on_complete: Option<Box<dyn FnMut()>>,
    pub fault_injector: Option<Box<dyn FaultInjector>>,
    pub stats: GpuStats,
    max_cycles: Option<u64>,
    max_inst: Option<u64>,
    termination: Option<TerminationReason>,
}

impl Gpu {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let n = config.num_compute_units as usize;
        let mut compute_units = Vec::with_capacity(n);
        let mut links = Vec::with_capacity(n);
        for id in 0..n {
            let alu_config = AluEngineConfig {
                inst_mem_latency: config.alu_inst_mem_latency,
                pe_latency: config.alu_pe_latency,
                num_stream_cores: config.num_stream_cores,
                wavefront_size: config.wavefront_size,
                fetch_queue_size: config.alu_fetch_queue_size,
            };
            let tex_config = TexEngineConfig {
                inst_mem_latency: config.tex_inst_mem_latency,
                fetch_queue_size: config.tex_fetch_queue_size,
                load_queue_size: config.tex_load_queue_size,
            };
            compute_units.push(ComputeUnit::new(
                id as ComputeUnitId,
                make_picker(config.scheduling_policy),
                config.cf_inst_mem_latency,
                alu_config,
                tex_config,
            ));
            links.push(CuLink {
                state: CuListState::Drained,
                prev: if id == 0 { None } else { Some(id - 1) },
                next: if id + 1 < n { Some(id + 1) } else { None },
            });
        }
        let drained_head = if n > 0 { Some(0) } else { None };
        let drained_tail = if n > 0 { Some(n - 1) } else { None };

        Gpu {
            cycle: 0,
            ndrange: None,
            compute_units,
            links,
            ready_head: None,
            ready_tail: None,
            busy_head: None,
            busy_tail: None,
            drained_head,
            drained_tail,
            events: EventSimulator::new(),
            on_complete: None,
            fault_injector: None,
            stats: GpuStats::default(),
            max_cycles: None,
            max_inst: None,
            termination: None,
        }
    }

    #[must_use]
    pub fn with_budget(mut self, max_cycles: Option<u64>, max_inst: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self.max_inst = max_inst;
        self
    }

    #[must_use]
    pub fn compute_units(&self) -> &[ComputeUnit] {
        &self.compute_units
    }

    #[must_use]
    pub fn cu_list_state(&self, id: ComputeUnitId) -> CuListState {
        self.links[id].state
    }

    #[must_use]
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.termination
    }

    #[must_use]
    pub fn total_instructions(&self) -> u64 {
        self.compute_units
            .iter()
            .map(|cu| {
                cu.cf_stats().instructions
                    + cu.alu_stats().instruction_slots
                    + cu.tex_stats().instructions
            })
            .sum()
    }

    fn list_heads(&self, state: CuListState) -> (Option<usize>, Option<usize>) {
        match state {
            CuListState::Ready => (self.ready_head, self.ready_tail),
            CuListState::Busy => (self.busy_head, self.busy_tail),
            CuListState::Drained => (self.drained_head, self.drained_tail),
        }
    }

    fn set_list_heads(&mut self, state: CuListState, head: Option<usize>, tail: Option<usize>) {
        match state {
            CuListState::Ready => {
                self.ready_head = head;
                self.ready_tail = tail;
            }
            CuListState::Busy => {
                self.busy_head = head;
                self.busy_tail = tail;
            }
            CuListState::Drained => {
                self.drained_head = head;
                self.drained_tail = tail;
            }
        }
    }

    fn unlink(&mut self, id: usize) {
        let state = self.links[id].state;
        let prev = self.links[id].prev;
        let next = self.links[id].next;
        match prev {
            Some(p) => self.links[p].next = next,
            None => {
                let (_, tail) = self.list_heads(state);
                self.set_list_heads(state, next, tail);
            }
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => {
                let (head, _) = self.list_heads(state);
                self.set_list_heads(state, head, prev);
            }
        }
        self.links[id].prev = None;
        self.links[id].next = None;
    }

    fn link_into(&mut self, id: usize, state: CuListState) {
        let (head, tail) = self.list_heads(state);
        self.links[id].state = state;
        self.links[id].prev = tail;
        self.links[id].next = None;
        if let Some(t) = tail {
            self.links[t].next = Some(id);
        }
        self.set_list_heads(state, head.or(Some(id)), Some(id));
    }

    fn move_cu(&mut self, id: usize, state: CuListState) {
        if self.links[id].state == state {
            return;
        }
        self.unlink(id);
        self.link_into(id, state);
    }

    /// Maps a freshly launched ND-Range onto the device: computes one
    /// occupancy figure from its resource shape and applies it uniformly to
    /// every compute unit (`spec.md` §4.1/§9 — one shape, one figure, shared
    /// by the whole device), then moves every compute unit onto the ready
    /// list. `spec.md` §3: `gpu.ndrange` is non-null iff the loop is active.
    ///
    /// # Errors
    /// Returns [`crate::error::OccupancyError`] if no work-group fits on a
    /// compute unit with this resource shape.
    pub fn launch_ndrange(
        &mut self,
        ndrange: NDRange,
        request: OccupancyRequest,
        config: &Config,
        on_complete: Box<dyn FnMut()>,
    ) -> Result<(), crate::error::OccupancyError> {
        assert!(self.ndrange.is_none(), "an ND-Range is already active");
        let capacity = compute_occupancy(request, config)?;
        debug!(
            "launching ndrange {} with {} work-groups, occupancy {capacity} per CU",
            ndrange.id, ndrange.group_count
        );
        for id in 0..self.compute_units.len() {
            self.compute_units[id].map_ndrange(capacity);
            self.move_cu(id, CuListState::Ready);
        }
        self.ndrange = Some(ndrange);
        self.on_complete = Some(on_complete);
        self.stats.ndrange_count += 1;
        self.termination = None;
        Ok(())
    }

    /// Admission (`spec.md` §4.7 item 1): while the ready list and the
    /// ND-Range's pending queue are both non-empty, pop the head of each and
    /// map them together. A compute unit stays on the ready list — and may
    /// absorb further work-groups in the same admission burst — until it is
    /// at capacity, matching `spec.md` literally; it only moves to busy once
    /// full. FIFO tie-break on both lists falls out of using the list heads
    /// and `NDRange`'s internal `VecDeque`.
    fn admit(&mut self) {
        loop {
            let Some(cu_id) = self.ready_head else {
                break;
            };
            let Some(ndrange) = self.ndrange.as_mut() else {
                break;
            };
            let Some(wg_id) = ndrange.peek_pending() else {
                break;
            };
            ndrange.pop_pending();
            let wg = &mut ndrange.work_groups[wg_id];
            wg.cu_owner = Some(cu_id);
            wg.state = WorkGroupState::Running;
            let wavefronts = &ndrange.wavefronts[wg.first_wavefront..wg.first_wavefront + wg.wavefront_count as usize];
            self.compute_units[cu_id].map_work_group(wg, wavefronts);
            trace!("admitted work-group {wg_id} onto compute unit {cu_id}");
            if !self.compute_units[cu_id].has_free_capacity() {
                self.move_cu(cu_id, CuListState::Busy);
            }
        }
    }

    /// Compute units with at least one resident work-group need stepping
    /// regardless of whether admission has filled them to capacity — a
    /// compute unit under capacity stays on the ready list (per the literal
    /// admission rule above) but may already be running wavefronts. Gating
    /// the per-cycle step on literal "busy list" membership would strand
    /// such a compute unit forever, which contradicts `spec.md` §8 scenario
    /// S1 (a single work-group, far below capacity, must still run to
    /// completion). This also gives the ascending-id visitation order §5
    /// requires for free, instead of walking the busy linked list.
    fn steppable_cu_ids(&self) -> Vec<ComputeUnitId> {
        self.compute_units
            .iter()
            .enumerate()
            .filter(|(_, cu)| cu.has_resident_work())
            .map(|(id, _)| id)
            .collect()
    }

    /// Settles a compute unit's list membership after it has stepped. A
    /// compute unit that has fully drained its resident work-groups moves to
    /// drained and then immediately back to ready if the device still has a
    /// use for it (`spec.md` §4.3's "busy to drained, and subsequently back
    /// to ready"). A compute unit that freed up capacity without fully
    /// draining (one of several resident work-groups finished) moves
    /// directly from busy to ready, per `spec.md` §4.7 item 4's note that a
    /// compute unit "may transition busy -> ready ... within its step".
    fn settle_cu(&mut self, cu_id: ComputeUnitId) {
        let has_resident = self.compute_units[cu_id].has_resident_work();
        let has_free = self.compute_units[cu_id].has_free_capacity();
        if !has_resident {
            self.move_cu(cu_id, CuListState::Drained);
        }
        if has_free {
            self.move_cu(cu_id, CuListState::Ready);
        }
    }

    /// Advances the simulator by exactly one cycle, in the order `spec.md`
    /// §4.7 prescribes. Returns `true` if the caller should keep stepping.
    ///
    /// # Errors
    /// Propagates a [`DecodeError`] raised by any compute unit's pipeline.
    pub fn step(&mut self) -> Result<bool, DecodeError> {
        self.cycle += 1;

        self.admit();

        let ndrange_pending = self.ndrange.as_ref().is_some_and(NDRange::has_pending);
        let any_resident = self.compute_units.iter().any(ComputeUnit::has_resident_work);
        if !any_resident && !ndrange_pending {
            if let Some(ndrange) = &self.ndrange {
                if ndrange.all_finished() {
                    self.termination = Some(TerminationReason::Completed);
                    debug!("ndrange {} completed at cycle {}", ndrange.id, self.cycle);
                    self.events.schedule(self.cycle, 1, GpuEvent::GridComplete);
                }
            }
        }

        if self.termination.is_none() {
            if let Some(max_cycles) = self.max_cycles {
                if self.cycle >= max_cycles {
                    warn!("max cycle budget {max_cycles} reached");
                    self.termination = Some(TerminationReason::MaxCyclesReached);
                }
            }
        }
        if self.termination.is_none() {
            if let Some(max_inst) = self.max_inst {
                if self.total_instructions() >= max_inst {
                    warn!("max instruction budget {max_inst} reached");
                    self.termination = Some(TerminationReason::MaxInstReached);
                }
            }
        }

        let decoded = self.ndrange.as_ref().map(|nr| nr.decoded_text.clone());
        if let Some(decoded) = decoded {
            // Ascending compute-unit id order, per `spec.md` §5 item 2.
            for cu_id in self.steppable_cu_ids() {
                let effects = self.compute_units[cu_id].step(&decoded)?;
                if !effects.finished_work_groups.is_empty() {
                    if let Some(ndrange) = self.ndrange.as_mut() {
                        for wg_id in effects.finished_work_groups {
                            ndrange.work_groups[wg_id].state = WorkGroupState::Finished;
                        }
                    }
                }
                self.settle_cu(cu_id);
            }
        }

        if let Some(injector) = self.fault_injector.as_mut() {
            injector.inject(self.cycle);
        }

        for (_, event) in self.events.drain(self.cycle) {
            match event {
                GpuEvent::GridComplete => {
                    self.ndrange = None;
                    if let Some(mut hook) = self.on_complete.take() {
                        hook();
                    }
                }
            }
        }

        Ok(self.termination.is_none())
    }

    /// Runs the simulator to completion: repeatedly steps until a
    /// termination reason is latched, returning it. The cycle the budget is
    /// exceeded in still completes fully before the loop exits (`spec.md`
    /// §5's cooperative-termination guarantee).
    ///
    /// # Errors
    /// Propagates a [`DecodeError`] raised by any compute unit's pipeline.
    pub fn run(&mut self) -> Result<TerminationReason, DecodeError> {
        while self.step()? {}
        Ok(self.termination.unwrap_or(TerminationReason::Halted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpusim_isa::{CfInst, DecodedText};
    use std::cell::Cell;
    use std::rc::Rc;

    fn trivial_ndrange(global: u32, local: u32, wavefront_size: u32) -> NDRange {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);
        NDRange::new(0, Rc::new(decoded), global, local, 0, wavefront_size)
    }

    #[test]
    fn s1_single_work_group_completes_and_fires_on_complete() {
        let config = Config::default();
        let mut gpu = Gpu::new(&config);
        let finished = Rc::new(Cell::new(false));
        let flag = finished.clone();
        gpu.launch_ndrange(
            trivial_ndrange(64, 64, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 4,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(move || flag.set(true)),
        )
        .unwrap();

        let reason = gpu.run().unwrap();
        assert_eq!(reason, TerminationReason::Completed);
        assert!(finished.get());
        assert!(gpu.ndrange.is_none());
        assert_eq!(gpu.total_instructions(), 1);
    }

    #[test]
    fn max_cycles_budget_halts_run() {
        let config = Config::default();
        let mut gpu = Gpu::new(&config).with_budget(Some(2), None);
        gpu.launch_ndrange(
            trivial_ndrange(64, 64, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 4,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(|| {}),
        )
        .unwrap();

        let reason = gpu.run().unwrap();
        assert_eq!(reason, TerminationReason::MaxCyclesReached);
        assert_eq!(gpu.cycle, 2);
    }

    #[test]
    fn occupancy_infeasible_rejects_launch() {
        let config = Config {
            num_registers: 32,
            register_alloc_size: 32,
            ..Config::default()
        };
        let mut gpu = Gpu::new(&config);
        let err = gpu
            .launch_ndrange(
                trivial_ndrange(64, 64, config.wavefront_size),
                OccupancyRequest {
                    work_items_per_group: 64,
                    gprs_per_work_item: 3,
                    local_mem_per_group: 0,
                },
                &config,
                Box::new(|| {}),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::OccupancyError::Infeasible {
                limiting_resource: "NumRegisters"
            }
        ));
    }

    #[test]
    fn two_work_groups_share_one_compute_unit_in_fifo_order() {
        let config = Config {
            num_compute_units: 1,
            ..Config::default()
        };
        let mut gpu = Gpu::new(&config);
        gpu.launch_ndrange(
            trivial_ndrange(128, 64, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 1,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(|| {}),
        )
        .unwrap();

        let reason = gpu.run().unwrap();
        assert_eq!(reason, TerminationReason::Completed);
        assert_eq!(gpu.compute_units()[0].stats.work_group_count, 2);
    }

    #[test]
    fn ready_busy_drained_partition_every_compute_unit_every_cycle() {
        let config = Config {
            num_compute_units: 4,
            ..Config::default()
        };
        let mut gpu = Gpu::new(&config);
        gpu.launch_ndrange(
            trivial_ndrange(256, 64, config.wavefront_size),
            OccupancyRequest {
                work_items_per_group: 64,
                gprs_per_work_item: 1,
                local_mem_per_group: 0,
            },
            &config,
            Box::new(|| {}),
        )
        .unwrap();

        loop {
            let mut seen = [0u32; 3];
            for id in 0..config.num_compute_units as usize {
                match gpu.cu_list_state(id) {
                    CuListState::Ready => seen[0] += 1,
                    CuListState::Busy => seen[1] += 1,
                    CuListState::Drained => seen[2] += 1,
                }
            }
            assert_eq!(
                seen[0] + seen[1] + seen[2],
                config.num_compute_units,
                "every compute unit must be in exactly one list"
            );
            if !gpu.step().unwrap() {
                break;
            }
        }
    }
}
