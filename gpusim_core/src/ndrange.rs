//! ND-Range, work-group, and wavefront data model (`spec.md` §3).
//!
//! The driver ABI (§4.8) flattens the host's 3-D `gridDim`/`blockDim` into
//! scalar `global_size`/`local_size` word counts before constructing one of
//! these — nothing downstream of admission needs the three axes separately.

use std::rc::Rc;

use gpusim_isa::DecodedText;

pub type NDRangeId = u64;
pub type WorkGroupId = usize;
pub type WavefrontId = usize;
pub type WorkItemId = usize;
pub type ComputeUnitId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkGroupState {
    Pending,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseKind {
    None,
    Alu,
    Tex,
}

#[derive(Debug, Clone)]
pub struct WorkGroup {
    pub id: WorkGroupId,
    pub first_work_item: WorkItemId,
    pub work_item_count: u32,
    pub first_wavefront: WavefrontId,
    pub wavefront_count: u32,
    pub cu_owner: Option<ComputeUnitId>,
    pub state: WorkGroupState,
}

impl WorkGroup {
    #[must_use]
    pub fn wavefront_range(&self) -> std::ops::Range<WavefrontId> {
        self.first_wavefront..self.first_wavefront + self.wavefront_count as usize
    }
}

#[derive(Debug, Clone)]
pub struct Wavefront {
    pub id: WavefrontId,
    pub owning_work_group: WorkGroupId,
    pub first_work_item: WorkItemId,
    pub work_item_count: u32,
    pub pc: usize,
    pub clause_kind: ClauseKind,
    pub loop_depth: u32,
    pub ready_next_cycle: u64,
    pub finished: bool,
}

impl Wavefront {
    fn new(id: WavefrontId, owning_work_group: WorkGroupId, first_work_item: WorkItemId, work_item_count: u32) -> Self {
        Wavefront {
            id,
            owning_work_group,
            first_work_item,
            work_item_count,
            pc: 0,
            clause_kind: ClauseKind::None,
            loop_depth: 0,
            ready_next_cycle: 0,
            finished: false,
        }
    }

    #[must_use]
    pub fn is_ready(&self, cycle: u64) -> bool {
        !self.finished && matches!(self.clause_kind, ClauseKind::None) && self.ready_next_cycle <= cycle
    }

    /// Decodes `INC_LOOP_IDX`/`DEC_LOOP_IDX`. Returns `Err` if a decrement
    /// would take loop depth negative (`spec.md` §7 `LoopUnderflow`).
    pub fn adjust_loop_depth(&mut self, delta: i32) -> Result<(), ()> {
        if delta < 0 && self.loop_depth == 0 {
            return Err(());
        }
        self.loop_depth = (self.loop_depth as i32 + delta) as u32;
        Ok(())
    }
}

/// An immutable kernel-launch descriptor: the work to be scheduled and the
/// decoded instruction stream it runs. `gpu.ndrange` holds at most one of
/// these at a time (`spec.md` §3's single-slot invariant).
#[derive(Debug, Clone)]
pub struct NDRange {
    pub id: NDRangeId,
    pub decoded_text: Rc<DecodedText>,
    pub global_size: u32,
    pub local_size: u32,
    pub group_count: u32,
    pub wavefronts_per_work_group: u32,
    pub local_mem_top: u32,
    pub work_groups: Vec<WorkGroup>,
    pub wavefronts: Vec<Wavefront>,
    pending: std::collections::VecDeque<WorkGroupId>,
}

impl NDRange {
    /// Builds the full set of work-groups and wavefronts for a launch with
    /// uniform `local_size`-sized groups, flattening into a 1-D set as
    /// described on this module.
    #[must_use]
    pub fn new(
        id: NDRangeId,
        decoded_text: Rc<DecodedText>,
        global_size: u32,
        local_size: u32,
        local_mem_top: u32,
        wavefront_size: u32,
    ) -> Self {
        assert!(local_size >= 1, "local_size must be at least 1");
        assert_eq!(
            global_size % local_size,
            0,
            "global_size must be a multiple of local_size"
        );
        let group_count = global_size / local_size;
        let wavefronts_per_work_group = local_size.div_ceil(wavefront_size);

        let mut work_groups = Vec::with_capacity(group_count as usize);
        let mut wavefronts = Vec::new();
        let mut pending = std::collections::VecDeque::with_capacity(group_count as usize);

        for group_id in 0..group_count as usize {
            let first_work_item = group_id * local_size as usize;
            let first_wavefront = wavefronts.len();
            let mut remaining = local_size;
            for _ in 0..wavefronts_per_work_group {
                let this_wf_items = remaining.min(wavefront_size);
                remaining -= this_wf_items;
                let wf_id = wavefronts.len();
                wavefronts.push(Wavefront::new(
                    wf_id,
                    group_id,
                    first_work_item + (wf_id - first_wavefront) * wavefront_size as usize,
                    this_wf_items,
                ));
            }
            work_groups.push(WorkGroup {
                id: group_id,
                first_work_item,
                work_item_count: local_size,
                first_wavefront,
                wavefront_count: wavefronts_per_work_group,
                cu_owner: None,
                state: WorkGroupState::Pending,
            });
            pending.push_back(group_id);
        }

        NDRange {
            id,
            decoded_text,
            global_size,
            local_size,
            group_count,
            wavefronts_per_work_group,
            local_mem_top,
            work_groups,
            wavefronts,
            pending,
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[must_use]
    pub fn peek_pending(&self) -> Option<WorkGroupId> {
        self.pending.front().copied()
    }

    pub fn pop_pending(&mut self) -> Option<WorkGroupId> {
        self.pending.pop_front()
    }

    #[must_use]
    pub fn all_finished(&self) -> bool {
        self.work_groups
            .iter()
            .all(|wg| wg.state == WorkGroupState::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded() -> Rc<DecodedText> {
        Rc::new(DecodedText::new())
    }

    #[test]
    fn partitions_work_items_into_wavefronts() {
        let ndrange = NDRange::new(0, decoded(), 128, 64, 0, 64);
        assert_eq!(ndrange.group_count, 2);
        assert_eq!(ndrange.wavefronts_per_work_group, 1);
        assert_eq!(ndrange.wavefronts.len(), 2);
        assert_eq!(ndrange.work_groups[1].first_work_item, 64);
    }

    #[test]
    fn partial_final_wavefront_gets_remaining_items() {
        let ndrange = NDRange::new(0, decoded(), 96, 96, 0, 64);
        assert_eq!(ndrange.wavefronts_per_work_group, 2);
        assert_eq!(ndrange.wavefronts[0].work_item_count, 64);
        assert_eq!(ndrange.wavefronts[1].work_item_count, 32);
    }

    #[test]
    fn pending_queue_is_fifo() {
        let mut ndrange = NDRange::new(0, decoded(), 192, 64, 0, 64);
        assert_eq!(ndrange.pop_pending(), Some(0));
        assert_eq!(ndrange.pop_pending(), Some(1));
        assert_eq!(ndrange.pop_pending(), Some(2));
        assert_eq!(ndrange.pop_pending(), None);
    }

    #[test]
    fn loop_depth_cannot_go_negative() {
        let mut wf = Wavefront::new(0, 0, 0, 1);
        assert!(wf.adjust_loop_depth(-1).is_err());
        assert_eq!(wf.loop_depth, 0);
        wf.adjust_loop_depth(1).unwrap();
        assert_eq!(wf.loop_depth, 1);
        wf.adjust_loop_depth(-1).unwrap();
        assert_eq!(wf.loop_depth, 0);
    }
}
