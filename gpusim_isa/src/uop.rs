//! The micro-op pool (C1): allocates and recycles [`Uop`] records.
//!
//! A `Uop` carries the pipeline metadata attached to one wavefront's pass
//! through an engine stage. Engines allocate one from the pool on issue and
//! return it on retire; the pool never shrinks its backing storage, it only
//! recycles freed slots, so steady-state simulation does no allocation.

use serde::{Deserialize, Serialize};

pub type WavefrontId = usize;
pub type WorkGroupId = usize;
pub type WorkItemId = usize;
pub type UopId = usize;

/// What kind of instruction this uop is carrying through its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UopKind {
    Cf,
    Alu { bundle_index: usize },
    Tex { inst_index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uop {
    pub id: UopId,
    pub wavefront: WavefrontId,
    pub kind: UopKind,
    pub issue_cycle: u64,
    pub ready_cycle: u64,
    /// Bitmask of occupied VLIW slots (bits 0..=4 for x,y,z,w,t); zero for
    /// non-ALU uops.
    pub vliw_slot_mask: u8,
    /// Opaque token handed back by the memory module for this uop's access,
    /// if it issued one.
    pub mem_access: Option<u64>,
}

enum Slot {
    Occupied(Uop),
    Free { next_free: Option<usize> },
}

/// Arena-backed pool of [`Uop`] records, indexed by [`UopId`].
#[derive(Default)]
pub struct UopPool {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    len: usize,
}

impl UopPool {
    #[must_use]
    pub fn new() -> Self {
        UopPool {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn alloc(
        &mut self,
        wavefront: WavefrontId,
        kind: UopKind,
        issue_cycle: u64,
        ready_cycle: u64,
        vliw_slot_mask: u8,
    ) -> UopId {
        let uop_id = match self.free_head.take() {
            Some(id) => id,
            None => {
                self.slots.push(Slot::Free { next_free: None });
                self.slots.len() - 1
            }
        };

        if let Slot::Free { next_free } = self.slots[uop_id] {
            self.free_head = next_free;
        }

        self.slots[uop_id] = Slot::Occupied(Uop {
            id: uop_id,
            wavefront,
            kind,
            issue_cycle,
            ready_cycle,
            vliw_slot_mask,
            mem_access: None,
        });
        self.len += 1;
        uop_id
    }

    #[must_use]
    pub fn get(&self, id: UopId) -> &Uop {
        match &self.slots[id] {
            Slot::Occupied(uop) => uop,
            Slot::Free { .. } => panic!("uop {id} is not allocated"),
        }
    }

    pub fn get_mut(&mut self, id: UopId) -> &mut Uop {
        match &mut self.slots[id] {
            Slot::Occupied(uop) => uop,
            Slot::Free { .. } => panic!("uop {id} is not allocated"),
        }
    }

    pub fn free(&mut self, id: UopId) {
        assert!(
            matches!(self.slots[id], Slot::Occupied(_)),
            "double free of uop {id}"
        );
        self.slots[id] = Slot::Free {
            next_free: self.free_head,
        };
        self.free_head = Some(id);
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_recycles_slots() {
        let mut pool = UopPool::new();
        let a = pool.alloc(0, UopKind::Cf, 0, 2, 0);
        let b = pool.alloc(1, UopKind::Cf, 0, 2, 0);
        assert_eq!(pool.len(), 2);
        pool.free(a);
        assert_eq!(pool.len(), 1);
        let c = pool.alloc(2, UopKind::Cf, 1, 3, 0);
        // The freed slot for `a` should have been reused.
        assert_eq!(c, a);
        assert_ne!(b, c);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pool = UopPool::new();
        let a = pool.alloc(0, UopKind::Cf, 0, 1, 0);
        pool.free(a);
        pool.free(a);
    }
}
