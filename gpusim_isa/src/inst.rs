//! Decoded CF/ALU/TEX instruction records.
//!
//! The real decoder lives outside this crate (`spec.md` §1 names it as an
//! external collaborator); these types are the contract it hands the engines
//! in `gpusim_core`: a flat CF stream plus a table of ALU/TEX clauses that CF
//! instructions reference by index.

use serde::{Deserialize, Serialize};

pub type ClauseId = usize;

/// A single CF-stream instruction, as the engine sees it after decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CfInst {
    /// `CF_ALU_WORD0`: triggers an ALU clause.
    AluClause { clause: ClauseId },
    /// `INST_TC`: triggers a TEX clause.
    TexClause { clause: ClauseId },
    /// A write to global memory, recorded against the memory module.
    GlobalMemWrite,
    /// `INC_LOOP_IDX`.
    IncLoopIdx,
    /// `DEC_LOOP_IDX`.
    DecLoopIdx,
    /// End-of-program / `end_of_program` flag.
    Terminator,
}

/// One ALU slot (x, y, z, w, or t) within a VLIW bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AluSlot {
    pub is_local_mem_access: bool,
}

/// A VLIW bundle: up to 5 occupied slots plus literal constants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AluBundle {
    pub slots: Vec<AluSlot>,
    pub literal_count: u8,
}

impl AluBundle {
    #[must_use]
    pub fn new(slots: Vec<AluSlot>) -> Self {
        assert!(slots.len() <= 5, "a VLIW bundle has at most 5 slots");
        AluBundle {
            slots,
            literal_count: 0,
        }
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn local_mem_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_local_mem_access).count()
    }

    /// Encoded size in bytes: 2 words per ALU slot, 1 word per literal.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        self.slots.len() * 8 + self.literal_count as usize * 4
    }
}

/// A single TEX-clause instruction (load or store against the memory module).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TexInst {
    pub is_load: bool,
}

impl TexInst {
    /// Fixed encoded size of a TEX instruction word.
    pub const ENCODED_SIZE: usize = 16;
}

/// The decoded text of a kernel: a CF stream plus its clause tables.
///
/// Standing in for what the external decoder would produce from a kernel's
/// binary; `gpusim_cli` builds one of these directly for demonstration
/// kernels instead of decoding ISA bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodedText {
    pub cf_stream: Vec<CfInst>,
    pub alu_clauses: Vec<Vec<AluBundle>>,
    pub tex_clauses: Vec<Vec<TexInst>>,
}

impl DecodedText {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_alu_clause(&mut self, bundles: Vec<AluBundle>) -> ClauseId {
        self.alu_clauses.push(bundles);
        self.alu_clauses.len() - 1
    }

    pub fn push_tex_clause(&mut self, insts: Vec<TexInst>) -> ClauseId {
        self.tex_clauses.push(insts);
        self.tex_clauses.len() - 1
    }

    #[must_use]
    pub fn alu_clause(&self, id: ClauseId) -> &[AluBundle] {
        &self.alu_clauses[id]
    }

    #[must_use]
    pub fn tex_clause(&self, id: ClauseId) -> &[TexInst] {
        &self.tex_clauses[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_encoded_size_matches_fetch_queue_minimum() {
        let full = AluBundle {
            slots: vec![AluSlot { is_local_mem_access: false }; 5],
            literal_count: 4,
        };
        assert_eq!(full.encoded_size(), 56);
    }

    #[test]
    fn local_mem_slot_count_counts_only_local_accesses() {
        let bundle = AluBundle::new(vec![
            AluSlot { is_local_mem_access: true },
            AluSlot { is_local_mem_access: false },
            AluSlot { is_local_mem_access: true },
        ]);
        assert_eq!(bundle.local_mem_slot_count(), 2);
        assert_eq!(bundle.slot_count(), 3);
    }

    #[test]
    fn decoded_text_clause_round_trip() {
        let mut text = DecodedText::new();
        let id = text.push_alu_clause(vec![AluBundle::new(vec![AluSlot {
            is_local_mem_access: false,
        }])]);
        assert_eq!(text.alu_clause(id).len(), 1);
    }
}
