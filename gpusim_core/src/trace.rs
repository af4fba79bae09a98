//! The visualization trace (`spec.md` §6): a line-oriented `event k=v k=v`
//! stream describing ND-Range/work-group/wavefront lifecycle and per-cycle
//! activity, for the kind of external timeline viewer the original tool
//! fed. Emission is opt-in and lazy: nothing is formatted unless a
//! [`TraceWriter`] is actually attached, so a run with tracing off pays
//! nothing for it beyond the `Option` check.

use std::io::Write;

use crate::ndrange::{ComputeUnitId, NDRangeId, WavefrontId, WorkGroupId};

/// Sink for trace lines. Implemented for any [`std::io::Write`]; callers
/// typically wrap a file or an in-memory buffer.
pub struct TraceWriter<W: Write> {
    out: W,
}

impl<W: Write> TraceWriter<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        TraceWriter { out }
    }

    fn emit(&mut self, event: &str, fields: &[(&str, &dyn std::fmt::Display)]) {
        write!(self.out, "{event}").expect("trace write");
        for (key, value) in fields {
            write!(self.out, " {key}={value}").expect("trace write");
        }
        writeln!(self.out).expect("trace write");
    }

    /// Emitted once at the start of a trace: the device shape, so a viewer
    /// can lay out one timeline row per compute unit up front.
    pub fn init(&mut self, num_compute_units: u32) {
        self.emit("init", &[("num_compute_units", &num_compute_units)]);
    }

    pub fn new_ndrange(&mut self, id: NDRangeId, group_count: u32, wavefronts_per_work_group: u32) {
        self.emit(
            "new_ndrange",
            &[
                ("id", &id),
                ("group_count", &group_count),
                ("wavefronts_per_work_group", &wavefronts_per_work_group),
            ],
        );
    }

    pub fn new_work_group(&mut self, ndrange_id: NDRangeId, work_group: WorkGroupId, cu: ComputeUnitId) {
        self.emit(
            "new_wg",
            &[
                ("ndrange", &ndrange_id),
                ("id", &work_group),
                ("cu", &cu),
            ],
        );
    }

    pub fn new_wavefront(&mut self, work_group: WorkGroupId, wavefront: WavefrontId) {
        self.emit("new_wf", &[("wg", &work_group), ("id", &wavefront)]);
    }

    /// One clock tick, so a viewer can scrub by cycle without reparsing
    /// every line that follows it to find boundaries.
    pub fn clock(&mut self, cycle: u64) {
        self.emit("clk", &[("cycle", &cycle)]);
    }

    /// One retired instruction, attributed to the wavefront and stage that
    /// executed it.
    pub fn asm(&mut self, cu: ComputeUnitId, wavefront: WavefrontId, stage: &str, pc: usize) {
        self.emit(
            "asm",
            &[
                ("cu", &cu),
                ("wf", &wavefront),
                ("stage", &stage),
                ("pc", &pc),
            ],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_key_value_lines() {
        let mut buf = Vec::new();
        {
            let mut trace = TraceWriter::new(&mut buf);
            trace.init(4);
            trace.new_ndrange(0, 2, 1);
            trace.clock(1);
            trace.asm(0, 0, "execute", 3);
        }
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("init num_compute_units=4"));
        assert_eq!(lines.next(), Some("new_ndrange id=0 group_count=2 wavefronts_per_work_group=1"));
        assert_eq!(lines.next(), Some("clk cycle=1"));
        assert_eq!(lines.next(), Some("asm cu=0 wf=0 stage=execute pc=3"));
    }
}
