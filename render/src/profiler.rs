//! Hierarchical per-frame profiler.
//!
//! `begin_frame` opens the root marker; `push_marker`/`pop_marker` nest
//! below it. A marker closed adds its counters into its parent, so the root
//! of a finished frame carries the frame totals. Marker nodes live in a pool
//! indexed by position, reused frame over frame: in the steady state push and
//! pop allocate nothing, and the active stack holds indices rather than
//! pointers so reuse is safe.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, GraphicsError, Result};

/// Number of finished frame records retained.
pub const FRAME_HISTORY: usize = 60;

/// Counters accumulated by one marker. Monotonic within the marker's
/// lifetime.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MarkerCounters {
    pub draw_time: Duration,
    pub compute_time: Duration,
    pub transfer_time: Duration,
    pub draw_calls: u64,
    pub triangles: u64,
    pub vertices: u64,
    pub compute_dispatches: u64,
    pub pipeline_changes: u64,
    pub descriptor_bindings: u64,
    pub memory_allocated: u64,
    pub memory_used: u64,
    pub barriers: u64,
}

impl MarkerCounters {
    /// Adds `other` into `self`; used when a child marker closes.
    pub fn merge(&mut self, other: &MarkerCounters) {
        self.draw_time += other.draw_time;
        self.compute_time += other.compute_time;
        self.transfer_time += other.transfer_time;
        self.draw_calls += other.draw_calls;
        self.triangles += other.triangles;
        self.vertices += other.vertices;
        self.compute_dispatches += other.compute_dispatches;
        self.pipeline_changes += other.pipeline_changes;
        self.descriptor_bindings += other.descriptor_bindings;
        self.memory_allocated += other.memory_allocated;
        self.memory_used = self.memory_used.max(other.memory_used);
        self.barriers += other.barriers;
    }
}

#[derive(Debug)]
struct MarkerNode {
    name: String,
    counters: MarkerCounters,
    start: Instant,
    cpu_time: Duration,
    depth: usize,
}

/// Summary of one finished frame.
#[derive(Copy, Clone, Debug)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub cpu_time: Duration,
    pub counters: MarkerCounters,
    pub marker_count: usize,
    /// Markers force-closed by `end_frame`; non-zero means a push without a
    /// matching pop.
    pub unbalanced_markers: usize,
}

/// Flat view of one marker for inspection after `end_frame`.
#[derive(Clone, Debug)]
pub struct MarkerSummary {
    pub name: String,
    pub depth: usize,
    pub cpu_time: Duration,
    pub counters: MarkerCounters,
}

//--------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct Profiler {
    /// Pooled marker nodes in creation order; `node_count` are in use for
    /// the current frame.
    nodes: Vec<MarkerNode>,
    node_count: usize,
    /// Indices of the open markers, innermost last. Slot 0 is the frame
    /// root while a frame is open.
    active: Vec<usize>,
    frames: VecDeque<FrameRecord>,
    frame_index: u64,
}

impl Profiler {
    pub fn new() -> Profiler {
        Profiler {
            nodes: Vec::new(),
            node_count: 0,
            active: Vec::with_capacity(16),
            frames: VecDeque::with_capacity(FRAME_HISTORY),
            frame_index: 0,
        }
    }

    pub fn frame_open(&self) -> bool {
        !self.active.is_empty()
    }

    fn acquire_node(&mut self, name: &str, depth: usize) -> usize {
        let index = self.node_count;
        if index < self.nodes.len() {
            let node = &mut self.nodes[index];
            node.name.clear();
            node.name.push_str(name);
            node.counters = MarkerCounters::default();
            node.start = Instant::now();
            node.cpu_time = Duration::ZERO;
            node.depth = depth;
        } else {
            self.nodes.push(MarkerNode {
                name: name.to_owned(),
                counters: MarkerCounters::default(),
                start: Instant::now(),
                cpu_time: Duration::ZERO,
                depth,
            });
        }
        self.node_count += 1;
        index
    }

    /// Opens the root marker of a new frame.
    pub fn begin_frame(&mut self) -> Result<()> {
        if self.frame_open() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "begin_frame while a frame is already open",
            ));
        }
        self.node_count = 0;
        let root = self.acquire_node("Frame", 0);
        self.active.push(root);
        Ok(())
    }

    /// Closes the frame, force-closing any markers left open, and records it
    /// in the frame ring.
    pub fn end_frame(&mut self) -> Result<FrameRecord> {
        if !self.frame_open() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "end_frame without a matching begin_frame",
            ));
        }

        let unbalanced = self.active.len() - 1;
        if unbalanced > 0 {
            log::warn!(
                "end_frame with {} unclosed marker(s); innermost is {:?}",
                unbalanced,
                self.nodes[*self.active.last().unwrap()].name
            );
        }
        while self.active.len() > 1 {
            self.pop_marker()?;
        }

        let root = self.active.pop().unwrap();
        let node = &mut self.nodes[root];
        node.cpu_time = node.start.elapsed();

        let record = FrameRecord {
            frame_index: self.frame_index,
            cpu_time: node.cpu_time,
            counters: node.counters,
            marker_count: self.node_count,
            unbalanced_markers: unbalanced,
        };
        self.frame_index += 1;

        if self.frames.len() == FRAME_HISTORY {
            self.frames.pop_front();
        }
        self.frames.push_back(record);
        Ok(record)
    }

    /// Attaches a child marker to the innermost open marker.
    pub fn push_marker(&mut self, name: &str) -> Result<()> {
        if !self.frame_open() {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "push_marker outside a frame",
            ));
        }
        let depth = self.active.len();
        let node = self.acquire_node(name, depth);
        self.active.push(node);
        Ok(())
    }

    /// Closes the innermost marker, rolling its counters into its parent.
    pub fn pop_marker(&mut self) -> Result<()> {
        if self.active.len() <= 1 {
            return Err(GraphicsError::new(
                ErrorKind::InvalidOperation,
                "pop_marker without a matching push_marker",
            ));
        }
        let index = self.active.pop().unwrap();
        let counters = {
            let node = &mut self.nodes[index];
            node.cpu_time = node.start.elapsed();
            node.counters
        };
        let parent = *self.active.last().unwrap();
        self.nodes[parent].counters.merge(&counters);
        Ok(())
    }

    /// Counters of the innermost open marker, for backends to bump while
    /// executing commands.
    pub fn counters_mut(&mut self) -> Option<&mut MarkerCounters> {
        let index = *self.active.last()?;
        Some(&mut self.nodes[index].counters)
    }

    pub fn record_draw(&mut self, vertices: u64, instances: u64) {
        if let Some(c) = self.counters_mut() {
            c.draw_calls += 1;
            c.vertices += vertices * instances;
            c.triangles += (vertices / 3) * instances;
        }
    }

    pub fn record_dispatch(&mut self) {
        if let Some(c) = self.counters_mut() {
            c.compute_dispatches += 1;
        }
    }

    pub fn record_pipeline_change(&mut self) {
        if let Some(c) = self.counters_mut() {
            c.pipeline_changes += 1;
        }
    }

    pub fn record_binding(&mut self) {
        if let Some(c) = self.counters_mut() {
            c.descriptor_bindings += 1;
        }
    }

    pub fn record_barrier(&mut self) {
        if let Some(c) = self.counters_mut() {
            c.barriers += 1;
        }
    }

    //----------------------------------------------------------------------------------------------

    pub fn frame_history(&self) -> impl Iterator<Item = &FrameRecord> {
        self.frames.iter()
    }

    pub fn last_frame(&self) -> Option<&FrameRecord> {
        self.frames.back()
    }

    /// Mean CPU frame time over the retained ring.
    pub fn average_frame_time(&self) -> Duration {
        if self.frames.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.frames.iter().map(|f| f.cpu_time).sum();
        total / self.frames.len() as u32
    }

    /// Flat dump of the markers of the most recently finished frame, valid
    /// until the next `begin_frame`.
    pub fn marker_summaries(&self) -> Vec<MarkerSummary> {
        self.nodes[..self.node_count]
            .iter()
            .map(|n| MarkerSummary {
                name: n.name.clone(),
                depth: n.depth,
                cpu_time: n.cpu_time,
                counters: n.counters,
            })
            .collect()
    }
}

impl Default for Profiler {
    fn default() -> Profiler {
        Profiler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_roll_up_into_parent() {
        let mut p = Profiler::new();
        p.begin_frame().unwrap();
        p.push_marker("opaque").unwrap();
        p.record_draw(3, 1);
        p.record_draw(6, 2);
        p.pop_marker().unwrap();
        p.push_marker("ui").unwrap();
        p.record_draw(3, 1);
        p.pop_marker().unwrap();
        let frame = p.end_frame().unwrap();

        assert_eq!(frame.counters.draw_calls, 3);
        assert_eq!(frame.counters.triangles, 1 + 4 + 1);
        assert_eq!(frame.counters.vertices, 3 + 12 + 3);
        assert_eq!(frame.marker_count, 3); // root + 2 children
        assert_eq!(frame.unbalanced_markers, 0);
    }

    #[test]
    fn push_pop_is_metric_neutral() {
        let mut p = Profiler::new();
        p.begin_frame().unwrap();
        p.push_marker("A").unwrap();
        p.pop_marker().unwrap();
        let frame = p.end_frame().unwrap();
        assert_eq!(frame.counters, MarkerCounters::default());
        assert_eq!(frame.marker_count, 2);
    }

    #[test]
    fn unbalanced_markers_detected() {
        let mut p = Profiler::new();
        p.begin_frame().unwrap();
        p.push_marker("left open").unwrap();
        let frame = p.end_frame().unwrap();
        assert_eq!(frame.unbalanced_markers, 1);

        let mut p = Profiler::new();
        p.begin_frame().unwrap();
        assert_eq!(
            p.pop_marker().unwrap_err().kind,
            ErrorKind::InvalidOperation
        );
    }

    #[test]
    fn frame_discipline() {
        let mut p = Profiler::new();
        assert!(p.end_frame().is_err());
        p.begin_frame().unwrap();
        assert!(p.begin_frame().is_err());
        p.end_frame().unwrap();
    }

    #[test]
    fn ring_is_bounded_and_averaged() {
        let mut p = Profiler::new();
        for _ in 0..(FRAME_HISTORY + 10) {
            p.begin_frame().unwrap();
            p.end_frame().unwrap();
        }
        assert_eq!(p.frame_history().count(), FRAME_HISTORY);
        assert_eq!(p.last_frame().unwrap().frame_index, FRAME_HISTORY as u64 + 9);
        // frames are empty but the mean must still be well-defined
        let _ = p.average_frame_time();
    }

    #[test]
    fn marker_pool_is_reused() {
        let mut p = Profiler::new();
        for _ in 0..3 {
            p.begin_frame().unwrap();
            p.push_marker("scene").unwrap();
            p.pop_marker().unwrap();
            p.end_frame().unwrap();
        }
        // pool high-water mark, not 3 frames' worth of nodes
        assert_eq!(p.nodes.len(), 2);
    }
}
