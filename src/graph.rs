//! Grid max-flow on an 8-connected pixel lattice.
//!
//! Nodes live in 8x8 tiles inside a padded lattice with a one-node halo, so
//! every in-image pixel has eight addressable neighbors and the solver
//! needs no bounds checks. Each node stores a search-tree label, a parent
//! link (direction + id), an adoption timestamp, the folded terminal
//! residual and eight per-direction edge residuals.
//!
//! `compute_maxflow` runs the Boykov-Kolmogorov scheme: grow the source and
//! sink trees from active nodes until they touch, push the bottleneck along
//! the found path, then re-home or free the orphaned subtrees. Calling it
//! again on a solved graph performs no augmentations and leaves flow and
//! labels unchanged.

use log::debug;
use serde::Serialize;
use std::collections::VecDeque;

/// Directed edge slots per node.
pub const EDGE_COUNT: usize = 8;

const TILE: usize = 8;

/// Parent marker: node has no parent (free or orphaned).
const NO_PARENT: u8 = EDGE_COUNT as u8;
/// Parent marker: node is rooted directly at its terminal.
const PARENT_TERMINAL: u8 = EDGE_COUNT as u8 + 1;

/// Edge direction from a node to one of its eight neighbors.
///
/// Opposite directions pair up as `d ^ 1`, which the residual updates and
/// the parent bookkeeping rely on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Dir {
    Left = 0,
    Right = 1,
    Up = 2,
    Down = 3,
    UpLeft = 4,
    DownRight = 5,
    DownLeft = 6,
    UpRight = 7,
}

impl Dir {
    pub const ALL: [Dir; EDGE_COUNT] = [
        Dir::Left,
        Dir::Right,
        Dir::Up,
        Dir::Down,
        Dir::UpLeft,
        Dir::DownRight,
        Dir::DownLeft,
        Dir::UpRight,
    ];

    #[inline]
    pub fn opposite(self) -> Dir {
        Dir::ALL[self as usize ^ 1]
    }
}

/// Which search tree a node currently belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Label {
    Free = 0,
    Source = 1,
    Sink = 2,
}

/// Diagnostics of one `compute_maxflow` call.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct FlowStats {
    /// Total flow, including terminal capacities folded at setup.
    pub flow: f64,
    /// Augmenting paths pushed during this call.
    pub augmentations: usize,
}

/// Tile-based node addressing for a `width` x `height` pixel grid.
///
/// Pixel (x, y) maps to lattice position (x + 1, y + 1); the surrounding
/// halo ring absorbs neighbor offsets at the image border. Lattice
/// dimensions are rounded up so tiles divide them exactly.
#[derive(Clone, Copy, Debug)]
struct TiledGrid {
    width: usize,
    height: usize,
    tiles_x: usize,
    tiles_y: usize,
    /// Offset between vertically adjacent nodes in neighboring tile rows.
    row_jump: usize,
}

impl TiledGrid {
    fn new(width: usize, height: usize) -> TiledGrid {
        let padded_w = (width + 2 + TILE - 1) & !(TILE - 1);
        let padded_h = (height + 2 + TILE - 1) & !(TILE - 1);
        let tiles_x = padded_w / TILE;
        let tiles_y = padded_h / TILE;
        TiledGrid {
            width,
            height,
            tiles_x,
            tiles_y,
            row_jump: (tiles_x - 1) * TILE * TILE + TILE,
        }
    }

    fn node_count(&self) -> usize {
        self.tiles_x * self.tiles_y * TILE * TILE
    }

    /// Node id of pixel (x, y); bit-packs tile index and within-tile offset.
    #[inline]
    fn node_id(&self, x: usize, y: usize) -> usize {
        let lx = x + 1;
        let ly = y + 1;
        ((lx / TILE) + (ly / TILE) * self.tiles_x) * (TILE * TILE)
            + (lx & (TILE - 1))
            + (ly & (TILE - 1)) * TILE
    }

    /// Inverse of `node_id`; halo nodes come out negative or past the image.
    #[inline]
    fn node_coord(&self, v: usize) -> (i64, i64) {
        let tile = v / (TILE * TILE);
        let within = v & (TILE * TILE - 1);
        let lx = (tile % self.tiles_x) * TILE + (within & (TILE - 1));
        let ly = (tile / self.tiles_x) * TILE + within / TILE;
        (lx as i64 - 1, ly as i64 - 1)
    }

    /// Neighbor ids in `Dir::ALL` order. Valid for in-image nodes only;
    /// their neighbors exist thanks to the halo.
    #[inline]
    fn neighbors(&self, v: usize) -> [usize; EDGE_COUNT] {
        let tile_cross_x = TILE * TILE - TILE + 1; // 57
        let left = if v & (TILE - 1) != 0 {
            v - 1
        } else {
            v - tile_cross_x
        };
        let right = if v & (TILE - 1) != TILE - 1 {
            v + 1
        } else {
            v + tile_cross_x
        };
        let up = if v & ((TILE - 1) * TILE) != 0 {
            v - TILE
        } else {
            v - self.row_jump
        };
        let down = if (v / TILE) & (TILE - 1) != TILE - 1 {
            v + TILE
        } else {
            v + self.row_jump
        };
        [
            left,
            right,
            up,
            down,
            left + up - v,
            right + down - v,
            left + down - v,
            right + up - v,
        ]
    }
}

/// Reusable max-flow graph over one grid size.
pub struct GridGraph {
    grid: TiledGrid,
    label: Vec<Label>,
    parent: Vec<u8>,
    parent_id: Vec<u32>,
    timestamp: Vec<u32>,
    /// Residual toward the owning terminal; sign lives in the label.
    rc_st: Vec<f64>,
    /// Residual per outgoing direction, indexed `[dir][node]`.
    rc: [Vec<f64>; EDGE_COUNT],
    active: VecDeque<u32>,
    queued: Vec<bool>,
    orphans: VecDeque<u32>,
    orphan_cascade: VecDeque<u32>,
    free_nodes: VecDeque<u32>,
    flow: f64,
    time: u32,
}

impl GridGraph {
    /// Allocate a zeroed graph for a `width` x `height` pixel grid.
    pub fn new(width: usize, height: usize) -> GridGraph {
        assert!(width > 0 && height > 0, "grid dimensions must be positive");
        let grid = TiledGrid::new(width, height);
        let n = grid.node_count();
        GridGraph {
            grid,
            label: vec![Label::Free; n],
            parent: vec![NO_PARENT; n],
            parent_id: vec![0; n],
            timestamp: vec![0; n],
            rc_st: vec![0.0; n],
            rc: std::array::from_fn(|_| vec![0.0; n]),
            active: VecDeque::new(),
            queued: vec![false; n],
            orphans: VecDeque::new(),
            orphan_cascade: VecDeque::new(),
            free_nodes: VecDeque::new(),
            flow: 0.0,
            time: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.grid.width
    }

    pub fn height(&self) -> usize {
        self.grid.height
    }

    /// Node id of pixel (x, y).
    #[inline]
    pub fn node_id(&self, x: usize, y: usize) -> usize {
        self.grid.node_id(x, y)
    }

    /// Pixel coordinates of a node id; diagnostic inverse of `node_id`.
    pub fn node_coord(&self, v: usize) -> (i64, i64) {
        self.grid.node_coord(v)
    }

    /// Zero all capacities, labels and queues for reuse.
    pub fn reset(&mut self) {
        self.label.fill(Label::Free);
        self.parent.fill(NO_PARENT);
        self.parent_id.fill(0);
        self.timestamp.fill(0);
        self.rc_st.fill(0.0);
        for rc in self.rc.iter_mut() {
            rc.fill(0.0);
        }
        self.queued.fill(false);
        self.active.clear();
        self.orphans.clear();
        self.orphan_cascade.clear();
        self.free_nodes.clear();
        self.flow = 0.0;
        self.time = 0;
    }

    /// Install both terminal links of a node.
    ///
    /// The common part `min(cap_s, cap_t)` flows immediately; only the
    /// difference remains as a residual toward the stronger terminal.
    /// Negative capacities are legal (log-likelihood costs) and shift the
    /// flow by a constant without changing the cut.
    pub fn set_terminal_cap(&mut self, v: usize, cap_s: f64, cap_t: f64) {
        debug_assert!(cap_s.is_finite() && cap_t.is_finite());
        self.flow += cap_s.min(cap_t);
        if cap_s == cap_t {
            self.label[v] = Label::Free;
            self.parent[v] = NO_PARENT;
        } else {
            self.label[v] = if cap_s > cap_t {
                Label::Source
            } else {
                Label::Sink
            };
            self.parent[v] = PARENT_TERMINAL;
        }
        self.rc_st[v] = (cap_s - cap_t).abs();
    }

    /// Install one undirected neighbor link: capacity `weight` from `v`
    /// along `dir` and `reverse_weight` back.
    pub fn set_edge_weights(&mut self, v: usize, dir: Dir, weight: f64, reverse_weight: f64) {
        debug_assert!(weight.is_finite() && reverse_weight.is_finite());
        debug_assert!(weight >= 0.0 && reverse_weight >= 0.0);
        let d = dir as usize;
        let neighbor = self.grid.neighbors(v)[d];
        self.rc[d][v] = weight;
        self.rc[d ^ 1][neighbor] = reverse_weight;
    }

    /// True when the node sits on the source side of the cut. Nodes left
    /// unlabeled by the final trees count as source side.
    #[inline]
    pub fn in_source_segment(&self, v: usize) -> bool {
        self.label[v] != Label::Sink
    }

    /// Total flow pushed so far, including folded terminal capacities.
    pub fn flow(&self) -> f64 {
        self.flow
    }

    /// Run the solver to completion and return flow diagnostics.
    pub fn compute_maxflow(&mut self) -> FlowStats {
        self.active.clear();
        self.queued.fill(false);
        for v in 0..self.label.len() {
            self.activate(v);
        }

        let mut augmentations = 0usize;
        while let Some((vs, vt, bridge)) = self.grow() {
            self.time += 1;
            self.flow += self.augment(vs, vt, bridge);
            augmentations += 1;
            self.adopt();
        }
        debug!(
            "maxflow: flow={:.4} augmentations={augmentations}",
            self.flow
        );
        FlowStats {
            flow: self.flow,
            augmentations,
        }
    }

    /// Queue a labeled node that can still do useful growth work.
    fn activate(&mut self, v: usize) {
        let lv = self.label[v];
        if lv == Label::Free {
            return;
        }
        let neighbors = self.grid.neighbors(v);
        for (i, &v2) in neighbors.iter().enumerate() {
            let useful = if lv == Label::Source {
                self.rc[i][v] != 0.0 && self.label[v2] != Label::Source
            } else {
                self.rc[i ^ 1][v2] != 0.0 && self.label[v2] == Label::Free
            };
            if useful {
                self.push_active(v);
                return;
            }
        }
    }

    #[inline]
    fn push_active(&mut self, v: usize) {
        if !self.queued[v] {
            self.queued[v] = true;
            self.active.push_back(v as u32);
        }
    }

    #[inline]
    fn set_parent(&mut self, v: usize, parent: usize, dir_to_parent: usize) {
        self.parent[v] = dir_to_parent as u8;
        self.parent_id[v] = parent as u32;
    }

    /// Expand both trees until they meet; returns the meeting edge as
    /// (source-side node, sink-side node, direction sink -> source).
    fn grow(&mut self) -> Option<(usize, usize, usize)> {
        loop {
            let v = match self.active.front() {
                Some(&v) => v as usize,
                None => return None,
            };
            let lv = self.label[v];
            if lv != Label::Free {
                let neighbors = self.grid.neighbors(v);
                if lv == Label::Source {
                    for (i, &v2) in neighbors.iter().enumerate() {
                        if self.rc[i][v] == 0.0 {
                            continue;
                        }
                        match self.label[v2] {
                            Label::Sink => return Some((v, v2, i ^ 1)),
                            Label::Free => {
                                self.label[v2] = Label::Source;
                                self.set_parent(v2, v, i ^ 1);
                                self.push_active(v2);
                            }
                            Label::Source => {}
                        }
                    }
                } else {
                    for (i, &v2) in neighbors.iter().enumerate() {
                        if self.rc[i ^ 1][v2] == 0.0 {
                            continue;
                        }
                        match self.label[v2] {
                            Label::Source => return Some((v2, v, i)),
                            Label::Free => {
                                self.label[v2] = Label::Sink;
                                self.set_parent(v2, v, i ^ 1);
                                self.push_active(v2);
                            }
                            Label::Sink => {}
                        }
                    }
                }
            }
            self.active.pop_front();
            self.queued[v] = false;
        }
    }

    /// Push the bottleneck along terminal -> vs -> vt -> terminal and
    /// orphan every node whose tree edge saturates.
    fn augment(&mut self, vs: usize, vt: usize, bridge: usize) -> f64 {
        let forward = bridge ^ 1;

        let mut bottleneck = self.rc[forward][vs];
        let mut v = vs;
        while self.parent[v] != PARENT_TERMINAL {
            let p = self.parent[v] as usize;
            let pid = self.parent_id[v] as usize;
            bottleneck = bottleneck.min(self.rc[p ^ 1][pid]);
            v = pid;
        }
        bottleneck = bottleneck.min(self.rc_st[v]);
        v = vt;
        while self.parent[v] != PARENT_TERMINAL {
            let p = self.parent[v] as usize;
            bottleneck = bottleneck.min(self.rc[p][v]);
            v = self.parent_id[v] as usize;
        }
        bottleneck = bottleneck.min(self.rc_st[v]);

        self.rc[forward][vs] -= bottleneck;
        self.rc[bridge][vt] += bottleneck;

        v = vs;
        while self.parent[v] != PARENT_TERMINAL {
            let p = self.parent[v] as usize;
            let pid = self.parent_id[v] as usize;
            self.rc[p][v] += bottleneck;
            self.rc[p ^ 1][pid] -= bottleneck;
            if self.rc[p ^ 1][pid] == 0.0 {
                self.parent[v] = NO_PARENT;
                self.orphans.push_front(v as u32);
            }
            v = pid;
        }
        self.rc_st[v] -= bottleneck;
        if self.rc_st[v] == 0.0 {
            self.parent[v] = NO_PARENT;
            self.orphans.push_front(v as u32);
        }

        v = vt;
        while self.parent[v] != PARENT_TERMINAL {
            let p = self.parent[v] as usize;
            let pid = self.parent_id[v] as usize;
            self.rc[p ^ 1][pid] += bottleneck;
            self.rc[p][v] -= bottleneck;
            if self.rc[p][v] == 0.0 {
                self.parent[v] = NO_PARENT;
                self.orphans.push_front(v as u32);
            }
            v = pid;
        }
        self.rc_st[v] -= bottleneck;
        if self.rc_st[v] == 0.0 {
            self.parent[v] = NO_PARENT;
            self.orphans.push_front(v as u32);
        }

        bottleneck
    }

    /// Re-home orphans inside their tree or set them free; freed nodes
    /// wake up labeled neighbors that can reclaim them.
    fn adopt(&mut self) {
        let time = self.time;
        loop {
            let v = match self
                .orphan_cascade
                .pop_front()
                .or_else(|| self.orphans.pop_front())
            {
                Some(v) => v as usize,
                None => break,
            };
            let lv = self.label[v];
            let neighbors = self.grid.neighbors(v);

            let mut adopted = false;
            for (i, &v2) in neighbors.iter().enumerate() {
                let usable = if lv == Label::Source {
                    self.rc[i ^ 1][v2] != 0.0 && self.label[v2] == Label::Source
                } else {
                    self.rc[i][v] != 0.0 && self.label[v2] == Label::Sink
                };
                if usable && self.find_origin(v2, time) {
                    self.timestamp[v] = time;
                    self.set_parent(v, v2, i);
                    adopted = true;
                    break;
                }
            }
            if adopted {
                continue;
            }

            self.label[v] = Label::Free;
            self.free_nodes.push_back(v as u32);
            for (i, &v2) in neighbors.iter().enumerate() {
                if self.label[v2] == lv
                    && self.parent[v2] as usize == (i ^ 1)
                    && self.parent_id[v2] as usize == v
                {
                    self.parent[v2] = NO_PARENT;
                    self.orphan_cascade.push_back(v2 as u32);
                }
            }
        }

        while let Some(v) = self.free_nodes.pop_front() {
            let v = v as usize;
            let neighbors = self.grid.neighbors(v);
            for (i, &v2) in neighbors.iter().enumerate() {
                match self.label[v2] {
                    Label::Source if self.rc[i ^ 1][v2] != 0.0 => self.push_active(v2),
                    Label::Sink if self.rc[i][v] != 0.0 => self.push_active(v2),
                    _ => {}
                }
            }
        }
    }

    /// Certify that `v0` still reaches its terminal, stamping the path so
    /// later checks in the same epoch short-circuit.
    fn find_origin(&mut self, v0: usize, time: u32) -> bool {
        let mut v = v0;
        loop {
            if self.timestamp[v] == time {
                let mut u = v0;
                while self.timestamp[u] != time {
                    self.timestamp[u] = time;
                    u = self.parent_id[u] as usize;
                }
                return true;
            }
            match self.parent[v] {
                NO_PARENT => return false,
                PARENT_TERMINAL => {
                    let mut u = v0;
                    while self.parent[u] != PARENT_TERMINAL {
                        self.timestamp[u] = time;
                        u = self.parent_id[u] as usize;
                    }
                    self.timestamp[u] = time;
                    return true;
                }
                _ => v = self.parent_id[v] as usize,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_directions_pair_up() {
        for d in Dir::ALL {
            assert_eq!(d.opposite().opposite(), d);
            assert_eq!(d.opposite() as usize, d as usize ^ 1);
        }
        assert_eq!(Dir::Left.opposite(), Dir::Right);
        assert_eq!(Dir::UpLeft.opposite(), Dir::DownRight);
        assert_eq!(Dir::DownLeft.opposite(), Dir::UpRight);
    }

    #[test]
    fn node_id_round_trips_through_node_coord() {
        let grid = TiledGrid::new(13, 9);
        let mut seen = std::collections::HashSet::new();
        for y in 0..9usize {
            for x in 0..13usize {
                let v = grid.node_id(x, y);
                assert!(v < grid.node_count());
                assert!(seen.insert(v), "duplicate node id for ({x}, {y})");
                assert_eq!(grid.node_coord(v), (x as i64, y as i64));
            }
        }
    }

    #[test]
    fn neighbors_match_pixel_offsets() {
        let grid = TiledGrid::new(20, 17);
        let offsets: [(i64, i64); EDGE_COUNT] = [
            (-1, 0),
            (1, 0),
            (0, -1),
            (0, 1),
            (-1, -1),
            (1, 1),
            (-1, 1),
            (1, -1),
        ];
        for y in 0..17usize {
            for x in 0..20usize {
                let v = grid.node_id(x, y);
                let neighbors = grid.neighbors(v);
                for (d, &(dx, dy)) in offsets.iter().enumerate() {
                    let (nx, ny) = grid.node_coord(neighbors[d]);
                    assert_eq!(
                        (nx, ny),
                        (x as i64 + dx, y as i64 + dy),
                        "direction {d} from ({x}, {y})"
                    );
                }
            }
        }
    }

    #[test]
    fn neighbor_links_are_mutually_inverse() {
        let grid = TiledGrid::new(10, 10);
        for y in 1..9usize {
            for x in 1..9usize {
                let v = grid.node_id(x, y);
                for d in 0..EDGE_COUNT {
                    let v2 = grid.neighbors(v)[d];
                    assert_eq!(grid.neighbors(v2)[d ^ 1], v);
                }
            }
        }
    }

    #[test]
    fn terminal_fold_solves_single_node_without_search() {
        let mut g = GridGraph::new(1, 1);
        let v = g.node_id(0, 0);
        g.set_terminal_cap(v, 3.0, 5.0);
        let stats = g.compute_maxflow();
        assert_eq!(stats.flow, 3.0);
        assert_eq!(stats.augmentations, 0);
        assert!(!g.in_source_segment(v));
    }

    #[test]
    fn two_node_bottleneck_pushes_the_smaller_terminal_cap() {
        let mut g = GridGraph::new(2, 1);
        let a = g.node_id(0, 0);
        let b = g.node_id(1, 0);
        g.set_terminal_cap(a, 5.0, 0.0);
        g.set_terminal_cap(b, 0.0, 3.0);
        g.set_edge_weights(b, Dir::Left, 10.0, 10.0);
        let stats = g.compute_maxflow();
        assert_eq!(stats.flow, 3.0);
        assert_eq!(stats.augmentations, 1);
        // the sink-side residual is exhausted, both nodes end in the
        // source tree
        assert!(g.in_source_segment(a));
        assert!(g.in_source_segment(b));
    }

    #[test]
    fn two_node_bottleneck_with_flipped_terminals_ends_in_sink_tree() {
        let mut g = GridGraph::new(2, 1);
        let a = g.node_id(0, 0);
        let b = g.node_id(1, 0);
        g.set_terminal_cap(a, 3.0, 0.0);
        g.set_terminal_cap(b, 0.0, 5.0);
        g.set_edge_weights(b, Dir::Left, 10.0, 10.0);
        let stats = g.compute_maxflow();
        assert_eq!(stats.flow, 3.0);
        assert!(!g.in_source_segment(a));
        assert!(!g.in_source_segment(b));
    }

    #[test]
    fn saturated_bridge_separates_the_pair() {
        let mut g = GridGraph::new(2, 1);
        let a = g.node_id(0, 0);
        let b = g.node_id(1, 0);
        g.set_terminal_cap(a, 8.0, 0.0);
        g.set_terminal_cap(b, 0.0, 9.0);
        g.set_edge_weights(b, Dir::Left, 2.0, 2.0);
        let stats = g.compute_maxflow();
        assert_eq!(stats.flow, 2.0);
        assert!(g.in_source_segment(a));
        assert!(!g.in_source_segment(b));
    }

    #[test]
    fn reset_clears_flow_and_labels() {
        let mut g = GridGraph::new(3, 3);
        let v = g.node_id(1, 1);
        g.set_terminal_cap(v, 4.0, 1.0);
        g.compute_maxflow();
        assert!(g.flow() > 0.0);
        g.reset();
        assert_eq!(g.flow(), 0.0);
        let stats = g.compute_maxflow();
        assert_eq!(stats.flow, 0.0);
        assert_eq!(stats.augmentations, 0);
    }
}
