//! Load-balanced two-way split of a brick inventory.
//!
//! Bricks are never cut. The partitioner looks for the axis-aligned plane
//! that separates whole slabs of bricks so that the work on each side is as
//! close as possible to the requested ratio.

use crate::math::{Aabb, Axis};
use crate::volume::Brick;

/// Bricks sharing one center coordinate along an axis
#[derive(Clone, Debug)]
struct Slab {
    center: f32,
    min: f32,
    max: f32,
    volume: f32,
    members: Vec<usize>,
}

impl Slab {
    fn extent(&self) -> f32 {
        (self.max - self.min).max(0.0)
    }
}

/// Group brick indices into slabs of equal center along `axis`, sorted by
/// center. Centers closer than `epsilon` share a slab.
fn slabs(bricks: &[Brick], indices: &[usize], axis: Axis, epsilon: f32) -> Vec<Slab> {
    let i = axis.index();
    let mut sorted = indices.to_vec();
    sorted.sort_by(|&a, &b| bricks[a].center()[i].total_cmp(&bricks[b].center()[i]));

    let mut out: Vec<Slab> = Vec::new();
    for index in sorted {
        let brick = &bricks[index];
        let center = brick.center()[i];
        match out.last_mut() {
            Some(slab) if (center - slab.center).abs() <= epsilon => {
                slab.min = slab.min.min(brick.bounds.min[i]);
                slab.max = slab.max.max(brick.bounds.max[i]);
                slab.volume += brick.bounds.volume();
                slab.members.push(index);
            }
            _ => out.push(Slab {
                center,
                min: brick.bounds.min[i],
                max: brick.bounds.max[i],
                volume: brick.bounds.volume(),
                members: vec![index],
            }),
        }
    }
    out
}

/// Brick layout recovered from an unordered inventory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrickGrid {
    /// Brick indices sorted by x slab, then y inside the slab, then z
    pub order: Vec<usize>,
    /// Slab count per axis
    pub dims: [usize; 3],
    /// True iff every slab on every axis holds the same number of bricks
    pub regular: bool,
}

impl BrickGrid {
    /// Sort by x-center, then by y-center inside each x slab, then by
    /// z-center inside each (x, y) column.
    pub fn reconstruct(bricks: &[Brick], epsilon: f32) -> Self {
        let all: Vec<usize> = (0..bricks.len()).collect();

        let mut order = Vec::with_capacity(bricks.len());
        for x_slab in slabs(bricks, &all, Axis::X, epsilon) {
            for column in slabs(bricks, &x_slab.members, Axis::Y, epsilon) {
                for cell in slabs(bricks, &column.members, Axis::Z, epsilon) {
                    order.extend(cell.members);
                }
            }
        }

        let per_axis: Vec<Vec<Slab>> = Axis::ALL
            .iter()
            .map(|&axis| slabs(bricks, &all, axis, epsilon))
            .collect();
        let dims = [per_axis[0].len(), per_axis[1].len(), per_axis[2].len()];

        let uniform = per_axis.iter().all(|axis_slabs| {
            axis_slabs
                .first()
                .is_none_or(|first| axis_slabs.iter().all(|s| s.members.len() == first.members.len()))
        });
        let regular = uniform && dims.iter().product::<usize>() == bricks.len();

        Self { order, dims, regular }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Outcome of one partitioner split
#[derive(Clone, Debug)]
pub struct PartitionResult {
    /// Bricks below the plane
    pub first: Vec<Brick>,
    /// Bricks at or above the plane
    pub second: Vec<Brick>,
    pub axis: Axis,
    /// Plane coordinate along `axis`
    pub position: f32,
    /// Achieved work percentages, summing to 100
    pub actual: [f32; 2],
    /// Whether the extent metric (rather than brick volume) was used
    pub regular_grid: bool,
}

impl PartitionResult {
    pub fn actual_percent(&self) -> [f32; 2] {
        self.actual
    }
}

/// Best candidate found on one axis
#[derive(Clone, Debug)]
struct Candidate {
    axis: Axis,
    slabs: Vec<Slab>,
    k: usize,
    percent: f32,
    error: f32,
}

/// Splits brick inventories into two load-balanced halves
#[derive(Clone, Copy, Debug)]
pub struct SpacePartitioner {
    /// Tolerance for treating two brick centers as one slab
    pub epsilon: f32,
}

impl Default for SpacePartitioner {
    fn default() -> Self {
        Self { epsilon: 1e-4 }
    }
}

impl SpacePartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `bricks` into two groups whose work approximates `percent`
    /// (two shares summing to 100; other sums are normalized).
    pub fn split(&self, bricks: Vec<Brick>, percent: [f32; 2]) -> PartitionResult {
        let requested = normalize(percent);

        if bricks.is_empty() {
            return PartitionResult {
                first: Vec::new(),
                second: Vec::new(),
                axis: Axis::X,
                position: 0.0,
                actual: requested,
                regular_grid: true,
            };
        }

        let grid = BrickGrid::reconstruct(&bricks, self.epsilon);
        let all: Vec<usize> = (0..bricks.len()).collect();

        let mut best = self.best_on_axis(&bricks, &all, Axis::X, grid.regular, requested);
        for axis in [Axis::Y, Axis::Z] {
            let candidate = self.best_on_axis(&bricks, &all, axis, grid.regular, requested);
            if candidate.error < best.error {
                best = candidate;
            }
        }

        let bounds = bricks.iter().fold(Aabb::EMPTY, |acc, b| acc.union(&b.bounds));
        let position = plane_position(&best, &bounds);

        let mut side = vec![false; bricks.len()];
        for slab in &best.slabs[..best.k] {
            for &index in &slab.members {
                side[index] = true;
            }
        }

        let mut first = Vec::new();
        let mut second = Vec::new();
        for (brick, below) in bricks.into_iter().zip(side) {
            if below {
                first.push(brick);
            } else {
                second.push(brick);
            }
        }

        log::debug!(
            "Partitioned {} bricks along {:?} at {:.3}: {} / {} ({:.1}% / {:.1}%, requested {:.1}%)",
            first.len() + second.len(), best.axis, position, first.len(), second.len(),
            best.percent, 100.0 - best.percent, requested[0]
        );

        PartitionResult {
            first,
            second,
            axis: best.axis,
            position,
            actual: [best.percent, 100.0 - best.percent],
            regular_grid: grid.regular,
        }
    }

    fn best_on_axis(
        &self,
        bricks: &[Brick],
        indices: &[usize],
        axis: Axis,
        regular: bool,
        requested: [f32; 2],
    ) -> Candidate {
        let slabs = slabs(bricks, indices, axis, self.epsilon);
        log::trace!("Partition axis {:?}: {} slabs", axis, slabs.len());

        // Work per slab: extent on a regular grid, brick volume otherwise,
        // brick count when every brick is flat.
        let mut work: Vec<f32> = if regular {
            slabs.iter().map(Slab::extent).collect()
        } else {
            slabs.iter().map(|s| s.volume).collect()
        };
        if work.iter().sum::<f32>() <= 0.0 {
            work = slabs.iter().map(|s| s.members.len() as f32).collect();
        }
        let total: f32 = work.iter().sum();

        let mut best_k = 0;
        let mut best_percent = 0.0;
        let mut best_error = f32::INFINITY;
        let mut accumulated = 0.0;
        for k in 0..=slabs.len() {
            if k > 0 {
                accumulated += work[k - 1];
            }
            let percent = if total > 0.0 { 100.0 * accumulated / total } else { 0.0 };
            let error = mean_absolute_error([percent, 100.0 - percent], requested);
            if error < best_error {
                best_k = k;
                best_percent = percent;
                best_error = error;
            }
        }

        Candidate {
            axis,
            slabs,
            k: best_k,
            percent: best_percent,
            error: best_error,
        }
    }
}

fn normalize(percent: [f32; 2]) -> [f32; 2] {
    let sum = percent[0] + percent[1];
    if sum > 0.0 {
        [100.0 * percent[0] / sum, 100.0 * percent[1] / sum]
    } else {
        [50.0, 50.0]
    }
}

fn mean_absolute_error(actual: [f32; 2], requested: [f32; 2]) -> f32 {
    ((actual[0] - requested[0]).abs() + (actual[1] - requested[1]).abs()) * 0.5
}

/// Plane for the chosen slab boundary, strictly between the last side-1
/// center and the first side-2 center.
fn plane_position(best: &Candidate, bounds: &Aabb) -> f32 {
    let i = best.axis.index();
    let axis_min = bounds.min[i];
    let axis_max = bounds.max[i];

    if best.k == 0 {
        return axis_min;
    }
    if best.k == best.slabs.len() {
        return axis_max;
    }

    let lo = best.slabs[best.k - 1].center;
    let hi = best.slabs[best.k].center;
    let plane = axis_min + (axis_max - axis_min) * best.percent / 100.0;
    if lo < plane && plane < hi {
        plane
    } else {
        (lo + hi) * 0.5
    }
}
