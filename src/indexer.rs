//! Pointer position → variant index mapping.
//!
//! Dragging picks a cell of a square grid laid over the unit disk; orbiting
//! cycles through the variants by the mean rotation angle.

use serde::Deserialize;

use crate::events::PointerSample;

/// Subtracted from the grid side so that a coordinate of exactly `1.0` lands
/// in the last cell rather than one past it.
pub const GRID_EPSILON: f64 = 0.01;

pub trait SelectionStrategy {
    /// Index of the variant under `sample`, or `None` when the sample must not
    /// change the selection. Never panics on any input.
    fn index_for(&self, sample: PointerSample, count: usize) -> Option<usize>;
}

/// How drag samples outside the unit disk are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// Samples with distance > 1 are ignored.
    #[default]
    Reject,
    /// The producer already clamped onto the circle; residual overshoot is
    /// projected back onto the boundary.
    Clamp,
}

/// Square-grid selection for drag/touch input over a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridStrategy {
    pub boundary: BoundaryPolicy,
}

/// Cyclic selection for orbit input: the mean of both angles sweeps the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CyclicStrategy;

/// Which strategy is active; chosen per interaction mode by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionMode {
    Drag(GridStrategy),
    Orbit(CyclicStrategy),
}

impl Default for InteractionMode {
    fn default() -> Self {
        InteractionMode::Drag(GridStrategy::default())
    }
}

impl InteractionMode {
    pub fn drag(boundary: BoundaryPolicy) -> Self {
        InteractionMode::Drag(GridStrategy { boundary })
    }

    pub fn orbit() -> Self {
        InteractionMode::Orbit(CyclicStrategy)
    }
}

impl SelectionStrategy for InteractionMode {
    fn index_for(&self, sample: PointerSample, count: usize) -> Option<usize> {
        match self {
            InteractionMode::Drag(grid) => grid.index_for(sample, count),
            InteractionMode::Orbit(cyclic) => cyclic.index_for(sample, count),
        }
    }
}

/// `ceil(sqrt(count))`, exact for large counts.
pub fn grid_side(count: usize) -> usize {
    let mut side = (count as f64).sqrt().ceil() as usize;
    while side.saturating_mul(side) < count {
        side += 1;
    }
    while side > 0 && (side - 1).saturating_mul(side - 1) >= count {
        side -= 1;
    }
    side
}

/// Maps one axis coordinate in `[-1, 1]` to a cell in `0..side`.
pub fn grid_cell(coord: f64, side: usize) -> usize {
    if side == 0 {
        return 0;
    }
    let scaled = ((coord + 1.0) / 2.0) * (side as f64 - GRID_EPSILON);
    (scaled.floor().max(0.0) as usize).min(side - 1)
}

impl SelectionStrategy for GridStrategy {
    fn index_for(&self, sample: PointerSample, count: usize) -> Option<usize> {
        if count == 0 || !sample.x.is_finite() || !sample.y.is_finite() {
            return None;
        }
        let sample = if sample.distance() > 1.0 {
            match self.boundary {
                BoundaryPolicy::Reject => return None,
                BoundaryPolicy::Clamp => sample.clamped_to_disk(),
            }
        } else {
            sample
        };

        let side = grid_side(count);
        let gx = grid_cell(sample.x, side);
        let gy = grid_cell(sample.y, side);
        Some((gy * side + gx).min(count - 1))
    }
}

impl SelectionStrategy for CyclicStrategy {
    fn index_for(&self, sample: PointerSample, count: usize) -> Option<usize> {
        if count == 0 || !sample.x.is_finite() || !sample.y.is_finite() {
            return None;
        }
        let angle = (sample.x + sample.y) / 2.0;
        let raw = (angle * count as f64).floor();
        Some((raw as i64).rem_euclid(count as i64) as usize)
    }
}
