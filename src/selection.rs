use tracing::debug;

use crate::events::{NormalizedVariant, PointerSample, VariantMatrix, VariantSetting};
use crate::indexer::{InteractionMode, SelectionStrategy};

pub const DEFAULT_NEUTRAL_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    Empty,
    Populated,
}

/// Identifies one generate call; only the most recent ticket may install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenerationTicket(u64);

impl GenerationTicket {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The matrix is installed and the selection starts at `index`.
    Installed { index: usize },
    /// The call failed; whatever was installed before it is back in place.
    Restored,
    /// A newer call (or a reset) superseded this one; nothing changed.
    Stale,
}

/// The visible variant after a pointer-driven change.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub index: usize,
    pub variant: NormalizedVariant,
}

#[derive(Debug, Clone)]
struct Installed {
    matrix: VariantMatrix,
    current_index: usize,
}

#[derive(Debug, Clone)]
enum State {
    Empty,
    /// A generate call is in flight. Pointer samples are ignored; the
    /// previous matrix is kept aside in case the call fails.
    Pending { retained: Option<Installed> },
    Populated(Installed),
}

/// Holds the installed variant matrix and turns pointer samples into
/// selection changes.
///
/// Transitions:
/// - `begin_generation`: any state → Empty (pending)
/// - `complete` with the latest ticket: → Populated
/// - `fail` with the latest ticket: → previous state restored
/// - `on_pointer`: Populated → Populated, possibly with a new index
#[derive(Debug)]
pub struct SelectionController {
    state: State,
    mode: InteractionMode,
    neutral_tolerance: f64,
    generation: u64,
    last_pointer: Option<PointerSample>,
}

impl Default for SelectionController {
    fn default() -> Self {
        Self::new(InteractionMode::default(), DEFAULT_NEUTRAL_TOLERANCE)
    }
}

impl SelectionController {
    pub fn new(mode: InteractionMode, neutral_tolerance: f64) -> Self {
        Self {
            state: State::Empty,
            mode,
            neutral_tolerance,
            generation: 0,
            last_pointer: None,
        }
    }

    pub fn phase(&self) -> SelectionPhase {
        match self.state {
            State::Populated(_) => SelectionPhase::Populated,
            State::Empty | State::Pending { .. } => SelectionPhase::Empty,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, State::Pending { .. })
    }

    pub fn mode(&self) -> InteractionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InteractionMode) {
        self.mode = mode;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_pointer(&self) -> Option<PointerSample> {
        self.last_pointer
    }

    /// Installed matrix, if any is currently selectable.
    pub fn matrix(&self) -> Option<&VariantMatrix> {
        match &self.state {
            State::Populated(installed) => Some(&installed.matrix),
            _ => None,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        match &self.state {
            State::Populated(installed) => Some(installed.current_index),
            _ => None,
        }
    }

    pub fn current(&self) -> Option<&NormalizedVariant> {
        match &self.state {
            State::Populated(installed) => installed.matrix.get(installed.current_index),
            _ => None,
        }
    }

    /// What stays on screen: the current variant, or the one that was current
    /// before an in-flight generate call started.
    pub fn displayed(&self) -> Option<&NormalizedVariant> {
        match &self.state {
            State::Populated(installed)
            | State::Pending {
                retained: Some(installed),
            } => installed.matrix.get(installed.current_index),
            _ => None,
        }
    }

    /// Marks a new generate call as dispatched and returns its ticket.
    pub fn begin_generation(&mut self) -> GenerationTicket {
        self.generation += 1;
        let retained = match std::mem::replace(&mut self.state, State::Empty) {
            State::Populated(installed) => Some(installed),
            State::Pending { retained } => retained,
            State::Empty => None,
        };
        self.state = State::Pending { retained };
        GenerationTicket(self.generation)
    }

    /// Applies the result of the call identified by `ticket`.
    pub fn complete(&mut self, ticket: GenerationTicket, matrix: VariantMatrix) -> Completion {
        if !self.is_latest(ticket) {
            debug!(
                generation = ticket.value(),
                latest = self.generation,
                "discarding stale variant matrix"
            );
            return Completion::Stale;
        }
        if matrix.is_empty() {
            return self.fail(ticket);
        }
        let index = neutral_index(&matrix, self.neutral_tolerance);
        self.state = State::Populated(Installed {
            matrix,
            current_index: index,
        });
        Completion::Installed { index }
    }

    /// Records that the call identified by `ticket` failed.
    pub fn fail(&mut self, ticket: GenerationTicket) -> Completion {
        if !self.is_latest(ticket) {
            return Completion::Stale;
        }
        self.state = match std::mem::replace(&mut self.state, State::Empty) {
            State::Pending {
                retained: Some(installed),
            } => State::Populated(installed),
            _ => State::Empty,
        };
        Completion::Restored
    }

    /// Drops the installed matrix and invalidates every in-flight call.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = State::Empty;
        self.last_pointer = None;
    }

    /// Maps a pointer sample to a variant; returns it only when the visible
    /// variant changes.
    pub fn on_pointer(&mut self, sample: PointerSample) -> Option<Selection> {
        self.last_pointer = Some(sample);
        let State::Populated(installed) = &mut self.state else {
            return None;
        };
        let index = self.mode.index_for(sample, installed.matrix.len())?;
        if index == installed.current_index {
            return None;
        }
        let variant = installed.matrix.get(index)?.clone();
        installed.current_index = index;
        Some(Selection { index, variant })
    }

    fn is_latest(&self, ticket: GenerationTicket) -> bool {
        ticket.0 == self.generation && self.is_pending()
    }
}

/// Initial selection for a freshly installed matrix.
///
/// An exact `(0.5, 0.5)` match wins; otherwise the variant nearest the
/// midpoint among those within `tolerance` on both axes; otherwise 0.
pub fn neutral_index(matrix: &VariantMatrix, tolerance: f64) -> usize {
    let neutral = VariantSetting::NEUTRAL;
    if let Some(exact) = matrix.iter().position(|v| v.settings == neutral) {
        return exact;
    }
    matrix
        .iter()
        .enumerate()
        .filter(|(_, v)| {
            (v.settings.brightness - neutral.brightness).abs() < tolerance
                && (v.settings.contrast - neutral.contrast).abs() < tolerance
        })
        .min_by(|(_, a), (_, b)| {
            a.settings
                .distance_to(&neutral)
                .total_cmp(&b.settings.distance_to(&neutral))
        })
        .map(|(index, _)| index)
        .unwrap_or(0)
}
