//! Page navigation state machine.
//!
//! Navigation is a pure transition over [`NavigationState`]: given the
//! current state, the page count and a [`PageAction`] evaluated under a
//! [`NavContext`], [`step`] yields the next state plus the page index that
//! must be loaded, if any. The reducer applies the state half and the
//! navigation middleware performs the load half, so both see the same
//! outcome for the same input.
//!
//! In split-page mode (enabled *and* portrait) every page is shown as two
//! sequential halves. `First` is the half shown on entering a page going
//! forward, `Last` the half shown on entering it going backward.

use serde::{Deserialize, Serialize};

/// Which half of a split page is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SplitPhase {
    #[default]
    Off,
    First,
    Last,
}

/// Physical half of a page image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageHalf {
    Left,
    Right,
}

/// An index-changing navigation request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PageAction {
    Next,
    Previous,
    /// Jump to a (possibly fractional) position; rounded before use.
    Jump(f64),
}

/// Rounding applied to fractional positions before they become page indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingPolicy {
    /// 2.5 → 3, 3.5 → 4.
    #[default]
    HalfUp,
    /// 2.5 → 2, 3.5 → 4.
    HalfEven,
}

impl RoundingPolicy {
    pub fn round(self, value: f64) -> f64 {
        match self {
            // Half away from zero; positions reaching here are non-negative.
            RoundingPolicy::HalfUp => value.round(),
            RoundingPolicy::HalfEven => value.round_ties_even(),
        }
    }
}

/// Inputs read at the moment an action is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavContext {
    pub is_portrait: bool,
    pub split_enabled: bool,
    pub priority_left: bool,
    pub rounding: RoundingPolicy,
}

impl NavContext {
    /// Split-page rendering is active only in portrait with the setting on.
    pub fn splitting(&self) -> bool {
        self.split_enabled && self.is_portrait
    }
}

/// Reading position within one open archive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationState {
    /// Fractional only while a slider drag is in progress.
    pub current_index: f64,
    pub split_phase: SplitPhase,
    pub controls_hidden: bool,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            current_index: 0.0,
            split_phase: SplitPhase::Off,
            controls_hidden: true,
        }
    }
}

impl NavigationState {
    /// A fresh state positioned at `page` (0-based).
    pub fn at(page: usize) -> Self {
        Self {
            current_index: page as f64,
            ..Self::default()
        }
    }

    /// The integer page index under `rounding`, floored at zero.
    pub fn page_index(&self, rounding: RoundingPolicy) -> usize {
        let rounded = rounding.round(self.current_index);
        if rounded.is_finite() && rounded > 0.0 {
            rounded as usize
        } else {
            0
        }
    }

    /// Which physical half is on screen, or `None` when not splitting.
    pub fn visible_half(&self, priority_left: bool) -> Option<PageHalf> {
        let (first, last) = if priority_left {
            (PageHalf::Left, PageHalf::Right)
        } else {
            (PageHalf::Right, PageHalf::Left)
        };
        match self.split_phase {
            SplitPhase::Off => None,
            SplitPhase::First => Some(first),
            SplitPhase::Last => Some(last),
        }
    }
}

/// Outcome of one navigation step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub state: NavigationState,
    /// Page index whose image must be requested.
    pub load: Option<usize>,
}

impl Transition {
    fn unchanged(nav: &NavigationState) -> Self {
        Self {
            state: *nav,
            load: None,
        }
    }

    /// True when this step loads the final page of the set.
    pub fn reaches_last_page(&self, page_count: usize) -> bool {
        page_count > 0 && self.load == Some(page_count - 1)
    }
}

/// Apply `action` to `nav` for an archive of `page_count` pages.
///
/// Targets outside `[0, page_count - 1]` leave the state untouched and load
/// nothing. With no pages every action is a no-op.
pub fn step(
    nav: &NavigationState,
    page_count: usize,
    action: PageAction,
    ctx: &NavContext,
) -> Transition {
    if page_count == 0 {
        return Transition::unchanged(nav);
    }

    let splitting = ctx.splitting();
    if splitting {
        match (nav.split_phase, action) {
            (SplitPhase::First, PageAction::Next) => {
                return Transition {
                    state: NavigationState {
                        split_phase: SplitPhase::Last,
                        ..*nav
                    },
                    load: None,
                };
            }
            (SplitPhase::Last, PageAction::Previous) => {
                return Transition {
                    state: NavigationState {
                        split_phase: SplitPhase::First,
                        ..*nav
                    },
                    load: None,
                };
            }
            _ => {}
        }
    }

    let target = match action {
        PageAction::Next => ctx.rounding.round(nav.current_index + 1.0),
        PageAction::Previous => ctx.rounding.round(nav.current_index - 1.0),
        PageAction::Jump(position) => ctx.rounding.round(position),
    };
    if !target.is_finite() || target < 0.0 || target > (page_count - 1) as f64 {
        return Transition::unchanged(nav);
    }
    let index = target as usize;

    let split_phase = match (splitting, action) {
        (false, _) => SplitPhase::Off,
        (true, PageAction::Previous) => SplitPhase::Last,
        (true, _) => SplitPhase::First,
    };

    Transition {
        state: NavigationState {
            current_index: index as f64,
            split_phase,
            controls_hidden: nav.controls_hidden,
        },
        load: Some(index),
    }
}

/// Move the position while a slider is being dragged. Clamped, never loads.
pub fn scrub(nav: &NavigationState, page_count: usize, position: f64) -> NavigationState {
    if page_count == 0 || !position.is_finite() {
        return *nav;
    }
    NavigationState {
        current_index: position.clamp(0.0, (page_count - 1) as f64),
        ..*nav
    }
}
