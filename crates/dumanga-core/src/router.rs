//! Maps reader gestures to page controls through configurable bindings.

use serde::{Deserialize, Serialize};

/// What a gesture does to the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageControl {
    Next,
    Previous,
    /// Show or hide the navigation controls.
    Navigation,
}

/// One of the three equal-width vertical strips across the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapZone {
    Left,
    Middle,
    Right,
}

impl TapZone {
    /// Zone for a tap at `x` on a page `width` wide.
    pub fn from_position(x: f64, width: f64) -> Self {
        if width <= 0.0 || x < width / 3.0 {
            TapZone::Left
        } else if x < width * 2.0 / 3.0 {
            TapZone::Middle
        } else {
            TapZone::Right
        }
    }
}

/// Horizontal drags shorter than this are not swipes.
pub const MIN_SWIPE_DISTANCE: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwipeDirection {
    Left,
    Right,
}

impl SwipeDirection {
    /// Direction of a finished drag with horizontal translation `dx`.
    pub fn from_translation(dx: f64) -> Option<Self> {
        if !dx.is_finite() || dx.abs() < MIN_SWIPE_DISTANCE {
            None
        } else if dx < 0.0 {
            Some(SwipeDirection::Left)
        } else {
            Some(SwipeDirection::Right)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Tap(TapZone),
    Swipe(SwipeDirection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBindings {
    pub tap_left: PageControl,
    pub tap_middle: PageControl,
    pub tap_right: PageControl,
    pub swipe_left: PageControl,
    pub swipe_right: PageControl,
}

impl Default for ControlBindings {
    /// Right-to-left reading: the left edge advances.
    fn default() -> Self {
        Self {
            tap_left: PageControl::Next,
            tap_middle: PageControl::Navigation,
            tap_right: PageControl::Previous,
            swipe_left: PageControl::Next,
            swipe_right: PageControl::Previous,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ActionRouter {
    bindings: ControlBindings,
}

impl ActionRouter {
    pub fn new(bindings: ControlBindings) -> Self {
        Self { bindings }
    }

    pub fn bindings(&self) -> &ControlBindings {
        &self.bindings
    }

    pub fn route(&self, gesture: Gesture) -> PageControl {
        let b = &self.bindings;
        match gesture {
            Gesture::Tap(TapZone::Left) => b.tap_left,
            Gesture::Tap(TapZone::Middle) => b.tap_middle,
            Gesture::Tap(TapZone::Right) => b.tap_right,
            Gesture::Swipe(SwipeDirection::Left) => b.swipe_left,
            Gesture::Swipe(SwipeDirection::Right) => b.swipe_right,
        }
    }
}
