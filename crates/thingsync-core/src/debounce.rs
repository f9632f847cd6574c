// ── Debounced controls ──
//
// Decouples how fast a user drags a slider from how many mutations reach
// the network. While a gesture is in progress only the displayed value
// moves; releasing the gesture commits exactly one mutation.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use thingsync_api::ThingState;

use crate::error::CoreError;
use crate::model::{ActionDescriptor, Bounds};

// ── Mutations ────────────────────────────────────────────────────────

/// Which action on which device a control drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTarget {
    pub thing: String,
    pub action: String,
}

impl ActionTarget {
    pub fn new(thing: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            thing: thing.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.thing, self.action)
    }
}

/// One outgoing `PUT /set/{thing}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub thing: String,
    pub values: ThingState,
}

impl Mutation {
    pub fn single(target: &ActionTarget, value: Value) -> Self {
        let mut values = ThingState::new();
        values.insert(target.action.clone(), value);
        Self {
            thing: target.thing.clone(),
            values,
        }
    }
}

/// Sending half of the mutation queue drained by the registry's worker.
#[derive(Debug, Clone)]
pub struct MutationSender {
    tx: mpsc::UnboundedSender<Mutation>,
}

impl MutationSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Mutation>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, mutation: Mutation) -> Result<(), CoreError> {
        self.tx.send(mutation).map_err(|_| CoreError::ShutDown)
    }
}

// ── Control values ───────────────────────────────────────────────────

/// A value a control can display and commit.
pub trait ControlValue: Clone + PartialEq + Serialize + fmt::Debug + Send {
    /// Constrain the value to an action's numeric bounds.
    fn clamp_to(self, _bounds: &Bounds) -> Self {
        self
    }
}

impl ControlValue for f64 {
    fn clamp_to(self, bounds: &Bounds) -> Self {
        bounds.clamp(self)
    }
}

impl ControlValue for i64 {
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    fn clamp_to(self, bounds: &Bounds) -> Self {
        // Bounds on integer actions are integral; rounding keeps them inside.
        let (lo, hi) = (bounds.min.ceil() as i64, bounds.max.floor() as i64);
        if lo > hi {
            self
        } else {
            self.clamp(lo, hi)
        }
    }
}

impl ControlValue for bool {}
impl ControlValue for String {}
impl ControlValue for Value {}

// ── DebouncedControl ─────────────────────────────────────────────────

/// Interaction state of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    /// A gesture is in progress; the user's value wins.
    Editing,
}

/// Two-state debounce machine around one action.
///
/// `Idle` follows external updates and commits single inputs at once.
/// `Editing` only moves the displayed value until [`end_gesture`] commits
/// it. A failed mutation never rolls the displayed value back.
///
/// [`end_gesture`]: Self::end_gesture
#[derive(Debug)]
pub struct DebouncedControl<T: ControlValue> {
    target: ActionTarget,
    displayed: T,
    state: ControlState,
    bounds: Option<Bounds>,
    sender: MutationSender,
}

impl<T: ControlValue> DebouncedControl<T> {
    pub fn new(target: ActionTarget, initial: T, sender: MutationSender) -> Self {
        Self {
            target,
            displayed: initial,
            state: ControlState::Idle,
            bounds: None,
            sender,
        }
    }

    /// A control for `action` on `thing`, clamped to the action's bounds.
    pub fn for_action(
        thing: &str,
        action: &ActionDescriptor,
        initial: T,
        sender: MutationSender,
    ) -> Self {
        let mut control = Self::new(ActionTarget::new(thing, &action.name), initial, sender);
        control.bounds = action.bounds;
        control.displayed = control.constrain(control.displayed.clone());
        control
    }

    pub fn target(&self) -> &ActionTarget {
        &self.target
    }

    pub fn value(&self) -> &T {
        &self.displayed
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_editing(&self) -> bool {
        self.state == ControlState::Editing
    }

    pub fn begin_gesture(&mut self) {
        self.state = ControlState::Editing;
    }

    /// Move the displayed value. Outside a gesture this is a discrete
    /// change (keyboard step, programmatic set) and commits immediately.
    pub fn input(&mut self, value: T) {
        self.displayed = self.constrain(value);
        if self.state == ControlState::Idle {
            self.commit();
        }
    }

    /// Finish the gesture and commit the value shown at release.
    pub fn end_gesture(&mut self) {
        if self.state == ControlState::Idle {
            return;
        }
        self.state = ControlState::Idle;
        self.commit();
    }

    /// Apply a value pushed from the server. Dropped mid-gesture; the
    /// value committed at release supersedes it.
    pub fn external_update(&mut self, value: T) {
        match self.state {
            ControlState::Idle => self.displayed = value,
            ControlState::Editing => {
                debug!(control = %self.target, ?value, "ignoring external update during gesture");
            }
        }
    }

    fn constrain(&self, value: T) -> T {
        match &self.bounds {
            Some(bounds) => value.clamp_to(bounds),
            None => value,
        }
    }

    fn commit(&self) {
        let value = match serde_json::to_value(&self.displayed) {
            Ok(v) => v,
            Err(e) => {
                warn!(control = %self.target, error = %e, "control value not serializable");
                return;
            }
        };
        if let Err(e) = self.sender.send(Mutation::single(&self.target, value)) {
            warn!(control = %self.target, error = %e, "mutation dropped");
        }
    }
}
