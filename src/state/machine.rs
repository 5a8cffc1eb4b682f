//! Loop transition table
//!
//! Maps (current loop state, recognized gesture) to the next state and the
//! ordered engine actions that must run before the new state is published.
//! The table is pure: it holds no state beyond the `LoopState` passed in.

use serde::{Deserialize, Serialize};

use crate::gesture::Gesture;

/// Lifecycle phase of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Nothing recorded, engine session not started
    Idle,
    /// First layer is being captured; its length defines the loop
    Recording,
    /// Loop is playing back
    Playing,
    /// Loop is playing back while a new layer is captured
    Overdubbing,
    /// Playback halted, layers kept
    Stopped,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::Idle
    }
}

impl LoopState {
    /// Undo and redo only operate while the loop is audible
    pub fn accepts_history(self) -> bool {
        matches!(self, LoopState::Playing | LoopState::Overdubbing)
    }

    /// Numeric code used by native engines
    pub fn code(self) -> u8 {
        match self {
            LoopState::Idle => 0,
            LoopState::Recording => 1,
            LoopState::Playing => 2,
            LoopState::Overdubbing => 3,
            LoopState::Stopped => 4,
        }
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Recording => write!(f, "Recording"),
            LoopState::Playing => write!(f, "Playing"),
            LoopState::Overdubbing => write!(f, "Overdubbing"),
            LoopState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Commands issued to the engine facade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAction {
    Start,
    Stop,
    Undo,
    Redo,
    /// Change notification, issued after the table actions when the state moved
    SetLoopState(LoopState),
}

/// Outcome of feeding one gesture to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LoopState,
    pub to: LoopState,
    /// Table actions, in execution order
    pub actions: &'static [EngineAction],
}

impl Transition {
    fn new(from: LoopState, to: LoopState, actions: &'static [EngineAction]) -> Self {
        Self { from, to, actions }
    }

    fn stay(state: LoopState) -> Self {
        Self::new(state, state, &[])
    }

    /// Whether the loop state moves
    pub fn is_change(&self) -> bool {
        self.from != self.to
    }

    /// Every engine call this transition produces, in order: table actions
    /// first, then `SetLoopState` when the state moved.
    pub fn engine_calls(&self) -> impl Iterator<Item = EngineAction> + '_ {
        let notify = self.is_change().then_some(EngineAction::SetLoopState(self.to));
        self.actions.iter().copied().chain(notify)
    }
}

/// Look up the transition for `gesture` in `state`
pub fn transition(state: LoopState, gesture: Gesture) -> Transition {
    use EngineAction::{Start, Stop, Undo};
    use Gesture::{DoubleTap, DoubleTapHold, Hold, Tap};
    use LoopState::{Idle, Overdubbing, Playing, Recording, Stopped};

    match (state, gesture) {
        (Idle, Tap) => Transition::new(Idle, Recording, &[Start]),
        (Recording, Tap) => Transition::new(Recording, Playing, &[]),
        (Playing, Tap) => Transition::new(Playing, Overdubbing, &[]),
        (Overdubbing, Tap) => Transition::new(Overdubbing, Playing, &[]),
        (Stopped, Tap) => Transition::new(Stopped, Playing, &[]),

        (Playing | Overdubbing, Hold) => Transition::new(state, state, &[Undo]),
        (Stopped, Hold) => Transition::new(Stopped, Idle, &[Stop]),

        (Playing | Overdubbing, DoubleTap) => Transition::new(state, Stopped, &[]),
        (Playing | Overdubbing, DoubleTapHold) => Transition::new(state, Idle, &[Stop]),

        // Every other pair leaves the loop untouched
        (Idle | Recording, Hold | DoubleTap | DoubleTapHold)
        | (Stopped, DoubleTap | DoubleTapHold) => Transition::stay(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [LoopState; 5] = [
        LoopState::Idle,
        LoopState::Recording,
        LoopState::Playing,
        LoopState::Overdubbing,
        LoopState::Stopped,
    ];

    const ALL_GESTURES: [Gesture; 4] = [
        Gesture::Tap,
        Gesture::Hold,
        Gesture::DoubleTap,
        Gesture::DoubleTapHold,
    ];

    #[test]
    fn test_initial_state() {
        assert_eq!(LoopState::default(), LoopState::Idle);
    }

    #[test]
    fn test_tap_cycle_from_idle() {
        let mut state = LoopState::Idle;
        let mut visited = vec![state];
        for _ in 0..7 {
            state = transition(state, Gesture::Tap).to;
            visited.push(state);
        }

        use LoopState::*;
        assert_eq!(
            visited,
            vec![
                Idle,
                Recording,
                Playing,
                Overdubbing,
                Playing,
                Overdubbing,
                Playing,
                Overdubbing
            ]
        );
    }

    #[test]
    fn test_first_tap_starts_engine() {
        let t = transition(LoopState::Idle, Gesture::Tap);
        assert_eq!(t.to, LoopState::Recording);
        assert_eq!(
            t.engine_calls().collect::<Vec<_>>(),
            vec![
                EngineAction::Start,
                EngineAction::SetLoopState(LoopState::Recording)
            ]
        );
    }

    #[test]
    fn test_hold_undoes_without_state_change() {
        for state in [LoopState::Playing, LoopState::Overdubbing] {
            let t = transition(state, Gesture::Hold);
            assert_eq!(t.to, state);
            assert!(!t.is_change());
            assert_eq!(t.engine_calls().collect::<Vec<_>>(), vec![EngineAction::Undo]);
        }
    }

    #[test]
    fn test_hold_from_stopped_deletes_loop() {
        let t = transition(LoopState::Stopped, Gesture::Hold);
        assert_eq!(t.to, LoopState::Idle);
        assert_eq!(
            t.engine_calls().collect::<Vec<_>>(),
            vec![EngineAction::Stop, EngineAction::SetLoopState(LoopState::Idle)]
        );
    }

    #[test]
    fn test_double_tap_stops_playback() {
        for state in [LoopState::Playing, LoopState::Overdubbing] {
            let t = transition(state, Gesture::DoubleTap);
            assert_eq!(t.to, LoopState::Stopped);
            assert!(t.actions.is_empty());
        }
    }

    #[test]
    fn test_double_tap_hold_deletes_from_playing() {
        let t = transition(LoopState::Playing, Gesture::DoubleTapHold);
        assert_eq!(t.to, LoopState::Idle);
        let stops = t
            .engine_calls()
            .filter(|a| *a == EngineAction::Stop)
            .count();
        assert_eq!(stops, 1);
    }

    #[test]
    fn test_double_tap_hold_while_recording_is_noop() {
        let t = transition(LoopState::Recording, Gesture::DoubleTapHold);
        assert_eq!(t.to, LoopState::Recording);
        assert_eq!(t.engine_calls().count(), 0);
    }

    #[test]
    fn test_unlisted_pairs_are_noops() {
        let listed = [
            (LoopState::Idle, Gesture::Tap),
            (LoopState::Recording, Gesture::Tap),
            (LoopState::Playing, Gesture::Tap),
            (LoopState::Overdubbing, Gesture::Tap),
            (LoopState::Stopped, Gesture::Tap),
            (LoopState::Playing, Gesture::Hold),
            (LoopState::Overdubbing, Gesture::Hold),
            (LoopState::Stopped, Gesture::Hold),
            (LoopState::Playing, Gesture::DoubleTap),
            (LoopState::Overdubbing, Gesture::DoubleTap),
            (LoopState::Playing, Gesture::DoubleTapHold),
            (LoopState::Overdubbing, Gesture::DoubleTapHold),
        ];

        for state in ALL_STATES {
            for gesture in ALL_GESTURES {
                if listed.contains(&(state, gesture)) {
                    continue;
                }
                let t = transition(state, gesture);
                assert_eq!(t.to, state, "{state} + {gesture} should not move");
                assert_eq!(t.engine_calls().count(), 0);
            }
        }
    }

    #[test]
    fn test_set_loop_state_only_on_change() {
        for state in ALL_STATES {
            for gesture in ALL_GESTURES {
                let t = transition(state, gesture);
                let notifications = t
                    .engine_calls()
                    .filter(|a| matches!(a, EngineAction::SetLoopState(_)))
                    .count();
                assert_eq!(notifications, usize::from(t.is_change()));
                assert!(t.actions.iter().all(|a| !matches!(a, EngineAction::SetLoopState(_))));
            }
        }
    }

    #[test]
    fn test_history_actions_only_while_audible() {
        for state in ALL_STATES {
            for gesture in ALL_GESTURES {
                let t = transition(state, gesture);
                let touches_history = t
                    .actions
                    .iter()
                    .any(|a| matches!(a, EngineAction::Undo | EngineAction::Redo));
                if touches_history {
                    assert!(state.accepts_history());
                }
            }
        }
    }

    /// Walks every gesture sequence up to a fixed depth from Idle and checks
    /// that Start and Stop pair up with entering Recording from Idle and
    /// entering Idle.
    #[test]
    fn test_start_stop_pairing_over_reachable_sequences() {
        fn walk(state: LoopState, depth: usize) {
            if depth == 0 {
                return;
            }
            for gesture in ALL_GESTURES {
                let t = transition(state, gesture);
                let starts = t.actions.iter().filter(|a| **a == EngineAction::Start).count();
                let stops = t.actions.iter().filter(|a| **a == EngineAction::Stop).count();

                let starting = t.from == LoopState::Idle && t.to == LoopState::Recording;
                let entering_idle = t.is_change() && t.to == LoopState::Idle;
                assert_eq!(starts, usize::from(starting));
                assert_eq!(stops, usize::from(entering_idle));

                walk(t.to, depth - 1);
            }
        }

        walk(LoopState::Idle, 6);
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&LoopState::Overdubbing).unwrap();
        assert_eq!(json, r#""overdubbing""#);
    }
}
