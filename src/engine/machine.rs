//! Core interception state machine
//!
//! Consumes the raw keyboard stream one event at a time, tracks modifiers,
//! and while a scenario is armed swaps each real keystroke for the next
//! batch of scenario characters.

use std::rc::Rc;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::events::EngineEvent;
use crate::hotkey::{KeyEvent, KeyInjector, ModifierState, Verdict};
use crate::scenario::{ScenarioStore, Slot};

use super::cursor::ReplayCursor;
use super::gate::SuppressionGate;
use super::rate::Rate;
use super::recognizer::{self, Action};

/// Externally visible engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No session, keystrokes pass through
    Idle,
    /// Replaying `slot`, `cursor` characters typed so far
    Armed { slot: Slot, cursor: usize, rate: Rate },
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Armed { slot, cursor, rate } => {
                write!(f, "Armed({}, {}, {})", slot, cursor, rate)
            }
        }
    }
}

/// Requests from outside the hook thread, applied between key events
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Set letters-per-keystroke; out-of-range values are clamped
    SetRate(i64),
    /// End the active session, as Escape does
    Stop,
    /// Swap in a freshly loaded scenario set
    ReplaceScenarios(Arc<ScenarioStore>),
}

/// The interception engine, owned by the hook thread
pub struct InterceptionEngine<I> {
    scenarios: Arc<ScenarioStore>,
    modifiers: ModifierState,
    session: Option<ReplayCursor>,
    rate: Rate,
    gate: Rc<SuppressionGate>,
    injector: I,
    event_tx: broadcast::Sender<EngineEvent>,
    torn_down: bool,
}

impl<I: KeyInjector> InterceptionEngine<I> {
    pub fn new(
        scenarios: Arc<ScenarioStore>,
        rate: Rate,
        gate: Rc<SuppressionGate>,
        injector: I,
        event_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            scenarios,
            modifiers: ModifierState::default(),
            session: None,
            rate,
            gate,
            injector,
            event_tx,
            torn_down: false,
        }
    }

    pub fn state(&self) -> State {
        match &self.session {
            None => State::Idle,
            Some(cursor) => State::Armed {
                slot: cursor.slot(),
                cursor: cursor.position(),
                rate: self.rate,
            },
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    #[cfg(test)]
    pub fn modifiers(&self) -> &ModifierState {
        &self.modifiers
    }

    /// Process one keyboard event and decide whether it reaches applications
    pub fn handle_event(&mut self, event: KeyEvent) -> Verdict {
        self.modifiers.on_key_event(event.key, event.direction);
        if !event.is_down() {
            return Verdict::PassThrough;
        }

        let action = recognizer::classify(event.key, &self.modifiers, self.session.is_some());
        trace!(key = %event.key, ?action, "key classified");

        match action {
            Action::Arm(slot) => self.arm(slot),
            Action::AdjustRate(delta) => self.set_rate(self.rate.step(delta)),
            Action::Cancel => self.cancel(),
            Action::Replay => return self.replay_batch(),
            Action::PassThrough => {}
        }

        Verdict::PassThrough
    }

    /// Apply a command queued from another thread
    pub fn apply(&mut self, command: EngineCommand) {
        debug!(?command, "applying engine command");
        match command {
            EngineCommand::SetRate(value) => self.set_rate(Rate::clamped(value)),
            EngineCommand::Stop => self.cancel(),
            EngineCommand::ReplaceScenarios(scenarios) => self.replace_scenarios(scenarios),
        }
    }

    /// Change letters-per-keystroke; notifies only on an actual change
    pub fn set_rate(&mut self, rate: Rate) {
        if rate == self.rate {
            return;
        }
        self.rate = rate;
        info!(%rate, "letters per keystroke changed");
        self.emit(EngineEvent::RateChanged { rate });
    }

    /// End the active session, if any
    pub fn cancel(&mut self) {
        if self.session.is_some() {
            self.stop_session("cancelled");
        }
    }

    /// Replace the scenario set; an active session cannot survive the swap
    pub fn replace_scenarios(&mut self, scenarios: Arc<ScenarioStore>) {
        if self.session.is_some() {
            self.stop_session("scenarios replaced");
        }
        self.scenarios = scenarios;
    }

    /// Final notification on shutdown; only the first call emits
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.session = None;
        info!("engine torn down");
        self.emit(EngineEvent::Stopped);
    }

    fn arm(&mut self, slot: Slot) {
        // An unassigned slot arms like empty text and ends on the first trigger
        let text = self.scenarios.get(slot).unwrap_or_else(|| {
            warn!(%slot, "no scenario assigned to hotkey, arming empty text");
            ""
        });
        let cursor = ReplayCursor::new(slot, text);

        if self.session.is_some() {
            self.stop_session("replaced by another scenario");
        }

        info!(%slot, chars = cursor.len(), "scenario armed");
        self.session = Some(cursor);
        self.emit(EngineEvent::Started { slot });
    }

    fn stop_session(&mut self, reason: &str) {
        if let Some(cursor) = self.session.take() {
            info!(
                slot = %cursor.slot(),
                position = cursor.position(),
                reason,
                "scenario stopped"
            );
            self.emit(EngineEvent::Stopped);
        }
    }

    /// Inject up to `rate` characters in place of the triggering keystroke
    fn replay_batch(&mut self) -> Verdict {
        let mut injected = 0usize;

        for _ in 0..self.rate.get() {
            let Some(cursor) = self.session.as_mut() else {
                break;
            };
            let Some(keystroke) = cursor.next_keystroke() else {
                self.stop_session("no more input data");
                break;
            };

            let result = self
                .gate
                .with_suppression_disabled(|| self.injector.inject(&keystroke));
            if let Err(e) = result {
                warn!(?e, %keystroke, position = cursor.position(), "injection failed, batch abandoned");
                break;
            }

            cursor.advance();
            injected += 1;
            let position = cursor.position();
            let exhausted = cursor.is_exhausted();
            trace!(%keystroke, position, "keystroke injected");
            self.emit(EngineEvent::KeyStroke { position });

            if exhausted {
                self.stop_session("end of scenario");
                break;
            }
        }

        if injected > 0 {
            Verdict::Suppress
        } else {
            Verdict::PassThrough
        }
    }

    fn emit(&self, event: EngineEvent) {
        debug!(%event, "emitting engine event");
        // No subscribers is fine, observers are optional
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::engine::Keystroke;
    use crate::hotkey::{InjectError, Key};

    #[derive(Default)]
    struct InjectLog {
        typed: Vec<Keystroke>,
        /// Attempt numbers (0-based) that should fail
        fail_attempts: Vec<usize>,
        gate_seen_active: Vec<bool>,
    }

    struct RecordingInjector {
        log: Rc<RefCell<InjectLog>>,
        gate: Rc<SuppressionGate>,
    }

    impl KeyInjector for RecordingInjector {
        fn inject(&mut self, keystroke: &Keystroke) -> Result<(), InjectError> {
            let mut log = self.log.borrow_mut();
            let attempt = log.gate_seen_active.len();
            log.gate_seen_active.push(self.gate.is_interception_active());
            if log.fail_attempts.contains(&attempt) {
                return Err(InjectError::Rejected("test failure".into()));
            }
            log.typed.push(*keystroke);
            Ok(())
        }
    }

    struct Harness {
        engine: InterceptionEngine<RecordingInjector>,
        log: Rc<RefCell<InjectLog>>,
        events: broadcast::Receiver<EngineEvent>,
    }

    impl Harness {
        fn new(texts: &[Option<&str>], rate: i64) -> Self {
            let (tx, events) = broadcast::channel(1024);
            let gate = Rc::new(SuppressionGate::new());
            let log = Rc::new(RefCell::new(InjectLog::default()));
            let injector = RecordingInjector {
                log: Rc::clone(&log),
                gate: Rc::clone(&gate),
            };
            let store = Arc::new(ScenarioStore::from_texts(texts.iter().copied()));
            let engine = InterceptionEngine::new(store, Rate::clamped(rate), gate, injector, tx);
            Self { engine, log, events }
        }

        fn press(&mut self, key: Key) -> Verdict {
            let verdict = self.engine.handle_event(KeyEvent::down(key));
            self.engine.handle_event(KeyEvent::up(key));
            verdict
        }

        fn hotkey(&mut self, key: Key) -> Verdict {
            self.engine.handle_event(KeyEvent::down(Key::LeftControl));
            self.engine.handle_event(KeyEvent::down(Key::LeftShift));
            let verdict = self.press(key);
            self.engine.handle_event(KeyEvent::up(Key::LeftShift));
            self.engine.handle_event(KeyEvent::up(Key::LeftControl));
            verdict
        }

        fn typed(&self) -> String {
            self.log.borrow().typed.iter().map(|k| k.character()).collect()
        }

        fn encoded(&self) -> String {
            self.log.borrow().typed.iter().map(|k| k.encoded()).collect()
        }

        fn drain(&mut self) -> Vec<EngineEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn slot(index: usize) -> Slot {
        Slot::new(index).unwrap()
    }

    fn started(index: usize) -> EngineEvent {
        EngineEvent::Started { slot: slot(index) }
    }

    const TYPING: Key = Key::Other(0);

    #[test]
    fn test_initial_state() {
        let harness = Harness::new(&[Some("ab")], 1);
        assert_eq!(harness.engine.state(), State::Idle);
        assert_eq!(harness.engine.rate().get(), 1);
    }

    #[test]
    fn test_idle_keys_pass_through() {
        let mut harness = Harness::new(&[Some("ab")], 1);
        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert_eq!(harness.press(Key::Escape), Verdict::PassThrough);
        assert!(harness.typed().is_empty());
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn test_two_char_sequence() {
        let mut harness = Harness::new(&[Some("ab")], 1);

        harness.hotkey(Key::Function(1));
        assert_eq!(
            harness.engine.state(),
            State::Armed {
                slot: slot(0),
                cursor: 0,
                rate: Rate::clamped(1)
            }
        );
        assert_eq!(harness.drain(), vec![started(0)]);

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "a");
        assert_eq!(harness.drain(), vec![EngineEvent::KeyStroke { position: 1 }]);

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "ab");
        assert_eq!(
            harness.drain(),
            vec![EngineEvent::KeyStroke { position: 2 }, EngineEvent::Stopped]
        );
        assert_eq!(harness.engine.state(), State::Idle);

        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert_eq!(harness.typed(), "ab");
    }

    #[test]
    fn test_replay_is_exact_for_every_rate() {
        let texts = ["x", "hello world", "{braces} (parens) 100% a+b^c~d", "línea\r\nnext", "0123456789abc"];
        for text in texts {
            for rate in 1..=10 {
                let mut harness = Harness::new(&[Some(text)], rate);
                harness.hotkey(Key::Function(1));
                harness.drain();

                let mut stops = 0;
                let mut triggers = 0;
                while harness.engine.state() != State::Idle {
                    assert_eq!(harness.press(TYPING), Verdict::Suppress);
                    triggers += 1;
                    let events = harness.drain();
                    stops += events.iter().filter(|e| **e == EngineEvent::Stopped).count();
                    if stops > 0 {
                        assert_eq!(events.last(), Some(&EngineEvent::Stopped));
                    }
                }

                let len = text.chars().count();
                let expected_triggers = (len + rate as usize - 1) / rate as usize;
                assert_eq!(harness.typed(), text, "rate {}", rate);
                assert_eq!(stops, 1, "text {:?} rate {}", text, rate);
                assert_eq!(triggers, expected_triggers, "text {:?} rate {}", text, rate);
            }
        }
    }

    #[test]
    fn test_batch_emits_keystroke_per_char() {
        let mut harness = Harness::new(&[Some("abcdef")], 4);
        harness.hotkey(Key::Function(1));
        harness.drain();

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "abcd");
        let positions: Vec<EngineEvent> = (1..=4).map(|position| EngineEvent::KeyStroke { position }).collect();
        assert_eq!(harness.drain(), positions);

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(
            harness.drain(),
            vec![
                EngineEvent::KeyStroke { position: 5 },
                EngineEvent::KeyStroke { position: 6 },
                EngineEvent::Stopped
            ]
        );
    }

    #[test]
    fn test_reserved_chars_escaped_in_stream() {
        let mut harness = Harness::new(&[Some("a+{b}~")], 10);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        assert_eq!(harness.encoded(), "a{+}{{}b{}}{~}");
        assert_eq!(harness.typed(), "a+{b}~");
    }

    #[test]
    fn test_rearm_stops_then_starts() {
        let mut harness = Harness::new(&[Some("first text"), None, Some("third")], 1);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        harness.press(TYPING);
        harness.drain();

        harness.hotkey(Key::Function(3));
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped, started(2)]);
        assert_eq!(
            harness.engine.state(),
            State::Armed {
                slot: slot(2),
                cursor: 0,
                rate: Rate::clamped(1)
            }
        );

        harness.press(TYPING);
        assert_eq!(harness.typed(), "fit");
    }

    #[test]
    fn test_rearm_same_slot_restarts() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        harness.drain();

        harness.hotkey(Key::Function(1));
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped, started(0)]);
        harness.press(TYPING);
        assert_eq!(harness.typed(), "aa");
    }

    #[test]
    fn test_arming_unassigned_slot_acts_as_empty_text() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(5));
        assert_eq!(harness.drain(), vec![started(4)]);

        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert_eq!(harness.engine.state(), State::Idle);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);
        assert_eq!(harness.typed(), "");
    }

    #[test]
    fn test_rearm_unassigned_slot_mid_session() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        harness.drain();

        harness.hotkey(Key::Function(2));
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped, started(1)]);
        assert_eq!(
            harness.engine.state(),
            State::Armed {
                slot: slot(1),
                cursor: 0,
                rate: Rate::clamped(1)
            }
        );

        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);
        assert_eq!(harness.typed(), "a");
    }

    #[test]
    fn test_escape_cancels() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        harness.drain();

        assert_eq!(harness.press(Key::Escape), Verdict::PassThrough);
        assert_eq!(harness.engine.state(), State::Idle);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);

        assert_eq!(harness.press(Key::Escape), Verdict::PassThrough);
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn test_rate_clamps_and_notifies_on_change() {
        let mut harness = Harness::new(&[], 9);
        for _ in 0..3 {
            harness.hotkey(Key::Up);
        }
        assert_eq!(harness.engine.rate().get(), 10);
        assert_eq!(
            harness.drain(),
            vec![EngineEvent::RateChanged {
                rate: Rate::clamped(10)
            }]
        );

        let mut harness = Harness::new(&[], 2);
        for _ in 0..3 {
            harness.hotkey(Key::Down);
        }
        assert_eq!(harness.engine.rate().get(), 1);
        assert_eq!(
            harness.drain(),
            vec![EngineEvent::RateChanged {
                rate: Rate::clamped(1)
            }]
        );
    }

    #[test]
    fn test_rate_change_keeps_session() {
        let mut harness = Harness::new(&[Some("abcdef")], 1);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        harness.drain();

        assert_eq!(harness.hotkey(Key::Up), Verdict::PassThrough);
        assert_eq!(
            harness.engine.state(),
            State::Armed {
                slot: slot(0),
                cursor: 1,
                rate: Rate::clamped(2)
            }
        );
        harness.press(TYPING);
        assert_eq!(harness.typed(), "abc");
    }

    #[test]
    fn test_external_rate_is_clamped() {
        let mut harness = Harness::new(&[], 1);
        harness.engine.apply(EngineCommand::SetRate(11));
        assert_eq!(harness.engine.rate().get(), 10);
        harness.engine.apply(EngineCommand::SetRate(-4));
        assert_eq!(harness.engine.rate().get(), 1);
        harness.engine.apply(EngineCommand::SetRate(1));
        assert_eq!(
            harness.drain(),
            vec![
                EngineEvent::RateChanged {
                    rate: Rate::clamped(10)
                },
                EngineEvent::RateChanged {
                    rate: Rate::clamped(1)
                }
            ]
        );
    }

    #[test]
    fn test_modifier_keys_do_not_trigger_replay() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        harness.drain();

        for key in [Key::LeftShift, Key::RightControl, Key::LeftAlt, Key::LeftMeta] {
            assert_eq!(harness.press(key), Verdict::PassThrough);
        }
        assert!(harness.typed().is_empty());
        assert!(harness.drain().is_empty());
    }

    #[test]
    fn test_key_up_never_triggers() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        assert_eq!(harness.engine.handle_event(KeyEvent::up(TYPING)), Verdict::PassThrough);
        assert!(harness.typed().is_empty());
    }

    #[test]
    fn test_gate_closed_during_every_injection() {
        let mut harness = Harness::new(&[Some("hello")], 3);
        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        harness.press(TYPING);

        let log = harness.log.borrow();
        assert_eq!(log.gate_seen_active, vec![false; 5]);
        assert!(harness.engine.gate.is_interception_active());
    }

    #[test]
    fn test_injection_failure_keeps_cursor() {
        let mut harness = Harness::new(&[Some("abcd")], 3);
        harness.hotkey(Key::Function(1));
        harness.drain();

        harness.log.borrow_mut().fail_attempts = vec![0];
        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert!(harness.drain().is_empty());
        assert!(matches!(harness.engine.state(), State::Armed { cursor: 0, .. }));

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "abc");
    }

    #[test]
    fn test_injection_failure_mid_batch() {
        let mut harness = Harness::new(&[Some("abcdef")], 3);
        harness.hotkey(Key::Function(1));
        harness.drain();

        harness.log.borrow_mut().fail_attempts = vec![1];
        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "a");
        assert_eq!(harness.drain(), vec![EngineEvent::KeyStroke { position: 1 }]);
        assert!(harness.engine.gate.is_interception_active());

        assert_eq!(harness.press(TYPING), Verdict::Suppress);
        assert_eq!(harness.typed(), "abcd");
        assert!(matches!(harness.engine.state(), State::Armed { cursor: 4, .. }));
    }

    #[test]
    fn test_empty_scenario_ends_on_first_trigger() {
        let mut harness = Harness::new(&[Some("")], 1);
        harness.hotkey(Key::Function(1));
        assert_eq!(harness.drain(), vec![started(0)]);

        assert_eq!(harness.press(TYPING), Verdict::PassThrough);
        assert_eq!(harness.engine.state(), State::Idle);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);
    }

    #[test]
    fn test_replace_scenarios_stops_session() {
        let mut harness = Harness::new(&[Some("old")], 1);
        harness.hotkey(Key::Function(1));
        harness.drain();

        let fresh = Arc::new(ScenarioStore::from_texts(vec![Some("new")]));
        harness.engine.apply(EngineCommand::ReplaceScenarios(fresh));
        assert_eq!(harness.engine.state(), State::Idle);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);

        harness.hotkey(Key::Function(1));
        harness.press(TYPING);
        assert_eq!(harness.typed(), "n");
    }

    #[test]
    fn test_stop_command() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.engine.apply(EngineCommand::Stop);
        assert!(harness.drain().is_empty());

        harness.hotkey(Key::Function(1));
        harness.drain();
        harness.engine.apply(EngineCommand::Stop);
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);
    }

    #[test]
    fn test_teardown_emits_stopped_once() {
        let mut harness = Harness::new(&[Some("abc")], 1);
        harness.hotkey(Key::Function(1));
        harness.drain();

        harness.engine.teardown();
        harness.engine.teardown();
        assert_eq!(harness.drain(), vec![EngineEvent::Stopped]);
        assert_eq!(harness.engine.state(), State::Idle);
    }

    #[test]
    fn test_modifiers_tracked_across_events() {
        let mut harness = Harness::new(&[], 1);
        harness.engine.handle_event(KeyEvent::down(Key::RightShift));
        harness.engine.handle_event(KeyEvent::down(Key::RightControl));
        assert!(harness.engine.modifiers().is_ctrl_shift());
        harness.engine.handle_event(KeyEvent::up(Key::RightShift));
        assert!(!harness.engine.modifiers().is_shift_held());
    }
}
