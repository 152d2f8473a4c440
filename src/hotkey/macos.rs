//! macOS backend: CGEventTap hook and CGEvent injection
//!
//! The tap runs in filtering mode so events can be swallowed. Modifier keys
//! arrive as FlagsChanged and are translated into key down/up here. Our own
//! synthetic events carry a marker in the user-data field and are let through
//! without reaching the handler.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use core_foundation::runloop::{
    kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop, CFRunLoopSource,
};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::{debug, info, warn};

use crate::engine::Keystroke;

use super::backend::{HookError, HookHandler, InjectError, KeyInjector, KeyboardHook, Verdict};
use super::keys::{Key, KeyEvent};

/// Stamped on every event we post, "ATYP" in ASCII
const SYNTHETIC_MARKER: i64 = 0x4154_5950;

/// Create the hook and injector for the current thread
pub fn open() -> Result<(EventTapHook, EventPostInjector), HookError> {
    Ok((EventTapHook::new(), EventPostInjector::new()?))
}

/// Translate a macOS virtual key code
fn key_from_code(code: i64) -> Key {
    match code {
        56 => Key::LeftShift,
        60 => Key::RightShift,
        59 => Key::LeftControl,
        62 => Key::RightControl,
        58 => Key::LeftAlt,
        61 => Key::RightAlt,
        55 => Key::LeftMeta,
        54 => Key::RightMeta,
        53 => Key::Escape,
        122 => Key::Function(1),
        120 => Key::Function(2),
        99 => Key::Function(3),
        118 => Key::Function(4),
        96 => Key::Function(5),
        97 => Key::Function(6),
        98 => Key::Function(7),
        100 => Key::Function(8),
        101 => Key::Function(9),
        109 => Key::Function(10),
        103 => Key::Function(11),
        111 => Key::Function(12),
        126 => Key::Up,
        125 => Key::Down,
        other => Key::Other(u32::try_from(other).unwrap_or(u32::MAX)),
    }
}

/// Flag that is set while the given modifier key is held
fn modifier_flag(key: Key) -> Option<CGEventFlags> {
    match key {
        Key::LeftShift | Key::RightShift => Some(CGEventFlags::CGEventFlagShift),
        Key::LeftControl | Key::RightControl => Some(CGEventFlags::CGEventFlagControl),
        Key::LeftAlt | Key::RightAlt => Some(CGEventFlags::CGEventFlagAlternate),
        Key::LeftMeta | Key::RightMeta => Some(CGEventFlags::CGEventFlagCommand),
        _ => None,
    }
}

/// Convert a tapped event, `None` for anything we do not understand
fn translate(event_type: CGEventType, event: &CGEvent) -> Option<KeyEvent> {
    let key = key_from_code(event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE));
    match event_type {
        CGEventType::KeyDown => Some(KeyEvent::down(key)),
        CGEventType::KeyUp => Some(KeyEvent::up(key)),
        CGEventType::FlagsChanged => {
            let flag = modifier_flag(key)?;
            if event.get_flags().contains(flag) {
                Some(KeyEvent::down(key))
            } else {
                Some(KeyEvent::up(key))
            }
        }
        _ => None,
    }
}

/// Global keyboard hook backed by a CGEventTap on the current run loop
pub struct EventTapHook {
    tap: Option<CGEventTap<'static>>,
    source: Option<CFRunLoopSource>,
    disabled: Rc<Cell<bool>>,
}

impl EventTapHook {
    pub fn new() -> Self {
        Self {
            tap: None,
            source: None,
            disabled: Rc::new(Cell::new(false)),
        }
    }
}

impl KeyboardHook for EventTapHook {
    fn install(&mut self, handler: HookHandler) -> Result<(), HookError> {
        let handler = RefCell::new(handler);
        let disabled = Rc::clone(&self.disabled);

        // Must return quickly, macOS disables slow taps
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            if matches!(
                event_type,
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput
            ) {
                warn!(?event_type, "event tap disabled, will re-enable");
                disabled.set(true);
                return Some(event.clone());
            }

            if event.get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA) == SYNTHETIC_MARKER {
                return Some(event.clone());
            }

            let Some(key_event) = translate(event_type, event) else {
                return Some(event.clone());
            };

            let verdict = match handler.try_borrow_mut() {
                Ok(mut handler) => (*handler)(key_event),
                Err(_) => Verdict::PassThrough,
            };

            if verdict == Verdict::Suppress {
                // A null event is dropped by the window server
                event.set_type(CGEventType::Null);
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
            ],
            callback,
        )
        .map_err(|_| HookError::EventTapCreation)?;

        let source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HookError::RunLoopSource)?;

        unsafe {
            CFRunLoop::get_current().add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();
        info!("event tap created and enabled");

        self.tap = Some(tap);
        self.source = Some(source);
        Ok(())
    }

    fn pump(&mut self, timeout: Duration) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, timeout, true);
        }

        if self.disabled.replace(false) {
            if let Some(tap) = &self.tap {
                tap.enable();
                debug!("event tap re-enabled");
            }
        }
    }

    fn uninstall(&mut self) {
        if let Some(source) = self.source.take() {
            unsafe {
                CFRunLoop::get_current().remove_source(&source, kCFRunLoopCommonModes);
            }
        }
        if self.tap.take().is_some() {
            info!("event tap removed");
        }
    }
}

impl Drop for EventTapHook {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Posts unicode keyboard events at the HID level
pub struct EventPostInjector {
    source: CGEventSource,
}

impl EventPostInjector {
    pub fn new() -> Result<Self, HookError> {
        let source = CGEventSource::new(CGEventSourceStateID::Private)
            .map_err(|_| HookError::EventSource)?;
        Ok(Self { source })
    }

    /// Build one half of a keystroke
    ///
    /// Flags are cleared so a modifier the user is holding cannot turn the
    /// character into a shortcut.
    fn key_event(&self, keystroke: &Keystroke, key_down: bool) -> Result<CGEvent, InjectError> {
        let event = CGEvent::new_keyboard_event(self.source.clone(), 0, key_down)
            .map_err(|_| InjectError::EventCreation)?;
        event.set_flags(CGEventFlags::empty());
        let mut buf = [0u16; 2];
        event.set_string_from_utf16_unchecked(keystroke.character().encode_utf16(&mut buf));
        event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, SYNTHETIC_MARKER);
        Ok(event)
    }
}

impl KeyInjector for EventPostInjector {
    fn inject(&mut self, keystroke: &Keystroke) -> Result<(), InjectError> {
        let down = self.key_event(keystroke, true)?;
        let up = self.key_event(keystroke, false)?;
        down.post(CGEventTapLocation::HID);
        up.post(CGEventTapLocation::HID);
        Ok(())
    }
}
