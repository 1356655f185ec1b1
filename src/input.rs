//! Remote input arriving on the reserved data channel.
//!
//! Events are little-endian binary records whose first byte is the event
//! type:
//!
//! | type | layout | size |
//! |---|---|---|
//! | 0 keyboard | `kind u8, repeat u8, key_code u8, char u16` | 6 |
//! | 1 mouse | `x i16, y i16, buttons u8` | 6 |
//! | 2 wheel | `dx f32, dy f32` | 9 |
//! | 3 touch | `count u8`, then `count` × `id i32, phase u8, x i16, y i16, force f32` | 2 + 13n |
//! | 4 button click | `element_id i16` | 3 |

use crate::error::InputError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const KEYBOARD: u8 = 0;
const MOUSE: u8 = 1;
const MOUSE_WHEEL: u8 = 2;
const TOUCH: u8 = 3;
const BUTTON_CLICK: u8 = 4;

const TOUCH_RECORD_LEN: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchPhase {
    Began,
    Moved,
    Stationary,
    Ended,
    Canceled,
}

impl TouchPhase {
    fn from_byte(b: u8) -> Self {
        match b {
            0 => TouchPhase::Began,
            1 => TouchPhase::Moved,
            2 => TouchPhase::Stationary,
            3 => TouchPhase::Ended,
            _ => TouchPhase::Canceled,
        }
    }

    fn is_finished(self) -> bool {
        matches!(self, TouchPhase::Ended | TouchPhase::Canceled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: i32,
    pub phase: TouchPhase,
    pub x: i16,
    pub y: i16,
    pub force: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Keyboard {
        action: KeyAction,
        repeat: bool,
        key_code: u8,
        character: Option<char>,
    },
    Mouse {
        x: i16,
        y: i16,
        buttons: u8,
    },
    MouseWheel {
        delta_x: f32,
        delta_y: f32,
    },
    Touch(Vec<TouchPoint>),
    ButtonClick {
        element_id: i16,
    },
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        // skip the type byte
        Self { buf, pos: 1 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }
}

fn require(bytes: &[u8], kind: &'static str, need: usize) -> Result<(), InputError> {
    if bytes.len() < need {
        return Err(InputError::Truncated {
            kind,
            need,
            got: bytes.len(),
        });
    }
    Ok(())
}

impl InputEvent {
    pub fn decode(bytes: &[u8]) -> Result<Self, InputError> {
        let Some(&event_type) = bytes.first() else {
            return Err(InputError::Empty);
        };
        let mut r = Reader::new(bytes);
        match event_type {
            KEYBOARD => {
                require(bytes, "keyboard", 6)?;
                let action = if r.u8() == 0 { KeyAction::Up } else { KeyAction::Down };
                let repeat = r.u8() == 1;
                let key_code = r.u8();
                let character = match r.u16() {
                    0 => None,
                    unit => char::from_u32(unit as u32),
                };
                Ok(InputEvent::Keyboard {
                    action,
                    repeat,
                    key_code,
                    character,
                })
            }
            MOUSE => {
                require(bytes, "mouse", 6)?;
                Ok(InputEvent::Mouse {
                    x: r.i16(),
                    y: r.i16(),
                    buttons: r.u8(),
                })
            }
            MOUSE_WHEEL => {
                require(bytes, "mouse wheel", 9)?;
                Ok(InputEvent::MouseWheel {
                    delta_x: r.f32(),
                    delta_y: r.f32(),
                })
            }
            TOUCH => {
                require(bytes, "touch", 2)?;
                let count = r.u8() as usize;
                require(bytes, "touch", 2 + count * TOUCH_RECORD_LEN)?;
                let points = (0..count)
                    .map(|_| TouchPoint {
                        id: r.i32(),
                        phase: TouchPhase::from_byte(r.u8()),
                        x: r.i16(),
                        y: r.i16(),
                        force: r.f32(),
                    })
                    .collect();
                Ok(InputEvent::Touch(points))
            }
            BUTTON_CLICK => {
                require(bytes, "button click", 3)?;
                Ok(InputEvent::ButtonClick {
                    element_id: r.i16(),
                })
            }
            other => Err(InputError::UnknownEventType(other)),
        }
    }
}

pub type ClickHandler = Arc<dyn Fn(i32) + Send + Sync>;

/// Element id → click handlers, filled in by the host application
#[derive(Default)]
pub struct ClickTable {
    handlers: RwLock<HashMap<i32, Vec<ClickHandler>>>,
}

impl ClickTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, element_id: i32, handler: F)
    where
        F: Fn(i32) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(element_id)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run every handler bound to `element_id`, returning how many ran
    pub fn invoke(&self, element_id: i32) -> usize {
        let handlers = self
            .handlers
            .read()
            .get(&element_id)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            handler(element_id);
        }
        handlers.len()
    }
}

/// Current input state accumulated from decoded events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSnapshot {
    pub pressed_keys: BTreeSet<u8>,
    pub pointer: (i16, i16),
    pub mouse_buttons: u8,
    pub touches: BTreeMap<i32, TouchPoint>,
}

/// Decoder for the reserved input channel
pub struct RemoteInput {
    state: Mutex<InputSnapshot>,
    clicks: ClickTable,
    events: broadcast::Sender<InputEvent>,
}

impl Default for RemoteInput {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteInput {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(InputSnapshot::default()),
            clicks: ClickTable::new(),
            events,
        }
    }

    pub fn clicks(&self) -> &ClickTable {
        &self.clicks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InputEvent> {
        self.events.subscribe()
    }

    /// Decode one message, fold it into the input state and notify
    /// subscribers. Button clicks also run the click table.
    pub fn process(&self, bytes: &[u8]) -> Result<InputEvent, InputError> {
        let event = InputEvent::decode(bytes)?;
        trace!(?event, "remote input");
        {
            let mut state = self.state.lock();
            match &event {
                InputEvent::Keyboard {
                    action, key_code, ..
                } => match action {
                    KeyAction::Down => {
                        state.pressed_keys.insert(*key_code);
                    }
                    KeyAction::Up => {
                        state.pressed_keys.remove(key_code);
                    }
                },
                InputEvent::Mouse { x, y, buttons } => {
                    state.pointer = (*x, *y);
                    state.mouse_buttons = *buttons;
                }
                InputEvent::MouseWheel { .. } => {}
                InputEvent::Touch(points) => {
                    for point in points {
                        if point.phase.is_finished() {
                            state.touches.remove(&point.id);
                        } else {
                            state.touches.insert(point.id, *point);
                        }
                    }
                }
                InputEvent::ButtonClick { .. } => {}
            }
        }
        if let InputEvent::ButtonClick { element_id } = event {
            let ran = self.clicks.invoke(element_id as i32);
            debug!(element_id, handlers = ran, "button click");
        }
        // no subscribers is fine
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Forget pressed keys, buttons and touches, e.g. when the channel closes.
    pub fn reset(&self) {
        *self.state.lock() = InputSnapshot::default();
        debug!("remote input state reset");
    }

    pub fn snapshot(&self) -> InputSnapshot {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn touch_record(id: i32, phase: u8, x: i16, y: i16, force: f32) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.push(phase);
        out.extend_from_slice(&x.to_le_bytes());
        out.extend_from_slice(&y.to_le_bytes());
        out.extend_from_slice(&force.to_le_bytes());
        out
    }

    #[test]
    fn decodes_keyboard() {
        let event = InputEvent::decode(&[0, 1, 0, 65, b'a', 0]).unwrap();
        assert_eq!(
            event,
            InputEvent::Keyboard {
                action: KeyAction::Down,
                repeat: false,
                key_code: 65,
                character: Some('a'),
            }
        );
    }

    #[test]
    fn decodes_mouse_and_wheel() {
        let mut mouse = vec![1];
        mouse.extend_from_slice(&(-20i16).to_le_bytes());
        mouse.extend_from_slice(&300i16.to_le_bytes());
        mouse.push(0b01);
        assert_eq!(
            InputEvent::decode(&mouse).unwrap(),
            InputEvent::Mouse {
                x: -20,
                y: 300,
                buttons: 1
            }
        );

        let mut wheel = vec![2];
        wheel.extend_from_slice(&1.5f32.to_le_bytes());
        wheel.extend_from_slice(&(-3.0f32).to_le_bytes());
        assert_eq!(
            InputEvent::decode(&wheel).unwrap(),
            InputEvent::MouseWheel {
                delta_x: 1.5,
                delta_y: -3.0
            }
        );
    }

    #[test]
    fn truncated_touch_is_rejected() {
        let mut bytes = vec![3, 2];
        bytes.extend(touch_record(1, 0, 10, 10, 1.0));
        assert_eq!(
            InputEvent::decode(&bytes),
            Err(InputError::Truncated {
                kind: "touch",
                need: 28,
                got: 15
            })
        );
    }

    #[test]
    fn malformed_input_errors() {
        assert_eq!(InputEvent::decode(&[]), Err(InputError::Empty));
        assert_eq!(InputEvent::decode(&[9, 0]), Err(InputError::UnknownEventType(9)));
        assert!(matches!(
            InputEvent::decode(&[4, 1]),
            Err(InputError::Truncated { kind: "button click", .. })
        ));
    }

    #[test]
    fn button_click_runs_registered_handlers() {
        let input = RemoteInput::new();
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        input
            .clicks()
            .register(7, move |id| seen_clone.store(id, Ordering::SeqCst));
        input.clicks().register(8, |_| panic!("wrong element"));

        let mut bytes = vec![4];
        bytes.extend_from_slice(&7i16.to_le_bytes());
        input.process(&bytes).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(input.clicks().invoke(99), 0);
    }

    #[test]
    fn state_tracks_keys_and_touches_until_reset() {
        let input = RemoteInput::new();
        input.process(&[0, 1, 0, 65, 0, 0]).unwrap();
        input.process(&[0, 1, 0, 66, 0, 0]).unwrap();
        input.process(&[0, 0, 0, 65, 0, 0]).unwrap();

        let mut touch = vec![3, 2];
        touch.extend(touch_record(1, 0, 5, 6, 0.5));
        touch.extend(touch_record(2, 3, 7, 8, 0.5));
        input.process(&touch).unwrap();

        let snapshot = input.snapshot();
        assert_eq!(snapshot.pressed_keys.iter().copied().collect::<Vec<_>>(), vec![66]);
        assert_eq!(snapshot.touches.len(), 1);
        assert!(snapshot.touches.contains_key(&1));

        input.reset();
        assert_eq!(input.snapshot(), InputSnapshot::default());
    }

    #[tokio::test]
    async fn subscribers_receive_decoded_events() {
        let input = RemoteInput::new();
        let mut rx = input.subscribe();
        input.process(&[0, 1, 1, 13, 0, 0]).unwrap();
        match rx.recv().await.unwrap() {
            InputEvent::Keyboard { repeat, key_code, .. } => {
                assert!(repeat);
                assert_eq!(key_code, 13);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
