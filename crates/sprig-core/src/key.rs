//! Decoding of raw terminal input into structured key events.
//!
//! Each read from the input device is decoded as a whole into exactly one
//! [`KeyEvent`]. The decoder is permissive: empty, partial or unrecognized
//! sequences decode to [`Key::Unknown`] instead of failing, so hostile input
//! can never take the runtime down.

use std::fmt;

const ESC: u8 = 0x1b;
const CSI_OPEN: u8 = b'[';

bitflags::bitflags! {
    /// Modifier keys held alongside a key.
    ///
    /// An empty set means no modifiers; `CTRL | ALT` style unions are allowed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const CTRL  = 1 << 0;
        const ALT   = 1 << 1;
        const SHIFT = 1 << 2;
    }
}

/// Key identity of a [`KeyEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// A printable character (or the letter of a control chord).
    Character(char),
    Up,
    Down,
    Right,
    Left,
    /// Anything the decoder does not recognize.
    Unknown,
}

/// One decoded key press.
///
/// Produced once per input chunk and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyEvent {
    /// Which key was pressed.
    pub key: Key,
    /// Modifiers held while it was pressed.
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Create a key event from its parts.
    pub const fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }

    /// A key pressed without modifiers.
    pub const fn plain(key: Key) -> Self {
        Self::new(key, Modifiers::empty())
    }

    /// A character pressed together with ctrl.
    pub const fn ctrl(c: char) -> Self {
        Self::new(Key::Character(c), Modifiers::CTRL)
    }

    /// The event produced for input that matches no known pattern.
    pub const fn unknown() -> Self {
        Self::plain(Key::Unknown)
    }

    /// Decode one chunk of raw input bytes.
    ///
    /// The whole chunk is treated as one key: a single byte is either a
    /// control chord or a plain character, `ESC x` is alt+`x`, and
    /// `ESC [ ... final` is a cursor sequence keyed on its final byte. The
    /// xterm modifier parameter is only read from the six-byte form
    /// `ESC [ 1 ; m final`; any other length carries no modifiers.
    pub fn decode(bytes: &[u8]) -> Self {
        match bytes {
            [byte] => decode_single(*byte),
            [ESC, second] => Self::new(Key::Character(char::from(*second)), Modifiers::ALT),
            [ESC, CSI_OPEN, .., last] => {
                let key = match last {
                    b'A' => Key::Up,
                    b'B' => Key::Down,
                    b'C' => Key::Right,
                    b'D' => Key::Left,
                    _ => Key::Unknown,
                };
                let modifiers = if bytes.len() == 6 {
                    modifier_parameter(bytes[4])
                } else {
                    Modifiers::empty()
                };
                Self::new(key, modifiers)
            }
            _ => Self::unknown(),
        }
    }
}

fn decode_single(byte: u8) -> KeyEvent {
    match byte {
        0 => KeyEvent::ctrl(' '),
        1..=26 => KeyEvent::ctrl(char::from(b'@' + byte)),
        27 => KeyEvent::ctrl('['),
        28 => KeyEvent::ctrl('\\'),
        29 => KeyEvent::ctrl(']'),
        30 => KeyEvent::ctrl('^'),
        31 => KeyEvent::ctrl('_'),
        127 => KeyEvent::ctrl('?'),
        other => KeyEvent::plain(Key::Character(char::from(other))),
    }
}

/// Map the xterm modifier parameter (`1 + bitmask`, as an ASCII digit).
fn modifier_parameter(param: u8) -> Modifiers {
    match param {
        b'2' => Modifiers::SHIFT,
        b'3' => Modifiers::ALT,
        b'4' => Modifiers::ALT | Modifiers::SHIFT,
        b'5' => Modifiers::CTRL,
        b'6' => Modifiers::CTRL | Modifiers::SHIFT,
        b'7' => Modifiers::CTRL | Modifiers::ALT,
        b'8' => Modifiers::CTRL | Modifiers::ALT | Modifiers::SHIFT,
        _ => Modifiers::empty(),
    }
}

impl From<&[u8]> for KeyEvent {
    fn from(bytes: &[u8]) -> Self {
        Self::decode(bytes)
    }
}

impl From<KeyEvent> for crossterm::event::KeyEvent {
    fn from(event: KeyEvent) -> Self {
        use crossterm::event::{KeyCode, KeyModifiers};

        let code = match event.key {
            Key::Character(c) => KeyCode::Char(c),
            Key::Up => KeyCode::Up,
            Key::Down => KeyCode::Down,
            Key::Right => KeyCode::Right,
            Key::Left => KeyCode::Left,
            Key::Unknown => KeyCode::Null,
        };
        let mut modifiers = KeyModifiers::NONE;
        if event.modifiers.contains(Modifiers::CTRL) {
            modifiers |= KeyModifiers::CONTROL;
        }
        if event.modifiers.contains(Modifiers::ALT) {
            modifiers |= KeyModifiers::ALT;
        }
        if event.modifiers.contains(Modifiers::SHIFT) {
            modifiers |= KeyModifiers::SHIFT;
        }
        crossterm::event::KeyEvent::new(code, modifiers)
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Modifiers::CTRL, "ctrl"),
            (Modifiers::ALT, "alt"),
            (Modifiers::SHIFT, "shift"),
        ] {
            if self.modifiers.contains(flag) {
                write!(f, "{name}+")?;
            }
        }
        match self.key {
            Key::Character(' ') => f.write_str("space"),
            Key::Character(c) => write!(f, "{c}"),
            Key::Up => f.write_str("up"),
            Key::Down => f.write_str("down"),
            Key::Right => f.write_str("right"),
            Key::Left => f.write_str("left"),
            Key::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bytes_map_to_ctrl_letters() {
        for byte in 1u8..=26 {
            let event = KeyEvent::decode(&[byte]);
            assert_eq!(event.modifiers, Modifiers::CTRL);
            assert_eq!(event.key, Key::Character(char::from(64 + byte)));
        }
    }

    #[test]
    fn nul_and_del_are_ctrl_chords() {
        assert_eq!(KeyEvent::decode(&[0]), KeyEvent::ctrl(' '));
        assert_eq!(KeyEvent::decode(&[127]), KeyEvent::ctrl('?'));
    }

    #[test]
    fn remaining_control_bytes() {
        assert_eq!(KeyEvent::decode(&[27]), KeyEvent::ctrl('['));
        assert_eq!(KeyEvent::decode(&[28]), KeyEvent::ctrl('\\'));
        assert_eq!(KeyEvent::decode(&[29]), KeyEvent::ctrl(']'));
        assert_eq!(KeyEvent::decode(&[30]), KeyEvent::ctrl('^'));
        assert_eq!(KeyEvent::decode(&[31]), KeyEvent::ctrl('_'));
    }

    #[test]
    fn printable_bytes_are_plain_characters() {
        assert_eq!(
            KeyEvent::decode(b"a"),
            KeyEvent::plain(Key::Character('a'))
        );
        assert_eq!(
            KeyEvent::decode(b" "),
            KeyEvent::plain(Key::Character(' '))
        );
        // High bytes are taken as Latin-1 code points.
        assert_eq!(
            KeyEvent::decode(&[0xe9]),
            KeyEvent::plain(Key::Character('é'))
        );
    }

    #[test]
    fn escape_pair_is_alt_chord() {
        for second in [b'x', b'1', 0u8, 200] {
            let event = KeyEvent::decode(&[ESC, second]);
            assert_eq!(event.modifiers, Modifiers::ALT);
            assert_eq!(event.key, Key::Character(char::from(second)));
        }
    }

    #[test]
    fn escape_bracket_pair_is_still_alt() {
        assert_eq!(
            KeyEvent::decode(&[ESC, CSI_OPEN]),
            KeyEvent::new(Key::Character('['), Modifiers::ALT)
        );
    }

    #[test]
    fn arrow_sequences() {
        assert_eq!(KeyEvent::decode(b"\x1b[A"), KeyEvent::plain(Key::Up));
        assert_eq!(KeyEvent::decode(b"\x1b[B"), KeyEvent::plain(Key::Down));
        assert_eq!(KeyEvent::decode(b"\x1b[C"), KeyEvent::plain(Key::Right));
        assert_eq!(KeyEvent::decode(b"\x1b[D"), KeyEvent::plain(Key::Left));
    }

    #[test]
    fn unknown_final_byte_in_csi() {
        assert_eq!(KeyEvent::decode(b"\x1b[H"), KeyEvent::unknown());
        assert_eq!(KeyEvent::decode(b"\x1b[3~"), KeyEvent::unknown());
    }

    #[test]
    fn six_byte_form_carries_modifiers() {
        assert_eq!(
            KeyEvent::decode(b"\x1b[1;5A"),
            KeyEvent::new(Key::Up, Modifiers::CTRL)
        );
        assert_eq!(
            KeyEvent::decode(b"\x1b[1;2D"),
            KeyEvent::new(Key::Left, Modifiers::SHIFT)
        );
        assert_eq!(
            KeyEvent::decode(b"\x1b[1;8B"),
            KeyEvent::new(Key::Down, Modifiers::all())
        );
        assert_eq!(
            KeyEvent::decode(b"\x1b[1;4C"),
            KeyEvent::new(Key::Right, Modifiers::ALT | Modifiers::SHIFT)
        );
        assert_eq!(
            KeyEvent::decode(b"\x1b[1;9C"),
            KeyEvent::plain(Key::Right)
        );
    }

    #[test]
    fn other_lengths_drop_modifiers() {
        assert_eq!(KeyEvent::decode(b"\x1b[5A"), KeyEvent::plain(Key::Up));
        assert_eq!(KeyEvent::decode(b"\x1b[1;5;A"), KeyEvent::plain(Key::Up));
    }

    #[test]
    fn malformed_input_is_unknown() {
        assert_eq!(KeyEvent::decode(&[]), KeyEvent::unknown());
        assert_eq!(KeyEvent::decode(b"ab"), KeyEvent::unknown());
        assert_eq!(KeyEvent::decode(b"\x1bOA"), KeyEvent::unknown());
        // Multi-byte UTF-8 is not reassembled.
        assert_eq!(KeyEvent::decode("é".as_bytes()), KeyEvent::unknown());
    }

    #[test]
    fn converts_to_crossterm() {
        use crossterm::event::{KeyCode, KeyModifiers};

        let ct: crossterm::event::KeyEvent = KeyEvent::decode(b"\x1b[1;7A").into();
        assert_eq!(ct.code, KeyCode::Up);
        assert_eq!(ct.modifiers, KeyModifiers::CONTROL | KeyModifiers::ALT);

        let ct: crossterm::event::KeyEvent = KeyEvent::unknown().into();
        assert_eq!(ct.code, KeyCode::Null);
    }

    #[test]
    fn display_chords() {
        assert_eq!(KeyEvent::ctrl('C').to_string(), "ctrl+C");
        assert_eq!(KeyEvent::decode(b"\x1b[1;7A").to_string(), "ctrl+alt+up");
        assert_eq!(KeyEvent::ctrl(' ').to_string(), "ctrl+space");
        assert_eq!(KeyEvent::unknown().to_string(), "unknown");
    }
}
