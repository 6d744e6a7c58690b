//! Global hotkeys
//!
//! A hotkey binds a key chord (modifier set + virtual key code) to a
//! command string that is sent over the serial link when the chord is
//! pressed, even while the console is not focused.
//!
//! - `registry`: the single owner of OS registrations and their IDs.
//! - `store`: versioned on-disk encoding of the bindings.
//! - `dispatch`: resolves message loop notifications to registered hotkeys.
//! - `local`: an in-process implementation of the OS primitive.
//!
//! Registration itself is behind the `HotkeyBackend` trait, which mirrors
//! the OS call: register a chord under a caller chosen ID for an owner
//! (window / message loop) handle, and unregister it again.

pub mod dispatch;
pub mod local;
pub mod registry;
pub mod store;

pub use dispatch::{HotkeyDispatcher, HotkeyFired, LoopMessage};
pub use local::LocalBackend;
pub use registry::{HotkeyRegistry, RenewalFailure, RenewalReport};
pub use store::StoreError;

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

bitflags! {
    /// Modifier set of a chord. Bit values are those of the OS primitive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Modifiers: u8 {
        const ALT = 0x1;
        const CONTROL = 0x2;
        const SHIFT = 0x4;
        const WIN = 0x8;
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NoMod");
        }
        let mut names = Vec::new();
        if self.contains(Modifiers::CONTROL) {
            names.push("Ctrl");
        }
        if self.contains(Modifiers::ALT) {
            names.push("Alt");
        }
        if self.contains(Modifiers::SHIFT) {
            names.push("Shift");
        }
        if self.contains(Modifiers::WIN) {
            names.push("Win");
        }
        write!(f, "{}", names.join("+"))
    }
}

/// Virtual key code, as understood by the OS primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u32);

/// Named keys other than letters, digits and function keys.
static NAMED_KEYS: &[(&str, u32)] = &[
    ("Back", 0x08),
    ("Tab", 0x09),
    ("Enter", 0x0D),
    ("Escape", 0x1B),
    ("Space", 0x20),
    ("PageUp", 0x21),
    ("PageDown", 0x22),
    ("End", 0x23),
    ("Home", 0x24),
    ("Left", 0x25),
    ("Up", 0x26),
    ("Right", 0x27),
    ("Down", 0x28),
    ("Insert", 0x2D),
    ("Delete", 0x2E),
];

const VK_F1: u32 = 0x70;
const VK_F24: u32 = 0x87;

impl KeyCode {
    pub fn letter(c: char) -> Option<KeyCode> {
        let c = c.to_ascii_uppercase();
        if c.is_ascii_uppercase() {
            Some(KeyCode(c as u32))
        } else {
            None
        }
    }

    pub fn digit(c: char) -> Option<KeyCode> {
        if c.is_ascii_digit() {
            Some(KeyCode(c as u32))
        } else {
            None
        }
    }

    /// Function key `F<n>`, for n in 1..=24.
    pub fn function(n: u8) -> Option<KeyCode> {
        if (1..=24).contains(&n) {
            Some(KeyCode(VK_F1 + (n as u32) - 1))
        } else {
            None
        }
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.0;
        if let Some((name, _)) = NAMED_KEYS.iter().find(|(_, vk)| *vk == code) {
            write!(f, "{}", name)
        } else if (VK_F1..=VK_F24).contains(&code) {
            write!(f, "F{}", code - VK_F1 + 1)
        } else if (0x41..=0x5A).contains(&code) {
            write!(f, "{}", char::from(code as u8))
        } else if (0x30..=0x39).contains(&code) {
            write!(f, "D{}", char::from(code as u8))
        } else {
            write!(f, "0x{:02X}", code)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown key '{0}'")]
pub struct ParseKeyError(pub String);

impl FromStr for KeyCode {
    type Err = ParseKeyError;

    /// Parses a key name case-insensitively: `A`, `D5` or `5`, `F11`,
    /// `PageUp`, ...
    fn from_str(s: &str) -> Result<KeyCode, ParseKeyError> {
        let err = || ParseKeyError(s.to_string());
        let upper = s.trim().to_ascii_uppercase();
        let mut chars = upper.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some(c), None, None) => {
                return KeyCode::letter(c)
                    .or_else(|| KeyCode::digit(c))
                    .ok_or_else(err);
            }
            (Some('D'), Some(d), None) if d.is_ascii_digit() => {
                return KeyCode::digit(d).ok_or_else(err);
            }
            _ => {}
        }
        if let Some(n) = upper.strip_prefix('F') {
            if let Ok(n) = n.parse::<u8>() {
                return KeyCode::function(n).ok_or_else(err);
            }
        }
        if let Some(code) = upper.strip_prefix("0X") {
            return u32::from_str_radix(code, 16).map(KeyCode).map_err(|_| err());
        }
        NAMED_KEYS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&upper))
            .map(|(_, vk)| KeyCode(*vk))
            .ok_or_else(err)
    }
}

/// A modifier set together with a key: the unit the OS registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chord {
    pub modifiers: Modifiers,
    pub key: KeyCode,
}

impl Chord {
    pub fn new(modifiers: Modifiers, key: KeyCode) -> Chord {
        Chord { modifiers, key }
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.modifiers.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}+{}", self.modifiers, self.key)
        }
    }
}

impl FromStr for Chord {
    type Err = ParseKeyError;

    /// Parses `ctrl+alt+f5` style chords. The last `+` separated token is
    /// the key, the others are modifiers.
    fn from_str(s: &str) -> Result<Chord, ParseKeyError> {
        let mut tokens: Vec<&str> = s.split('+').map(|t| t.trim()).collect();
        let key = match tokens.pop() {
            Some(key) if !key.is_empty() => key.parse::<KeyCode>()?,
            _ => return Err(ParseKeyError(s.to_string())),
        };
        let mut modifiers = Modifiers::empty();
        for token in tokens {
            modifiers |= match token.to_ascii_lowercase().as_str() {
                "alt" => Modifiers::ALT,
                "ctrl" | "control" => Modifiers::CONTROL,
                "shift" => Modifiers::SHIFT,
                "win" | "super" | "meta" => Modifiers::WIN,
                _ => return Err(ParseKeyError(token.to_string())),
            };
        }
        Ok(Chord { modifiers, key })
    }
}

/// The logical part of a hotkey, and the only part that is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HotkeyBinding {
    pub chord: Chord,
    pub command: String,
}

impl HotkeyBinding {
    pub fn new(chord: Chord, command: &str) -> HotkeyBinding {
        HotkeyBinding {
            chord,
            command: command.to_string(),
        }
    }
}

/// Identifier handed to the OS on registration. Only meaningful while the
/// hotkey stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HotkeyId(pub u16);

impl fmt::Display for HotkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle of the window / message loop that receives notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerHandle(pub u64);

/// A currently registered hotkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotkey {
    pub id: HotkeyId,
    pub binding: HotkeyBinding,
}

impl Hotkey {
    pub fn chord(&self) -> Chord {
        self.binding.chord
    }

    pub fn command(&self) -> &str {
        &self.binding.command
    }
}

/// Ordered set of bindings, persisted as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HotkeyCollection {
    pub bindings: Vec<HotkeyBinding>,
}

impl HotkeyCollection {
    pub fn new() -> HotkeyCollection {
        HotkeyCollection {
            bindings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// The OS global hotkey primitive.
pub trait HotkeyBackend {
    /// Registers `chord` under `id` for `owner`. Returns false if the OS
    /// refuses, e.g. because another process already holds the chord.
    fn register(&mut self, owner: OwnerHandle, id: HotkeyId, chord: Chord) -> bool;

    /// Releases a registration made with `register`.
    fn unregister(&mut self, owner: OwnerHandle, id: HotkeyId);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HotkeyError {
    #[error("{0} is already bound")]
    DuplicateBinding(Chord),
    #[error("the system refused to register {0}")]
    Registration(Chord),
    #[error("no free hotkey identifiers")]
    IdsExhausted,
}
