//! Hotkey dispatch
//!
//! The host message loop carries hotkey notifications mixed with unrelated
//! window messages. `HotkeyDispatcher::dispatch` is a pure function from a
//! message and the registry state to an optional `HotkeyFired`; messages
//! that are not hotkeys, or carry an ID that is no longer registered, are
//! ignored.

use super::{HotkeyBackend, HotkeyId, HotkeyRegistry, KeyCode, Modifiers};
use chrono::{DateTime, Local};
use crossbeam::channel;
use std::fmt;

/// A message from the host message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMessage {
    /// A registered chord was pressed.
    Hotkey(HotkeyId),
    /// Any other window message, identified by its message code.
    Other(u32),
}

/// A resolved hotkey press.
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyFired {
    pub id: HotkeyId,
    pub key: KeyCode,
    pub modifiers: Modifiers,
    pub command: String,
    pub at: DateTime<Local>,
}

impl fmt::Display for HotkeyFired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} : Hotkey Proc! {}, {}",
            self.at.format("%H:%M:%S%.3f"),
            self.key,
            self.modifiers
        )
    }
}

/// Creates the bounded queue between the message loop and its single
/// consumer.
pub fn loop_channel(
    size: usize,
) -> (
    channel::Sender<LoopMessage>,
    channel::Receiver<LoopMessage>,
) {
    channel::bounded::<LoopMessage>(size)
}

#[derive(Debug, Default)]
pub struct HotkeyDispatcher {
    fired: u64,
    ignored: u64,
}

impl HotkeyDispatcher {
    pub fn new() -> HotkeyDispatcher {
        HotkeyDispatcher::default()
    }

    /// Resolves `msg` against `registry`, stamping a hit with `now`.
    pub fn dispatch<B: HotkeyBackend>(
        msg: &LoopMessage,
        registry: &HotkeyRegistry<B>,
        now: DateTime<Local>,
    ) -> Option<HotkeyFired> {
        let id = match msg {
            LoopMessage::Hotkey(id) => *id,
            LoopMessage::Other(_) => return None,
        };
        let hotkey = registry.get(id)?;
        Some(HotkeyFired {
            id,
            key: hotkey.binding.chord.key,
            modifiers: hotkey.binding.chord.modifiers,
            command: hotkey.binding.command.clone(),
            at: now,
        })
    }

    /// `dispatch` at the current local time, keeping counters.
    pub fn handle<B: HotkeyBackend>(
        &mut self,
        msg: &LoopMessage,
        registry: &HotkeyRegistry<B>,
    ) -> Option<HotkeyFired> {
        let fired = Self::dispatch(msg, registry, Local::now());
        match &fired {
            Some(hit) => {
                self.fired += 1;
                tracing::debug!(id = hit.id.0, command = %hit.command, "hotkey fired");
            }
            None => {
                if let LoopMessage::Hotkey(id) = msg {
                    tracing::debug!(id = id.0, "ignoring stale hotkey notification");
                }
                self.ignored += 1;
            }
        }
        fired
    }

    /// Number of messages that resolved to a hotkey.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Number of messages that did not.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}
