//! In-process hotkey primitive
//!
//! `LocalBackend` implements `HotkeyBackend` over a binding table shared
//! between clones, so the registry can own one handle while the host input
//! loop keeps another to `resolve` key presses into notifications. Chords
//! `claim`ed up front behave like bindings held by another process.

use super::{Chord, HotkeyBackend, HotkeyId, OwnerHandle};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Table {
    bound: HashMap<Chord, (OwnerHandle, HotkeyId)>,
    claimed: HashSet<Chord>,
}

#[derive(Clone, Default)]
pub struct LocalBackend {
    table: Arc<Mutex<Table>>,
}

impl LocalBackend {
    pub fn new() -> LocalBackend {
        LocalBackend::default()
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        // The table stays consistent even if a holder panicked.
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `chord` as taken outside this process.
    pub fn claim(&self, chord: Chord) {
        self.table().claimed.insert(chord);
    }

    /// Returns the registration a key press of `chord` should be delivered
    /// to, if any.
    pub fn resolve(&self, chord: Chord) -> Option<(OwnerHandle, HotkeyId)> {
        self.table().bound.get(&chord).copied()
    }

    /// Number of live registrations, across all owners.
    pub fn len(&self) -> usize {
        self.table().bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HotkeyBackend for LocalBackend {
    fn register(&mut self, owner: OwnerHandle, id: HotkeyId, chord: Chord) -> bool {
        let mut table = self.table();
        if table.claimed.contains(&chord) || table.bound.contains_key(&chord) {
            return false;
        }
        if table.bound.values().any(|reg| *reg == (owner, id)) {
            return false;
        }
        table.bound.insert(chord, (owner, id));
        true
    }

    fn unregister(&mut self, owner: OwnerHandle, id: HotkeyId) {
        self.table().bound.retain(|_, reg| *reg != (owner, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chords_are_exclusive_across_owners() {
        let mut os = LocalBackend::new();
        let chord: Chord = "ctrl+k".parse().unwrap();
        assert!(os.register(OwnerHandle(1), HotkeyId(1), chord));
        assert!(!os.register(OwnerHandle(2), HotkeyId(1), chord));
        assert_eq!(os.resolve(chord), Some((OwnerHandle(1), HotkeyId(1))));
    }

    #[test]
    fn ids_are_exclusive_per_owner() {
        let mut os = LocalBackend::new();
        let a: Chord = "f1".parse().unwrap();
        let b: Chord = "f2".parse().unwrap();
        assert!(os.register(OwnerHandle(1), HotkeyId(5), a));
        assert!(!os.register(OwnerHandle(1), HotkeyId(5), b));
        assert!(os.register(OwnerHandle(2), HotkeyId(5), b));
    }

    #[test]
    fn unregister_only_touches_matching_owner() {
        let mut os = LocalBackend::new();
        let a: Chord = "f1".parse().unwrap();
        let b: Chord = "f2".parse().unwrap();
        os.register(OwnerHandle(1), HotkeyId(1), a);
        os.register(OwnerHandle(2), HotkeyId(1), b);
        os.unregister(OwnerHandle(1), HotkeyId(1));
        assert_eq!(os.resolve(a), None);
        assert_eq!(os.resolve(b), Some((OwnerHandle(2), HotkeyId(1))));
    }

    #[test]
    fn claimed_chords_are_refused() {
        let mut os = LocalBackend::new();
        let chord: Chord = "ctrl+c".parse().unwrap();
        os.claim(chord);
        assert!(!os.register(OwnerHandle(1), HotkeyId(1), chord));
        assert!(os.is_empty());
    }
}
