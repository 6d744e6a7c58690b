//! Hotkey registry
//!
//! `HotkeyRegistry` is the only component that talks to the OS hotkey
//! primitive. It allocates registration IDs, keeps the ID -> hotkey and
//! chord -> ID indexes, and owns the lifecycle: empty or renewed at
//! startup, everything unregistered at teardown (explicitly, or on drop).

use super::{
    store, Chord, Hotkey, HotkeyBackend, HotkeyBinding, HotkeyCollection, HotkeyError, HotkeyId,
    OwnerHandle,
};
use std::collections::HashMap;

/// Registration IDs accepted by the OS primitive for application hotkeys.
const FIRST_ID: u16 = 0x0001;
const LAST_ID: u16 = 0xBFFF;

/// A persisted binding that could not be registered again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalFailure {
    pub binding: HotkeyBinding,
    pub error: HotkeyError,
}

/// Outcome of `HotkeyRegistry::renew_all`.
#[derive(Debug, Clone, Default)]
pub struct RenewalReport {
    pub renewed: Vec<Hotkey>,
    pub failed: Vec<RenewalFailure>,
}

impl RenewalReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct HotkeyRegistry<B: HotkeyBackend> {
    backend: B,
    owner: OwnerHandle,
    /// Registration order, for listing and persistence.
    order: Vec<HotkeyId>,
    by_id: HashMap<HotkeyId, Hotkey>,
    by_chord: HashMap<Chord, HotkeyId>,
    next_id: u16,
}

impl<B: HotkeyBackend> HotkeyRegistry<B> {
    /// Returns an empty registry registering against `owner`.
    pub fn new(backend: B, owner: OwnerHandle) -> HotkeyRegistry<B> {
        HotkeyRegistry {
            backend,
            owner,
            order: Vec::new(),
            by_id: HashMap::new(),
            by_chord: HashMap::new(),
            next_id: FIRST_ID,
        }
    }

    pub fn owner(&self) -> OwnerHandle {
        self.owner
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Finds the next ID not currently in use, starting at `next_id`.
    fn free_id(&self) -> Option<HotkeyId> {
        let span = (LAST_ID - FIRST_ID) as u32 + 1;
        (0..span)
            .map(|offset| {
                let id = (self.next_id - FIRST_ID) as u32 + offset;
                HotkeyId(FIRST_ID + (id % span) as u16)
            })
            .find(|id| !self.by_id.contains_key(id))
    }

    /// Registers `binding` with the OS and records it. On failure nothing
    /// changes, and no ID is consumed.
    pub fn add(&mut self, binding: HotkeyBinding) -> Result<Hotkey, HotkeyError> {
        if self.by_chord.contains_key(&binding.chord) {
            return Err(HotkeyError::DuplicateBinding(binding.chord));
        }
        let id = self.free_id().ok_or(HotkeyError::IdsExhausted)?;
        if !self.backend.register(self.owner, id, binding.chord) {
            return Err(HotkeyError::Registration(binding.chord));
        }
        self.next_id = if id.0 == LAST_ID { FIRST_ID } else { id.0 + 1 };
        let hotkey = Hotkey { id, binding };
        self.by_chord.insert(hotkey.binding.chord, id);
        self.by_id.insert(id, hotkey.clone());
        self.order.push(id);
        tracing::debug!(id = id.0, chord = %hotkey.binding.chord, "hotkey registered");
        Ok(hotkey)
    }

    /// Unregisters and forgets the hotkey with `id`. Unknown IDs are
    /// ignored and return `None`.
    pub fn remove(&mut self, id: HotkeyId) -> Option<Hotkey> {
        let hotkey = self.by_id.remove(&id)?;
        self.backend.unregister(self.owner, id);
        self.by_chord.remove(&hotkey.binding.chord);
        self.order.retain(|other| *other != id);
        tracing::debug!(id = id.0, chord = %hotkey.binding.chord, "hotkey removed");
        Some(hotkey)
    }

    pub fn get(&self, id: HotkeyId) -> Option<&Hotkey> {
        self.by_id.get(&id)
    }

    pub fn find(&self, chord: &Chord) -> Option<&Hotkey> {
        self.by_chord.get(chord).and_then(|id| self.by_id.get(id))
    }

    /// Registered hotkeys in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Hotkey> {
        self.order.iter().filter_map(move |id| self.by_id.get(id))
    }

    /// The logical bindings, without registration IDs.
    pub fn collection(&self) -> HotkeyCollection {
        HotkeyCollection {
            bindings: self.iter().map(|hk| hk.binding.clone()).collect(),
        }
    }

    /// Encodes the current bindings for storage.
    pub fn persist(&self) -> Vec<u8> {
        store::encode(&self.collection())
    }

    /// Releases every registration. The registry is empty afterwards.
    pub fn unregister_all(&mut self) {
        for id in self.order.drain(..) {
            self.backend.unregister(self.owner, id);
        }
        self.by_id.clear();
        self.by_chord.clear();
    }

    /// Replaces the registered set with `collection`, registered against
    /// `owner` with fresh IDs. Bindings that cannot be registered are
    /// skipped and reported; the rest are registered regardless.
    pub fn renew_all(&mut self, owner: OwnerHandle, collection: HotkeyCollection) -> RenewalReport {
        self.unregister_all();
        self.owner = owner;
        let mut report = RenewalReport::default();
        for binding in collection.bindings {
            match self.add(binding.clone()) {
                Ok(hotkey) => report.renewed.push(hotkey),
                Err(error) => {
                    tracing::warn!(chord = %binding.chord, %error, "failed to renew hotkey");
                    report.failed.push(RenewalFailure { binding, error });
                }
            }
        }
        report
    }
}

impl<B: HotkeyBackend> Drop for HotkeyRegistry<B> {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

#[cfg(test)]
mod tests {
    use super::super::{KeyCode, LocalBackend, Modifiers};
    use super::*;

    fn chord(s: &str) -> Chord {
        s.parse().unwrap()
    }

    fn binding(s: &str, command: &str) -> HotkeyBinding {
        HotkeyBinding::new(chord(s), command)
    }

    fn registry() -> (HotkeyRegistry<LocalBackend>, LocalBackend) {
        let os = LocalBackend::new();
        (HotkeyRegistry::new(os.clone(), OwnerHandle(1)), os)
    }

    #[test]
    fn add_registers_with_the_os() {
        let (mut reg, os) = registry();
        let hk = reg.add(binding("ctrl+f1", "RESET")).unwrap();
        assert_eq!(hk.command(), "RESET");
        assert_eq!(os.resolve(chord("ctrl+f1")), Some((OwnerHandle(1), hk.id)));
        assert_eq!(reg.get(hk.id), Some(&hk));
        assert_eq!(reg.find(&chord("ctrl+f1")), Some(&hk));
    }

    #[test]
    fn duplicate_chord_is_rejected_without_consuming_an_id() {
        let (mut reg, _os) = registry();
        let first = reg.add(binding("alt+a", "one")).unwrap();
        let err = reg.add(binding("alt+a", "two")).unwrap_err();
        assert_eq!(err, HotkeyError::DuplicateBinding(chord("alt+a")));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(first.id).unwrap().command(), "one");
        let second = reg.add(binding("alt+b", "two")).unwrap();
        assert_eq!(second.id.0, first.id.0 + 1);
    }

    #[test]
    fn os_refusal_is_a_registration_error() {
        let (mut reg, os) = registry();
        os.claim(chord("ctrl+c"));
        let err = reg.add(binding("ctrl+c", "x")).unwrap_err();
        assert_eq!(err, HotkeyError::Registration(chord("ctrl+c")));
        assert!(reg.is_empty());
        let next = reg.add(binding("ctrl+x", "x")).unwrap();
        assert_eq!(next.id, HotkeyId(FIRST_ID));
    }

    #[test]
    fn remove_unregisters_and_is_idempotent() {
        let (mut reg, os) = registry();
        let hk = reg.add(binding("shift+f2", "PING")).unwrap();
        assert_eq!(reg.remove(hk.id), Some(hk.clone()));
        assert_eq!(os.resolve(chord("shift+f2")), None);
        assert_eq!(reg.remove(hk.id), None);
        assert_eq!(reg.remove(HotkeyId(999)), None);
        // The chord can be bound again.
        assert!(reg.add(binding("shift+f2", "PONG")).is_ok());
    }

    #[test]
    fn ids_are_not_reused_while_registered() {
        let (mut reg, _os) = registry();
        let a = reg.add(binding("f1", "a")).unwrap();
        let b = reg.add(binding("f2", "b")).unwrap();
        reg.remove(a.id);
        let c = reg.add(binding("f3", "c")).unwrap();
        assert_ne!(c.id, b.id);
        assert_ne!(c.id, a.id);
    }

    #[test]
    fn ids_wrap_around_skipping_live_ones() {
        let (mut reg, _os) = registry();
        let low = reg.add(binding("f1", "low")).unwrap();
        assert_eq!(low.id, HotkeyId(FIRST_ID));
        reg.next_id = LAST_ID;
        let last = reg.add(binding("f2", "last")).unwrap();
        assert_eq!(last.id, HotkeyId(LAST_ID));
        let wrapped = reg.add(binding("f3", "wrapped")).unwrap();
        assert_eq!(wrapped.id, HotkeyId(FIRST_ID + 1));
    }

    #[test]
    fn iteration_follows_registration_order() {
        let (mut reg, _os) = registry();
        for (i, key) in ["f5", "f3", "f9", "f1"].iter().enumerate() {
            reg.add(binding(key, &i.to_string())).unwrap();
        }
        let id = reg.find(&chord("f9")).unwrap().id;
        reg.remove(id);
        let commands: Vec<&str> = reg.iter().map(|hk| hk.command()).collect();
        assert_eq!(commands, vec!["0", "1", "3"]);
    }

    #[test]
    fn renew_registers_against_the_new_owner() {
        let (mut reg, os) = registry();
        reg.add(binding("ctrl+1", "old")).unwrap();
        let saved = reg.collection();

        let report = reg.renew_all(OwnerHandle(7), saved.clone());
        assert!(report.is_complete());
        assert_eq!(reg.owner(), OwnerHandle(7));
        assert_eq!(reg.collection(), saved);
        let (owner, id) = os.resolve(chord("ctrl+1")).unwrap();
        assert_eq!(owner, OwnerHandle(7));
        assert_eq!(reg.get(id).unwrap().command(), "old");
        assert_eq!(os.len(), 1);
    }

    #[test]
    fn renew_skips_claimed_chords_and_keeps_going() {
        let os = LocalBackend::new();
        os.claim(chord("ctrl+alt+d2"));
        let mut reg = HotkeyRegistry::new(os.clone(), OwnerHandle(1));
        let collection = HotkeyCollection {
            bindings: vec![
                binding("ctrl+alt+1", "first"),
                binding("ctrl+alt+2", "claimed"),
                binding("ctrl+alt+3", "third"),
            ],
        };

        let report = reg.renew_all(OwnerHandle(2), collection);
        assert_eq!(report.renewed.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].binding.command, "claimed");
        assert_eq!(
            report.failed[0].error,
            HotkeyError::Registration(Chord::new(
                Modifiers::CONTROL | Modifiers::ALT,
                KeyCode::digit('2').unwrap()
            ))
        );
        let commands: Vec<&str> = reg.iter().map(|hk| hk.command()).collect();
        assert_eq!(commands, vec!["first", "third"]);
    }

    #[test]
    fn renew_reports_duplicates_inside_the_collection() {
        let (mut reg, _os) = registry();
        let collection = HotkeyCollection {
            bindings: vec![binding("f4", "a"), binding("f4", "b")],
        };
        let report = reg.renew_all(OwnerHandle(1), collection);
        assert_eq!(report.renewed.len(), 1);
        assert_eq!(
            report.failed[0].error,
            HotkeyError::DuplicateBinding(chord("f4"))
        );
    }

    #[test]
    fn unregister_all_and_drop_release_everything() {
        let os = LocalBackend::new();
        {
            let mut reg = HotkeyRegistry::new(os.clone(), OwnerHandle(3));
            reg.add(binding("f6", "x")).unwrap();
            reg.add(binding("f7", "y")).unwrap();
            assert_eq!(os.len(), 2);
            reg.unregister_all();
            assert_eq!(os.len(), 0);
            assert!(reg.is_empty());
            reg.add(binding("f8", "z")).unwrap();
            assert_eq!(os.len(), 1);
        }
        assert_eq!(os.len(), 0);
    }

    #[test]
    fn persisted_bytes_restore_the_same_bindings() {
        let (mut reg, _os) = registry();
        reg.add(binding("ctrl+shift+s", "STATUS?")).unwrap();
        reg.add(binding("win+f12", "")).unwrap();
        let restored = store::decode(&reg.persist()).unwrap();
        assert_eq!(restored, reg.collection());
    }
}
