//! Console controller
//!
//! The controller is the single place where display state, the line
//! framer, the hotkey registry and the settings are mutated. Everything
//! that happens elsewhere (serial data and status from the link thread,
//! hotkey notifications from the message loop, user commands from the UI)
//! is posted as a `ControllerEvent` to one channel and handled in order on
//! the thread running `Controller::run`.

use crate::hotkey::{
    store, Hotkey, HotkeyBackend, HotkeyBinding, HotkeyCollection, HotkeyDispatcher, HotkeyId,
    HotkeyRegistry, LoopMessage, OwnerHandle,
};
use crate::line::FrameBuffer;
use crate::link::{ConnectionStatus, LineEnding, LinkEvent, PortSettings, SerialLink};
use crate::settings::Settings;
use crossbeam::channel;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::path::PathBuf;

/// Something for the controller to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Link(LinkEvent),
    Loop(LoopMessage),
    Ui(UiCommand),
}

/// User requests coming from the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum UiCommand {
    /// Send a command over the link, with the configured line ending.
    Send(String),
    Bind(HotkeyBinding),
    Unbind(HotkeyId),
    ListHotkeys,
    SetLineEnding(LineEnding),
    /// Store new port parameters and reopen the link with them.
    Apply(PortSettings),
    Quit,
}

/// Creates the controller event queue. It is unbounded so producers on
/// other threads never block on a busy controller.
pub fn channel() -> (
    channel::Sender<ControllerEvent>,
    channel::Receiver<ControllerEvent>,
) {
    channel::unbounded::<ControllerEvent>()
}

/// Where display output goes.
pub trait DisplaySink {
    /// Removes everything shown so far.
    fn clear(&mut self);
    /// Appends one line.
    fn print(&mut self, line: &str);
}

/// A `DisplaySink` keeping lines in memory.
#[derive(Debug, Default)]
pub struct Viewport {
    lines: Vec<String>,
}

impl Viewport {
    pub fn new() -> Viewport {
        Viewport::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl DisplaySink for Viewport {
    fn clear(&mut self) {
        self.lines.clear();
    }

    fn print(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// An entry of the store loaded at start up.
#[derive(Debug)]
enum Restored {
    /// Registered again as this hotkey.
    Live(Hotkey),
    /// Refused by the OS this session. Kept so it is saved again.
    Dormant(HotkeyBinding),
}

pub struct Controller<L: SerialLink, B: HotkeyBackend, D: DisplaySink> {
    link: L,
    registry: HotkeyRegistry<B>,
    dispatcher: HotkeyDispatcher,
    frames: FrameBuffer,
    display: D,
    settings: Settings,
    settings_path: Option<PathBuf>,
    hotkeys_path: Option<PathBuf>,
    restored: Vec<Restored>,
    quit: bool,
}

impl<L: SerialLink, B: HotkeyBackend, D: DisplaySink> Controller<L, B, D> {
    pub fn new(link: L, registry: HotkeyRegistry<B>, display: D, settings: Settings) -> Self {
        Controller {
            link,
            registry,
            dispatcher: HotkeyDispatcher::new(),
            frames: FrameBuffer::new(),
            display,
            settings,
            settings_path: None,
            hotkeys_path: None,
            restored: Vec::new(),
            quit: false,
        }
    }

    /// Persist settings changes to `path`.
    pub fn with_settings_path(mut self, path: PathBuf) -> Self {
        self.settings_path = Some(path);
        self
    }

    /// Restore hotkeys from, and save them to, `path`.
    pub fn with_hotkeys_path(mut self, path: PathBuf) -> Self {
        self.hotkeys_path = Some(path);
        self
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn registry(&self) -> &HotkeyRegistry<B> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    fn error(&mut self, msg: &str) {
        self.display.print(&format!("! {}", msg));
    }

    /// Opens the link and renews the saved hotkeys against `owner`. Neither
    /// a port that fails to open nor hotkeys that fail to renew stop the
    /// start up; both are reported on the display.
    ///
    /// Events already queued on `pending` when the link is open (its status
    /// change, in particular) are handled before the renewal report is
    /// shown, so the status does not wipe the report.
    pub fn start(&mut self, owner: OwnerHandle, pending: &channel::Receiver<ControllerEvent>) {
        self.open_link();
        while let Ok(event) = pending.try_recv() {
            if self.handle(event).is_break() {
                self.quit = true;
                break;
            }
        }

        let saved = match &self.hotkeys_path {
            Some(path) => store::load(path),
            None => HotkeyCollection::new(),
        };
        let report = self.registry.renew_all(owner, saved.clone());
        let mut renewed = report.renewed.iter().peekable();
        self.restored = saved
            .bindings
            .into_iter()
            .map(|binding| match renewed.next_if(|hk| hk.binding == binding) {
                Some(hk) => Restored::Live(hk.clone()),
                None => Restored::Dormant(binding),
            })
            .collect();

        for failure in &report.failed {
            self.error(&format!(
                "cannot restore {} '{}': {}",
                failure.binding.chord, failure.binding.command, failure.error
            ));
        }
        self.list_hotkeys();
    }

    fn open_link(&mut self) {
        let port = self.settings.port_settings();
        if port.port.is_empty() {
            self.error("no port selected");
            return;
        }
        if let Err(e) = self.link.open(&port) {
            tracing::warn!(error = %e, "cannot open link");
            self.error(&e.to_string());
        }
    }

    fn save_settings(&mut self) {
        if let Some(path) = &self.settings_path {
            if let Err(e) = self.settings.save(path) {
                let msg = format!("cannot save settings: {}", e);
                self.error(&msg);
            }
        }
    }

    /// Restored bindings that are not registered and still to be saved:
    /// their chord is not live, and an earlier dormant entry does not
    /// already use it.
    fn dormant(&self) -> Vec<&HotkeyBinding> {
        let mut chords = HashSet::new();
        self.restored
            .iter()
            .filter_map(|entry| match entry {
                Restored::Dormant(binding) => Some(binding),
                Restored::Live(_) => None,
            })
            .filter(|binding| {
                self.registry.find(&binding.chord).is_none() && chords.insert(binding.chord)
            })
            .collect()
    }

    /// The bindings to save: restored entries in their stored order, live
    /// or not, minus those unbound since; then hotkeys bound this session.
    pub fn saved_bindings(&self) -> HotkeyCollection {
        let dormant = self.dormant();
        let mut saved_ids = HashSet::new();
        let mut bindings = Vec::new();
        for entry in &self.restored {
            match entry {
                Restored::Live(hk) => {
                    if self.registry.get(hk.id) == Some(hk) {
                        saved_ids.insert(hk.id);
                        bindings.push(hk.binding.clone());
                    }
                }
                Restored::Dormant(binding) => {
                    if dormant.iter().any(|d| std::ptr::eq(*d, binding)) {
                        bindings.push(binding.clone());
                    }
                }
            }
        }
        bindings.extend(
            self.registry
                .iter()
                .filter(|hk| !saved_ids.contains(&hk.id))
                .map(|hk| hk.binding.clone()),
        );
        HotkeyCollection { bindings }
    }

    fn list_hotkeys(&mut self) {
        let mut listing: Vec<String> = self
            .registry
            .iter()
            .map(|hk| format!("{} {} #{}", hk.chord(), hk.command(), hk.id))
            .collect();
        listing.extend(
            self.dormant()
                .into_iter()
                .map(|b| format!("{} {} (inactive)", b.chord, b.command)),
        );
        for line in listing {
            self.display.print(&line);
        }
    }

    fn on_data(&mut self, text: &str) {
        for line in self.frames.feed(text) {
            self.display.print(&format!("[R] {}", line));
        }
    }

    fn on_status(&mut self, status: &ConnectionStatus) {
        self.frames.reset();
        self.display.clear();
        self.display.print(&format!("# {}", status));
    }

    fn send_command(&mut self, command: &str) {
        if command.is_empty() {
            return;
        }
        let text = format!("{}{}", command, self.settings.append.as_str());
        match self.link.send(&text) {
            Ok(()) => self.display.print(&format!("[S] {}", command)),
            Err(e) => self.error(&format!("cannot send '{}': {}", command, e)),
        }
    }

    fn on_loop_message(&mut self, msg: &LoopMessage) {
        if let Some(fired) = self.dispatcher.handle(msg, &self.registry) {
            self.display.print(&fired.to_string());
            self.send_command(&fired.command);
        }
    }

    fn on_command(&mut self, command: UiCommand) -> ControlFlow<()> {
        match command {
            UiCommand::Send(text) => self.send_command(&text),
            UiCommand::Bind(binding) => match self.registry.add(binding) {
                Ok(hk) => {
                    let line = format!("{} {} #{}", hk.chord(), hk.command(), hk.id);
                    self.display.print(&line);
                }
                Err(e) => self.error(&e.to_string()),
            },
            UiCommand::Unbind(id) => {
                if self.registry.remove(id).is_none() {
                    tracing::debug!(id = id.0, "unbind of unknown hotkey");
                }
            }
            UiCommand::ListHotkeys => self.list_hotkeys(),
            UiCommand::SetLineEnding(append) => {
                self.settings.append = append;
                self.save_settings();
            }
            UiCommand::Apply(port) => {
                self.settings.set_port(&port);
                self.save_settings();
                self.link.close();
                self.frames.reset();
                self.open_link();
            }
            UiCommand::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Handles one event.
    pub fn handle(&mut self, event: ControllerEvent) -> ControlFlow<()> {
        match event {
            ControllerEvent::Link(LinkEvent::Data(text)) => self.on_data(&text),
            ControllerEvent::Link(LinkEvent::StatusChanged(status)) => self.on_status(&status),
            ControllerEvent::Loop(msg) => self.on_loop_message(&msg),
            ControllerEvent::Ui(command) => return self.on_command(command),
        }
        ControlFlow::Continue(())
    }

    /// Handles events until `Quit` or until every sender is gone, then
    /// shuts down.
    pub fn run(&mut self, events: &channel::Receiver<ControllerEvent>) {
        if !self.quit {
            for event in events.iter() {
                if self.handle(event).is_break() {
                    break;
                }
            }
        }
        self.shutdown();
    }

    /// Closes the link, dropping any partial line, saves the hotkeys
    /// (including restored ones the OS refused this session) and releases
    /// their registrations.
    pub fn shutdown(&mut self) {
        self.link.close();
        self.frames.reset();
        if let Some(path) = &self.hotkeys_path {
            if let Err(e) = store::save(path, &self.saved_bindings()) {
                tracing::warn!(path = %path.display(), error = %e, "cannot save hotkeys");
            }
        }
        self.registry.unregister_all();
    }
}
