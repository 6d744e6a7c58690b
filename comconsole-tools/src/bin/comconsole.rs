//! comconsole
//!
//! Interactive serial console. Received lines scroll above a one line
//! prompt; typed lines are sent on Enter. Key chords bound with `/bind` are
//! picked up from the keyboard and send their command.

use clap::Parser;
use comconsole::controller::{self, Controller, ControllerEvent, DisplaySink, UiCommand};
use comconsole::hotkey::dispatch::loop_channel;
use comconsole::hotkey::{HotkeyRegistry, LocalBackend, LoopMessage, OwnerHandle};
use comconsole::link::{PortSettings, SerialPortLink};
use comconsole_tools::{
    chord_from_key, init_logging, parse_line, reserved_chords, ConsoleOpts, CONSOLE_HELP,
};
use crossbeam::channel::Sender;
use crossterm::cursor::{MoveTo, MoveToColumn};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{self, Clear, ClearType};
use crossterm::{queue, ExecutableCommand};
use std::io::{self, Stdout, Write};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::thread;

const LOOP_QUEUE_SIZE: usize = 64;

/// Output area plus the prompt line being edited. Shared between the
/// controller (output) and the input thread (prompt).
struct Screen {
    out: Stdout,
    input: String,
}

impl Screen {
    fn redraw_prompt(&mut self) {
        let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = write!(self.out, "> {}", self.input);
        let _ = self.out.flush();
    }

    fn print(&mut self, line: &str) {
        let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = write!(self.out, "{}\r\n", line);
        self.redraw_prompt();
    }
}

struct Terminal(Arc<Mutex<Screen>>);

impl Terminal {
    fn with<R>(&self, f: impl FnOnce(&mut Screen) -> R) -> R {
        let mut screen = match self.0.lock() {
            Ok(screen) => screen,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut screen)
    }
}

impl DisplaySink for Terminal {
    fn clear(&mut self) {
        self.with(|screen| {
            let _ = queue!(screen.out, Clear(ClearType::All), MoveTo(0, 0));
            screen.redraw_prompt();
        })
    }

    fn print(&mut self, line: &str) {
        self.with(|screen| screen.print(line))
    }
}

fn list_ports() {
    match serialport::available_ports() {
        Ok(ports) => {
            for p in ports {
                let kind = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => format!(
                        "USB {:04x}:{:04x} {}",
                        info.vid,
                        info.pid,
                        info.product.as_deref().unwrap_or("")
                    ),
                    serialport::SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                    serialport::SerialPortType::PciPort => "PCI".to_string(),
                    serialport::SerialPortType::Unknown => "unknown".to_string(),
                };
                println!("{}\t{}", p.port_name, kind);
            }
        }
        Err(e) => eprintln!("cannot enumerate ports: {}", e),
    }
}

/// Reads the keyboard until quit. Chords registered by `owner` become
/// hotkey notifications on `hotkeys`; everything else edits the prompt.
fn input_thread(
    screen: Terminal,
    os: LocalBackend,
    owner: OwnerHandle,
    events: Sender<ControllerEvent>,
    hotkeys: Sender<LoopMessage>,
    current: Arc<Mutex<PortSettings>>,
) {
    let reserved = reserved_chords();
    loop {
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => key,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "terminal input failed");
                let _ = events.send(ControllerEvent::Ui(UiCommand::Quit));
                return;
            }
        };
        if let Some(chord) = chord_from_key(&key) {
            if reserved.contains(&chord) {
                let _ = events.send(ControllerEvent::Ui(UiCommand::Quit));
                return;
            }
            if let Some((bound_to, id)) = os.resolve(chord) {
                if bound_to == owner {
                    if hotkeys.send(LoopMessage::Hotkey(id)).is_err() {
                        return;
                    }
                    continue;
                }
            }
        }
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        match key.code {
            KeyCode::Char(c) if plain => screen.with(|s| {
                s.input.push(c);
                s.redraw_prompt();
            }),
            KeyCode::Backspace => screen.with(|s| {
                s.input.pop();
                s.redraw_prompt();
            }),
            KeyCode::Enter => {
                let line = screen.with(|s| {
                    let line = std::mem::take(&mut s.input);
                    s.redraw_prompt();
                    line
                });
                let settings = match current.lock() {
                    Ok(settings) => settings.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                match parse_line(&line, &settings) {
                    Ok(command) => {
                        let quit = command == UiCommand::Quit;
                        if let UiCommand::Apply(next) = &command {
                            if let Ok(mut settings) = current.lock() {
                                *settings = next.clone();
                            }
                        }
                        if events.send(ControllerEvent::Ui(command)).is_err() || quit {
                            return;
                        }
                    }
                    Err(msg) => screen.with(|s| s.print(&format!("! {}", msg))),
                }
            }
            _ => {}
        }
    }
}

fn run(cli: &ConsoleOpts) -> io::Result<()> {
    let settings = cli.link.settings();
    let current = Arc::new(Mutex::new(settings.port_settings()));
    let (events, events_rx) = controller::channel();
    let link = SerialPortLink::new(SerialPortLink::to_channel(
        events.clone(),
        ControllerEvent::Link,
    ));

    let os = LocalBackend::new();
    for chord in reserved_chords() {
        os.claim(chord);
    }
    let owner = OwnerHandle(std::process::id() as u64);
    let registry = HotkeyRegistry::new(os.clone(), owner);

    let screen = Arc::new(Mutex::new(Screen {
        out: io::stdout(),
        input: String::new(),
    }));
    let mut controller = Controller::new(link, registry, Terminal(screen.clone()), settings)
        .with_settings_path(cli.link.config.clone())
        .with_hotkeys_path(cli.link.keys.clone());

    terminal::enable_raw_mode()?;
    io::stdout().execute(Clear(ClearType::All))?;
    controller.start(owner, &events_rx);
    Terminal(screen.clone()).print(CONSOLE_HELP);

    let (hotkeys, hotkeys_rx) = loop_channel(LOOP_QUEUE_SIZE);
    let forward = events.clone();
    thread::Builder::new()
        .name("message loop".to_string())
        .spawn(move || {
            for msg in hotkeys_rx.iter() {
                if forward.send(ControllerEvent::Loop(msg)).is_err() {
                    break;
                }
            }
        })?;
    let input = Terminal(screen);
    thread::Builder::new()
        .name("input".to_string())
        .spawn(move || input_thread(input, os, owner, events, hotkeys, current))?;

    controller.run(&events_rx);
    terminal::disable_raw_mode()?;
    println!();
    Ok(())
}

fn main() -> ExitCode {
    let cli = ConsoleOpts::parse();

    if cli.enumerate {
        list_ports();
        return ExitCode::SUCCESS;
    }
    if let Err(e) = init_logging(Some(&cli.log)) {
        eprintln!("cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = terminal::disable_raw_mode();
            eprintln!("FAILED: {}", e);
            ExitCode::FAILURE
        }
    }
}
