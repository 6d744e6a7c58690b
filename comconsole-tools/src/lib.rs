use clap::Parser;
use comconsole::hotkey::{
    store, Chord, HotkeyBinding, HotkeyCollection, HotkeyId, KeyCode, Modifiers, StoreError,
};
use comconsole::link::{LineEnding, PortSettings};
use comconsole::settings::{Settings, DEFAULT_HOTKEYS_PATH, DEFAULT_SETTINGS_PATH};
use comconsole::UiCommand;
use crossterm::event::{KeyCode as TermKey, KeyEvent, KeyModifiers};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
pub struct LinkOpts {
    /// Serial port (e.g., /dev/ttyUSB0, COM3); overrides the settings file
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// Baud rate; overrides the settings file
    #[arg(short = 'b', long = "rate")]
    pub rate: Option<u32>,

    /// Settings file
    #[arg(short = 'c', long = "config", default_value = DEFAULT_SETTINGS_PATH)]
    pub config: PathBuf,

    /// Hotkey store
    #[arg(short = 'k', long = "keys", default_value = DEFAULT_HOTKEYS_PATH)]
    pub keys: PathBuf,
}

impl LinkOpts {
    /// Settings file contents with command line values applied on top.
    pub fn settings(&self) -> Settings {
        let mut settings = Settings::load_or_default(&self.config);
        if let Some(port) = &self.port {
            settings.port = port.clone();
        }
        if let Some(rate) = self.rate {
            settings.rate = rate;
        }
        settings
    }
}

/// Where the console logs when `--log` is not given. Its raw-mode screen
/// has no room for log lines.
pub const DEFAULT_LOG_PATH: &str = "comconsole.log";

#[derive(Parser, Debug, Clone)]
#[command(
    name = "comconsole",
    version,
    about = "Serial console with hotkeys bound to commands"
)]
pub struct ConsoleOpts {
    #[command(flatten)]
    pub link: LinkOpts,

    /// Log file
    #[arg(long, default_value = DEFAULT_LOG_PATH)]
    pub log: PathBuf,

    /// List available serial ports and exit
    #[arg(long = "enum")]
    pub enumerate: bool,
}

/// Installs the fmt subscriber. The filter comes from `RUST_LOG`, default
/// `warn`. Output goes to `log` if given, stderr otherwise.
pub fn init_logging(log: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    match log {
        Some(path) => {
            let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .try_init();
        }
    }
    Ok(())
}

/// Chords the console keeps for itself: Ctrl+C and Ctrl+D quit.
pub fn reserved_chords() -> [Chord; 2] {
    [
        Chord::new(Modifiers::CONTROL, KeyCode(0x43)),
        Chord::new(Modifiers::CONTROL, KeyCode(0x44)),
    ]
}

/// Translates a terminal key press to the chord it would register as.
/// Keys without a virtual key equivalent give `None`.
pub fn chord_from_key(event: &KeyEvent) -> Option<Chord> {
    let mut modifiers = Modifiers::empty();
    if event.modifiers.contains(KeyModifiers::CONTROL) {
        modifiers |= Modifiers::CONTROL;
    }
    if event.modifiers.contains(KeyModifiers::ALT) {
        modifiers |= Modifiers::ALT;
    }
    if event.modifiers.contains(KeyModifiers::SHIFT) {
        modifiers |= Modifiers::SHIFT;
    }
    if event.modifiers.contains(KeyModifiers::SUPER) {
        modifiers |= Modifiers::WIN;
    }
    let named = |name: &str| name.parse::<KeyCode>().ok();
    let key = match event.code {
        TermKey::Char(' ') => named("Space"),
        TermKey::Char(c) => KeyCode::letter(c).or_else(|| KeyCode::digit(c)),
        TermKey::F(n) => KeyCode::function(n),
        TermKey::Backspace => named("Back"),
        TermKey::Tab => named("Tab"),
        TermKey::Enter => named("Enter"),
        TermKey::Esc => named("Escape"),
        TermKey::PageUp => named("PageUp"),
        TermKey::PageDown => named("PageDown"),
        TermKey::End => named("End"),
        TermKey::Home => named("Home"),
        TermKey::Left => named("Left"),
        TermKey::Up => named("Up"),
        TermKey::Right => named("Right"),
        TermKey::Down => named("Down"),
        TermKey::Insert => named("Insert"),
        TermKey::Delete => named("Delete"),
        _ => None,
    }?;
    Some(Chord::new(modifiers, key))
}

pub const CONSOLE_HELP: &str = concat!(
    "/bind <chord> <command>  /unbind <id>  /keys  ",
    "/eol <none|cr|lf|crlf>  /open [port] [rate]  /quit"
);

/// Parses one line typed at the console prompt. Plain text is sent as is,
/// `//text` sends `/text`, anything else starting with `/` is a console
/// command. `current` fills in what `/open` leaves out.
pub fn parse_line(line: &str, current: &PortSettings) -> Result<UiCommand, String> {
    let command = match line.strip_prefix('/') {
        None => return Ok(UiCommand::Send(line.to_string())),
        Some(rest) if rest.starts_with('/') => return Ok(UiCommand::Send(rest.to_string())),
        Some(rest) => rest,
    };
    let (verb, args) = match command.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (command, ""),
    };
    match verb {
        "bind" => {
            let (chord, text) = args
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: /bind <chord> <command>".to_string())?;
            let chord: Chord = chord.parse().map_err(|e| format!("{}", e))?;
            Ok(UiCommand::Bind(HotkeyBinding::new(chord, text.trim_start())))
        }
        "unbind" => args
            .parse::<u16>()
            .map(|id| UiCommand::Unbind(HotkeyId(id)))
            .map_err(|_| "usage: /unbind <id>".to_string()),
        "keys" => Ok(UiCommand::ListHotkeys),
        "eol" => LineEnding::from_name(args)
            .map(UiCommand::SetLineEnding)
            .ok_or_else(|| "usage: /eol <none|cr|lf|crlf>".to_string()),
        "open" => {
            let mut settings = current.clone();
            let mut words = args.split_whitespace();
            if let Some(port) = words.next() {
                settings.port = port.to_string();
            }
            if let Some(rate) = words.next() {
                settings.rate = rate
                    .parse()
                    .map_err(|_| format!("invalid rate '{}'", rate))?;
            }
            Ok(UiCommand::Apply(settings))
        }
        "quit" | "exit" => Ok(UiCommand::Quit),
        "help" => Err(CONSOLE_HELP.to_string()),
        _ => Err(format!("unknown command /{}; {}", verb, CONSOLE_HELP)),
    }
}

/// Reads a hotkey store for editing. Unlike `store::load`, a damaged file
/// is an error so it is not overwritten by accident.
pub fn read_store(path: &Path) -> Result<HotkeyCollection, StoreError> {
    match fs::read(path) {
        Ok(data) => store::decode(&data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HotkeyCollection::new()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventKind;

    fn port() -> PortSettings {
        PortSettings {
            port: "/dev/ttyUSB0".to_string(),
            ..PortSettings::default()
        }
    }

    #[test]
    fn plain_text_is_sent() {
        assert_eq!(
            parse_line("AT+GMR", &port()),
            Ok(UiCommand::Send("AT+GMR".to_string()))
        );
        assert_eq!(
            parse_line("//keys", &port()),
            Ok(UiCommand::Send("/keys".to_string()))
        );
    }

    #[test]
    fn console_commands() {
        let bind = parse_line("/bind ctrl+f2 AT Z", &port()).unwrap();
        assert_eq!(
            bind,
            UiCommand::Bind(HotkeyBinding::new("ctrl+f2".parse().unwrap(), "AT Z"))
        );
        assert_eq!(
            parse_line("/unbind 7", &port()),
            Ok(UiCommand::Unbind(HotkeyId(7)))
        );
        assert_eq!(parse_line("/keys", &port()), Ok(UiCommand::ListHotkeys));
        assert_eq!(
            parse_line("/eol crlf", &port()),
            Ok(UiCommand::SetLineEnding(LineEnding::CRLF))
        );
        assert_eq!(parse_line("/quit", &port()), Ok(UiCommand::Quit));

        let open = parse_line("/open COM4 115200", &port()).unwrap();
        let expected = PortSettings {
            port: "COM4".to_string(),
            rate: 115200,
            ..PortSettings::default()
        };
        assert_eq!(open, UiCommand::Apply(expected));
        assert_eq!(parse_line("/open", &port()), Ok(UiCommand::Apply(port())));
    }

    #[test]
    fn bad_console_commands() {
        assert!(parse_line("/bind ctrl+f2", &port()).is_err());
        assert!(parse_line("/bind hyper+x cmd", &port()).is_err());
        assert!(parse_line("/unbind x", &port()).is_err());
        assert!(parse_line("/eol lfcr", &port()).is_err());
        assert!(parse_line("/open COM1 fast", &port()).is_err());
        assert!(parse_line("/frobnicate", &port()).is_err());
    }

    #[test]
    fn key_events_map_to_chords() {
        let press =
            |code, modifiers| KeyEvent::new_with_kind(code, modifiers, KeyEventKind::Press);
        assert_eq!(
            chord_from_key(&press(TermKey::Char('c'), KeyModifiers::CONTROL)),
            Some(reserved_chords()[0])
        );
        assert_eq!(
            chord_from_key(&press(TermKey::F(5), KeyModifiers::CONTROL | KeyModifiers::ALT)),
            "ctrl+alt+f5".parse().ok()
        );
        assert_eq!(
            chord_from_key(&press(TermKey::Char('A'), KeyModifiers::SHIFT)),
            "shift+a".parse().ok()
        );
        assert_eq!(
            chord_from_key(&press(TermKey::Char('3'), KeyModifiers::NONE)),
            "d3".parse().ok()
        );
        assert_eq!(
            chord_from_key(&press(TermKey::PageDown, KeyModifiers::NONE)),
            "pagedown".parse().ok()
        );
        assert_eq!(
            chord_from_key(&press(TermKey::Char('%'), KeyModifiers::NONE)),
            None
        );
    }

    #[test]
    fn command_line_overrides_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("comconsole.yaml");
        let saved = Settings {
            port: "COM1".to_string(),
            rate: 19200,
            append: LineEnding::CR,
            ..Settings::default()
        };
        saved.save(&config).unwrap();
        let config_arg = config.to_str().unwrap();
        let opts = LinkOpts::parse_from(["comconsole", "-b", "57600", "-c", config_arg]);
        let settings = opts.settings();
        assert_eq!(settings.port, "COM1");
        assert_eq!(settings.rate, 57600);
        assert_eq!(settings.append, LineEnding::CR);
        assert_eq!(opts.keys, PathBuf::from(DEFAULT_HOTKEYS_PATH));
    }

    #[test]
    fn console_logs_to_a_file_by_default() {
        let opts = ConsoleOpts::parse_from(["comconsole"]);
        assert_eq!(opts.log, PathBuf::from(DEFAULT_LOG_PATH));
        assert!(!opts.enumerate);

        let opts = ConsoleOpts::parse_from(["comconsole", "--log", "/tmp/c.log", "--enum"]);
        assert_eq!(opts.log, PathBuf::from("/tmp/c.log"));
        assert!(opts.enumerate);
    }

    #[test]
    fn log_file_is_appended_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        fs::write(&path, "earlier\n").unwrap();
        init_logging(Some(&path)).unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("earlier\n"));
        assert!(init_logging(Some(&dir.path().join("no/such/dir.log"))).is_err());
    }

    #[test]
    fn damaged_store_is_an_error_for_editing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotkeys.dat");
        assert!(read_store(&path).unwrap().is_empty());
        fs::write(&path, b"CCHK\x01garbage").unwrap();
        assert!(read_store(&path).is_err());
    }
}
