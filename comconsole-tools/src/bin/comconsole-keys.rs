//! comconsole-keys
//!
//! Lists and edits the saved hotkey bindings without starting the console.

use clap::{Parser, Subcommand};
use comconsole::hotkey::{store, Chord, HotkeyBinding, HotkeyCollection};
use comconsole::settings::DEFAULT_HOTKEYS_PATH;
use comconsole_tools::{init_logging, read_store};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "comconsole-keys",
    version,
    about = "Edit the hotkey bindings saved by comconsole"
)]
struct Cli {
    /// Hotkey store
    #[arg(short = 'k', long = "keys", default_value = DEFAULT_HOTKEYS_PATH)]
    keys: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List saved bindings with their index
    List,
    /// Add a binding
    Add {
        /// Key chord (e.g., ctrl+alt+f5)
        chord: String,

        /// Command sent when the chord is pressed
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Remove the binding at an index shown by `list`
    Remove { index: usize },
    /// Remove all bindings
    Clear,
}

fn list(path: &Path) -> Result<(), String> {
    let saved = read_store(path).map_err(|e| e.to_string())?;
    for (i, binding) in saved.bindings.iter().enumerate() {
        println!("{:>3}  {:<20} {}", i + 1, binding.chord.to_string(), binding.command);
    }
    Ok(())
}

fn add(path: &Path, chord: &str, command: &[String]) -> Result<(), String> {
    let chord: Chord = chord.parse().map_err(|e| format!("{}", e))?;
    let mut saved = read_store(path).map_err(|e| e.to_string())?;
    if saved.bindings.iter().any(|b| b.chord == chord) {
        return Err(format!("{} is already bound", chord));
    }
    saved
        .bindings
        .push(HotkeyBinding::new(chord, &command.join(" ")));
    store::save(path, &saved).map_err(|e| e.to_string())
}

fn remove(path: &Path, index: usize) -> Result<(), String> {
    let mut saved = read_store(path).map_err(|e| e.to_string())?;
    if index == 0 || index > saved.len() {
        return Err(format!("no binding at index {}", index));
    }
    let binding = saved.bindings.remove(index - 1);
    println!("removed {} {}", binding.chord, binding.command);
    store::save(path, &saved).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(None) {
        eprintln!("{}", e);
    }

    let result = match &cli.command {
        Commands::List => list(&cli.keys),
        Commands::Add { chord, command } => add(&cli.keys, chord, command),
        Commands::Remove { index } => remove(&cli.keys, *index),
        Commands::Clear => {
            store::save(&cli.keys, &HotkeyCollection::new()).map_err(|e| e.to_string())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", cli.keys.display(), e);
            ExitCode::FAILURE
        }
    }
}
