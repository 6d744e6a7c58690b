pub mod controller;
pub mod hotkey;
pub mod line;
pub mod link;
pub mod settings;

pub use controller::{Controller, ControllerEvent, DisplaySink, UiCommand};
pub use link::{SerialLink, SerialPortLink};
pub use settings::Settings;
