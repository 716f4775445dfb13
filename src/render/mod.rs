/// Terminal rendering of status events
pub mod console;

pub use console::ConsoleRenderer;
