//! Animal vocabulary, image resources and the display update.

mod display;
mod vocabulary;

pub use display::{DisplaySurface, TerminalDisplay, show_animal};
pub use vocabulary::{ImageResources, Vocabulary, print_animals};

#[cfg(test)]
pub(crate) use display::tests::RecordingDisplay;
