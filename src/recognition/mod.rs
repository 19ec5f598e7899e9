//! The always-on animal recognition loop.

mod controller;
#[cfg(test)]
mod fakes;
mod session;
mod supervisor;

pub use controller::RecognitionLoop;
pub use supervisor::listen;
