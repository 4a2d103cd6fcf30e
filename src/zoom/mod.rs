mod controller;
#[cfg(test)]
mod tests;

pub use controller::{ConvergeHandle, ZoomController, ZoomDirection, ZoomMode, ZoomOutcome};
