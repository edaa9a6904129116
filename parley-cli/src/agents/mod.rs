pub mod demo;
pub mod gateway;
pub mod launcher;
pub mod platform;
pub mod registry;
pub mod worker;

#[cfg(test)]
mod tests;

pub use demo::{DemoOptions, DemoReport, run_demo};
pub use registry::Directory;
