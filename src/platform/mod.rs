//! Host abstraction for install-time side effects.

pub mod host;
#[cfg(test)]
pub mod memory;
