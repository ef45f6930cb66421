//! rmgate: a terminal-confirmation gate in front of `rm` and `git`.
//!
//! The runtime gate ([`gate`]) intercepts destructive invocations and hands
//! benign ones to the real binary untouched. The installer ([`install`])
//! routes `rm` and `git` through the gate with shims or package diversions
//! and reverses that exactly.

pub mod core;
pub mod gate;
pub mod install;
pub mod logger;
pub mod platform;
