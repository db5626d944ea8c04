//! Application runtime (C10, §4.2) — wires the step engine (C5) over the
//! registry (C6), plugin supervisor (C9), RPC server (C8) and HTTP boundary
//! (C11), and owns the error channel and wait group described in §4.2/§5.

pub mod application;
pub mod steps;

pub use application::Application;
