//! A persistent scripting kernel plus the host-side bridge that lets code
//! inside it call back into a language model.

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod kernel;
pub mod llm;
pub mod orchestrator;
pub mod wire;
