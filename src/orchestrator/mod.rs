//! Host side of a sandbox session: drives a kernel over HTTP and wires it
//! to the callback bridge.

pub mod client;
pub mod stub;

pub use client::KernelClient;
pub use stub::{inject, stub_source, STUB_NAME};
