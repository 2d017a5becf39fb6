//! ring-daemon library: native collaborators for a ring node.
//!
//! Exposes the UDP transport, the scp file transport, the on-disk store and
//! the operator console so integration tests can drive them directly.

pub mod console;
pub mod native_store;
pub mod scp;
pub mod udp;

pub use console::{execute, Command, ConsoleError, Reply, USAGE};
pub use native_store::NativeStore;
pub use scp::{ScpOptions, ScpTransport};
pub use udp::{ports_for, resolve, UdpListener, UdpTransport};
