//! Network subsystem for UDP audio transport

pub mod control;
pub mod receiver;
pub mod sender;
pub mod udp;

pub use control::{ControlEmitter, ControlListener};
pub use receiver::{AudioReceiver, Ingest};
pub use sender::AudioSender;
pub use udp::{create_socket, SocketOptions};
