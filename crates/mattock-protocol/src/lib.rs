pub mod codec;
pub mod connection;
pub mod crypto;
pub mod packets;
pub mod state;
pub mod wire;

pub use codec::*;
pub use connection::{Connection, ConnectionReader, ConnectionWriter, FrameError};
pub use packets::*;
pub use state::*;
