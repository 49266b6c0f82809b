pub mod address;
pub mod codec;
pub mod state;

pub use address::Address;
pub use codec::{Command, Greeting, UdpHeader};
pub use state::run_socks5;
