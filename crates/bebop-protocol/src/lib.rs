use std::net::Ipv4Addr;

pub mod frame;
pub mod handshake;
pub mod sequence;

/// Default drone address on its own Wi-Fi access point
pub const DEFAULT_DRONE_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 1);

/// Default ports
pub const DEFAULT_HANDSHAKE_PORT: u16 = 44444;
pub const DEFAULT_D2C_PORT: u16 = 43210;
pub const DEFAULT_STREAM_PORT: u16 = 55004;
pub const DEFAULT_STREAM_CONTROL_PORT: u16 = 55005;

/// Controller identification sent in the handshake
pub const DEFAULT_CONTROLLER_TYPE: &str = "computer";
pub const DEFAULT_CONTROLLER_NAME: &str = "pyparrot";

/// Largest datagram the link will accept from the drone
pub const MAX_DATAGRAM_SIZE: usize = 66_000;
