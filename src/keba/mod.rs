// KEBA KeContact P20/P30 UDP protocol
pub mod charger;    // Charger operations on top of roundtrips
pub mod dispatcher; // Shared listener, routes datagrams to chargers
pub mod packet;     // Datagram decoding and report payloads
pub mod roundtrip;  // Command/response correlation
pub mod sender;     // Outbound command socket

pub use packet::{Datagram, Message, OK, PORT};
