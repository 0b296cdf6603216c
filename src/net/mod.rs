pub mod framing;
pub mod protocol;
pub mod tls;
pub mod transport;
