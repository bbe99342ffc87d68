pub mod constants;
pub mod framing;
pub mod transport;
