mod ring_bytes;
pub mod time;

pub use ring_bytes::RingBytes;
