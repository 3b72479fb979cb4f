#[cfg(feature = "std")]
pub mod crc;
