/// Endianness markers and the [`Endian`](endian::Endian) trait.
pub mod endian;
/// Endian-tagged fixed-width integers.
pub mod number;
