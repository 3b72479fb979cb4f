/// Borrowed and fixed-capacity ASCII strings, as used by 8.3 filenames and volume labels.
pub mod ascii;
/// Fixed-width UTF-16LE strings, as used by GPT partition names and BCD entries.
pub mod utf16;

pub use ascii::{AsAsciiStr, AsciiStr, FixedByteStr};
