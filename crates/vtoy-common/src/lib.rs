/// Algorithms
pub mod alg;
/// A minimal ASCII path type shared by the filesystem extent enumerators.
pub mod path;
/// Partitions
pub mod part;
/// Strings
pub mod str;
/// Types
pub mod types;
