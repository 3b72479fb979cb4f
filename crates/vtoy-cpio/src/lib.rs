//! newc-format cpio overlay builder: assembles the Linux initramfs prefix
//! ventoy's agent reads to find the image chunk list, OS param, and the
//! optional auto-install/persistence/injection/DUD payloads.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod builder;
pub mod header;
pub mod overlay;

pub use builder::{CpioBuilder, CpioError};
pub use overlay::{OverlayCpio, IMAGE_MAP_ENTRY_NAME, OS_PARAM_ENTRY_NAME};
