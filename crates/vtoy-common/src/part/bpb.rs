//! The jump instruction at the start of a BIOS Parameter Block. Filesystem
//! specific BPB fields live in the crate that owns that filesystem (e.g.
//! `vtoy-fat`).

/// The 3-byte jump instruction at offset 0 of a FAT/NTFS boot sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpInstruction {
    ShortJump(u8),
    NearJump(u16),
}

impl JumpInstruction {
    pub fn from_bytes(bytes: [u8; 3]) -> Result<Self, ()> {
        if bytes[0] == 0xEB && bytes[2] == 0x90 {
            Ok(Self::ShortJump(bytes[1]))
        } else if bytes[0] == 0xE9 {
            Ok(Self::NearJump(u16::from_le_bytes(
                bytes[1..3].try_into().unwrap(),
            )))
        } else {
            Err(())
        }
    }

    pub fn to_bytes(&self) -> [u8; 3] {
        match self {
            Self::ShortJump(byte) => [0xEB, *byte, 0x90],
            Self::NearJump(word) => [0xE9, word.to_le_bytes()[0], word.to_le_bytes()[1]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_jump_round_trips() {
        assert_eq!(
            JumpInstruction::from_bytes([0xEB, 0x01, 0x90]).unwrap(),
            JumpInstruction::ShortJump(0x01)
        );
        assert_eq!(JumpInstruction::ShortJump(0x01).to_bytes(), [0xEB, 0x01, 0x90]);
    }

    #[test]
    fn near_jump_round_trips() {
        assert_eq!(
            JumpInstruction::from_bytes([0xE9, 0x00, 0x01]).unwrap(),
            JumpInstruction::NearJump(0x0100)
        );
    }

    #[test]
    fn invalid_jump_is_rejected() {
        assert!(JumpInstruction::from_bytes([0xEB, 0x01, 0x01]).is_err());
    }
}
