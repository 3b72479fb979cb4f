/// The BIOS Parameter Block jump instruction shared by FAT/NTFS boot sectors.
pub mod bpb;
/// The GUID Partition Table format.
pub mod gpt;
/// The legacy MBR partition table format.
pub mod mbr;
