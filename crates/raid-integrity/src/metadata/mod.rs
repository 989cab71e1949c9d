//! In-memory volume group description: logical volumes, segments and integrity settings.

mod lv;
mod segment;
mod settings;
mod vg;

pub use lv::{AllocPolicy, LogicalVolume, LvId, LvStatus, SegmentRef, UseRole};
pub use segment::{
    Area, IntegritySegment, RaidLevel, RaidSegment, Segment, SegmentKind, StripedSegment,
};
pub use settings::{
    DEFAULT_BLOCK_SIZE, DEFAULT_INTERNAL_HASH, DEFAULT_MODE, DEFAULT_TAG_SIZE, IntegrityMode,
    IntegritySettings,
};
pub use vg::{PhysicalVolume, SECTOR_SIZE, VolumeGroup};

/// Volume names must be shorter than this many bytes.
pub const NAME_LEN: usize = 128;
