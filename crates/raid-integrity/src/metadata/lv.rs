use std::fmt;

use bitflags::bitflags;

use super::segment::{IntegritySegment, RaidSegment, Segment, SegmentKind};

/// LvId identifies a logical volume inside its volume group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LvId(pub(crate) u64);

impl fmt::Display for LvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lv#{}", self.0)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct LvStatus: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const RAID = 1 << 2;
        const RAID_IMAGE = 1 << 3;
        const INTEGRITY = 1 << 4;
        const INTEGRITY_METADATA = 1 << 5;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AllocPolicy {
    #[default]
    Inherit,
    Normal,
    Contiguous,
    Anywhere,
}

/// UseRole is the part a child volume plays in the segment that references it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UseRole {
    RaidImage(usize),
    LayerOrigin,
    IntegrityOrigin,
    IntegrityMetadata,
}

/// SegmentRef records which segment of which volume references a child volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentRef {
    pub lv: LvId,
    pub segment: usize,
    pub role: UseRole,
}

#[derive(Clone, Debug)]
pub struct LogicalVolume {
    pub id: LvId,
    pub name: String,
    /// Size in 512-byte sectors.
    pub size: u64,
    pub segments: Vec<Segment>,
    pub status: LvStatus,
    pub visible: bool,
    pub alloc: AllocPolicy,
    pub read_ahead: u32,
    pub(crate) used_by: Vec<SegmentRef>,
}

impl LogicalVolume {
    #[must_use]
    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments.first()
    }

    /// `segtype` returns the type name of the first segment, or `"none"`.
    #[must_use]
    pub fn segtype(&self) -> String {
        self.first_segment()
            .map_or_else(|| String::from("none"), Segment::segtype)
    }

    #[must_use]
    pub fn raid_segment(&self) -> Option<&RaidSegment> {
        match self.first_segment().map(|s| &s.kind) {
            Some(SegmentKind::Raid(raid)) => Some(raid),
            _ => None,
        }
    }

    #[must_use]
    pub fn integrity_segment(&self) -> Option<&IntegritySegment> {
        match self.first_segment().map(|s| &s.kind) {
            Some(SegmentKind::Integrity(seg)) => Some(seg),
            _ => None,
        }
    }

    pub fn integrity_segment_mut(&mut self) -> Option<&mut IntegritySegment> {
        match self.segments.first_mut().map(|s| &mut s.kind) {
            Some(SegmentKind::Integrity(seg)) => Some(seg),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_striped(&self) -> bool {
        matches!(
            self.first_segment().map(|s| &s.kind),
            Some(SegmentKind::Striped(_))
        )
    }

    #[must_use]
    pub fn used_by(&self) -> &[SegmentRef] {
        &self.used_by
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        !self.used_by.is_empty()
    }
}
