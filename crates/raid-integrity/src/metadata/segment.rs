use std::fmt;
use std::str::FromStr;

use super::lv::{LvId, UseRole};
use super::settings::IntegritySettings;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Area {
    /// Physical extents on a named physical volume.
    Pv { pv: String, pe_start: u32, extents: u32 },
    /// Logical extents of another volume (used when a layer is spliced in).
    Lv { lv: LvId, extents: u32 },
}

impl Area {
    #[must_use]
    pub const fn extents(&self) -> u32 {
        match self {
            Self::Pv { extents, .. } | Self::Lv { extents, .. } => *extents,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StripedSegment {
    pub areas: Vec<Area>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
}

impl RaidLevel {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raid0 => "raid0",
            Self::Raid1 => "raid1",
            Self::Raid4 => "raid4",
            Self::Raid5 => "raid5",
            Self::Raid6 => "raid6",
            Self::Raid10 => "raid10",
        }
    }

    /// `supports_integrity` reports whether images of this level may carry integrity layers.
    #[must_use]
    pub const fn supports_integrity(self) -> bool {
        !matches!(self, Self::Raid0)
    }

    /// `data_images` returns how many of `images` hold data rather than redundancy.
    ///
    /// # Arguments
    /// * `images` - Total image count of the array.
    #[must_use]
    pub const fn data_images(self, images: usize) -> usize {
        match self {
            Self::Raid0 => images,
            Self::Raid1 => 1,
            Self::Raid4 | Self::Raid5 => images.saturating_sub(1),
            Self::Raid6 => images.saturating_sub(2),
            Self::Raid10 => images / 2,
        }
    }

    /// `min_images` is the smallest array this level can be built from.
    #[must_use]
    pub const fn min_images(self) -> usize {
        match self {
            Self::Raid0 | Self::Raid1 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 => 5,
            Self::Raid10 => 4,
        }
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RaidLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raid0" => Ok(Self::Raid0),
            "raid1" | "mirror" => Ok(Self::Raid1),
            "raid4" => Ok(Self::Raid4),
            "raid5" => Ok(Self::Raid5),
            "raid6" => Ok(Self::Raid6),
            "raid10" => Ok(Self::Raid10),
            other => Err(format!("unknown raid level: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaidSegment {
    pub level: RaidLevel,
    pub images: Vec<LvId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegritySegment {
    pub origin: Option<LvId>,
    pub metadata: Option<LvId>,
    /// Length of the protected data in sectors.
    pub data_sectors: u64,
    pub settings: IntegritySettings,
    pub recalculate: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Striped(StripedSegment),
    Raid(RaidSegment),
    Integrity(IntegritySegment),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
    /// Length in sectors.
    pub len: u64,
    pub kind: SegmentKind,
}

impl Segment {
    #[must_use]
    pub fn segtype(&self) -> String {
        match &self.kind {
            SegmentKind::Striped(_) => String::from("striped"),
            SegmentKind::Raid(raid) => raid.level.name().to_string(),
            SegmentKind::Integrity(_) => String::from("integrity"),
        }
    }

    /// `children` lists every volume this segment references, with its role.
    #[must_use]
    pub fn children(&self) -> Vec<(LvId, UseRole)> {
        match &self.kind {
            SegmentKind::Striped(striped) => striped
                .areas
                .iter()
                .filter_map(|a| match a {
                    Area::Lv { lv, .. } => Some((*lv, UseRole::LayerOrigin)),
                    Area::Pv { .. } => None,
                })
                .collect(),
            SegmentKind::Raid(raid) => raid
                .images
                .iter()
                .enumerate()
                .map(|(i, lv)| (*lv, UseRole::RaidImage(i)))
                .collect(),
            SegmentKind::Integrity(seg) => seg
                .origin
                .map(|lv| (lv, UseRole::IntegrityOrigin))
                .into_iter()
                .chain(seg.metadata.map(|lv| (lv, UseRole::IntegrityMetadata)))
                .collect(),
        }
    }
}
