use std::collections::BTreeMap;

use super::lv::{AllocPolicy, LogicalVolume, LvId, LvStatus, SegmentRef};
use super::segment::{Area, Segment, SegmentKind};
use super::NAME_LEN;
use crate::error::{IntegrityError, Result};

pub const SECTOR_SIZE: u64 = 512;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalVolume {
    pub name: String,
    pub pe_count: u32,
}

/// VolumeGroup owns the logical volumes and physical volumes of one group.
///
/// Parent segments refer to child volumes by [`LvId`]; the child keeps the reverse
/// relation in `used_by`, maintained by [`VolumeGroup::replace_segments`].
#[derive(Clone, Debug)]
pub struct VolumeGroup {
    pub name: String,
    /// Extent size in sectors.
    pub extent_size: u64,
    pub pvs: Vec<PhysicalVolume>,
    /// Bumped by every durable commit.
    pub seqno: u64,
    lvs: BTreeMap<LvId, LogicalVolume>,
    next_id: u64,
}

impl VolumeGroup {
    #[must_use]
    pub fn new(name: &str, extent_size: u64) -> Self {
        Self {
            name: name.to_string(),
            extent_size: extent_size.max(1),
            pvs: Vec::new(),
            seqno: 0,
            lvs: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn add_pv(&mut self, name: &str, pe_count: u32) {
        self.pvs.push(PhysicalVolume {
            name: name.to_string(),
            pe_count,
        });
    }

    #[must_use]
    pub fn pv(&self, name: &str) -> Option<&PhysicalVolume> {
        self.pvs.iter().find(|pv| pv.name == name)
    }

    /// # Errors
    /// Returns [`IntegrityError::UnknownLv`] if the id is not part of this group.
    pub fn lv(&self, id: LvId) -> Result<&LogicalVolume> {
        self.lvs.get(&id).ok_or(IntegrityError::UnknownLv(id))
    }

    /// # Errors
    /// Returns [`IntegrityError::UnknownLv`] if the id is not part of this group.
    pub fn lv_mut(&mut self, id: LvId) -> Result<&mut LogicalVolume> {
        self.lvs.get_mut(&id).ok_or(IntegrityError::UnknownLv(id))
    }

    #[must_use]
    pub fn contains(&self, id: LvId) -> bool {
        self.lvs.contains_key(&id)
    }

    #[must_use]
    pub fn find_lv(&self, name: &str) -> Option<LvId> {
        self.lvs.values().find(|lv| lv.name == name).map(|lv| lv.id)
    }

    pub fn lvs(&self) -> impl Iterator<Item = &LogicalVolume> {
        self.lvs.values()
    }

    /// `name_of` returns the volume name for logging, falling back to the id.
    #[must_use]
    pub fn name_of(&self, id: LvId) -> String {
        self.lvs
            .get(&id)
            .map_or_else(|| id.to_string(), |lv| lv.name.clone())
    }

    /// `compose_name` appends `suffix` to `base`, bounded by the volume name limit.
    ///
    /// # Errors
    /// Returns [`IntegrityError::NameTooLong`] if the result would not fit.
    pub fn compose_name(base: &str, suffix: &'static str) -> Result<String> {
        if base.len() + suffix.len() >= NAME_LEN {
            return Err(IntegrityError::NameTooLong {
                name: base.to_string(),
                suffix,
            });
        }
        Ok(format!("{base}{suffix}"))
    }

    /// `create_lv` adds a new volume holding `segments` and links every child it references.
    ///
    /// # Errors
    /// Returns an error if the name is taken or too long, or a referenced child is unknown.
    pub fn create_lv(
        &mut self,
        name: &str,
        segments: Vec<Segment>,
        status: LvStatus,
    ) -> Result<LvId> {
        self.check_name(name)?;
        let id = LvId(self.next_id);
        self.next_id += 1;
        let lv = LogicalVolume {
            id,
            name: name.to_string(),
            size: 0,
            segments: Vec::new(),
            status,
            visible: true,
            alloc: AllocPolicy::Inherit,
            read_ahead: 0,
            used_by: Vec::new(),
        };
        self.lvs.insert(id, lv);
        if let Err(err) = self.replace_segments(id, segments) {
            self.lvs.remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    /// `take_lv` removes an unreferenced volume from the group after unlinking its children.
    ///
    /// # Errors
    /// Returns an error if the volume is unknown or still used by another segment.
    pub fn take_lv(&mut self, id: LvId) -> Result<LogicalVolume> {
        let lv = self.lv(id)?;
        if lv.is_used() {
            return Err(IntegrityError::AlreadyReferenced {
                lv: lv.name.clone(),
            });
        }
        self.replace_segments(id, Vec::new())?;
        self.lvs.remove(&id).ok_or(IntegrityError::UnknownLv(id))
    }

    /// # Errors
    /// Returns an error if the volume is unknown or the new name is taken or too long.
    pub fn rename_lv(&mut self, id: LvId, name: &str) -> Result<()> {
        if self.lv(id)?.name == name {
            return Ok(());
        }
        self.check_name(name)?;
        self.lv_mut(id)?.name = name.to_string();
        Ok(())
    }

    /// `replace_segments` swaps the segment list of `id`, moving `used_by` links from the
    /// children of the old segments to the children of the new ones. The volume size is
    /// recomputed from the new segments.
    ///
    /// # Errors
    /// Returns an error if `id` or any referenced child is unknown.
    pub fn replace_segments(&mut self, id: LvId, segments: Vec<Segment>) -> Result<Vec<Segment>> {
        for seg in &segments {
            for (child, _) in seg.children() {
                self.lv(child)?;
            }
        }

        let lv = self.lv_mut(id)?;
        lv.size = segments.iter().map(|s| s.len).sum();
        let old = std::mem::replace(&mut lv.segments, segments);

        for seg in &old {
            for (child, _) in seg.children() {
                if let Some(child_lv) = self.lvs.get_mut(&child) {
                    child_lv.used_by.retain(|r| r.lv != id);
                }
            }
        }

        let links: Vec<(LvId, SegmentRef)> = self
            .lv(id)?
            .segments
            .iter()
            .enumerate()
            .flat_map(|(index, seg)| {
                seg.children().into_iter().map(move |(child, role)| {
                    (
                        child,
                        SegmentRef {
                            lv: id,
                            segment: index,
                            role,
                        },
                    )
                })
            })
            .collect();
        for (child, link) in links {
            self.lv_mut(child)?.used_by.push(link);
        }

        Ok(old)
    }

    /// `unlink` drops the relation recording that `owner` references `child`.
    ///
    /// # Errors
    /// Returns an error if `child` is unknown.
    pub fn unlink(&mut self, child: LvId, owner: LvId) -> Result<()> {
        self.lv_mut(child)?.used_by.retain(|r| r.lv != owner);
        Ok(())
    }

    /// `parent_of` returns the first segment referencing `id`, if any.
    #[must_use]
    pub fn parent_of(&self, id: LvId) -> Option<SegmentRef> {
        self.lvs.get(&id).and_then(|lv| lv.used_by.first().copied())
    }

    /// `pvs_of` lists the physical volumes holding extents of `id`, following layered areas
    /// and sub-volumes, in first-use order.
    ///
    /// # Errors
    /// Returns an error if `id` or a referenced child is unknown.
    pub fn pvs_of(&self, id: LvId) -> Result<Vec<String>> {
        let mut out = Vec::new();
        self.collect_pvs(id, &mut out)?;
        Ok(out)
    }

    fn collect_pvs(&self, id: LvId, out: &mut Vec<String>) -> Result<()> {
        for seg in &self.lv(id)?.segments {
            match &seg.kind {
                SegmentKind::Striped(striped) => {
                    for area in &striped.areas {
                        match area {
                            Area::Pv { pv, .. } => {
                                if !out.contains(pv) {
                                    out.push(pv.clone());
                                }
                            }
                            Area::Lv { lv, .. } => self.collect_pvs(*lv, out)?,
                        }
                    }
                }
                SegmentKind::Raid(_) | SegmentKind::Integrity(_) => {
                    for (child, _) in seg.children() {
                        self.collect_pvs(child, out)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// `extents_for_bytes` rounds a byte count up to whole extents.
    #[must_use]
    pub fn extents_for_bytes(&self, bytes: u64) -> u32 {
        let sectors = bytes.div_ceil(SECTOR_SIZE);
        u32::try_from(sectors.div_ceil(self.extent_size)).unwrap_or(u32::MAX)
    }

    /// `lv_extents` returns the size of `id` in whole extents.
    ///
    /// # Errors
    /// Returns an error if `id` is unknown.
    pub fn lv_extents(&self, id: LvId) -> Result<u32> {
        let size = self.lv(id)?.size;
        Ok(u32::try_from(size.div_ceil(self.extent_size)).unwrap_or(u32::MAX))
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if name.len() >= NAME_LEN {
            return Err(IntegrityError::NameTooLong {
                name: name.to_string(),
                suffix: "",
            });
        }
        if self.find_lv(name).is_some() {
            return Err(IntegrityError::NameInUse(name.to_string()));
        }
        Ok(())
    }
}
