//! In-memory implementation of [`Backend`] with optional image-file backed physical volumes.
//!
//! The simulator stands in for the metadata store, the device activation layer and the
//! allocation engine. Faults can be injected per call so failure paths are reproducible.

pub mod allocator;
mod disk;
#[cfg(test)]
mod disk_tests;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use tracing::{debug, info};

pub use disk::PvImage;

use crate::backend::Backend;
use crate::metadata::{
    Area, LvId, LvStatus, RaidLevel, RaidSegment, SECTOR_SIZE, Segment, SegmentKind,
    StripedSegment, VolumeGroup,
};

/// SimConfig describes the simulated volume group.
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub vg_name: String,
    /// Extent size in sectors.
    pub extent_size: u64,
    pub pv_count: usize,
    pub pv_extents: u32,
    /// When set, each PV is backed by `<dir>/pv<N>.img`.
    pub pv_dir: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            vg_name: String::from("vg0"),
            extent_size: 8192,
            pv_count: 4,
            pv_extents: 4096,
            pv_dir: None,
        }
    }
}

/// Faults lists the calls the simulator should fail. Counters are 1-based call ordinals.
#[derive(Clone, Debug, Default)]
pub struct Faults {
    pub fail_allocation_at: BTreeSet<usize>,
    pub fail_commit_at: BTreeSet<usize>,
    pub fail_reload: bool,
    pub fail_extend: bool,
    pub fail_activate: BTreeSet<String>,
    pub fail_deactivate: BTreeSet<String>,
    pub fail_zero: BTreeSet<String>,
    pub fail_remove: BTreeSet<String>,
}

/// Calls counts the collaborator calls the simulator has served.
#[derive(Clone, Debug, Default)]
pub struct Calls {
    pub allocations: usize,
    pub commits: usize,
    pub reloads: usize,
    pub extends: usize,
    /// `(volume name, sectors)` for every zeroing request.
    pub zeroed: Vec<(String, u64)>,
    pub removed: Vec<String>,
}

#[derive(Debug)]
pub struct SimBackend {
    extent_size: u64,
    images: HashMap<String, PvImage>,
    active: BTreeSet<LvId>,
    recalculating: BTreeSet<LvId>,
    mismatches: BTreeMap<LvId, u64>,
    history: Vec<VolumeGroup>,
    pub faults: Faults,
    pub calls: Calls,
}

impl SimBackend {
    /// `build` creates a volume group with `pv_count` PVs and a backend serving it.
    ///
    /// # Errors
    /// Returns an error if a PV image file cannot be created.
    pub fn build(config: &SimConfig) -> anyhow::Result<(VolumeGroup, Self)> {
        let mut vg = VolumeGroup::new(&config.vg_name, config.extent_size);
        let mut images = HashMap::new();

        for i in 0..config.pv_count {
            let name = format!("pv{i}");
            vg.add_pv(&name, config.pv_extents);
            if let Some(dir) = &config.pv_dir {
                let path = dir.join(format!("{name}.img"));
                let len = u64::from(config.pv_extents) * config.extent_size * SECTOR_SIZE;
                let image = PvImage::open_prealloc(&path, len)
                    .with_context(|| format!("sim: cannot open PV image {}", path.display()))?;
                images.insert(name, image);
            }
        }

        let backend = Self {
            extent_size: vg.extent_size,
            images,
            active: BTreeSet::new(),
            recalculating: BTreeSet::new(),
            mismatches: BTreeMap::new(),
            history: Vec::new(),
            faults: Faults::default(),
            calls: Calls::default(),
        };
        Ok((vg, backend))
    }

    /// `committed` returns the last durably committed volume group, if any.
    #[must_use]
    pub fn committed(&self) -> Option<&VolumeGroup> {
        self.history.last()
    }

    #[must_use]
    pub fn history(&self) -> &[VolumeGroup] {
        &self.history
    }

    /// `recalculation_started` reports whether `lv` was activated with its recalculate flag set.
    #[must_use]
    pub fn recalculation_started(&self, lv: LvId) -> bool {
        self.recalculating.contains(&lv)
    }

    pub fn set_mismatches(&mut self, lv: LvId, count: u64) {
        self.mismatches.insert(lv, count);
    }

    #[must_use]
    pub fn pv_image(&self, pv: &str) -> Option<&PvImage> {
        self.images.get(pv)
    }

    pub fn pv_image_mut(&mut self, pv: &str) -> Option<&mut PvImage> {
        self.images.get_mut(pv)
    }

    /// `create_linear` allocates a visible linear volume.
    ///
    /// # Errors
    /// Returns an error if the name is taken or the PVs lack free extents.
    pub fn create_linear(
        &mut self,
        vg: &mut VolumeGroup,
        name: &str,
        extents: u32,
        pvs: &[String],
    ) -> anyhow::Result<LvId> {
        let segments = allocator::allocate(vg, extents, pvs)?;
        Ok(vg.create_lv(name, segments, LvStatus::READ | LvStatus::WRITE)?)
    }

    /// `create_raid` builds a RAID volume whose images hold `data_extents` of usable data
    /// between them. Image `i` is placed on PV `i` modulo the PV count.
    ///
    /// # Errors
    /// Returns an error if the geometry is invalid or allocation fails.
    pub fn create_raid(
        &mut self,
        vg: &mut VolumeGroup,
        name: &str,
        level: RaidLevel,
        image_count: usize,
        data_extents: u32,
    ) -> anyhow::Result<LvId> {
        if image_count < level.min_images() {
            bail!("{level} needs at least {} images", level.min_images());
        }
        let data_images = u32::try_from(level.data_images(image_count))?;
        let image_extents = data_extents.div_ceil(data_images);
        let pv_names: Vec<String> = vg.pvs.iter().map(|pv| pv.name.clone()).collect();
        if pv_names.is_empty() {
            bail!("volume group {} has no physical volumes", vg.name);
        }

        let mut images = Vec::with_capacity(image_count);
        for i in 0..image_count {
            let pv = pv_names[i % pv_names.len()].clone();
            let segments = allocator::allocate(vg, image_extents, &[pv])?;
            let image = vg.create_lv(
                &format!("{name}_rimage_{i}"),
                segments,
                LvStatus::READ | LvStatus::WRITE | LvStatus::RAID_IMAGE,
            )?;
            vg.lv_mut(image)?.visible = false;
            images.push(image);
        }

        let len = u64::from(image_extents) * u64::from(data_images) * vg.extent_size;
        let top = vg.create_lv(
            name,
            vec![Segment {
                len,
                kind: SegmentKind::Raid(RaidSegment { level, images }),
            }],
            LvStatus::READ | LvStatus::WRITE | LvStatus::RAID,
        )?;
        info!(lv = name, %level, image_count, image_extents, "sim: created raid volume");
        Ok(top)
    }

    /// `grow_raid` extends every image of a RAID volume by `image_extents`, growing the
    /// hidden integrity origin instead of the image where one is spliced in.
    ///
    /// # Errors
    /// Returns an error if `lv` is not a RAID volume or allocation fails.
    pub fn grow_raid(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        image_extents: u32,
    ) -> anyhow::Result<()> {
        let raid = vg
            .lv(lv)?
            .raid_segment()
            .cloned()
            .ok_or_else(|| anyhow!("sim: {} is not a raid volume", vg.name_of(lv)))?;

        let mut image_len = 0;
        for &image in &raid.images {
            let holder = vg
                .lv(image)?
                .integrity_segment()
                .and_then(|seg| seg.origin)
                .unwrap_or(image);
            let pvs = vg.pvs_of(holder)?;
            self.extend_lv(vg, holder, image_extents, &pvs)?;

            if holder != image {
                let grown = vg.lv(holder)?.size;
                let image_lv = vg.lv_mut(image)?;
                image_lv.size = grown;
                if let Some(first) = image_lv.segments.first_mut() {
                    first.len = grown;
                    if let SegmentKind::Integrity(seg) = &mut first.kind {
                        seg.data_sectors = grown;
                    }
                }
            }
            image_len = vg.lv(image)?.size;
        }

        let data_images = raid.level.data_images(raid.images.len()) as u64;
        let top = vg.lv_mut(lv)?;
        top.size = image_len * data_images;
        if let Some(first) = top.segments.first_mut() {
            first.len = top.size;
        }
        Ok(())
    }

    fn subtree(vg: &VolumeGroup, lv: LvId, out: &mut Vec<LvId>) {
        out.push(lv);
        if let Ok(volume) = vg.lv(lv) {
            for seg in &volume.segments {
                for (child, _) in seg.children() {
                    Self::subtree(vg, child, out);
                }
            }
        }
    }

    fn activate_tree(&mut self, vg: &VolumeGroup, lv: LvId) {
        let mut tree = Vec::new();
        Self::subtree(vg, lv, &mut tree);
        for id in tree {
            self.active.insert(id);
            let recalculate = vg
                .lv(id)
                .ok()
                .and_then(|v| v.integrity_segment())
                .is_some_and(|seg| seg.recalculate);
            if recalculate && self.recalculating.insert(id) {
                debug!(lv = %vg.name_of(id), "sim: integrity recalculation started");
            }
        }
    }

    fn first_pv_area(vg: &VolumeGroup, lv: LvId) -> Option<(String, u32, u32)> {
        let volume = vg.lv(lv).ok()?;
        let seg = volume.segments.first()?;
        match &seg.kind {
            SegmentKind::Striped(StripedSegment { areas }) => match areas.first()? {
                Area::Pv {
                    pv,
                    pe_start,
                    extents,
                } => Some((pv.clone(), *pe_start, *extents)),
                Area::Lv { lv, .. } => Self::first_pv_area(vg, *lv),
            },
            _ => seg
                .children()
                .first()
                .and_then(|(child, _)| Self::first_pv_area(vg, *child)),
        }
    }

    fn check_named(
        set: &BTreeSet<String>,
        vg: &VolumeGroup,
        lv: LvId,
        what: &str,
    ) -> anyhow::Result<()> {
        let name = vg.name_of(lv);
        if set.contains(&name) {
            bail!("sim: injected {what} failure for {name}");
        }
        Ok(())
    }
}

impl Backend for SimBackend {
    fn commit(&mut self, vg: &mut VolumeGroup) -> anyhow::Result<()> {
        self.calls.commits += 1;
        if self.faults.fail_commit_at.contains(&self.calls.commits) {
            bail!("sim: injected commit failure #{}", self.calls.commits);
        }
        vg.seqno += 1;
        self.history.push(vg.clone());
        info!(vg = %vg.name, seqno = vg.seqno, "sim: committed metadata");
        Ok(())
    }

    fn reload(&mut self, vg: &mut VolumeGroup, lv: LvId) -> anyhow::Result<()> {
        self.calls.reloads += 1;
        if !self.active.contains(&lv) {
            bail!("sim: cannot reload inactive volume {}", vg.name_of(lv));
        }
        if self.faults.fail_reload {
            bail!("sim: injected reload failure for {}", vg.name_of(lv));
        }
        self.commit(vg)?;
        self.activate_tree(vg, lv);
        Ok(())
    }

    fn is_active(&self, _vg: &VolumeGroup, lv: LvId) -> bool {
        self.active.contains(&lv)
    }

    fn activate(&mut self, vg: &VolumeGroup, lv: LvId) -> anyhow::Result<()> {
        vg.lv(lv)?;
        Self::check_named(&self.faults.fail_activate, vg, lv, "activate")?;
        self.activate_tree(vg, lv);
        Ok(())
    }

    fn deactivate(&mut self, vg: &VolumeGroup, lv: LvId) -> anyhow::Result<()> {
        Self::check_named(&self.faults.fail_deactivate, vg, lv, "deactivate")?;
        let mut tree = Vec::new();
        Self::subtree(vg, lv, &mut tree);
        for id in tree {
            self.active.remove(&id);
        }
        Ok(())
    }

    fn allocate_lv(
        &mut self,
        vg: &mut VolumeGroup,
        name: &str,
        extents: u32,
        pvs: &[String],
    ) -> anyhow::Result<LvId> {
        self.calls.allocations += 1;
        if self.faults.fail_allocation_at.contains(&self.calls.allocations) {
            bail!("sim: injected allocation failure for {name}");
        }
        let segments = allocator::allocate(vg, extents, pvs)?;
        let id = vg.create_lv(name, segments, LvStatus::READ | LvStatus::WRITE)?;
        debug!(lv = name, extents, pvs = ?pvs, "sim: allocated volume");
        Ok(id)
    }

    fn extend_lv(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        extents: u32,
        pvs: &[String],
    ) -> anyhow::Result<()> {
        self.calls.extends += 1;
        if self.faults.fail_extend {
            bail!("sim: injected extend failure for {}", vg.name_of(lv));
        }
        let mut segments = vg.lv(lv)?.segments.clone();
        segments.extend(allocator::allocate(vg, extents, pvs)?);
        vg.replace_segments(lv, segments)?;
        Ok(())
    }

    fn splice_layer(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        suffix: &str,
    ) -> anyhow::Result<LvId> {
        let parent = vg.lv(lv)?;
        let name = format!("{}{suffix}", parent.name);
        let size = parent.size;
        let status = parent.status & (LvStatus::READ | LvStatus::WRITE);

        let origin = vg.create_lv(&name, Vec::new(), status)?;
        vg.lv_mut(origin)?.visible = false;

        let extents = u32::try_from(size.div_ceil(self.extent_size))?;
        let layer = Segment {
            len: size,
            kind: SegmentKind::Striped(StripedSegment {
                areas: vec![Area::Lv {
                    lv: origin,
                    extents,
                }],
            }),
        };
        let moved = vg.replace_segments(lv, vec![layer])?;
        vg.replace_segments(origin, moved)?;

        if self.active.contains(&lv) {
            self.active.insert(origin);
        }
        Ok(origin)
    }

    fn collapse_layer(
        &mut self,
        vg: &mut VolumeGroup,
        lv: LvId,
        origin: LvId,
    ) -> anyhow::Result<()> {
        if !vg.lv(origin)?.used_by().iter().any(|r| r.lv == lv) {
            bail!(
                "sim: {} is not a layer of {}",
                vg.name_of(origin),
                vg.name_of(lv)
            );
        }
        let moved = vg.replace_segments(origin, Vec::new())?;
        vg.replace_segments(lv, moved)?;
        vg.unlink(origin, lv)?;
        Ok(())
    }

    fn zero(&mut self, vg: &VolumeGroup, lv: LvId, sectors: u64) -> anyhow::Result<()> {
        Self::check_named(&self.faults.fail_zero, vg, lv, "zero")?;
        let name = vg.name_of(lv);
        if !self.active.contains(&lv) {
            bail!("sim: cannot zero inactive volume {name}");
        }

        if let Some((pv, pe_start, extents)) = Self::first_pv_area(vg, lv) {
            if let Some(image) = self.images.get_mut(&pv) {
                let offset = u64::from(pe_start) * self.extent_size * SECTOR_SIZE;
                let area_bytes = u64::from(extents) * self.extent_size * SECTOR_SIZE;
                let len = usize::try_from((sectors * SECTOR_SIZE).min(area_bytes))?;
                image.zero_range(offset, len)?;
            }
        }
        self.calls.zeroed.push((name, sectors));
        Ok(())
    }

    fn remove_lv(&mut self, vg: &mut VolumeGroup, lv: LvId) -> anyhow::Result<()> {
        Self::check_named(&self.faults.fail_remove, vg, lv, "remove")?;
        let removed = vg.take_lv(lv)?;
        self.active.remove(&lv);
        self.recalculating.remove(&lv);
        self.mismatches.remove(&lv);
        self.calls.removed.push(removed.name);
        Ok(())
    }

    fn integrity_mismatches(&self, _vg: &VolumeGroup, lv: LvId) -> anyhow::Result<u64> {
        if !self.active.contains(&lv) {
            return Ok(0);
        }
        Ok(self.mismatches.get(&lv).copied().unwrap_or(0))
    }
}
