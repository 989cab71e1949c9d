//! Adds, removes and resizes integrity layers on the images of RAID volumes.
//!
//! Each image of the array gets its own layer:
//!
//! ```text
//! lv (raid5)
//!  ├─ lv_rimage_0 (integrity) ── lv_rimage_0_iorig (striped, hidden)
//!  │                          └─ lv_rimage_0_imeta (striped, hidden)
//!  ├─ lv_rimage_1 (integrity) ── ...
//! ```
//!
//! A linear volume (single striped segment) is treated as an array with one image: the
//! volume itself.

mod factory;
mod installer;
mod journal;
mod recalc;
mod remover;
mod resizer;
#[cfg(test)]
mod integrity_tests;
#[cfg(test)]
mod resizer_tests;

use tracing::{info, warn};

pub use recalc::{activate_integrity, clear_recalculation, has_pending_recalculation};

use crate::backend::{self, Backend};
use crate::error::{IntegrityError, Result};
use crate::metadata::{IntegritySettings, LvId, SegmentKind, UseRole, VolumeGroup};
use journal::Journal;

/// Outcome of a successful [`add_integrity`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddReport {
    /// Images that received a new integrity layer, in array order.
    pub installed: Vec<LvId>,
    /// Metadata volumes of the new layers, including a reused one.
    pub metadata: Vec<LvId>,
    /// Metadata volumes allocated by this call.
    pub created: usize,
    /// False when the final commit clearing the recalculate flags failed. The layers are
    /// durable; the next [`activate_integrity`] clears the stale flags.
    pub recalculation_cleared: bool,
}

/// Outcome of a successful [`remove_integrity`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoveReport {
    /// Images whose integrity layer was removed.
    pub detached: Vec<LvId>,
    /// Names of the origin and metadata volumes deleted.
    pub removed: Vec<String>,
    /// Names of volumes that could not be deleted and need manual removal.
    pub leftover: Vec<String>,
}

/// `add_integrity` puts an integrity layer beneath every image of `lv`.
///
/// The volume must be a top-level volume with a single RAID segment of a level that
/// supports integrity, or a single striped segment. Images that already carry a layer
/// are left alone.
///
/// # Arguments
/// * `settings` - Integrity options; unset fields take the defaults.
/// * `pvs` - Allocation candidates for new metadata volumes; each image's own PVs when empty.
/// * `reuse_metadata` - Existing metadata volume adopted by image 0 instead of allocating one.
///
/// # Errors
/// Precondition errors are returned before anything is changed. Errors during the
/// transformation are returned after a best-effort rollback of this call's changes.
pub fn add_integrity(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    lv: LvId,
    settings: &IntegritySettings,
    pvs: &[String],
    reuse_metadata: Option<LvId>,
) -> Result<AddReport> {
    let settings = settings.with_defaults();
    settings.validate()?;
    let images = images_for_add(vg, lv)?;
    check_images_for_add(vg, &images, &settings)?;
    if let Some(meta) = reuse_metadata {
        let meta_lv = vg.lv(meta)?;
        if meta_lv.is_used() {
            return Err(IntegrityError::AlreadyReferenced {
                lv: meta_lv.name.clone(),
            });
        }
    }

    let name = vg.name_of(lv);
    let was_active = backend.is_active(vg, lv);
    info!(lv = %name, images = images.len(), active = was_active, "add_integrity: start");

    let mut journal = Journal::default();
    let mut installed = Vec::new();
    let mut metadata = Vec::new();
    for (index, &image) in images.iter().enumerate() {
        let reuse = if index == 0 { reuse_metadata } else { None };
        match installer::install(vg, backend, image, &settings, pvs, reuse, &mut journal) {
            Ok(Some(meta)) => {
                installed.push(image);
                metadata.push(meta);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(lv = %name, "add_integrity: {err}; rolling back");
                journal.unwind(vg, backend);
                return Err(err);
            }
        }
    }

    if installed.is_empty() {
        info!(lv = %name, "add_integrity: every image already has integrity");
        return Ok(AddReport {
            installed,
            metadata,
            created: 0,
            recalculation_cleared: !has_pending_recalculation(vg, lv),
        });
    }

    let checkpoint = if was_active {
        info!(lv = %name, "add_integrity: reloading active volume");
        backend
            .reload(vg, lv)
            .map_err(|source| IntegrityError::Reload {
                lv: name.clone(),
                source,
            })
    } else {
        backend::commit(vg, backend).and_then(|()| {
            info!(lv = %name, "add_integrity: activating to start integrity initialization");
            backend
                .activate(vg, lv)
                .map_err(|source| IntegrityError::Activation {
                    lv: name.clone(),
                    source,
                })
        })
    };
    if let Err(err) = checkpoint {
        warn!(lv = %name, "add_integrity: {err}; rolling back");
        journal.unwind(vg, backend);
        return Err(err);
    }

    let created = journal.created_metadata();
    journal.disarm();

    let recalculation_cleared = match clear_recalculation(vg, backend, lv) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                lv = %name,
                "add_integrity: {err}; recalculate flags stay set until the next activation"
            );
            false
        }
    };

    info!(lv = %name, installed = installed.len(), "add_integrity: done");
    Ok(AddReport {
        installed,
        metadata,
        created,
        recalculation_cleared,
    })
}

/// `remove_integrity` takes the integrity layer off every image of `lv` and deletes the
/// origin and metadata volumes.
///
/// # Errors
/// Returns an error if the volume carries no integrity, a layer is inconsistent, the
/// reload fails or the final commit fails. Failures deleting the leftover volumes are
/// reported in [`RemoveReport::leftover`] instead.
pub fn remove_integrity(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    lv: LvId,
) -> Result<RemoveReport> {
    let images = integrity_images(vg, lv)?;
    let mut targets = Vec::new();
    for image in images {
        match remover::layer_of(vg, image) {
            Ok(_) => targets.push(image),
            Err(IntegrityError::NoIntegrity { .. }) => {}
            Err(err) => return Err(err),
        }
    }
    let name = vg.name_of(lv);
    if targets.is_empty() {
        return Err(IntegrityError::NoIntegrity { lv: name });
    }

    let was_active = backend.is_active(vg, lv);
    info!(lv = %name, images = targets.len(), active = was_active, "remove_integrity: start");

    let mut origins = Vec::with_capacity(targets.len());
    let mut metas = Vec::with_capacity(targets.len());
    for &image in &targets {
        let detached = remover::detach(vg, backend, image)?;
        origins.push(detached.origin);
        metas.push(detached.metadata);
    }

    if was_active {
        backend
            .reload(vg, lv)
            .map_err(|source| IntegrityError::Reload {
                lv: name.clone(),
                source,
            })?;
        for &id in origins.iter().chain(&metas) {
            if let Err(err) = backend.deactivate(vg, id) {
                warn!(lv = %vg.name_of(id), "remove_integrity: failed to deactivate: {err:#}");
            }
        }
    }

    let mut report = RemoveReport {
        detached: targets,
        ..RemoveReport::default()
    };
    for id in origins.into_iter().chain(metas) {
        let volume = vg.name_of(id);
        match backend.remove_lv(vg, id) {
            Ok(()) => report.removed.push(volume),
            Err(err) => {
                warn!(lv = %volume, "remove_integrity: {err:#}; volume may require manual removal");
                report.leftover.push(volume);
            }
        }
    }

    backend::commit(vg, backend)?;
    info!(lv = %name, removed = report.removed.len(), "remove_integrity: done");
    Ok(report)
}

/// `extend_integrity` grows the metadata volume of every integrity image of `lv` to match
/// the image's current size. Call it after the images have grown. Nothing is committed.
///
/// Returns the total number of extents added.
///
/// # Errors
/// Returns [`IntegrityError::Extend`] naming the first image whose metadata could not grow.
pub fn extend_integrity(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    lv: LvId,
) -> Result<u32> {
    let mut added = 0u32;
    for image in recalc::integrity_layers(vg, lv) {
        added += resizer::extend_metadata(vg, backend, image)?;
    }
    Ok(added)
}

/// `integrity_images` returns the images of `lv` that can carry integrity layers, in
/// array order.
///
/// # Errors
/// Returns [`IntegrityError::UnsupportedSegment`] for volumes that are neither RAID of a
/// supported level nor integrity volumes themselves.
pub fn integrity_images(vg: &VolumeGroup, lv: LvId) -> Result<Vec<LvId>> {
    let volume = vg.lv(lv)?;
    match volume.first_segment().map(|s| &s.kind) {
        Some(SegmentKind::Raid(raid)) if raid.level.supports_integrity() => {
            Ok(raid.images.clone())
        }
        Some(SegmentKind::Integrity(_)) => Ok(vec![lv]),
        _ => Err(IntegrityError::UnsupportedSegment {
            lv: volume.name.clone(),
            segtype: volume.segtype(),
        }),
    }
}

/// `is_integrity_origin` reports whether `lv` is the hidden origin of an integrity layer.
#[must_use]
pub fn is_integrity_origin(vg: &VolumeGroup, lv: LvId) -> bool {
    vg.lv(lv).is_ok_and(|v| {
        v.used_by()
            .iter()
            .any(|r| r.role == UseRole::IntegrityOrigin)
    })
}

/// `raid_has_integrity` reports whether any image of the RAID volume `lv` has a layer.
#[must_use]
pub fn raid_has_integrity(vg: &VolumeGroup, lv: LvId) -> bool {
    vg.lv(lv).is_ok_and(|v| v.raid_segment().is_some())
        && !recalc::integrity_layers(vg, lv).is_empty()
}

/// `get_integrity_settings` returns the settings of the first integrity layer reachable
/// from `lv`.
#[must_use]
pub fn get_integrity_settings(vg: &VolumeGroup, lv: LvId) -> Option<IntegritySettings> {
    let first = recalc::integrity_layers(vg, lv).into_iter().next()?;
    vg.lv(first)
        .ok()?
        .integrity_segment()
        .map(|seg| seg.settings.with_defaults())
}

/// `integrity_mismatches` sums the checksum mismatch counters of every layer of `lv`.
///
/// # Errors
/// Returns [`IntegrityError::Status`] if a counter cannot be read.
pub fn integrity_mismatches(
    vg: &VolumeGroup,
    backend: &dyn Backend,
    lv: LvId,
) -> Result<u64> {
    let mut total = 0u64;
    for image in recalc::integrity_layers(vg, lv) {
        let count = backend
            .integrity_mismatches(vg, image)
            .map_err(|source| IntegrityError::Status {
                lv: vg.name_of(image),
                source,
            })?;
        total = total.saturating_add(count);
    }
    Ok(total)
}

fn images_for_add(vg: &VolumeGroup, lv: LvId) -> Result<Vec<LvId>> {
    let volume = vg.lv(lv)?;
    if volume.segments.len() != 1 {
        return Err(IntegrityError::SegmentCount {
            lv: volume.name.clone(),
            count: volume.segments.len(),
        });
    }
    if volume.is_used() {
        return Err(IntegrityError::AlreadyReferenced {
            lv: volume.name.clone(),
        });
    }
    match volume.first_segment().map(|s| &s.kind) {
        Some(SegmentKind::Raid(raid)) if raid.level.supports_integrity() => {
            Ok(raid.images.clone())
        }
        Some(SegmentKind::Striped(_)) => Ok(vec![lv]),
        _ => Err(IntegrityError::UnsupportedSegment {
            lv: volume.name.clone(),
            segtype: volume.segtype(),
        }),
    }
}

fn check_images_for_add(
    vg: &VolumeGroup,
    images: &[LvId],
    settings: &IntegritySettings,
) -> Result<()> {
    let block_sectors = settings.block_sectors();
    for &image in images {
        let lv = vg.lv(image)?;
        if lv.integrity_segment().is_some() {
            remover::layer_of(vg, image)?;
            continue;
        }
        if !lv.is_striped() {
            return Err(IntegrityError::NotStriped {
                lv: lv.name.clone(),
                segtype: lv.segtype(),
            });
        }
        if lv.size % block_sectors != 0 {
            return Err(IntegrityError::InvalidSettings(format!(
                "{} size {} sectors is not a multiple of the {} byte block size",
                lv.name,
                lv.size,
                settings.block_size()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::metadata::{LvId, RaidLevel, VolumeGroup};
    use crate::sim::{SimBackend, SimConfig};

    /// `EXTENT_MIB` is the extent size of the default simulated group.
    pub const EXTENT_MIB: u64 = 4;

    /// `sim` builds the default group: four 16GiB PVs with 4MiB extents.
    pub fn sim() -> (VolumeGroup, SimBackend) {
        SimBackend::build(&SimConfig::default()).expect("build sim")
    }

    /// `raid5_10g` builds a 3-image raid5 volume `lv0` with 10GiB usable, 5GiB per image.
    pub fn raid5_10g() -> (VolumeGroup, SimBackend, LvId) {
        let (mut vg, mut backend) = sim();
        let lv = backend
            .create_raid(&mut vg, "lv0", RaidLevel::Raid5, 3, 2560)
            .expect("create raid5");
        (vg, backend, lv)
    }

    /// `images` returns the image ids of a RAID volume.
    pub fn images(vg: &VolumeGroup, lv: LvId) -> Vec<LvId> {
        vg.lv(lv)
            .expect("lv")
            .raid_segment()
            .expect("raid segment")
            .images
            .clone()
    }

    /// `names_with` lists volume names containing `pattern`, sorted.
    pub fn names_with(vg: &VolumeGroup, pattern: &str) -> Vec<String> {
        let mut names: Vec<String> = vg
            .lvs()
            .filter(|lv| lv.name.contains(pattern))
            .map(|lv| lv.name.clone())
            .collect();
        names.sort();
        names
    }
}
