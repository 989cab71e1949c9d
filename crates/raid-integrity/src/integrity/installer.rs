use tracing::{debug, info, warn};

use super::factory;
use super::journal::{Journal, Undo};
use super::remover::layer_of;
use crate::backend::Backend;
use crate::error::{IntegrityError, Result};
use crate::metadata::{
    IntegritySegment, IntegritySettings, LvId, LvStatus, SECTOR_SIZE, Segment, SegmentKind,
    VolumeGroup,
};
use crate::sizing::required_metadata_bytes;

pub(crate) const IORIG_SUFFIX: &str = "_iorig";

/// Sectors cleared at the start of a new metadata volume.
pub(crate) const ZERO_SECTORS: u64 = 8;

/// `install` puts an integrity layer in front of `image` and returns its metadata volume,
/// or `None` if the image is already protected.
///
/// # Arguments
/// * `settings` - Integrity options with defaults already applied.
/// * `pvs` - Caller-supplied allocation candidates; the image's own PVs when empty.
/// * `reuse` - Existing metadata volume to adopt instead of allocating one.
/// * `journal` - Receives an undo record for every change made.
pub(crate) fn install(
    vg: &mut VolumeGroup,
    backend: &mut dyn Backend,
    image: LvId,
    settings: &IntegritySettings,
    pvs: &[String],
    reuse: Option<LvId>,
    journal: &mut Journal,
) -> Result<Option<LvId>> {
    let lv = vg.lv(image)?;
    if lv.integrity_segment().is_some() {
        layer_of(vg, image)?;
        debug!(lv = %lv.name, "installer: image already has integrity, skipping");
        return Ok(None);
    }
    if !lv.is_striped() {
        return Err(IntegrityError::NotStriped {
            lv: lv.name.clone(),
            segtype: lv.segtype(),
        });
    }
    let image_name = lv.name.clone();
    let data_sectors = lv.size;

    let imeta = match reuse {
        Some(meta) => {
            let reused = vg.lv(meta)?;
            let undo = Undo::Renamed {
                lv: meta,
                name: reused.name.clone(),
                status: reused.status,
                visible: reused.visible,
            };
            vg.rename_lv(meta, &factory::metadata_name(&image_name)?)?;
            journal.record(undo);
            debug!(lv = %image_name, "installer: reusing metadata volume {}", vg.name_of(meta));
            meta
        }
        None => {
            let candidates = if pvs.is_empty() {
                vg.pvs_of(image)?
            } else {
                pvs.to_vec()
            };
            let extents = vg.extents_for_bytes(required_metadata_bytes(data_sectors * SECTOR_SIZE));
            let meta = factory::create_metadata_lv(vg, backend, &image_name, extents, &candidates)?;
            journal.record(Undo::MetadataLv(meta));
            zero_metadata(vg, backend, meta)?;
            meta
        }
    };

    let origin = backend
        .splice_layer(vg, image, IORIG_SUFFIX)
        .map_err(|source| IntegrityError::Layer {
            lv: image_name.clone(),
            source,
        })?;
    journal.record(Undo::Layer { image, origin });

    let segment = Segment {
        len: data_sectors,
        kind: SegmentKind::Integrity(IntegritySegment {
            origin: Some(origin),
            metadata: Some(imeta),
            data_sectors,
            settings: settings.with_defaults(),
            recalculate: true,
        }),
    };
    vg.replace_segments(image, vec![segment])?;
    vg.lv_mut(image)?.status.insert(LvStatus::INTEGRITY);

    let meta = vg.lv_mut(imeta)?;
    meta.status.insert(LvStatus::INTEGRITY_METADATA);
    meta.visible = false;

    info!(lv = %image_name, "installer: integrity layer added");
    Ok(Some(imeta))
}

/// `zero_metadata` clears the header of a new metadata volume so the kernel formats it.
fn zero_metadata(vg: &VolumeGroup, backend: &mut dyn Backend, meta: LvId) -> Result<()> {
    let name = vg.name_of(meta);
    let activation = |source| IntegrityError::Activation {
        lv: name.clone(),
        source,
    };

    backend.activate(vg, meta).map_err(activation)?;
    if let Err(err) = backend.zero(vg, meta, ZERO_SECTORS) {
        if let Err(deactivate_err) = backend.deactivate(vg, meta) {
            warn!(
                lv = %name,
                "installer: failed to deactivate after zeroing error: {deactivate_err:#}"
            );
        }
        return Err(activation(err));
    }
    backend.deactivate(vg, meta).map_err(activation)
}
