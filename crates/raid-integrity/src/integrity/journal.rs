//! Resources created during one add operation, undone in reverse on failure.

use tracing::warn;

use crate::backend::{self, Backend};
use crate::metadata::{LvId, LvStatus, VolumeGroup};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Undo {
    /// A metadata volume allocated by this operation.
    MetadataLv(LvId),
    /// A reused metadata volume renamed from `name`, with its flags before adoption.
    Renamed {
        lv: LvId,
        name: String,
        status: LvStatus,
        visible: bool,
    },
    /// A hidden origin spliced beneath `image`.
    Layer { image: LvId, origin: LvId },
}

/// Journal accumulates undo records until the operation passes its point of no return.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<Undo>,
}

impl Journal {
    pub(crate) fn record(&mut self, undo: Undo) {
        self.entries.push(undo);
    }

    /// `created_metadata` counts metadata volumes allocated (not reused) so far.
    pub(crate) fn created_metadata(&self) -> usize {
        self.entries
            .iter()
            .filter(|u| matches!(u, Undo::MetadataLv(_)))
            .count()
    }

    /// `disarm` forgets every record; the changes are durable and no longer revertible.
    pub(crate) fn disarm(&mut self) {
        self.entries.clear();
    }

    /// `unwind` reverts the recorded changes newest first, then commits the cleanup.
    ///
    /// Every step is best effort: failures are logged for manual intervention and the
    /// remaining records are still processed.
    pub(crate) fn unwind(&mut self, vg: &mut VolumeGroup, backend: &mut dyn Backend) {
        let created = self.created_metadata();
        while let Some(undo) = self.entries.pop() {
            match undo {
                Undo::Layer { image, origin } => {
                    if let Ok(lv) = vg.lv_mut(image) {
                        lv.status.remove(LvStatus::INTEGRITY);
                    }
                    if let Err(err) = backend.collapse_layer(vg, image, origin) {
                        warn!(
                            lv = %vg.name_of(image),
                            "rollback: failed to restore segments from {}: {err:#}; manual repair required",
                            vg.name_of(origin)
                        );
                        continue;
                    }
                    remove_or_warn(vg, backend, origin);
                }
                Undo::MetadataLv(lv) => remove_or_warn(vg, backend, lv),
                Undo::Renamed {
                    lv,
                    name,
                    status,
                    visible,
                } => {
                    if let Ok(volume) = vg.lv_mut(lv) {
                        volume.status = status;
                        volume.visible = visible;
                    }
                    if let Err(err) = vg.rename_lv(lv, &name) {
                        warn!(lv = %vg.name_of(lv), "rollback: failed to restore name {name}: {err}");
                    }
                }
            }
        }

        if let Err(err) = backend::commit(vg, backend) {
            warn!(
                vg = %vg.name,
                created,
                "rollback: {err}; new integrity metadata volumes may require manual removal"
            );
        }
    }
}

fn remove_or_warn(vg: &mut VolumeGroup, backend: &mut dyn Backend, lv: LvId) {
    let name = vg.name_of(lv);
    if let Err(err) = backend.remove_lv(vg, lv) {
        warn!(lv = %name, "rollback: {err:#}; volume may require manual removal");
    }
}
