use super::test_utils::{images, names_with, raid5_10g, sim};
use super::*;
use crate::backend::Backend;
use crate::metadata::{
    IntegrityMode, LvStatus, RaidLevel, Segment, SegmentKind, StripedSegment, VolumeGroup,
};
use crate::sim::{SimBackend, SimConfig};

fn segments_of(vg: &VolumeGroup, ids: &[LvId]) -> Vec<Vec<Segment>> {
    ids.iter()
        .map(|&id| vg.lv(id).expect("lv").segments.clone())
        .collect()
}

fn integrity_count(vg: &VolumeGroup) -> usize {
    vg.lvs()
        .filter(|lv| lv.integrity_segment().is_some())
        .count()
}

#[test]
fn add_to_raid5_builds_one_layer_per_image() {
    let (mut vg, mut backend, lv) = raid5_10g();

    let report = add_integrity(
        &mut vg,
        &mut backend,
        lv,
        &IntegritySettings::default(),
        &[],
        None,
    )
    .expect("add integrity");

    assert_eq!(report.installed, images(&vg, lv));
    assert_eq!(report.created, 3);
    assert!(report.recalculation_cleared);

    for (i, &image) in images(&vg, lv).iter().enumerate() {
        let image_lv = vg.lv(image).unwrap();
        assert!(image_lv.status.contains(LvStatus::INTEGRITY));
        let seg = image_lv.integrity_segment().expect("integrity segment");
        assert_eq!(seg.data_sectors, 5 * 1024 * 1024 * 2);
        assert_eq!(seg.settings.mode(), IntegrityMode::Journal);
        assert_eq!(seg.settings.mode().as_char(), 'J');
        assert_eq!(seg.settings.tag_size(), 4);
        assert_eq!(seg.settings.block_size(), 512);
        assert_eq!(seg.settings.internal_hash(), "crc32c");
        assert!(!seg.recalculate);

        let meta = vg.lv(seg.metadata.unwrap()).unwrap();
        assert_eq!(meta.name, format!("lv0_rimage_{i}_imeta"));
        assert_eq!(meta.size * 512, 44 * 1024 * 1024);
        assert!(!meta.visible);
        assert!(meta.status.contains(LvStatus::INTEGRITY_METADATA));

        let origin = seg.origin.unwrap();
        assert_eq!(vg.lv(origin).unwrap().name, format!("lv0_rimage_{i}_iorig"));
        assert!(!vg.lv(origin).unwrap().visible);
        assert!(is_integrity_origin(&vg, origin));
        assert!(!is_integrity_origin(&vg, image));
        assert_eq!(vg.pvs_of(meta.id).unwrap(), vg.pvs_of(origin).unwrap());

        assert!(backend.recalculation_started(image));
    }

    assert!(raid_has_integrity(&vg, lv));
    assert!(backend.is_active(&vg, lv));
    assert_eq!(backend.calls.zeroed.len(), 3);
    assert!(backend.calls.zeroed.iter().all(|(_, sectors)| *sectors == 8));
    assert_eq!(
        get_integrity_settings(&vg, lv),
        Some(IntegritySettings::default().with_defaults())
    );
}

#[test]
fn add_then_remove_restores_original_topology() {
    let (mut vg, mut backend, lv) = raid5_10g();
    let image_ids = images(&vg, lv);
    let before = segments_of(&vg, &image_ids);
    let volumes_before = vg.lvs().count();

    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    assert_eq!(vg.lvs().count(), volumes_before + 6);

    let report = remove_integrity(&mut vg, &mut backend, lv).expect("remove integrity");

    assert_eq!(report.detached, image_ids);
    assert_eq!(report.removed.len(), 6);
    assert!(report.leftover.is_empty());
    assert_eq!(images(&vg, lv).len(), 3);
    assert_eq!(integrity_count(&vg), 0);
    assert!(names_with(&vg, "_imeta").is_empty());
    assert!(names_with(&vg, "_iorig").is_empty());
    assert_eq!(vg.lvs().count(), volumes_before);
    assert_eq!(segments_of(&vg, &image_ids), before);
    assert!(!raid_has_integrity(&vg, lv));
    assert!(get_integrity_settings(&vg, lv).is_none());
    for &image in &image_ids {
        assert!(!vg.lv(image).unwrap().status.contains(LvStatus::INTEGRITY));
    }

    let durable = backend.committed().expect("committed");
    assert_eq!(durable.seqno, vg.seqno);
    assert!(names_with(durable, "_imeta").is_empty());
}

#[test]
fn add_twice_is_a_no_op_for_protected_images() {
    let (mut vg, mut backend, lv) = raid5_10g();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("first add");
    let allocations = backend.calls.allocations;
    let commits = backend.calls.commits;
    let snapshot = segments_of(&vg, &images(&vg, lv));

    let report = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("second add");

    assert!(report.installed.is_empty());
    assert_eq!(report.created, 0);
    assert!(report.recalculation_cleared);
    assert_eq!(backend.calls.allocations, allocations);
    assert_eq!(backend.calls.commits, commits);
    assert_eq!(backend.calls.reloads, 0);
    assert_eq!(segments_of(&vg, &images(&vg, lv)), snapshot);
}

#[test]
fn add_rejects_bad_targets_without_side_effects() {
    let (mut vg, mut backend) = sim();
    let raid0 = backend
        .create_raid(&mut vg, "stripe", RaidLevel::Raid0, 2, 64)
        .unwrap();
    let raid1 = backend
        .create_raid(&mut vg, "mirror", RaidLevel::Raid1, 2, 64)
        .unwrap();
    let image = images(&vg, raid1)[0];
    let pv = vec![String::from("pv3")];
    let split = backend.create_linear(&mut vg, "split", 16, &pv).unwrap();
    backend.extend_lv(&mut vg, split, 16, &[String::from("pv2")]).unwrap();
    let volumes = vg.lvs().count();
    let commits = backend.calls.commits;

    let settings = IntegritySettings::default();
    let err = add_integrity(&mut vg, &mut backend, raid0, &settings, &[], None).unwrap_err();
    assert!(matches!(err, IntegrityError::UnsupportedSegment { .. }));
    assert!(err.is_precondition());

    let err = add_integrity(&mut vg, &mut backend, image, &settings, &[], None).unwrap_err();
    assert!(matches!(err, IntegrityError::AlreadyReferenced { .. }));

    let err = add_integrity(&mut vg, &mut backend, split, &settings, &[], None).unwrap_err();
    assert!(matches!(err, IntegrityError::SegmentCount { count: 2, .. }));

    let bad = IntegritySettings {
        block_size: Some(768),
        ..IntegritySettings::default()
    };
    let err = add_integrity(&mut vg, &mut backend, raid1, &bad, &[], None).unwrap_err();
    assert!(matches!(err, IntegrityError::InvalidSettings(_)));

    assert_eq!(vg.lvs().count(), volumes);
    assert_eq!(backend.calls.commits, commits);
    assert_eq!(backend.calls.allocations, 0);
}

#[test]
fn add_rejects_images_unaligned_to_block_size() {
    let config = SimConfig {
        extent_size: 1,
        pv_extents: 100_000,
        ..SimConfig::default()
    };
    let (mut vg, mut backend) = SimBackend::build(&config).unwrap();
    let lv = backend
        .create_linear(&mut vg, "odd", 1001, &[String::from("pv0")])
        .unwrap();
    let settings = IntegritySettings {
        block_size: Some(4096),
        ..IntegritySettings::default()
    };

    let err = add_integrity(&mut vg, &mut backend, lv, &settings, &[], None).unwrap_err();
    assert!(matches!(err, IntegrityError::InvalidSettings(_)));
    assert!(vg.lv(lv).unwrap().is_striped());
}

#[test]
fn failed_allocation_rolls_back_earlier_images() {
    let (mut vg, mut backend, lv) = raid5_10g();
    let image_ids = images(&vg, lv);
    let before = segments_of(&vg, &image_ids);
    backend.faults.fail_allocation_at.insert(3);

    let err = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .unwrap_err();

    assert!(matches!(err, IntegrityError::Allocation { ref lv, .. } if lv == "lv0_rimage_2_imeta"));
    let removed_meta: Vec<&String> = backend
        .calls
        .removed
        .iter()
        .filter(|name| name.ends_with("_imeta"))
        .collect();
    assert_eq!(removed_meta, vec!["lv0_rimage_1_imeta", "lv0_rimage_0_imeta"]);
    assert_eq!(integrity_count(&vg), 0);
    assert_eq!(segments_of(&vg, &image_ids), before);
    assert!(names_with(&vg, "_imeta").is_empty());
    assert!(names_with(&vg, "_iorig").is_empty());

    let durable = backend.committed().expect("rollback commit");
    assert_eq!(integrity_count(durable), 0);
}

#[test]
fn failed_checkpoint_commit_rolls_back_every_image() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend.faults.fail_commit_at.insert(1);

    let err = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .unwrap_err();

    assert!(matches!(err, IntegrityError::Commit { .. }));
    assert_eq!(
        backend
            .calls
            .removed
            .iter()
            .filter(|name| name.ends_with("_imeta"))
            .count(),
        3
    );
    assert_eq!(integrity_count(&vg), 0);
    assert!(!backend.is_active(&vg, lv));
    assert_eq!(backend.calls.commits, 2);
    assert_eq!(integrity_count(backend.committed().unwrap()), 0);
}

#[test]
fn failed_zeroing_removes_the_unzeroed_metadata() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend
        .faults
        .fail_zero
        .insert(String::from("lv0_rimage_1_imeta"));

    let err = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .unwrap_err();

    assert!(matches!(err, IntegrityError::Activation { .. }));
    assert!(backend.calls.removed.contains(&String::from("lv0_rimage_1_imeta")));
    assert!(backend.calls.removed.contains(&String::from("lv0_rimage_0_imeta")));
    assert!(names_with(&vg, "_imeta").is_empty());
    assert_eq!(integrity_count(&vg), 0);
}

#[test]
fn add_to_active_volume_reloads_once() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend.activate(&vg, lv).unwrap();

    let report = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");

    assert!(report.recalculation_cleared);
    assert_eq!(backend.calls.reloads, 1);
    assert_eq!(backend.calls.commits, 2);
    for image in images(&vg, lv) {
        assert!(backend.recalculation_started(image));
    }
    assert!(!has_pending_recalculation(&vg, lv));
}

#[test]
fn failed_reload_rolls_back() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend.activate(&vg, lv).unwrap();
    backend.faults.fail_reload = true;

    let err = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .unwrap_err();

    assert!(matches!(err, IntegrityError::Reload { .. }));
    assert_eq!(integrity_count(&vg), 0);
    assert!(names_with(&vg, "_imeta").is_empty());
}

#[test]
fn failed_final_commit_leaves_durable_flags_for_repair() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend.faults.fail_commit_at.insert(2);

    let report = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("layers are durable");

    assert!(!report.recalculation_cleared);
    assert_eq!(report.created, 3);
    assert_eq!(names_with(&vg, "_imeta").len(), 3);
    assert!(!has_pending_recalculation(&vg, lv));

    let mut durable = backend.committed().expect("checkpoint commit").clone();
    assert!(has_pending_recalculation(&durable, lv));

    activate_integrity(&mut durable, &mut backend, lv).expect("repair on activation");
    assert!(!has_pending_recalculation(&durable, lv));
    assert!(!has_pending_recalculation(backend.committed().unwrap(), lv));
}

#[test]
fn reused_metadata_is_adopted_by_image_zero() {
    let (mut vg, mut backend) = sim();
    let raid = backend
        .create_raid(&mut vg, "lv0", RaidLevel::Raid1, 2, 256)
        .unwrap();
    let old = backend
        .create_linear(&mut vg, "lin_imeta", 3, &[String::from("pv0")])
        .unwrap();

    let report = add_integrity(
        &mut vg,
        &mut backend,
        raid,
        &IntegritySettings::default(),
        &[],
        Some(old),
    )
    .expect("add integrity");

    assert_eq!(report.created, 1);
    assert_eq!(report.metadata[0], old);
    assert_eq!(vg.lv(old).unwrap().name, "lv0_rimage_0_imeta");
    assert_eq!(backend.calls.allocations, 1);
    assert_eq!(
        backend.calls.zeroed,
        vec![(String::from("lv0_rimage_1_imeta"), 8)]
    );
}

#[test]
fn rollback_restores_name_of_reused_metadata() {
    let (mut vg, mut backend) = sim();
    let raid = backend
        .create_raid(&mut vg, "lv0", RaidLevel::Raid1, 2, 256)
        .unwrap();
    let old = backend
        .create_linear(&mut vg, "lin_imeta", 3, &[String::from("pv0")])
        .unwrap();
    backend.faults.fail_allocation_at.insert(1);

    add_integrity(
        &mut vg,
        &mut backend,
        raid,
        &IntegritySettings::default(),
        &[],
        Some(old),
    )
    .unwrap_err();

    let old_lv = vg.lv(old).expect("reused metadata is kept");
    assert_eq!(old_lv.name, "lin_imeta");
    assert!(!old_lv.is_used());
    assert!(old_lv.visible);
    assert_eq!(old_lv.status, LvStatus::READ | LvStatus::WRITE);

    let durable = backend.committed().expect("rollback commit");
    let durable_old = durable.lv(old).unwrap();
    assert!(durable_old.visible);
    assert!(!durable_old.status.contains(LvStatus::INTEGRITY_METADATA));
    assert_eq!(integrity_count(&vg), 0);
}

#[test]
fn linear_volume_is_its_own_image() {
    let (mut vg, mut backend) = sim();
    let lv = backend
        .create_linear(&mut vg, "lin", 256, &[String::from("pv1")])
        .unwrap();
    let before = vg.lv(lv).unwrap().segments.clone();

    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    assert_eq!(integrity_images(&vg, lv).unwrap(), vec![lv]);
    let meta = vg
        .lv(lv)
        .unwrap()
        .integrity_segment()
        .and_then(|seg| seg.metadata)
        .unwrap();
    assert_eq!(vg.lv(meta).unwrap().name, "lin_imeta");
    assert_eq!(vg.lv(meta).unwrap().size * 512, 12 * 1024 * 1024);
    assert!(!raid_has_integrity(&vg, lv));
    assert!(get_integrity_settings(&vg, lv).is_some());

    remove_integrity(&mut vg, &mut backend, lv).expect("remove integrity");
    assert_eq!(vg.lv(lv).unwrap().segments, before);
    assert_eq!(vg.lvs().count(), 1);
}

#[test]
fn caller_supplied_pvs_place_new_metadata() {
    let (mut vg, mut backend, lv) = raid5_10g();
    let external = vec![String::from("pv3")];

    let report = add_integrity(
        &mut vg,
        &mut backend,
        lv,
        &IntegritySettings::default(),
        &external,
        None,
    )
    .expect("add integrity");

    for meta in report.metadata {
        assert_eq!(vg.pvs_of(meta).unwrap(), external);
    }
}

#[test]
fn remove_from_active_volume_tolerates_cleanup_failures() {
    let (mut vg, mut backend, lv) = raid5_10g();
    backend.activate(&vg, lv).unwrap();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    backend
        .faults
        .fail_deactivate
        .insert(String::from("lv0_rimage_0_iorig"));
    backend
        .faults
        .fail_remove
        .insert(String::from("lv0_rimage_2_imeta"));
    let reloads = backend.calls.reloads;

    let report = remove_integrity(&mut vg, &mut backend, lv).expect("remove integrity");

    assert_eq!(backend.calls.reloads, reloads + 1);
    assert_eq!(report.removed.len(), 5);
    assert_eq!(report.leftover, vec![String::from("lv0_rimage_2_imeta")]);
    assert_eq!(integrity_count(&vg), 0);
    assert_eq!(names_with(&vg, "_imeta"), vec![String::from("lv0_rimage_2_imeta")]);
    assert!(!vg.lv(vg.find_lv("lv0_rimage_2_imeta").unwrap()).unwrap().is_used());
}

#[test]
fn remove_fails_when_final_commit_fails() {
    let (mut vg, mut backend, lv) = raid5_10g();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    let next = backend.calls.commits + 1;
    backend.faults.fail_commit_at.insert(next);

    let err = remove_integrity(&mut vg, &mut backend, lv).unwrap_err();
    assert!(matches!(err, IntegrityError::Commit { .. }));
}

#[test]
fn remove_rejects_volumes_without_layers() {
    let (mut vg, mut backend, lv) = raid5_10g();
    let err = remove_integrity(&mut vg, &mut backend, lv).unwrap_err();
    assert!(matches!(err, IntegrityError::NoIntegrity { .. }));

    let raid0 = backend
        .create_raid(&mut vg, "stripe", RaidLevel::Raid0, 2, 64)
        .unwrap();
    let err = remove_integrity(&mut vg, &mut backend, raid0).unwrap_err();
    assert!(matches!(err, IntegrityError::UnsupportedSegment { .. }));
}

#[test]
fn remove_refuses_inconsistent_layer_before_changing_anything() {
    let (mut vg, mut backend, lv) = raid5_10g();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    let image_ids = images(&vg, lv);
    let meta = vg
        .lv(image_ids[1])
        .unwrap()
        .integrity_segment()
        .and_then(|seg| seg.metadata)
        .unwrap();
    vg.unlink(meta, image_ids[1]).unwrap();
    vg.lv_mut(image_ids[1])
        .unwrap()
        .integrity_segment_mut()
        .unwrap()
        .metadata = None;

    let err = remove_integrity(&mut vg, &mut backend, lv).unwrap_err();

    assert!(matches!(err, IntegrityError::Inconsistent { missing: "metadata", .. }));
    assert!(err.to_string().starts_with("INTERNAL ERROR"));
    assert!(vg.lv(image_ids[0]).unwrap().integrity_segment().is_some());
}

#[test]
fn add_refuses_inconsistent_layer_before_changing_anything() {
    let (mut vg, mut backend, lv) = raid5_10g();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    let image_ids = images(&vg, lv);
    let meta = vg
        .lv(image_ids[1])
        .unwrap()
        .integrity_segment()
        .and_then(|seg| seg.metadata)
        .unwrap();
    vg.unlink(meta, image_ids[1]).unwrap();
    vg.lv_mut(image_ids[1])
        .unwrap()
        .integrity_segment_mut()
        .unwrap()
        .metadata = None;
    let commits = backend.calls.commits;
    let seqno = vg.seqno;

    let err = add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .unwrap_err();

    assert!(matches!(err, IntegrityError::Inconsistent { missing: "metadata", .. }));
    assert!(err.to_string().starts_with("INTERNAL ERROR"));
    assert_eq!(backend.calls.commits, commits);
    assert_eq!(backend.calls.reloads, 0);
    assert_eq!(vg.seqno, seqno);
}

#[test]
fn mismatches_are_summed_over_active_images() {
    let (mut vg, mut backend, lv) = raid5_10g();
    add_integrity(&mut vg, &mut backend, lv, &IntegritySettings::default(), &[], None)
        .expect("add integrity");
    let image_ids = images(&vg, lv);
    backend.set_mismatches(image_ids[0], 2);
    backend.set_mismatches(image_ids[2], 5);

    assert_eq!(integrity_mismatches(&vg, &backend, lv).unwrap(), 7);

    backend.deactivate(&vg, lv).unwrap();
    assert_eq!(integrity_mismatches(&vg, &backend, lv).unwrap(), 0);
}

#[test]
fn integrity_images_rejects_plain_striped_volume() {
    let (mut vg, mut backend) = sim();
    let lv = backend
        .create_linear(&mut vg, "lin", 4, &[String::from("pv0")])
        .unwrap();
    let err = integrity_images(&vg, lv).unwrap_err();
    assert!(matches!(err, IntegrityError::UnsupportedSegment { .. }));
    assert!(!is_integrity_origin(&vg, lv));
    assert!(matches!(
        vg.lv(lv).unwrap().first_segment().map(|s| &s.kind),
        Some(SegmentKind::Striped(StripedSegment { .. }))
    ));
}
