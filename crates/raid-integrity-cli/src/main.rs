mod cli;

use anyhow::{Context, bail};
use clap::Parser;
use raid_integrity::integrity::{
    self, AddReport, activate_integrity, extend_integrity, get_integrity_settings,
    remove_integrity,
};
use raid_integrity::metadata::{LvId, SECTOR_SIZE, VolumeGroup};
use raid_integrity::sim::{SimBackend, SimConfig};
use raid_integrity::Backend;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{AddArgs, Cli, Command, VgArgs, VolumeArgs};

const MIB: u64 = 1024 * 1024;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let (mut vg, mut backend) = build_vg(&cli.vg)?;

    match cli.command {
        Command::Add(args) => {
            let lv = add(&mut vg, &mut backend, &args)?;
            print_tree(&vg, &backend, lv);
        }
        Command::Cycle(args) => {
            let lv = add(&mut vg, &mut backend, &args)?;
            print_tree(&vg, &backend, lv);

            let report = remove_integrity(&mut vg, &mut backend, lv)
                .with_context(|| format!("removing integrity from {}", args.volume.name))?;
            println!(
                "removed {} volume(s): {}",
                report.removed.len(),
                report.removed.join(", ")
            );
            if !report.leftover.is_empty() {
                println!("needs manual removal: {}", report.leftover.join(", "));
            }
            print_tree(&vg, &backend, lv);
        }
        Command::Grow(args) => {
            if args.add.volume.linear {
                bail!("grow works on RAID volumes only");
            }
            let lv = add(&mut vg, &mut backend, &args.add)?;
            let grow_bytes = mib_to_bytes(args.grow_mib).context("grow size out of range")?;
            let image_extents = u32::try_from(grow_bytes / extent_bytes(&vg))
                .context("grow size out of range")?;
            backend
                .grow_raid(&mut vg, lv, image_extents)
                .with_context(|| format!("growing {}", args.add.volume.name))?;

            let added = extend_integrity(&mut vg, &mut backend, lv)
                .with_context(|| format!("extending integrity of {}", args.add.volume.name))?;
            backend.commit(&mut vg).context("committing grown volume")?;
            println!("extended integrity metadata by {added} extent(s)");
            print_tree(&vg, &backend, lv);
        }
    }

    info!(seqno = vg.seqno, commits = backend.calls.commits, "exit");
    Ok(())
}

fn build_vg(args: &VgArgs) -> anyhow::Result<(VolumeGroup, SimBackend)> {
    if args.extent_kib == 0 {
        bail!("extent size must be positive");
    }
    let pv_kib = args
        .pv_size_mib
        .checked_mul(1024)
        .context("PV size out of range")?;
    let pv_extents = u32::try_from(pv_kib / args.extent_kib).context("PV size out of range")?;
    if args.pvs == 0 || pv_extents == 0 {
        bail!("the volume group needs at least one non-empty PV");
    }
    if let Some(dir) = &args.pv_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating PV directory {}", dir.display()))?;
    }

    let extent_size = args
        .extent_kib
        .checked_mul(1024)
        .context("extent size out of range")?
        / SECTOR_SIZE;
    let config = SimConfig {
        extent_size,
        pv_count: args.pvs,
        pv_extents,
        pv_dir: args.pv_dir.clone(),
        ..SimConfig::default()
    };
    info!(pvs = args.pvs, pv_extents, extent_kib = args.extent_kib, "building volume group");
    SimBackend::build(&config).context("building simulated volume group")
}

fn create_volume(
    vg: &mut VolumeGroup,
    backend: &mut SimBackend,
    args: &VolumeArgs,
) -> anyhow::Result<LvId> {
    let bytes = mib_to_bytes(args.size_mib).context("volume size out of range")?;
    let extents = u32::try_from(bytes.div_ceil(extent_bytes(vg)))
        .context("volume size out of range")?;
    let lv = if args.linear {
        let pvs = vec![vg.pvs.first().map(|pv| pv.name.clone()).context("no PVs")?];
        backend.create_linear(vg, &args.name, extents, &pvs)?
    } else {
        backend.create_raid(vg, &args.name, args.level, args.images, extents)?
    };
    if args.active {
        activate_integrity(vg, backend, lv)?;
    }
    Ok(lv)
}

fn add(vg: &mut VolumeGroup, backend: &mut SimBackend, args: &AddArgs) -> anyhow::Result<LvId> {
    let lv = create_volume(vg, backend, &args.volume)
        .with_context(|| format!("creating {}", args.volume.name))?;

    let report: AddReport = integrity::add_integrity(
        vg,
        backend,
        lv,
        &args.settings(),
        &args.pv_candidates,
        None,
    )
    .with_context(|| format!("adding integrity to {}", args.volume.name))?;

    println!(
        "added integrity to {} image(s), {} new metadata volume(s)",
        report.installed.len(),
        report.created
    );
    if !report.recalculation_cleared {
        println!("recalculate flags are still set; they clear on next activation");
    }
    if let Some(settings) = get_integrity_settings(vg, lv) {
        println!(
            "settings: mode={} tag_size={} block_size={} hash={}",
            settings.mode().as_char(),
            settings.tag_size(),
            settings.block_size(),
            settings.internal_hash.as_deref().unwrap_or_default()
        );
    }
    Ok(lv)
}

fn mib_to_bytes(mib: u64) -> Option<u64> {
    mib.checked_mul(MIB)
}

fn extent_bytes(vg: &VolumeGroup) -> u64 {
    vg.extent_size * SECTOR_SIZE
}

fn print_tree(vg: &VolumeGroup, backend: &SimBackend, lv: LvId) {
    print_node(vg, backend, lv, 0);
}

fn print_node(vg: &VolumeGroup, backend: &SimBackend, lv: LvId, depth: usize) {
    let Ok(volume) = vg.lv(lv) else {
        return;
    };
    let pvs = vg.pvs_of(lv).map(|p| p.join(",")).unwrap_or_default();
    println!(
        "{:indent$}{} [{}] {}MiB{}{} pvs={}",
        "",
        volume.name,
        volume.segtype(),
        volume.size * SECTOR_SIZE / MIB,
        if volume.visible { "" } else { " hidden" },
        if backend.is_active(vg, lv) { " active" } else { "" },
        pvs,
        indent = depth * 2
    );
    for seg in &volume.segments {
        for (child, _) in seg.children() {
            print_node(vg, backend, child, depth + 1);
        }
    }
}
