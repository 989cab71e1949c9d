use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use raid_integrity::metadata::{IntegrityMode, IntegritySettings, RaidLevel};

#[derive(Parser)]
#[command(author, version, about = "Integrity layer scenarios on a simulated volume group")]
pub struct Cli {
    #[command(flatten)]
    pub vg: VgArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a volume and add integrity to it.
    Add(AddArgs),

    /// Add integrity, then remove it again.
    Cycle(AddArgs),

    /// Add integrity, grow every image and extend the metadata volumes.
    Grow(GrowArgs),
}

#[derive(Args, Debug, Clone)]
pub struct VgArgs {
    #[arg(long, env = "RAID_INTEGRITY_PVS", default_value_t = 4)]
    pub pvs: usize,

    #[arg(long, env = "RAID_INTEGRITY_PV_SIZE_MIB", default_value_t = 16_384)]
    pub pv_size_mib: u64,

    #[arg(long, env = "RAID_INTEGRITY_EXTENT_KIB", default_value_t = 4096)]
    pub extent_kib: u64,

    /// Back each PV with an image file in this directory.
    #[arg(long, env = "RAID_INTEGRITY_PV_DIR")]
    pub pv_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct VolumeArgs {
    #[arg(long, default_value = "lv0")]
    pub name: String,

    /// raid1, raid4, raid5, raid6 or raid10.
    #[arg(long, default_value = "raid5", conflicts_with = "linear")]
    pub level: RaidLevel,

    #[arg(long, default_value_t = 3)]
    pub images: usize,

    /// Usable size of the volume.
    #[arg(long, default_value_t = 10_240)]
    pub size_mib: u64,

    /// Create a linear volume instead of a RAID array.
    #[arg(long)]
    pub linear: bool,

    /// Activate the volume before adding integrity.
    #[arg(long)]
    pub active: bool,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[command(flatten)]
    pub volume: VolumeArgs,

    /// journal or bitmap.
    #[arg(long)]
    pub mode: Option<IntegrityMode>,

    #[arg(long)]
    pub tag_size: Option<u32>,

    #[arg(long)]
    pub block_size: Option<u32>,

    #[arg(long)]
    pub internal_hash: Option<String>,

    /// Allocation candidates for metadata volumes.
    #[arg(long = "pv", value_delimiter = ',')]
    pub pv_candidates: Vec<String>,
}

impl AddArgs {
    pub fn settings(&self) -> IntegritySettings {
        IntegritySettings {
            mode: self.mode,
            tag_size: self.tag_size,
            block_size: self.block_size,
            internal_hash: self.internal_hash.clone(),
            ..IntegritySettings::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct GrowArgs {
    #[command(flatten)]
    pub add: AddArgs,

    /// Size added to every image.
    #[arg(long, default_value_t = 512)]
    pub grow_mib: u64,
}
