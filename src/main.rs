//! Mount a two-tier filesystem over a fast and a slow backing directory.
use std::path::PathBuf;
use std::process::ExitCode;

use bytesize::ByteSize;
use clap::Parser;
use fuser::MountOption;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

use tierfs::config::MountConfig;
use tierfs::fs::TierFs;
use tierfs::fuse::TierFuse;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Where the filesystem appears.
    mount_point: PathBuf,

    /// Backing directory for the fast tier. Wiped and recreated at mount.
    fast_path: PathBuf,

    /// Backing directory for the slow tier. Wiped and recreated at mount.
    slow_path: PathBuf,

    /// Files on the fast tier reaching this size move to the slow tier.
    #[arg(long, default_value = "512MiB")]
    fast_upper_limit: ByteSize,

    /// Files on the slow tier shrinking to this size move back.
    #[arg(long, default_value = "256MiB")]
    slow_lower_limit: ByteSize,

    /// Verbose operation tracing.
    #[arg(long)]
    debug: bool,

    /// Unmount automatically when the process exits.
    #[arg(long)]
    auto_unmount: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("tierfs=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).init();

    let cfg = match MountConfig::new(
        args.fast_path,
        args.slow_path,
        args.fast_upper_limit.as_u64(),
        args.slow_lower_limit.as_u64(),
    ) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let fs = match TierFs::mount(cfg) {
        Ok(fs) => fs,
        Err(e) => {
            error!("failed to initialize backing trees: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut options = vec![
        MountOption::FSName("tierfs".to_owned()),
        MountOption::DefaultPermissions,
    ];
    if args.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }

    if let Err(e) = fuser::mount2(TierFuse::new(fs), &args.mount_point, &options) {
        error!("failed to mount filesystem: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
