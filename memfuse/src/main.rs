use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use fuser::MountOption;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod fs;
mod fuse;

#[cfg(test)]
mod posix_tests;

use cli::{Cli, FsType};
use fs::{BackendFs, MemFs};
use fuse::FuseFs;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if !cli.mountpoint.is_absolute() {
        Cli::command()
            .error(
                clap::error::ErrorKind::ValueValidation,
                "mountpoint must be an absolute path",
            )
            .exit();
    }

    let back: Arc<dyn BackendFs> = match cli.fstype {
        FsType::Memfs => Arc::new(MemFs::new()),
    };

    let fsname = cli.fstype.to_string();
    let options = [
        MountOption::FSName(fsname.clone()),
        MountOption::Subtype(fsname),
    ];

    info!(
        "mounting {} filesystem at {}",
        cli.fstype,
        cli.mountpoint.display()
    );
    fuser::mount2(FuseFs::new(back), &cli.mountpoint, &options)
        .with_context(|| format!("serve filesystem at {}", cli.mountpoint.display()))?;

    info!("unmounted {}", cli.mountpoint.display());
    Ok(())
}
