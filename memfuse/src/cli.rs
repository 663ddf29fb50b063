use std::fmt;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(
    name = "memfuse",
    version,
    about = "Serve an in-memory POSIX filesystem over FUSE"
)]
pub struct Cli {
    /// Absolute path of the mount point
    pub mountpoint: PathBuf,

    /// Filesystem backend to instantiate
    #[arg(long = "type", value_enum, default_value_t = FsType::Memfs)]
    pub fstype: FsType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FsType {
    /// In-memory backend; contents evaporate on exit
    Memfs,
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsType::Memfs => write!(f, "memfs"),
        }
    }
}
