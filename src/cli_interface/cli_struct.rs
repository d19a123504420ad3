use clap::Parser;

#[derive(Parser, Debug, PartialEq)]
#[command(author, version, about, long_about)]
pub enum Ext2Cli {
    /// create a new ext2 image
    Mkfs(MkfsArgs),
    /// register an ext2 image to `FUSE` and mount it
    Mount(MountArgs),
}
///make a new fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "make a new ext2 image")]
pub struct MkfsArgs {
    /// the path of the image file, which must not exist yet
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the size of the image in bytes
    #[clap(short, long)]
    pub size: u64,
    /// the least number of inodes
    #[clap(short, long, default_value_t = 1024)]
    pub inode_count: u32,
    /// the block size of the filesystem: 1024, 2048 or 4096
    #[clap(short, long, default_value_t = 1024)]
    pub block_size: u32,
}

/// mount a fs subcommand
#[derive(clap::Args, Debug, PartialEq)]
#[command(author, version, about = "mount an ext2 image")]
pub struct MountArgs {
    /// the path of the image file
    #[clap(short = 'p', long)]
    pub image_file_path: String,
    /// the mount point of the file system
    #[clap(short, long)]
    pub mount_point: String,
    /// allow changes, the image is mounted read-only otherwise
    #[clap(long = "rw")]
    pub read_write: bool,
    /// log allocation and lookup details
    #[clap(short, long)]
    pub verbose: bool,
}
