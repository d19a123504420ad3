use clap::Parser;
use ext2fs::{cli_interface::Ext2Cli, mount::MountOptions};
/// a CLI interface to users to choose create an ext2 image,
/// or register it to `FUSE` and mount it.
///
/// The latter will block the program until the filesystem is unmounted.
fn main() -> anyhow::Result<()> {
    env_logger::builder().format_timestamp_nanos().init();
    let args = Ext2Cli::parse();
    match args {
        //if it is a `mkfs` subcommand
        Ext2Cli::Mkfs(args) => {
            ext2fs::mkfs::mkfs(
                args.image_file_path,
                args.size,
                args.inode_count,
                args.block_size,
            )?;
        }
        //if it is a `mount` subcommand
        Ext2Cli::Mount(args) => {
            let options = MountOptions {
                read_write: args.read_write,
                verbose: args.verbose,
            };
            ext2fs::mount::fuse_mount(args.image_file_path, args.mount_point, options)?;
        }
    }
    Ok(())
}
