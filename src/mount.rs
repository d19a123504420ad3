//! mount an ext2 image: parse the device string, hand out the root node,
//! or register the filesystem to `FUSE`
use fuser::MountOption;
use log::{info, warn};
use std::{path::Path, str::FromStr, sync::Arc};

use crate::{
    device::{BlockDevice, ImageFile},
    fs::{DirNode, Ext2Fs, FuseAdapter, Result},
};

/// flags given after the device in a mount string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// `rw`: allow mutating operations, otherwise they fail with `EROFS`
    pub read_write: bool,
    /// `verbose`: trace allocation, mapping and directory scans at debug level
    pub verbose: bool,
}

/// a mount string such as `"disk.img,rw,verbose"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub device: String,
    pub options: MountOptions,
}

impl FromStr for DeviceSpec {
    type Err = std::convert::Infallible;

    fn from_str(source: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = source.split(',');
        let device = parts.next().unwrap_or_default().to_string();
        let mut options = MountOptions::default();
        for flag in parts {
            match flag {
                "rw" => options.read_write = true,
                "verbose" => options.verbose = true,
                "" => {}
                other => warn!("ignoring unknown mount flag {other:?}"),
            }
        }
        Ok(DeviceSpec { device, options })
    }
}

/// mount the image named by `source` and return its root directory
pub fn mount(source: &str) -> Result<DirNode> {
    let DeviceSpec { device, options } = match source.parse() {
        Ok(parsed) => parsed,
        Err(never) => match never {},
    };
    info!("mounting {device} with {options:?}");
    let image = ImageFile::open(&device)?;
    mount_device(Arc::new(image), options)
}

/// mount an already opened device and return its root directory
pub fn mount_device(device: Arc<dyn BlockDevice>, options: MountOptions) -> Result<DirNode> {
    Ext2Fs::mount(device, options)?.root()
}

/// register the filesystem in `image_path` to `FUSE` and serve it on `mountpoint`
///
/// Blocks until the filesystem is unmounted.
pub fn fuse_mount<P>(image_path: P, mountpoint: P, options: MountOptions) -> anyhow::Result<()>
where
    P: AsRef<Path>,
{
    let image = ImageFile::open(image_path)?;
    let fs = Ext2Fs::mount(Arc::new(image), options)?;
    // refuse images whose root is unusable before the kernel sees them
    fs.root()?;

    let mut opts = vec![
        MountOption::FSName("ext2fs".to_string()),
        MountOption::Subtype("ext2".to_string()),
        MountOption::DefaultPermissions,
    ];
    opts.push(if options.read_write {
        MountOption::RW
    } else {
        MountOption::RO
    });

    Ok(fuser::mount2(FuseAdapter::new(fs), mountpoint, &opts)?)
}
