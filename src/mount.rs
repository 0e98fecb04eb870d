/// Scratch filesystem construction inside the container's mount namespace
use crate::types::{FileSpec, JudgeConfig, JudgeError, Result};
use nix::mount::{mount, umount, MsFlags};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;

/// Stop mount events from propagating back to the host before touching
/// anything. The kernel refuses this until the user-namespace id maps are
/// populated, which is why the container waits on the supervisor barrier
/// first.
pub fn make_mounts_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| JudgeError::Mount(format!("failed to privatise mount propagation: {}", e)))
}

/// The sandboxed filesystem view: the rootfs image bound read-only at the
/// scratch root, with a fresh tmpfs as its only writable area at `/tmp`.
pub struct ScratchMount {
    root: PathBuf,
    tmp: PathBuf,
}

impl ScratchMount {
    pub fn construct(cfg: &JudgeConfig) -> Result<Self> {
        let root = cfg.scratch_root();
        fs::create_dir_all(&root)?;

        mount(
            Some(cfg.rootfs_path.as_str()),
            &root,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| {
            JudgeError::Mount(format!(
                "failed to bind {} at {}: {}",
                cfg.rootfs_path,
                root.display(),
                e
            ))
        })?;

        mount(
            None::<&str>,
            &root,
            None::<&str>,
            MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| JudgeError::Mount(format!("failed to remount rootfs read-only: {}", e)))?;

        let tmp = root.join("tmp");
        let options = format!("mode=0777,size={}", cfg.tmpfs_size);
        mount(
            Some("tmpfs"),
            &tmp,
            Some("tmpfs"),
            MsFlags::empty(),
            Some(options.as_str()),
        )
        .map_err(|e| {
            JudgeError::Mount(format!("failed to mount tmpfs at {}: {}", tmp.display(), e))
        })?;

        Ok(ScratchMount { root, tmp })
    }

    /// Write the request's input files into the tmpfs with their mode bits.
    pub fn materialise_inputs(&self, files: &[FileSpec]) -> Result<()> {
        for f in files {
            let path = self.tmp.join(&f.filename);
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(f.mode)
                .open(&path)
                .map_err(|e| {
                    JudgeError::Mount(format!("failed to create {}: {}", path.display(), e))
                })?;
            out.write_all(&f.content)?;
        }
        Ok(())
    }

    /// Read one file back from the tmpfs. Missing files come back empty.
    pub fn read_back(&self, filename: &str) -> Vec<u8> {
        fs::read(self.tmp.join(filename)).unwrap_or_default()
    }

    /// Unwind in reverse construction order. Every step is best-effort; a
    /// verdict has already been computed by the time this runs.
    pub fn teardown(&self) {
        if let Err(e) = umount(&self.tmp) {
            log::warn!("failed to unmount {}: {}", self.tmp.display(), e);
        }
        if let Err(e) = umount(&self.root) {
            log::warn!("failed to unmount {}: {}", self.root.display(), e);
        }
        if let Err(e) = fs::remove_dir(&self.root) {
            log::warn!("failed to remove {}: {}", self.root.display(), e);
        }
    }
}
