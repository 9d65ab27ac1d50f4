//! Read-only loop mounting of filesystem images.
//!
//! A [`LoopMount`] owns every kernel resource taken while attaching an image:
//! the loop control descriptor, the image descriptor, the allocated loop
//! slot and its device descriptor, the image binding and the mount itself.
//! Resources are released in reverse order of acquisition. A failure part
//! way through [`LoopMount::mount`] releases whatever was already taken
//! before the error is returned.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::path::PathBuf;

use nix::mount::MsFlags;
use scopeguard::ScopeGuard;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::MaterializeConfig;
use crate::MaterializeError;
use crate::MountStep;
use crate::Result;

// Request codes from <linux/loop.h>.
const LOOP_SET_FD: libc::c_ulong = 0x4C00;
const LOOP_CLR_FD: libc::c_ulong = 0x4C01;
const LOOP_CTL_REMOVE: libc::c_ulong = 0x4C81;
const LOOP_CTL_GET_FREE: libc::c_ulong = 0x4C82;

/// Slot allocations tried before a bind race is reported.
const BIND_ATTEMPTS: u32 = 16;

/// An image attached to a loop device and mounted read-only.
///
/// Dropping a `LoopMount` releases anything still held; errors during drop
/// are logged. Call [`LoopMount::unmount`] to observe release errors.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use workspacefs_core::LoopMount;
/// use workspacefs_core::MaterializeConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = MaterializeConfig::default();
/// let mut mount = LoopMount::mount(Path::new("image.ext4"), Path::new("/mnt/img"), &config)?;
/// println!("mounted on loop{:?}", mount.device_index());
/// mount.unmount()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct LoopMount {
    control: Option<File>,
    image: Option<File>,
    index: Option<u32>,
    device_path: Option<PathBuf>,
    device: Option<File>,
    bound: bool,
    mount_path: Option<PathBuf>,
}

impl LoopMount {
    const fn empty() -> Self {
        Self {
            control: None,
            image: None,
            index: None,
            device_path: None,
            device: None,
            bound: false,
            mount_path: None,
        }
    }

    /// Attaches `image` to a free loop device and mounts it read-only at
    /// `target`.
    ///
    /// The filesystem type and mount data come from `config`; the journal is
    /// never replayed with the default options.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::ResourceAcquisition`] naming the step
    /// that failed. Everything acquired before that step has been released.
    /// A slot bound by a concurrent caller is never removed; allocation is
    /// retried instead, and [`MountStep::BindDevice`] is reported once the
    /// retries run out.
    ///
    /// # Panics
    ///
    /// Panics if releasing a partially acquired mount fails, since the
    /// kernel resources involved can no longer be accounted for.
    pub fn mount(image: &Path, target: &Path, config: &MaterializeConfig) -> Result<Self> {
        let mut guard = scopeguard::guard(Self::empty(), |mut partial| {
            if let Err(err) = partial.release() {
                error!(error = %err, "failed to roll back partial loop mount");
                panic!("loop mount rollback failed: {err}");
            }
        });

        guard.acquire(image, target, config)?;

        let mounted = ScopeGuard::into_inner(guard);
        info!(
            image = %image.display(),
            target = %target.display(),
            device = ?mounted.device_path,
            "image mounted"
        );
        Ok(mounted)
    }

    fn acquire(&mut self, image: &Path, target: &Path, config: &MaterializeConfig) -> Result<()> {
        let control = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.loop_control_path)
            .map_err(acquisition(MountStep::OpenControl))?;
        let control = self.control.insert(control);

        let image_file = File::open(image).map_err(acquisition(MountStep::OpenImage))?;
        let image_fd = self.image.insert(image_file).as_raw_fd();

        // Another process can bind the slot between GET_FREE and SET_FD.
        let mut attempt = 1;
        let device_path = loop {
            let index = loop_ioctl(control, LOOP_CTL_GET_FREE, 0)
                .and_then(|slot| u32::try_from(slot).map_err(io::Error::other))
                .map_err(acquisition(MountStep::AllocateSlot))?;
            self.index = Some(index);
            debug!(index, attempt, "allocated loop device");

            let device_path = config.loop_device_path(index);
            let device = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&device_path)
                .map_err(acquisition(MountStep::OpenDevice))?;
            let device = self.device.insert(device);
            self.device_path = Some(device_path.clone());

            match loop_ioctl(device, LOOP_SET_FD, image_fd) {
                Ok(_) => break device_path,
                Err(err) if is_slot_busy(&err) && attempt < BIND_ATTEMPTS => {
                    debug!(index, attempt, "loop device taken by another caller, retrying");
                    // The slot belongs to whoever bound it; only our handle goes.
                    self.device = None;
                    self.device_path = None;
                    self.index = None;
                    attempt += 1;
                }
                Err(err) => return Err(acquisition(MountStep::BindDevice)(err)),
            }
        };
        self.bound = true;
        debug!(device = %device_path.display(), "bound image to loop device");

        let data = Some(config.mount_options.as_str()).filter(|opts| !opts.is_empty());
        nix::mount::mount(
            Some(device_path.as_path()),
            target,
            Some(config.filesystem_type.as_str()),
            MsFlags::MS_RDONLY,
            data,
        )
        .map_err(|errno| acquisition(MountStep::Mount)(errno.into()))?;
        self.mount_path = Some(target.to_path_buf());

        Ok(())
    }

    /// Unmounts the filesystem and returns every kernel resource.
    ///
    /// Each step runs at most once across calls, so a failed unmount can be
    /// retried and calling this on a released mount does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::ResourceRelease`] naming the step that
    /// failed. Later steps are not attempted.
    pub fn unmount(&mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if let Some(path) = &self.mount_path {
            nix::mount::umount(path.as_path())
                .map_err(|errno| release(MountStep::Unmount)(errno.into()))?;
            debug!(target = %path.display(), "unmounted");
            self.mount_path = None;
        }

        if self.bound {
            if let Some(device) = &self.device {
                loop_ioctl(device, LOOP_CLR_FD, 0).map_err(release(MountStep::DetachDevice))?;
            }
            self.bound = false;
        }

        // The kernel refuses to remove a slot that still has open handles.
        self.device = None;

        if let Some(index) = self.index {
            if let Some(control) = &self.control {
                let removed = libc::c_int::try_from(index)
                    .map_err(io::Error::other)
                    .and_then(|slot| loop_ioctl(control, LOOP_CTL_REMOVE, slot));
                match removed {
                    Ok(_) => debug!(index, "removed loop device"),
                    // Once detached the slot is free, and a busy slot is
                    // held by someone else.
                    Err(err) if is_slot_busy(&err) => {
                        debug!(index, "loop device in use elsewhere, left in place");
                    }
                    Err(err) => return Err(release(MountStep::RemoveSlot)(err)),
                }
            }
            self.index = None;
        }

        self.device_path = None;
        self.image = None;
        self.control = None;
        Ok(())
    }

    /// Returns the index of the allocated loop device, if any.
    #[must_use]
    pub const fn device_index(&self) -> Option<u32> {
        self.index
    }

    /// Returns the loop device node path, if a device is allocated.
    #[must_use]
    pub fn device_path(&self) -> Option<&Path> {
        self.device_path.as_deref()
    }

    /// Returns the mount point while the filesystem is mounted.
    #[must_use]
    pub fn mount_path(&self) -> Option<&Path> {
        self.mount_path.as_deref()
    }

    /// Returns `true` while the filesystem is mounted.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        self.mount_path.is_some()
    }
}

impl Drop for LoopMount {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!(error = %err, "failed to release loop mount on drop");
        }
    }
}

fn acquisition(step: MountStep) -> impl Fn(io::Error) -> MaterializeError {
    move |source| MaterializeError::ResourceAcquisition { step, source }
}

fn release(step: MountStep) -> impl Fn(io::Error) -> MaterializeError {
    move |source| MaterializeError::ResourceRelease { step, source }
}

fn is_slot_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBUSY)
}

/// Issues a loop ioctl whose argument is passed by value.
#[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
fn loop_ioctl(file: &File, request: libc::c_ulong, arg: libc::c_int) -> io::Result<libc::c_int> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    // Loop requests take a plain integer and never write through it.
    #[allow(unsafe_code)]
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), request as _, arg) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}
