//! Byte-for-byte file duplication with a reusable buffer.
//!
//! Used when files leave a read-only mount: they cannot be renamed out of
//! it, so their contents are streamed into a freshly created destination
//! file. One buffer is allocated per merge and reused for every file.

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::MaterializeError;
use crate::Result;

/// Buffer size for file duplication (1 MiB).
///
/// Image contents are frequently large build outputs; a larger buffer cuts
/// the syscall count when reading through the loop device.
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Heap buffer reused across file copies.
///
/// # Examples
///
/// ```no_run
/// # use workspacefs_core::copy::{CopyBuffer, copy_with_buffer};
/// # use workspacefs_core::MaterializeError;
/// # fn example() -> Result<(), MaterializeError> {
/// let mut buffer = CopyBuffer::new();
/// let mut input = std::fs::File::open("input.bin")?;
/// let mut output = std::fs::File::create("output.bin")?;
///
/// let bytes_copied = copy_with_buffer(&mut input, &mut output, &mut buffer)?;
/// println!("Copied {} bytes", bytes_copied);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CopyBuffer {
    buf: Box<[u8]>,
}

impl CopyBuffer {
    /// Creates a new zeroed copy buffer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    /// Returns the buffer size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.buf.len()
    }
}

impl Default for CopyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Copies everything from `reader` to `writer` through `buffer`.
///
/// Interrupted reads are retried. Returns the number of bytes copied.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
#[inline]
pub fn copy_with_buffer<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    buffer: &mut CopyBuffer,
) -> Result<u64> {
    let mut total: u64 = 0;

    loop {
        let bytes_read = match reader.read(&mut buffer.buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(MaterializeError::Io(e)),
        };

        writer
            .write_all(&buffer.buf[..bytes_read])
            .map_err(MaterializeError::Io)?;

        total += bytes_read as u64;
    }

    Ok(total)
}

/// Duplicates the regular file `src` as a new file at `dst`.
///
/// The destination is created exclusively with the permission bits of the
/// source, so an entry that appeared at `dst` in the meantime is never
/// truncated.
///
/// # Errors
///
/// Returns an error if `src` cannot be read, `dst` already exists, or the
/// copy fails.
pub fn duplicate_file(src: &Path, dst: &Path, buffer: &mut CopyBuffer) -> Result<u64> {
    let mut input = File::open(src)?;
    let mode = input.metadata()?.permissions().mode() & 0o7777;

    let mut output = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(dst)?;

    let copied = copy_with_buffer(&mut input, &mut output, buffer)?;
    output.flush()?;
    Ok(copied)
}
