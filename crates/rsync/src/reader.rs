//! Positioned reads of snapshot files
//!
//! One call hands back at most 1 MiB; callers advance the offset to walk a
//! larger range. The whole-file digest is only computed on the call that
//! reaches end of file, so intermediate chunks never re-read the file.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::RsyncResult;

/// Copy ceiling per call
pub const MAX_COPY_BLOCK_SIZE: u64 = 1 << 20;

/// Read up to `min(count, 1 MiB)` bytes of `path` starting at `offset`.
///
/// Returns the bytes read and, when end of file was reached inside this
/// call (fewer bytes than the capped request), the hex MD5 digest of the
/// whole file.
pub fn read_dump_file<P: AsRef<Path>>(
    path: P,
    offset: u64,
    count: u64,
) -> RsyncResult<(Vec<u8>, Option<String>)> {
    let mut file = File::open(path.as_ref())?;

    let capped = count.min(MAX_COPY_BLOCK_SIZE) as usize;
    let mut data = vec![0u8; capped];
    let mut bytes_read = 0usize;
    let mut reached_eof = false;

    file.seek(SeekFrom::Start(offset))?;
    while bytes_read < capped {
        match file.read(&mut data[bytes_read..]) {
            Ok(0) => {
                reached_eof = true;
                break;
            }
            Ok(n) => bytes_read += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    data.truncate(bytes_read);

    if !reached_eof {
        return Ok((data, None));
    }

    // this call delivered the file's final chunk; digest it from the start
    file.seek(SeekFrom::Start(0))?;
    let mut context = md5::Context::new();
    let mut block = vec![0u8; MAX_COPY_BLOCK_SIZE as usize];
    loop {
        match file.read(&mut block) {
            Ok(0) => break,
            Ok(n) => context.consume(&block[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let digest = format!("{:x}", context.compute());
    Ok((data, Some(digest)))
}
