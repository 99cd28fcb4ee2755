//! Mach-O analysis and mutation.
//!
//! [`analyzer`] extracts read-only load-command facts (linked dylibs, runtime
//! paths, encryption state, signing team identifier) and never writes.
//! [`patcher`] performs the byte-level load-command edits injection needs.
//! Both operate per architecture slice and treat a fat binary as the merge of
//! its slices.

pub mod analyzer;
pub mod codesign;
pub mod patcher;

use scroll::Pread;

use crate::error::{Result, TrollFoolsError};

pub const MH_MAGIC: u32 = 0xfeed_face;
pub const MH_CIGAM: u32 = 0xcefa_edfe;
pub const MH_MAGIC_64: u32 = 0xfeed_facf;
pub const MH_CIGAM_64: u32 = 0xcffa_edfe;
pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_CIGAM: u32 = 0xbeba_feca;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;
pub const FAT_CIGAM_64: u32 = 0xbfba_feca;

/// One architecture slice within a (possibly fat) image, as a byte range of
/// the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceRange {
    pub offset: usize,
    pub len: usize,
}

/// Split an image into its architecture slices.
///
/// A thin Mach-O yields a single full-file range; a fat image yields one
/// range per `fat_arch` entry. 64-bit fat headers are not produced by any
/// toolchain we care about and are rejected.
pub fn image_slices(data: &[u8]) -> Result<Vec<SliceRange>> {
    let magic: u32 = data
        .pread_with(0, scroll::LE)
        .map_err(|_| parse_error("file too short for a Mach-O header"))?;

    match magic {
        MH_MAGIC | MH_MAGIC_64 | MH_CIGAM | MH_CIGAM_64 => Ok(vec![SliceRange {
            offset: 0,
            len: data.len(),
        }]),
        FAT_CIGAM | FAT_MAGIC => {
            // `FAT_CIGAM` when read little-endian is the on-disk big-endian
            // header; `FAT_MAGIC` would be a little-endian header.
            let endian = if magic == FAT_CIGAM {
                scroll::BE
            } else {
                scroll::LE
            };
            let nfat_arch: u32 = data
                .pread_with(4, endian)
                .map_err(|_| parse_error("truncated fat header"))?;

            let mut slices = Vec::with_capacity(nfat_arch as usize);
            for index in 0..nfat_arch as usize {
                let base = 8 + index * 20;
                let offset: u32 = data
                    .pread_with(base + 8, endian)
                    .map_err(|_| parse_error("truncated fat_arch entry"))?;
                let size: u32 = data
                    .pread_with(base + 12, endian)
                    .map_err(|_| parse_error("truncated fat_arch entry"))?;

                let (offset, size) = (offset as usize, size as usize);
                if offset.checked_add(size).is_none_or(|end| end > data.len()) {
                    return Err(parse_error("fat_arch slice exceeds file bounds"));
                }
                slices.push(SliceRange { offset, len: size });
            }
            if slices.is_empty() {
                return Err(parse_error("fat image has no architecture slices"));
            }
            Ok(slices)
        }
        FAT_MAGIC_64 | FAT_CIGAM_64 => Err(parse_error("64-bit fat headers are not supported")),
        _ => Err(parse_error("not a Mach-O image")),
    }
}

/// Read a NUL-terminated string out of an image.
pub fn read_cstr(data: &[u8], offset: usize) -> Option<String> {
    let tail = data.get(offset..)?;
    let end = tail.iter().position(|&b| b == 0)?;
    Some(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn parse_error(reason: &str) -> TrollFoolsError {
    TrollFoolsError::ParseFailed {
        path: String::new(),
        reason: reason.to_string(),
    }
}

/// Attach the originating path to parse errors raised while an image is being
/// walked without one.
pub(crate) fn with_path(err: TrollFoolsError, path: &std::path::Path) -> TrollFoolsError {
    match err {
        TrollFoolsError::ParseFailed { path: p, reason } if p.is_empty() => {
            TrollFoolsError::ParseFailed {
                path: path.display().to_string(),
                reason,
            }
        }
        other => other,
    }
}
