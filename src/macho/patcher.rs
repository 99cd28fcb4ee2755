//! Byte-level load-command editing.
//!
//! Edits rebuild the whole load-command region of each slice in memory and
//! only touch the file once every slice accepted the change, so a failed
//! edit never leaves a half-written image behind. New commands go into the
//! zero padding between the last load command and the first section's file
//! contents; running out of that padding is a patch error, not a corruption.
//!
//! All operations are idempotent: inserting an existing entry or removing a
//! missing one is a no-op.

use std::fs;
use std::path::Path;

use scroll::{Pread, Pwrite};

use crate::error::{Result, TrollFoolsError};
use crate::macho::{
    MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64, image_slices, read_cstr, with_path,
};

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
pub const LC_RPATH: u32 = 0x8000_001c;

/// Fixed part of a dylib command: cmd, cmdsize, name offset, timestamp,
/// current version, compatibility version.
const DYLIB_COMMAND_LEN: usize = 24;
/// Fixed part of an rpath command: cmd, cmdsize, path offset.
const RPATH_COMMAND_LEN: usize = 12;

/// Idempotently add a load-dylib command (weak or strong) to every slice.
/// Returns whether any slice changed.
pub fn insert_dylib_command(path: &Path, name: &str, weak: bool) -> Result<bool> {
    edit_slices(path, |region| {
        if region.dylib_names().iter().any(|n| n == name) {
            return Ok(false);
        }
        let cmd = if weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };
        region
            .commands
            .push(build_dylib_command(region.endian, cmd, name, 0, 0, 0)?);
        Ok(true)
    })
}

/// Idempotently add a runtime-search-path command to every slice.
pub fn insert_rpath_command(path: &Path, rpath: &str) -> Result<bool> {
    edit_slices(path, |region| {
        if region.rpaths().iter().any(|p| p == rpath) {
            return Ok(false);
        }
        region
            .commands
            .push(build_rpath_command(region.endian, rpath)?);
        Ok(true)
    })
}

/// Remove the load-dylib command naming `name` from every slice; a no-op for
/// slices that do not link it.
pub fn remove_dylib_command(path: &Path, name: &str) -> Result<bool> {
    edit_slices(path, |region| {
        let endian = region.endian;
        let before = region.commands.len();
        region.commands.retain(|command| {
            !(is_dylib_command(command.cmd)
                && command.payload_str(8, endian).as_deref() == Some(name))
        });
        Ok(region.commands.len() != before)
    })
}

/// Rewrite every load-dylib command naming `old` to name `new` instead,
/// preserving linkage kind and version fields.
pub fn change_dylib_command(path: &Path, old: &str, new: &str) -> Result<bool> {
    edit_slices(path, |region| {
        let endian = region.endian;
        let mut changed = false;
        for command in &mut region.commands {
            if !is_dylib_command(command.cmd)
                || command.payload_str(8, endian).as_deref() != Some(old)
            {
                continue;
            }
            let timestamp: u32 = command.field(12, endian)?;
            let current: u32 = command.field(16, endian)?;
            let compatibility: u32 = command.field(20, endian)?;
            *command =
                build_dylib_command(endian, command.cmd, new, timestamp, current, compatibility)?;
            changed = true;
        }
        Ok(changed)
    })
}

fn is_dylib_command(cmd: u32) -> bool {
    cmd == LC_LOAD_DYLIB || cmd == LC_LOAD_WEAK_DYLIB
}

/// One raw load command: its type plus the full on-disk bytes.
#[derive(Debug, Clone)]
struct RawCommand {
    cmd: u32,
    bytes: Vec<u8>,
}

impl RawCommand {
    /// Read the NUL-terminated payload string whose offset field sits at
    /// `field` (the `lc_str` union layout).
    fn payload_str(&self, field: usize, endian: scroll::Endian) -> Option<String> {
        let offset: u32 = self.bytes.pread_with(field, endian).ok()?;
        read_cstr(&self.bytes, offset as usize)
    }

    fn field(&self, offset: usize, endian: scroll::Endian) -> Result<u32> {
        self.bytes
            .pread_with(offset, endian)
            .map_err(|_| parse_error("truncated load command"))
    }
}

/// The editable load-command region of one slice.
struct Region {
    endian: scroll::Endian,
    header_size: usize,
    commands: Vec<RawCommand>,
    /// sizeofcmds at parse time, so shrinking edits know how much to zero.
    original_size: usize,
    /// Room available for commands before the first section's file contents.
    capacity: Option<usize>,
}

impl Region {
    fn dylib_names(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter(|c| is_dylib_command(c.cmd))
            .filter_map(|c| c.payload_str(8, self.endian))
            .collect()
    }

    fn rpaths(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter(|c| c.cmd == LC_RPATH)
            .filter_map(|c| c.payload_str(8, self.endian))
            .collect()
    }
}

fn parse_region(slice: &[u8]) -> Result<Region> {
    let magic: u32 = slice
        .pread_with(0, scroll::LE)
        .map_err(|_| parse_error("slice too short"))?;
    let (endian, header_size) = match magic {
        MH_MAGIC_64 => (scroll::LE, 32),
        MH_CIGAM_64 => (scroll::BE, 32),
        MH_MAGIC => (scroll::LE, 28),
        MH_CIGAM => (scroll::BE, 28),
        _ => return Err(parse_error("not a Mach-O slice")),
    };

    let ncmds: u32 = slice
        .pread_with(16, endian)
        .map_err(|_| parse_error("truncated header"))?;
    let sizeofcmds: u32 = slice
        .pread_with(20, endian)
        .map_err(|_| parse_error("truncated header"))?;
    if header_size + sizeofcmds as usize > slice.len() {
        return Err(parse_error("load commands exceed slice bounds"));
    }

    let mut commands = Vec::with_capacity(ncmds as usize);
    let mut offset = header_size;
    for _ in 0..ncmds {
        let cmd: u32 = slice
            .pread_with(offset, endian)
            .map_err(|_| parse_error("truncated load command"))?;
        let cmdsize: u32 = slice
            .pread_with(offset + 4, endian)
            .map_err(|_| parse_error("truncated load command"))?;
        let cmdsize = cmdsize as usize;
        if cmdsize < 8 || offset + cmdsize > header_size + sizeofcmds as usize {
            return Err(parse_error("malformed load command size"));
        }
        commands.push(RawCommand {
            cmd,
            bytes: slice[offset..offset + cmdsize].to_vec(),
        });
        offset += cmdsize;
    }

    let capacity = command_capacity(&commands, header_size, endian, slice.len());

    Ok(Region {
        endian,
        header_size,
        commands,
        original_size: sizeofcmds as usize,
        capacity,
    })
}

/// Room for load commands: everything up to the lowest file offset any
/// section occupies. Without section offsets there is no safe bound, so no
/// growth is allowed.
fn command_capacity(
    commands: &[RawCommand],
    header_size: usize,
    endian: scroll::Endian,
    slice_len: usize,
) -> Option<usize> {
    let mut first_content: Option<usize> = None;

    for command in commands {
        let (fixed_len, entry_len, offset_field, nsects_field) = match command.cmd {
            LC_SEGMENT_64 => (72usize, 80usize, 48usize, 64usize),
            LC_SEGMENT => (56, 68, 40, 48),
            _ => continue,
        };
        let Ok(nsects) = command.field(nsects_field, endian) else {
            continue;
        };
        for index in 0..nsects as usize {
            let entry = fixed_len + index * entry_len;
            let Ok(section_offset) = command.field(entry + offset_field, endian) else {
                continue;
            };
            let section_offset = section_offset as usize;
            if section_offset != 0 && section_offset <= slice_len {
                first_content = Some(match first_content {
                    Some(current) => current.min(section_offset),
                    None => section_offset,
                });
            }
        }
    }

    first_content
        .filter(|content| *content > header_size)
        .map(|content| content - header_size)
}

fn apply_region(slice: &mut [u8], region: &Region) -> Result<()> {
    let total: usize = region.commands.iter().map(|c| c.bytes.len()).sum();

    if total > region.original_size {
        match region.capacity {
            Some(capacity) if total <= capacity => {}
            _ => return Err(parse_error("not enough room for load commands")),
        }
    }
    if region.header_size + total > slice.len() {
        return Err(parse_error("not enough room for load commands"));
    }

    let mut offset = region.header_size;
    for command in &region.commands {
        slice[offset..offset + command.bytes.len()].copy_from_slice(&command.bytes);
        offset += command.bytes.len();
    }

    // Zero whatever the previous, larger region occupied.
    let zero_end = (region.header_size + region.original_size.max(total)).min(slice.len());
    slice[offset..zero_end].fill(0);

    slice
        .pwrite_with(region.commands.len() as u32, 16, region.endian)
        .map_err(|_| parse_error("failed to update header"))?;
    slice
        .pwrite_with(total as u32, 20, region.endian)
        .map_err(|_| parse_error("failed to update header"))?;
    Ok(())
}

/// Run `edit` over every slice's region; write the file back only when every
/// slice accepted its edit and at least one changed.
fn edit_slices(path: &Path, mut edit: impl FnMut(&mut Region) -> Result<bool>) -> Result<bool> {
    let mut data = fs::read(path)?;
    let slices = image_slices(&data).map_err(|e| with_path(e, path))?;

    let mut modified = false;
    for range in slices {
        let slice = &mut data[range.offset..range.offset + range.len];
        let mut region = parse_region(slice).map_err(|e| patch_error_at(path, e))?;
        if edit(&mut region).map_err(|e| patch_error_at(path, e))? {
            apply_region(slice, &region).map_err(|e| patch_error_at(path, e))?;
            modified = true;
        }
    }

    if modified {
        fs::write(path, &data)?;
    }
    Ok(modified)
}

fn build_dylib_command(
    endian: scroll::Endian,
    cmd: u32,
    name: &str,
    timestamp: u32,
    current_version: u32,
    compatibility_version: u32,
) -> Result<RawCommand> {
    let name_room = padded_len(name);
    let cmdsize = DYLIB_COMMAND_LEN + name_room;
    let mut bytes = vec![0u8; cmdsize];
    write_u32s(
        &mut bytes,
        endian,
        &[
            cmd,
            cmdsize as u32,
            DYLIB_COMMAND_LEN as u32,
            timestamp,
            current_version,
            compatibility_version,
        ],
    )?;
    bytes[DYLIB_COMMAND_LEN..DYLIB_COMMAND_LEN + name.len()].copy_from_slice(name.as_bytes());
    Ok(RawCommand { cmd, bytes })
}

fn build_rpath_command(endian: scroll::Endian, rpath: &str) -> Result<RawCommand> {
    let path_room = padded_len(rpath);
    let cmdsize = RPATH_COMMAND_LEN + path_room;
    let mut bytes = vec![0u8; cmdsize];
    write_u32s(
        &mut bytes,
        endian,
        &[LC_RPATH, cmdsize as u32, RPATH_COMMAND_LEN as u32],
    )?;
    bytes[RPATH_COMMAND_LEN..RPATH_COMMAND_LEN + rpath.len()].copy_from_slice(rpath.as_bytes());
    Ok(RawCommand { cmd: LC_RPATH, bytes })
}

/// Payload strings are NUL-terminated and padded so commands stay 8-aligned.
fn padded_len(s: &str) -> usize {
    (s.len() & !7) + 8
}

fn write_u32s(bytes: &mut [u8], endian: scroll::Endian, values: &[u32]) -> Result<()> {
    for (index, value) in values.iter().enumerate() {
        bytes
            .pwrite_with(*value, index * 4, endian)
            .map_err(|_| parse_error("failed to encode load command"))?;
    }
    Ok(())
}

fn parse_error(reason: &str) -> TrollFoolsError {
    TrollFoolsError::ParseFailed {
        path: String::new(),
        reason: reason.to_string(),
    }
}

fn patch_error_at(path: &Path, err: TrollFoolsError) -> TrollFoolsError {
    match err {
        TrollFoolsError::ParseFailed { path: p, reason } if p.is_empty() => {
            TrollFoolsError::PatchFailed {
                path: path.display().to_string(),
                reason,
            }
        }
        other => other,
    }
}
