//! Code-signature blob inspection.
//!
//! The embedded signature is a big-endian SuperBlob; the team identifier
//! lives in the code directory once the directory version grew a team-offset
//! field. Everything here is read-only; producing signatures is the job of
//! the external signing tools.

use scroll::Pread;

use crate::macho::read_cstr;

const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade_0cc0;
const CSMAGIC_CODEDIRECTORY: u32 = 0xfade_0c02;
const CSSLOT_CODEDIRECTORY: u32 = 0;

/// Code directory versions below this predate the team-id field.
const CS_SUPPORTS_TEAMID: u32 = 0x2_0200;

/// Offset of the `teamOffset` field within a code directory.
const CD_TEAM_OFFSET_FIELD: usize = 48;

/// Extract the signing team identifier out of an `LC_CODE_SIGNATURE` blob,
/// if the blob carries one.
pub fn team_identifier_in_blob(blob: &[u8]) -> Option<String> {
    let magic: u32 = blob.pread_with(0, scroll::BE).ok()?;
    if magic != CSMAGIC_EMBEDDED_SIGNATURE {
        return None;
    }
    let count: u32 = blob.pread_with(8, scroll::BE).ok()?;

    for index in 0..count as usize {
        let entry = 12 + index * 8;
        let slot: u32 = blob.pread_with(entry, scroll::BE).ok()?;
        if slot != CSSLOT_CODEDIRECTORY {
            continue;
        }
        let offset: u32 = blob.pread_with(entry + 4, scroll::BE).ok()?;
        return team_identifier_in_directory(blob.get(offset as usize..)?);
    }
    None
}

fn team_identifier_in_directory(directory: &[u8]) -> Option<String> {
    let magic: u32 = directory.pread_with(0, scroll::BE).ok()?;
    if magic != CSMAGIC_CODEDIRECTORY {
        return None;
    }
    let version: u32 = directory.pread_with(8, scroll::BE).ok()?;
    if version < CS_SUPPORTS_TEAMID {
        return None;
    }
    let team_offset: u32 = directory.pread_with(CD_TEAM_OFFSET_FIELD, scroll::BE).ok()?;
    if team_offset == 0 {
        return None;
    }
    read_cstr(directory, team_offset as usize).filter(|team| !team.is_empty())
}
