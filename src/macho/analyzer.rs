//! Read-only extraction of load-command facts from a binary.
//!
//! Every query merges the facts of all architecture slices in first-seen
//! order, so callers never care whether a binary is thin or fat.

use std::fs;
use std::path::{Path, PathBuf};

use goblin::mach::MachO;
use goblin::mach::load_command::CommandVariant;
use tracing::debug;

use crate::error::{Result, TrollFoolsError};
use crate::macho::{codesign, image_slices, read_cstr, with_path};

/// Whether the file parses as a (thin or fat) Mach-O image.
pub fn is_macho(path: &Path) -> bool {
    let Ok(data) = fs::read(path) else {
        return false;
    };
    let Ok(slices) = image_slices(&data) else {
        return false;
    };
    slices
        .iter()
        .all(|s| MachO::parse(&data[s.offset..s.offset + s.len], 0).is_ok())
}

/// Ordered set of linked dylib install names (strong and weak), first-seen
/// order across slices.
pub fn loaded_dylibs(path: &Path) -> Result<Vec<String>> {
    let data = fs::read(path)?;
    let mut dylibs = Vec::new();
    for_each_slice(path, &data, |macho, slice| {
        for lc in &macho.load_commands {
            let name_offset = match &lc.command {
                CommandVariant::LoadDylib(d) | CommandVariant::LoadWeakDylib(d) => d.dylib.name,
                _ => continue,
            };
            if let Some(name) = read_cstr(slice, lc.offset + name_offset as usize) {
                if !dylibs.contains(&name) {
                    dylibs.push(name);
                }
            }
        }
        Ok(())
    })?;
    Ok(dylibs)
}

/// Ordered set of runtime search paths, first-seen order across slices.
pub fn runtime_paths(path: &Path) -> Result<Vec<String>> {
    let data = fs::read(path)?;
    let mut paths = Vec::new();
    for_each_slice(path, &data, |macho, slice| {
        for lc in &macho.load_commands {
            if let CommandVariant::Rpath(rp) = &lc.command {
                if let Some(rpath) = read_cstr(slice, lc.offset + rp.path as usize) {
                    if !paths.contains(&rpath) {
                        paths.push(rpath);
                    }
                }
            }
        }
        Ok(())
    })?;
    Ok(paths)
}

/// True if any slice carries an encryption-info command with a non-zero
/// cryptid. Such FairPlay-encrypted slices must never be patched.
pub fn is_protected(path: &Path) -> Result<bool> {
    let data = fs::read(path)?;
    let mut protected = false;
    for_each_slice(path, &data, |macho, _| {
        for lc in &macho.load_commands {
            match &lc.command {
                CommandVariant::EncryptionInfo32(info) if info.cryptid != 0 => protected = true,
                CommandVariant::EncryptionInfo64(info) if info.cryptid != 0 => protected = true,
                _ => {}
            }
        }
        Ok(())
    })?;
    Ok(protected)
}

/// First non-null code-signing team identifier across slices, if any.
pub fn team_identifier(path: &Path) -> Result<Option<String>> {
    let data = fs::read(path)?;
    let mut team = None;
    for_each_slice(path, &data, |macho, slice| {
        if team.is_some() {
            return Ok(());
        }
        for lc in &macho.load_commands {
            if let CommandVariant::CodeSignature(sig) = &lc.command {
                let start = sig.dataoff as usize;
                let end = start + sig.datasize as usize;
                if let Some(blob) = slice.get(start..end) {
                    if let Some(id) = codesign::team_identifier_in_blob(blob) {
                        team = Some(id);
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    })?;
    Ok(team)
}

/// True if any slice already carries an `LC_CODE_SIGNATURE` command.
pub fn has_code_signature(path: &Path) -> Result<bool> {
    let data = fs::read(path)?;
    let mut signed = false;
    for_each_slice(path, &data, |macho, _| {
        if macho
            .load_commands
            .iter()
            .any(|lc| matches!(lc.command, CommandVariant::CodeSignature(_)))
        {
            signed = true;
        }
        Ok(())
    })?;
    Ok(signed)
}

/// True if any slice is a main-executable image (as opposed to a dylib or
/// bundle image).
pub fn is_executable_image(path: &Path) -> Result<bool> {
    let data = fs::read(path)?;
    let mut executable = false;
    for_each_slice(path, &data, |macho, _| {
        if macho.header.filetype == goblin::mach::header::MH_EXECUTE {
            executable = true;
        }
        Ok(())
    })?;
    Ok(executable)
}

/// Transitive closure of linked binaries, starting from (and including)
/// `start`.
///
/// `@rpath/` and `@executable_path/` references are resolved against the
/// bundle's real Frameworks and executable directories. System paths and
/// Swift runtime stubs terminate their branch silently; a visited set breaks
/// cycles.
pub fn linked_dylibs_recursively(
    start: &Path,
    executable_dir: &Path,
    frameworks_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut visited = Vec::new();
    visit_linked(start, executable_dir, frameworks_dir, &mut visited)?;
    Ok(visited)
}

fn visit_linked(
    target: &Path,
    executable_dir: &Path,
    frameworks_dir: &Path,
    visited: &mut Vec<PathBuf>,
) -> Result<()> {
    if visited.iter().any(|p| p == target) {
        return Ok(());
    }
    visited.push(target.to_path_buf());

    for name in loaded_dylibs(target)? {
        let Some(resolved) = resolve_install_name(&name, executable_dir, frameworks_dir) else {
            continue;
        };
        visit_linked(&resolved, executable_dir, frameworks_dir, visited)?;
    }
    Ok(())
}

/// Map an install name to an on-disk file inside the bundle, or `None` for
/// anything that lives outside it.
fn resolve_install_name(
    name: &str,
    executable_dir: &Path,
    frameworks_dir: &Path,
) -> Option<PathBuf> {
    let resolved = if let Some(rest) = name.strip_prefix("@rpath/") {
        if rest.starts_with("libswift") {
            return None;
        }
        frameworks_dir.join(rest)
    } else if let Some(rest) = name.strip_prefix("@executable_path/") {
        executable_dir.join(rest)
    } else {
        return None;
    };

    if resolved.exists() {
        Some(resolved)
    } else {
        debug!(name, "install name does not resolve inside the bundle");
        None
    }
}

fn for_each_slice<'a>(
    path: &Path,
    data: &'a [u8],
    mut visit: impl FnMut(&MachO<'a>, &'a [u8]) -> Result<()>,
) -> Result<()> {
    let slices = image_slices(data).map_err(|e| with_path(e, path))?;
    for range in slices {
        let slice = &data[range.offset..range.offset + range.len];
        let macho = MachO::parse(slice, 0)
            .map_err(|e| TrollFoolsError::parse_failed(path, e))?;
        visit(&macho, slice)?;
    }
    Ok(())
}
