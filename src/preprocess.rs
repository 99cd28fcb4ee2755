//! Asset preprocessing: normalize heterogeneous inputs into injectable
//! asset lists.
//!
//! Direct items (dylib, framework, bundle) are staged into scratch space;
//! zip and Debian-package containers are expanded exactly one level, and a
//! container found inside a container is not expanded again. Items carrying
//! a reserved hooking-runtime name are dropped here: the runtime is managed
//! by the library catalog, never injected directly.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::asset::{Asset, AssetKind};
use crate::bundle::{is_reserved_runtime_name, mark_injected};
use crate::error::{Result, TrollFoolsError};
use crate::fsutil;

/// Stage `inputs` under `scratch`, expanding containers, and return the
/// injectable asset list. Fails if nothing injectable remains.
pub fn prepare_assets(scratch: &Path, inputs: &[PathBuf]) -> Result<Vec<Asset>> {
    debug!(?inputs, "preprocess");

    let mut prepared = Vec::new();

    for (index, input) in inputs.iter().enumerate() {
        let file_name = crate::bundle::file_name_of(input);
        let extension = input
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "zip" | "deb" => {
                let extracted = scratch.join(format!("{index}_{file_name}.extracted"));
                fs::create_dir_all(&extracted)?;
                if extension == "zip" {
                    let file = fs::File::open(input)?;
                    let mut archive = zip::ZipArchive::new(file)
                        .map_err(|e| TrollFoolsError::archive_failed(input, e))?;
                    archive
                        .extract(&extracted)
                        .map_err(|e| TrollFoolsError::archive_failed(input, e))?;
                } else {
                    extract_debian_package(input, &extracted)?;
                }
                prepared.extend(collect_extracted_assets(&extracted)?);
            }
            "dylib" | "framework" | "bundle" => {
                let staged = scratch.join(&file_name);
                fsutil::copy_path(input, &staged, true)?;
                if let Some(asset) = Asset::classify(&staged) {
                    if asset.kind != AssetKind::Dylib {
                        mark_injected(&asset.path)?;
                    }
                    prepared.push(asset);
                }
            }
            _ => {
                debug!(input = %input.display(), "skipping unsupported input");
            }
        }
    }

    prepared.retain(|asset| !is_reserved_runtime_name(&asset.file_name()));

    if prepared.is_empty() {
        return Err(TrollFoolsError::EmptyAssetList);
    }

    info!(count = prepared.len(), "prepared assets");
    Ok(prepared)
}

/// Walk an expanded container for injectable items, without descending into
/// the items themselves and without recursing into nested containers.
fn collect_extracted_assets(extracted: &Path) -> Result<Vec<Asset>> {
    let mut assets = Vec::new();

    let mut walker = WalkDir::new(extracted).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let name = crate::bundle::file_name_of(path);
        if name.starts_with('.') {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            continue;
        }

        let Some(asset) = Asset::classify(path) else {
            continue;
        };
        if asset.kind != AssetKind::Dylib {
            if !entry.file_type().is_dir() {
                continue;
            }
            walker.skip_current_dir();
            mark_injected(&asset.path)?;
        } else if !entry.file_type().is_file() {
            continue;
        }
        assets.push(asset);
    }

    Ok(assets)
}

/// Expand the `data.tar`/`data.tar.gz` member of a Debian package.
///
/// The outer `ar` wrapper is trivial enough to walk directly: a global
/// magic, then 60-byte member headers with decimal sizes and even padding.
fn extract_debian_package(deb: &Path, dest: &Path) -> Result<()> {
    let data = fs::read(deb)?;
    if !data.starts_with(b"!<arch>\n") {
        return Err(TrollFoolsError::archive_failed(deb, "not an ar archive"));
    }

    let mut offset = 8usize;
    while offset + 60 <= data.len() {
        let header = &data[offset..offset + 60];
        let name = ar_field(&header[0..16]);
        let size: usize = ar_field(&header[48..58])
            .parse()
            .map_err(|_| TrollFoolsError::archive_failed(deb, "malformed ar member size"))?;

        let start = offset + 60;
        let end = start
            .checked_add(size)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| TrollFoolsError::archive_failed(deb, "truncated ar member"))?;
        let member = &data[start..end];

        match name.trim_end_matches('/') {
            "data.tar.gz" => {
                info!(member = name, "extracting data archive");
                let mut tar_bytes = Vec::new();
                GzDecoder::new(member)
                    .read_to_end(&mut tar_bytes)
                    .map_err(|e| TrollFoolsError::archive_failed(deb, e))?;
                unpack_tar(&tar_bytes, dest, deb)?;
                return Ok(());
            }
            "data.tar" => {
                info!(member = name, "extracting data archive");
                unpack_tar(member, dest, deb)?;
                return Ok(());
            }
            _ => {}
        }

        offset = end + (size & 1);
    }

    Err(TrollFoolsError::archive_failed(
        deb,
        "unable to locate a supported data archive in the Debian package",
    ))
}

fn unpack_tar(bytes: &[u8], dest: &Path, deb: &Path) -> Result<()> {
    tar::Archive::new(bytes)
        .unpack(dest)
        .map_err(|e| TrollFoolsError::archive_failed(deb, e))
}

fn ar_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}
