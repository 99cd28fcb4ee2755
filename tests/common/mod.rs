//! Shared helpers for CLI integration tests.
//!
//! Integration tests drive the real binary against synthetic app bundles,
//! so a compact Mach-O emitter lives here: thin 64-bit little-endian images
//! with one `__TEXT` segment, an id, load commands, and enough zero padding
//! after the load commands for the tool to patch into.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;

const MH_MAGIC_64: u32 = 0xfeed_facf;
const CPU_TYPE_ARM64: u32 = 0x0100_000c;
const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;
const LC_SEGMENT_64: u32 = 0x19;
const LC_ID_DYLIB: u32 = 0xd;
const LC_LOAD_DYLIB: u32 = 0xc;

const COMMAND_ROOM: usize = 1024;
const CONTENT_SIZE: usize = 512;

pub fn trollfools() -> Command {
    let mut cmd = Command::cargo_bin("trollfools").expect("binary builds");
    cmd.arg("--direct-fs");
    cmd
}

pub fn dylib_image(name: &str, loads: &[&str]) -> Vec<u8> {
    image(MH_DYLIB, Some(&format!("@rpath/{name}")), loads)
}

pub fn executable_image(loads: &[&str]) -> Vec<u8> {
    image(MH_EXECUTE, None, loads)
}

fn image(filetype: u32, id: Option<&str>, loads: &[&str]) -> Vec<u8> {
    let mut commands: Vec<Vec<u8>> = vec![vec![0u8; 152]];
    if let Some(id) = id {
        commands.push(dylib_command(LC_ID_DYLIB, id));
    }
    for name in loads {
        commands.push(dylib_command(LC_LOAD_DYLIB, name));
    }

    let sizeofcmds: usize = commands.iter().map(Vec::len).sum();
    let content_offset = 32 + sizeofcmds + COMMAND_ROOM;
    commands[0] = text_segment(content_offset);

    let mut out = Vec::new();
    for value in [
        MH_MAGIC_64,
        CPU_TYPE_ARM64,
        0,
        filetype,
        commands.len() as u32,
        sizeofcmds as u32,
        0,
        0,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    for command in &commands {
        out.extend_from_slice(command);
    }
    out.resize(content_offset, 0);
    out.resize(content_offset + CONTENT_SIZE, 0x90);
    out
}

fn text_segment(content_offset: usize) -> Vec<u8> {
    let mut cmd = Vec::new();
    for value in [LC_SEGMENT_64, 152] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    cmd.extend_from_slice(&fixed_name("__TEXT"));
    for value in [0u64, 0x4000, 0, (content_offset + CONTENT_SIZE) as u64] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    for value in [5u32, 5, 1, 0] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    cmd.extend_from_slice(&fixed_name("__text"));
    cmd.extend_from_slice(&fixed_name("__TEXT"));
    for value in [content_offset as u64, CONTENT_SIZE as u64] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    for value in [content_offset as u32, 2, 0, 0, 0, 0, 0, 0] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    cmd
}

fn dylib_command(cmd_type: u32, name: &str) -> Vec<u8> {
    let name_room = (name.len() & !7) + 8;
    let mut cmd = Vec::new();
    for value in [cmd_type, (24 + name_room) as u32, 24, 2, 0x1_0000, 0x1_0000] {
        cmd.extend_from_slice(&value.to_le_bytes());
    }
    cmd.extend_from_slice(name.as_bytes());
    cmd.resize(24 + name_room, 0);
    cmd
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    bytes
}

/// Lay out `<dir>/<Name>.app` with an Info.plist, a main executable linking
/// every given dylib via `@rpath`, and the dylibs under Frameworks.
pub fn write_app(dir: &Path, name: &str, dylibs: &[&str]) -> PathBuf {
    let root = dir.join(format!("{name}.app"));
    let frameworks = root.join("Frameworks");
    fs::create_dir_all(&frameworks).expect("create bundle dirs");

    for dylib in dylibs {
        fs::write(frameworks.join(dylib), dylib_image(dylib, &[])).expect("write dylib");
    }

    let loads: Vec<String> = dylibs.iter().map(|d| format!("@rpath/{d}")).collect();
    let load_refs: Vec<&str> = loads.iter().map(String::as_str).collect();
    fs::write(root.join(name), executable_image(&load_refs)).expect("write executable");

    fs::write(
        root.join("Info.plist"),
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleIdentifier</key>
	<string>com.example.{lower}</string>
	<key>CFBundleExecutable</key>
	<string>{name}</string>
	<key>CFBundleName</key>
	<string>{name}</string>
</dict>
</plist>
"#,
            lower = name.to_lowercase()
        ),
    )
    .expect("write Info.plist");

    root
}

/// Byte-exact snapshot of a directory tree.
pub fn tree_snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut snapshot = BTreeMap::new();
    collect(root, root, &mut snapshot);
    snapshot
}

fn collect(root: &Path, dir: &Path, snapshot: &mut BTreeMap<String, Vec<u8>>) {
    for entry in fs::read_dir(dir).expect("read dir") {
        let path = entry.expect("dir entry").path();
        let relative = path
            .strip_prefix(root)
            .expect("under root")
            .to_string_lossy()
            .into_owned();
        if path.is_dir() {
            snapshot.insert(relative, Vec::new());
            collect(root, &path, snapshot);
        } else {
            snapshot.insert(relative, fs::read(&path).expect("read file"));
        }
    }
}
