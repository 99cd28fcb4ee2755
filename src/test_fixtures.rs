//! Test fixtures and utilities for reducing test setup duplication.
//!
//! Real app bundles and Mach-O images are awkward to ship as binary blobs,
//! so tests synthesize them: [`MachBuilder`] emits minimal but well-formed
//! thin images (and [`write_fat`] wraps them into universal ones), and
//! [`AppFixture`] lays out a complete `.app` directory around them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const CPU_TYPE_ARM64: u32 = 0x0100_000c;
const CPU_SUBTYPES: &[u32] = &[0, 1, 2, 3];

const MH_EXECUTE: u32 = 0x2;
const MH_DYLIB: u32 = 0x6;

const LC_SEGMENT_64: u32 = 0x19;
const LC_ID_DYLIB: u32 = 0xd;
const LC_LOAD_DYLIB: u32 = 0xc;
const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;
const LC_RPATH: u32 = 0x8000_001c;
const LC_ENCRYPTION_INFO_64: u32 = 0x2c;
const LC_CODE_SIGNATURE: u32 = 0x1d;

/// Create a temp directory in the system temp location.
///
/// Uses `crate::temp::temp_dir_base()` to ensure temp dirs are never
/// created under the current working directory.
#[must_use]
pub fn create_temp_dir() -> TempDir {
    TempDir::new_in(crate::temp::temp_dir_base()).expect("Failed to create temp directory")
}

/// Builds a minimal thin 64-bit Mach-O image.
pub struct MachBuilder {
    filetype: u32,
    id_name: Option<String>,
    dylibs: Vec<(String, bool)>,
    rpaths: Vec<String>,
    cryptid: Option<u32>,
    team_id: Option<Option<String>>,
    command_room: usize,
    content_size: usize,
}

impl MachBuilder {
    pub fn dylib(name: &str) -> Self {
        Self {
            filetype: MH_DYLIB,
            id_name: Some(format!("@rpath/{name}")),
            dylibs: Vec::new(),
            rpaths: Vec::new(),
            cryptid: None,
            team_id: None,
            command_room: 1024,
            content_size: 256,
        }
    }

    pub fn executable(_name: &str) -> Self {
        Self {
            filetype: MH_EXECUTE,
            id_name: None,
            dylibs: Vec::new(),
            rpaths: Vec::new(),
            cryptid: None,
            team_id: None,
            command_room: 1024,
            content_size: 256,
        }
    }

    pub fn load_dylib(mut self, name: &str) -> Self {
        self.dylibs.push((name.to_string(), false));
        self
    }

    pub fn load_weak_dylib(mut self, name: &str) -> Self {
        self.dylibs.push((name.to_string(), true));
        self
    }

    pub fn rpath(mut self, path: &str) -> Self {
        self.rpaths.push(path.to_string());
        self
    }

    pub fn cryptid(mut self, cryptid: u32) -> Self {
        self.cryptid = Some(cryptid);
        self
    }

    /// Attach an embedded signature blob carrying this team identifier.
    pub fn team_id(mut self, team: &str) -> Self {
        self.team_id = Some(Some(team.to_string()));
        self
    }

    /// Zero padding left between the load commands and the section content.
    pub fn command_room(mut self, room: usize) -> Self {
        self.command_room = room;
        self
    }

    /// Size of the fake code section, which dominates the file size.
    pub fn content_size(mut self, size: usize) -> Self {
        self.content_size = size;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut commands: Vec<Vec<u8>> = Vec::new();

        // Fixed-size placeholder; patched once offsets are known.
        commands.push(vec![0u8; 152]);

        if let Some(id_name) = &self.id_name {
            commands.push(dylib_command(LC_ID_DYLIB, id_name));
        }
        for (name, weak) in &self.dylibs {
            let cmd = if *weak { LC_LOAD_WEAK_DYLIB } else { LC_LOAD_DYLIB };
            commands.push(dylib_command(cmd, name));
        }
        for rpath in &self.rpaths {
            commands.push(rpath_command(rpath));
        }
        if let Some(cryptid) = self.cryptid {
            let mut cmd = Vec::new();
            push_le(&mut cmd, LC_ENCRYPTION_INFO_64);
            push_le(&mut cmd, 24);
            push_le(&mut cmd, 0); // cryptoff
            push_le(&mut cmd, 0); // cryptsize
            push_le(&mut cmd, cryptid);
            push_le(&mut cmd, 0); // pad
            commands.push(cmd);
        }

        let signature = self.team_id.as_ref().map(|team| signature_blob(team.as_deref()));
        let signature_command_len = if signature.is_some() { 16 } else { 0 };

        let sizeofcmds: usize =
            commands.iter().map(Vec::len).sum::<usize>() + signature_command_len;
        let content_offset = 32 + sizeofcmds + self.command_room;
        let signature_offset = content_offset + self.content_size;

        if let Some(blob) = &signature {
            let mut cmd = Vec::new();
            push_le(&mut cmd, LC_CODE_SIGNATURE);
            push_le(&mut cmd, 16);
            push_le(&mut cmd, signature_offset as u32);
            push_le(&mut cmd, blob.len() as u32);
            commands.push(cmd);
        }

        // Rebuild the __TEXT segment with real offsets: one __text section
        // whose file contents start right after the command room.
        commands[0] = text_segment(content_offset, self.content_size, signature_offset);

        let mut image = Vec::new();
        push_le(&mut image, crate::macho::MH_MAGIC_64);
        push_le(&mut image, CPU_TYPE_ARM64);
        push_le(&mut image, 0); // cpusubtype
        push_le(&mut image, self.filetype);
        push_le(&mut image, commands.len() as u32);
        push_le(&mut image, sizeofcmds as u32);
        push_le(&mut image, 0); // flags
        push_le(&mut image, 0); // reserved

        for command in &commands {
            image.extend_from_slice(command);
        }
        image.resize(content_offset, 0);
        image.resize(content_offset + self.content_size, 0x90);
        if let Some(blob) = &signature {
            image.extend_from_slice(blob);
        }
        image
    }

    pub fn write(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, self.build()).unwrap();
    }
}

fn text_segment(content_offset: usize, content_size: usize, file_end: usize) -> Vec<u8> {
    let mut cmd = Vec::new();
    push_le(&mut cmd, LC_SEGMENT_64);
    push_le(&mut cmd, 152);
    cmd.extend_from_slice(&fixed_name("__TEXT"));
    push_le64(&mut cmd, 0); // vmaddr
    push_le64(&mut cmd, next_page(file_end) as u64); // vmsize
    push_le64(&mut cmd, 0); // fileoff
    push_le64(&mut cmd, file_end as u64); // filesize
    push_le(&mut cmd, 5); // maxprot
    push_le(&mut cmd, 5); // initprot
    push_le(&mut cmd, 1); // nsects
    push_le(&mut cmd, 0); // flags

    cmd.extend_from_slice(&fixed_name("__text"));
    cmd.extend_from_slice(&fixed_name("__TEXT"));
    push_le64(&mut cmd, content_offset as u64); // addr
    push_le64(&mut cmd, content_size as u64); // size
    push_le(&mut cmd, content_offset as u32); // offset
    push_le(&mut cmd, 2); // align
    push_le(&mut cmd, 0); // reloff
    push_le(&mut cmd, 0); // nreloc
    push_le(&mut cmd, 0); // flags
    push_le(&mut cmd, 0); // reserved1
    push_le(&mut cmd, 0); // reserved2
    push_le(&mut cmd, 0); // reserved3
    cmd
}

fn dylib_command(cmd_type: u32, name: &str) -> Vec<u8> {
    let name_room = (name.len() & !7) + 8;
    let mut cmd = Vec::new();
    push_le(&mut cmd, cmd_type);
    push_le(&mut cmd, (24 + name_room) as u32);
    push_le(&mut cmd, 24); // name offset
    push_le(&mut cmd, 2); // timestamp
    push_le(&mut cmd, 0x0001_0000); // current version
    push_le(&mut cmd, 0x0001_0000); // compatibility version
    cmd.extend_from_slice(name.as_bytes());
    cmd.resize(24 + name_room, 0);
    cmd
}

fn rpath_command(path: &str) -> Vec<u8> {
    let path_room = (path.len() & !7) + 8;
    let mut cmd = Vec::new();
    push_le(&mut cmd, LC_RPATH);
    push_le(&mut cmd, (12 + path_room) as u32);
    push_le(&mut cmd, 12); // path offset
    cmd.extend_from_slice(path.as_bytes());
    cmd.resize(12 + path_room, 0);
    cmd
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[..name.len()].copy_from_slice(name.as_bytes());
    bytes
}

fn next_page(len: usize) -> usize {
    (len + 0xfff) & !0xfff
}

fn push_le(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn push_le64(bytes: &mut Vec<u8>, value: u64) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

fn push_be(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Wrap thin images into a fat (universal) file.
pub fn write_fat(path: &Path, slices: &[Vec<u8>]) {
    let mut image = Vec::new();
    push_be(&mut image, crate::macho::FAT_MAGIC);
    push_be(&mut image, slices.len() as u32);

    let mut offsets = Vec::new();
    let mut cursor = next_page(8 + slices.len() * 20);
    for slice in slices {
        offsets.push(cursor);
        cursor = next_page(cursor + slice.len());
    }

    for (index, slice) in slices.iter().enumerate() {
        push_be(&mut image, CPU_TYPE_ARM64);
        push_be(&mut image, CPU_SUBTYPES[index % CPU_SUBTYPES.len()]);
        push_be(&mut image, offsets[index] as u32);
        push_be(&mut image, slice.len() as u32);
        push_be(&mut image, 12); // align (2^12)
    }

    for (index, slice) in slices.iter().enumerate() {
        image.resize(offsets[index], 0);
        image.extend_from_slice(slice);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, image).unwrap();
}

/// An embedded-signature SuperBlob holding one code directory, with or
/// without a team identifier.
pub fn signature_blob(team: Option<&str>) -> Vec<u8> {
    let identifier = b"com.example.demo\0";
    let header_len = 52usize;
    let team_offset = match team {
        Some(_) => header_len + identifier.len(),
        None => 0,
    };
    let directory_len =
        header_len + identifier.len() + team.map(|t| t.len() + 1).unwrap_or(0);

    let mut directory = Vec::new();
    push_be(&mut directory, 0xfade_0c02); // CSMAGIC_CODEDIRECTORY
    push_be(&mut directory, directory_len as u32);
    push_be(&mut directory, 0x2_0400); // version
    push_be(&mut directory, 0); // flags
    push_be(&mut directory, 0); // hashOffset
    push_be(&mut directory, header_len as u32); // identOffset
    push_be(&mut directory, 0); // nSpecialSlots
    push_be(&mut directory, 0); // nCodeSlots
    push_be(&mut directory, 0); // codeLimit
    directory.extend_from_slice(&[32, 2, 0, 12]); // hashSize/hashType/platform/pageSize
    push_be(&mut directory, 0); // spare2
    push_be(&mut directory, 0); // scatterOffset
    push_be(&mut directory, team_offset as u32);
    directory.extend_from_slice(identifier);
    if let Some(team) = team {
        directory.extend_from_slice(team.as_bytes());
        directory.push(0);
    }

    let mut blob = Vec::new();
    push_be(&mut blob, 0xfade_0cc0); // CSMAGIC_EMBEDDED_SIGNATURE
    push_be(&mut blob, (20 + directory.len()) as u32);
    push_be(&mut blob, 1); // blob count
    push_be(&mut blob, 0); // CSSLOT_CODEDIRECTORY
    push_be(&mut blob, 20); // directory offset
    blob.extend_from_slice(&directory);
    blob
}

/// A synthetic `.app` bundle: Info.plist, main executable, Frameworks.
pub struct AppFixture {
    pub root: PathBuf,
    pub executable: PathBuf,
    pub frameworks: PathBuf,
}

impl AppFixture {
    pub fn builder(name: &str) -> AppFixtureBuilder {
        AppFixtureBuilder {
            name: name.to_string(),
            dylibs: Vec::new(),
            unrelated_frameworks: Vec::new(),
        }
    }

    /// The standard two-dylib app used across tests.
    pub fn demo(dir: &Path) -> AppFixture {
        Self::builder("Demo")
            .framework_dylib("A.dylib", 10 * 1024)
            .framework_dylib("B.dylib", 2 * 1024)
            .build(dir)
    }
}

pub struct AppFixtureBuilder {
    name: String,
    dylibs: Vec<(String, usize)>,
    unrelated_frameworks: Vec<String>,
}

impl AppFixtureBuilder {
    /// A dylib in Frameworks that the main executable links via `@rpath`.
    pub fn framework_dylib(mut self, name: &str, size: usize) -> Self {
        self.dylibs.push((name.to_string(), size));
        self
    }

    /// A framework present on disk but never loaded by the app.
    pub fn unrelated_framework(mut self, name: &str) -> Self {
        self.unrelated_frameworks.push(name.to_string());
        self
    }

    pub fn build(self, dir: &Path) -> AppFixture {
        let root = dir.join(format!("{}.app", self.name));
        let frameworks = root.join("Frameworks");
        fs::create_dir_all(&frameworks).unwrap();

        for (name, size) in &self.dylibs {
            MachBuilder::dylib(name)
                .content_size(*size)
                .write(&frameworks.join(name));
        }
        for name in &self.unrelated_frameworks {
            let fwk = frameworks.join(name);
            let stem = name.strip_suffix(".framework").unwrap_or(name);
            MachBuilder::dylib(stem).write(&fwk.join(stem));
        }

        let mut main = MachBuilder::executable(&self.name);
        for (name, _) in &self.dylibs {
            main = main.load_dylib(&format!("@rpath/{name}"));
        }
        let executable = root.join(&self.name);
        main.write(&executable);

        write_info_plist(
            &root.join("Info.plist"),
            &format!("com.example.{}", self.name.to_lowercase()),
            &self.name,
        );

        AppFixture {
            root,
            executable,
            frameworks,
        }
    }
}

#[derive(serde::Serialize)]
struct InfoPlistFixture {
    #[serde(rename = "CFBundleIdentifier")]
    identifier: String,
    #[serde(rename = "CFBundleExecutable")]
    executable: String,
    #[serde(rename = "CFBundleName")]
    name: String,
}

pub fn write_info_plist(path: &Path, identifier: &str, executable: &str) {
    plist::to_file_xml(
        path,
        &InfoPlistFixture {
            identifier: identifier.to_string(),
            executable: executable.to_string(),
            name: executable.to_string(),
        },
    )
    .unwrap();
}

/// Zip up a directory tree, entry names relative to `src`.
pub fn write_zip(zip_path: &Path, src: &Path) {
    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let file = fs::File::create(zip_path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();

    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry
            .path()
            .strip_prefix(src)
            .unwrap()
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            writer.add_directory(relative, options).unwrap();
        } else {
            writer.start_file(relative, options).unwrap();
            writer.write_all(&fs::read(entry.path()).unwrap()).unwrap();
        }
    }
    writer.finish().unwrap();
}

/// A `<Key>.framework.zip` / `<Key>.dylib.zip` catalog archive holding a
/// plausible library image.
pub fn write_library_zip(zip_path: &Path, item_name: &str) {
    let staging = create_temp_dir();
    let item = staging.path().join(item_name);
    if item_name.ends_with(".framework") {
        let stem = item_name.strip_suffix(".framework").unwrap();
        MachBuilder::dylib(stem).write(&item.join(stem));
    } else {
        MachBuilder::dylib(item_name).write(&item);
    }
    write_zip(zip_path, staging.path());
}

/// A minimal Debian package whose `data.tar.gz` member carries `files`.
pub fn write_deb(deb_path: &Path, files: &[(&str, &[u8])]) {
    let mut tar_builder = tar::Builder::new(Vec::new());
    for (name, bytes) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar_builder.append_data(&mut header, name, *bytes).unwrap();
    }
    let tar_bytes = tar_builder.into_inner().unwrap();

    let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    gz.write_all(&tar_bytes).unwrap();
    let gz_bytes = gz.finish().unwrap();

    let mut deb = Vec::new();
    deb.extend_from_slice(b"!<arch>\n");
    append_ar_member(&mut deb, "debian-binary", b"2.0\n");
    append_ar_member(&mut deb, "control.tar.gz", b"");
    append_ar_member(&mut deb, "data.tar.gz", &gz_bytes);

    if let Some(parent) = deb_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(deb_path, deb).unwrap();
}

fn append_ar_member(archive: &mut Vec<u8>, name: &str, data: &[u8]) {
    archive.extend_from_slice(format!("{name:<16}").as_bytes());
    archive.extend_from_slice(format!("{:<12}", 0).as_bytes()); // mtime
    archive.extend_from_slice(format!("{:<6}", 0).as_bytes()); // uid
    archive.extend_from_slice(format!("{:<6}", 0).as_bytes()); // gid
    archive.extend_from_slice(format!("{:<8}", "100644").as_bytes());
    archive.extend_from_slice(format!("{:<10}", data.len()).as_bytes());
    archive.extend_from_slice(b"`\n");
    archive.extend_from_slice(data);
    if data.len() % 2 == 1 {
        archive.push(b'\n');
    }
}

/// Byte-exact snapshot of a directory tree, for before/after comparisons.
pub fn tree_snapshot(root: &Path) -> std::collections::BTreeMap<String, Vec<u8>> {
    let mut snapshot = std::collections::BTreeMap::new();
    for entry in walkdir::WalkDir::new(root).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap()
            .to_string_lossy()
            .into_owned();
        if entry.file_type().is_file() {
            snapshot.insert(relative, fs::read(entry.path()).unwrap());
        } else {
            snapshot.insert(relative, Vec::new());
        }
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use goblin::mach::MachO;

    #[test]
    fn test_built_image_parses_with_goblin() {
        let image = MachBuilder::dylib("Demo.dylib")
            .load_dylib("/usr/lib/libSystem.B.dylib")
            .rpath("@loader_path")
            .team_id("TEAM123456")
            .build();
        let macho = MachO::parse(&image, 0).unwrap();
        assert_eq!(macho.header.filetype, MH_DYLIB);
        assert!(!macho.load_commands.is_empty());
    }

    #[test]
    fn test_fat_image_slices() {
        let temp = create_temp_dir();
        let path = temp.path().join("fat");
        write_fat(
            &path,
            &[MachBuilder::dylib("a").build(), MachBuilder::dylib("b").build()],
        );
        let data = fs::read(&path).unwrap();
        let slices = crate::macho::image_slices(&data).unwrap();
        assert_eq!(slices.len(), 2);
        for range in slices {
            MachO::parse(&data[range.offset..range.offset + range.len], 0).unwrap();
        }
    }

    #[test]
    fn test_content_size_drives_file_size() {
        let small = MachBuilder::dylib("s").content_size(1024).build();
        let large = MachBuilder::dylib("l").content_size(8192).build();
        assert!(large.len() > small.len());
    }
}
