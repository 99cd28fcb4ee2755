//! Privileged file and signing operations.
//!
//! Running as root, file operations go straight to the file system; running
//! unprivileged (the usual case on device), they are delegated to the
//! platform's own tools through the privileged executor. Code-signing work
//! is always tool-based: `ldid` produces a pseudo signature, `ct_bypass`
//! stamps it so the OS trust cache accepts the mutated binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;
use crate::executor::{Executor, SystemExecutor};
use crate::fsutil;
use crate::macho::analyzer;

/// Owner applied to everything placed inside an app bundle, mirroring what
/// the platform installer itself would use.
const INSTALLD_USER: &str = "_installd";
const INSTALLD_UID: u32 = 33;
const INSTALLD_GID: u32 = 33;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Locations of the external tools the engine shells out to.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub cp: PathBuf,
    pub mv: PathBuf,
    pub rm: PathBuf,
    pub mkdir: PathBuf,
    pub chown: PathBuf,
    pub killall: PathBuf,
    /// Pseudo-signing tool; signing is skipped when absent.
    pub ldid: Option<PathBuf>,
    /// Trust-cache stamping tool; skipped when absent.
    pub ct_bypass: Option<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            cp: PathBuf::from("/bin/cp"),
            mv: PathBuf::from("/bin/mv"),
            rm: PathBuf::from("/bin/rm"),
            mkdir: PathBuf::from("/bin/mkdir"),
            chown: PathBuf::from("/usr/sbin/chown"),
            killall: PathBuf::from("/usr/bin/killall"),
            ldid: discover_tool("ldid"),
            ct_bypass: discover_tool("ct_bypass"),
        }
    }
}

/// Look for a bundled tool beside our own executable.
fn discover_tool(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join(name);
    candidate.is_file().then_some(candidate)
}

/// File, process and signing operations behind one seam.
pub struct PrivilegedOps {
    executor: Arc<dyn Executor>,
    tools: ToolPaths,
    /// Perform file operations natively instead of spawning tools.
    direct: bool,
}

impl PrivilegedOps {
    pub fn new(executor: Arc<dyn Executor>, tools: ToolPaths, direct: bool) -> Self {
        Self {
            executor,
            tools,
            direct,
        }
    }

    /// Default setup: direct file operations when running as root, spawned
    /// tools otherwise.
    pub fn host_default(tools: ToolPaths) -> Self {
        let direct = unsafe { libc::geteuid() } == 0;
        Self::new(Arc::new(SystemExecutor), tools, direct)
    }

    fn run(&self, tool: &Path, name: &str, args: Vec<String>) -> Result<crate::executor::Receipt> {
        self.executor
            .execute(tool, &args, Some(COMMAND_TIMEOUT))?
            .expect_success(name)
    }

    pub fn copy(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if self.direct {
            fsutil::copy_path(src, dst, overwrite)?;
            return Ok(());
        }
        if overwrite {
            let _ = self.remove(dst, true);
        }
        self.run(
            &self.tools.cp,
            "cp",
            vec![
                "-rfp".into(),
                src.display().to_string(),
                dst.display().to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn rename(&self, src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
        if self.direct {
            fsutil::move_path(src, dst, overwrite)?;
            return Ok(());
        }
        if overwrite {
            let _ = self.remove(dst, true);
        }
        self.run(
            &self.tools.mv,
            "mv",
            vec![
                "-f".into(),
                src.display().to_string(),
                dst.display().to_string(),
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, path: &Path, recursive: bool) -> Result<()> {
        if self.direct {
            if recursive {
                fsutil::remove_path(path)?;
            } else if path.exists() {
                fs::remove_file(path)?;
            }
            return Ok(());
        }
        let flag = if recursive { "-rf" } else { "-f" };
        self.run(
            &self.tools.rm,
            "rm",
            vec![flag.into(), path.display().to_string()],
        )?;
        Ok(())
    }

    pub fn make_dir(&self, path: &Path) -> Result<()> {
        if self.direct {
            fs::create_dir_all(path)?;
            return Ok(());
        }
        self.run(
            &self.tools.mkdir,
            "mkdir",
            vec!["-p".into(), path.display().to_string()],
        )?;
        Ok(())
    }

    /// Hand ownership of injected files to the platform installer account.
    pub fn chown_installd(&self, path: &Path, recursive: bool) -> Result<()> {
        if self.direct {
            return self.chown_direct(path, recursive);
        }
        let mut args = Vec::new();
        if recursive {
            args.push("-R".to_string());
        }
        args.push(format!("{INSTALLD_USER}:{INSTALLD_USER}"));
        args.push(path.display().to_string());
        self.run(&self.tools.chown, "chown", args)?;
        Ok(())
    }

    #[cfg(unix)]
    fn chown_direct(&self, path: &Path, recursive: bool) -> Result<()> {
        if unsafe { libc::geteuid() } != 0 {
            debug!(path = %path.display(), "not root, leaving ownership unchanged");
            return Ok(());
        }
        let apply = |p: &Path| {
            std::os::unix::fs::chown(p, Some(INSTALLD_UID), Some(INSTALLD_GID))
        };
        if !recursive {
            apply(path)?;
            return Ok(());
        }
        for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
            apply(entry.path())?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn chown_direct(&self, _path: &Path, _recursive: bool) -> Result<()> {
        Ok(())
    }

    /// Kill the running app by executable name. Mutating a live binary is
    /// unsafe and ineffective, but a kill failure never blocks the patch.
    pub fn terminate(&self, process_name: &str) {
        let result = self.executor.execute(
            &self.tools.killall,
            &["-9".to_string(), process_name.to_string()],
            Some(Duration::from_secs(10)),
        );
        if let Err(e) = result {
            debug!(process_name, error = %e, "killall unavailable");
        }
    }

    /// Give a binary a pseudo signature. Executables keep their entitlements
    /// by dumping and re-applying them.
    pub fn pseudo_sign(&self, macho: &Path, force: bool, scratch: &Path) -> Result<()> {
        let Some(ldid) = self.tools.ldid.clone() else {
            debug!(macho = %macho.display(), "no ldid available, skipping pseudo signature");
            return Ok(());
        };

        if !force && analyzer::has_code_signature(macho)? {
            return Ok(());
        }

        if analyzer::is_executable_image(macho)? {
            let receipt = self.run(&ldid, "ldid", vec!["-e".into(), macho.display().to_string()])?;
            let entitlements = scratch.join(format!(
                "{}.entitlements.xml",
                crate::bundle::file_name_of(macho)
            ));
            fs::write(&entitlements, receipt.stdout)?;
            self.run(
                &ldid,
                "ldid",
                vec![
                    format!("-S{}", entitlements.display()),
                    macho.display().to_string(),
                ],
            )?;
        } else {
            self.run(&ldid, "ldid", vec!["-S".into(), macho.display().to_string()])?;
        }
        Ok(())
    }

    /// Pseudo-sign and stamp a binary into the trust cache under `team_id`.
    pub fn core_trust_bypass(&self, macho: &Path, team_id: &str, scratch: &Path) -> Result<()> {
        self.pseudo_sign(macho, false, scratch)?;

        let Some(ct_bypass) = self.tools.ct_bypass.clone() else {
            debug!(macho = %macho.display(), "no ct_bypass available, skipping trust stamp");
            return Ok(());
        };
        self.run(
            &ct_bypass,
            "ct_bypass",
            vec![
                "-r".into(),
                "-i".into(),
                macho.display().to_string(),
                "-t".into(),
                team_id.to_string(),
            ],
        )?;
        Ok(())
    }
}
