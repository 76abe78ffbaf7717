use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const UAT_SCRIPT: &str = "RunUAT.bat";
#[cfg(not(windows))]
const UAT_SCRIPT: &str = "RunUAT.sh";

/// Subfolder of the destination that receives the packaged plugin.
pub const PACKAGE_SUBDIR: &str = "Migrated";

/// A RunUAT `BuildPlugin` invocation.
///
/// The process is spawned from `program` and `args` directly, so paths are
/// never re-parsed by a shell. `Display` renders the quoted command line the
/// way a user would type it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCommand {
    pub program: PathBuf,
    pub plugin: PathBuf,
    pub package_dir: PathBuf,
}

/// Location of the automation tool script inside an engine installation.
pub fn uat_script(engine_root: &Path) -> PathBuf {
    engine_root
        .join("Engine")
        .join("Build")
        .join("BatchFiles")
        .join(UAT_SCRIPT)
}

impl MigrationCommand {
    pub fn build(engine_root: &Path, plugin: &Path, destination: &Path) -> Self {
        Self {
            program: uat_script(engine_root),
            plugin: plugin.to_path_buf(),
            package_dir: destination.join(PACKAGE_SUBDIR),
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut plugin_arg = OsString::from("-plugin=");
        plugin_arg.push(&self.plugin);
        let mut package_arg = OsString::from("-package=");
        package_arg.push(&self.package_dir);
        vec![OsString::from("BuildPlugin"), plugin_arg, package_arg]
    }
}

impl fmt::Display for MigrationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" BuildPlugin -plugin=\"{}\" -package=\"{}\"",
            self.program.display(),
            self.plugin.display(),
            self.package_dir.display()
        )
    }
}
