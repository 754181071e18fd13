//! Userscript registry backed by a scripts directory.
//!
//! Every regular file directly under the directory is one script. Files ending
//! in `.tmp` are in-progress downloads and are skipped. A file that cannot be
//! loaded does not abort the scan: it shows up as a [`ScriptEntry::LoadError`]
//! so the host can display what went wrong, and it never injects.
//!
//! The registry is rebuilt as a whole. [`ScriptRegistry::invalidate`] marks it
//! dirty and the next [`ScriptRegistry::scripts`] call rescans the directory and
//! swaps in the new list in one step, so readers see either the old or the new
//! list and never a partial scan.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::{ScriptError, ScriptResult};
use super::userscript::Userscript;

/// Suffix of temporary download files.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// One entry of the registry: a parsed script or the reason it failed to load.
#[derive(Debug, Clone)]
pub enum ScriptEntry {
    /// Successfully parsed script.
    Parsed(Userscript),
    /// The file could not be loaded.
    LoadError {
        /// Name of the file that failed.
        file_name: String,
        /// Error text.
        message: String,
    },
}

impl ScriptEntry {
    /// Display name. Failed entries use their file name.
    pub fn name(&self) -> &str {
        match self {
            ScriptEntry::Parsed(script) => &script.name,
            ScriptEntry::LoadError { file_name, .. } => file_name,
        }
    }

    /// File name inside the scripts directory.
    pub fn file_name(&self) -> &str {
        match self {
            ScriptEntry::Parsed(script) => &script.file_name,
            ScriptEntry::LoadError { file_name, .. } => file_name,
        }
    }

    /// Script version, empty for failed entries.
    pub fn version(&self) -> &str {
        match self {
            ScriptEntry::Parsed(script) => &script.version,
            ScriptEntry::LoadError { .. } => "",
        }
    }

    /// Script author, empty for failed entries.
    pub fn author(&self) -> &str {
        match self {
            ScriptEntry::Parsed(script) => &script.author,
            ScriptEntry::LoadError { .. } => "",
        }
    }

    /// Description. Failed entries describe their error.
    pub fn description(&self) -> Cow<'_, str> {
        match self {
            ScriptEntry::Parsed(script) => Cow::Borrowed(&script.description),
            ScriptEntry::LoadError { message, .. } => Cow::Owned(format!("Error: {}", message)),
        }
    }

    /// The parsed script, if loading succeeded.
    pub fn script(&self) -> Option<&Userscript> {
        match self {
            ScriptEntry::Parsed(script) => Some(script),
            ScriptEntry::LoadError { .. } => None,
        }
    }

    /// Whether this entry is a load failure.
    pub fn is_error(&self) -> bool {
        matches!(self, ScriptEntry::LoadError { .. })
    }

    /// Whether this entry applies to the request. Failed entries never match.
    pub fn matches(&self, scheme: &str, host: &str, path: &str) -> bool {
        self.script()
            .is_some_and(|script| script.matches(scheme, host, path))
    }

    /// Serializable summary for listings.
    pub fn summary(&self) -> ScriptSummary {
        ScriptSummary {
            name: self.name().to_string(),
            author: self.author().to_string(),
            version: self.version().to_string(),
            description: self.description().into_owned(),
            file_name: self.file_name().to_string(),
            matches: self
                .script()
                .map(|s| s.match_rules.iter().map(|r| r.pattern().to_string()).collect())
                .unwrap_or_default(),
            error: self.is_error(),
        }
    }
}

/// Script metadata as exposed to the host.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptSummary {
    /// Script name.
    pub name: String,
    /// Script author.
    pub author: String,
    /// Script version.
    pub version: String,
    /// Description, or the load error.
    pub description: String,
    /// File name inside the scripts directory.
    pub file_name: String,
    /// `@match` rules as written.
    pub matches: Vec<String>,
    /// Whether the script failed to load.
    pub error: bool,
}

/// Cache of the scripts found in one directory.
pub struct ScriptRegistry {
    /// Directory scanned for scripts.
    dir: PathBuf,
    /// Current script list, replaced wholesale on reload.
    scripts: RwLock<Arc<Vec<ScriptEntry>>>,
    /// Set by `invalidate`, cleared by the next reload.
    needs_reload: AtomicBool,
}

impl ScriptRegistry {
    /// Create a registry for `dir` and load it.
    ///
    /// The directory is created if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let registry = Self {
            dir: dir.into(),
            scripts: RwLock::new(Arc::new(Vec::new())),
            needs_reload: AtomicBool::new(false),
        };
        registry.reload();
        registry
    }

    /// Directory backing this registry.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a script file inside the directory.
    pub fn script_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Mark the registry dirty. The next `scripts()` call rescans.
    pub fn invalidate(&self) {
        self.needs_reload.store(true, Ordering::Release);
        debug!("Script registry invalidated");
    }

    /// Whether a rescan is pending.
    pub fn needs_reload(&self) -> bool {
        self.needs_reload.load(Ordering::Acquire)
    }

    /// Current scripts, rescanning first if the registry was invalidated.
    pub fn scripts(&self) -> Arc<Vec<ScriptEntry>> {
        if self.needs_reload.swap(false, Ordering::AcqRel) {
            self.reload();
        }

        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rescan the directory and replace the script list.
    ///
    /// If the directory itself cannot be scanned, the previous list is kept.
    fn reload(&self) {
        let scripts = match Self::load(&self.dir) {
            Ok(scripts) => scripts,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        for entry in &scripts {
            if let ScriptEntry::Parsed(script) = entry {
                let version = if script.version.is_empty() {
                    " unknown"
                } else {
                    &script.version
                };
                info!("Loaded \"{}\" v{}", script.name, version);
            }
        }

        *self.scripts.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(scripts);
    }

    /// Scan `dir` and load every script file, in directory-listing order.
    ///
    /// Only directory-level failures are errors. A file that cannot be loaded
    /// becomes a [`ScriptEntry::LoadError`].
    pub fn load(dir: &Path) -> ScriptResult<Vec<ScriptEntry>> {
        fs::create_dir_all(dir).map_err(|source| ScriptError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let entries = fs::read_dir(dir).map_err(|source| ScriptError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut scripts = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to read entry in {:?}: {}", dir, e);
                    continue;
                }
            };

            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(TEMP_FILE_SUFFIX) {
                continue;
            }
            if entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }

            let entry = match Self::load_file(&entry.path()) {
                Ok(script) => ScriptEntry::Parsed(script),
                Err(e) => {
                    warn!("Loading {} failed: {}", file_name, e);
                    ScriptEntry::LoadError {
                        file_name,
                        message: e.to_string(),
                    }
                }
            };
            scripts.push(entry);
        }

        Ok(scripts)
    }

    /// Load a single script file.
    ///
    /// The script's name defaults to the file name without its extension.
    pub fn load_file(path: &Path) -> ScriptResult<Userscript> {
        let bytes = fs::read(path).map_err(|source| ScriptError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let content = String::from_utf8(bytes).map_err(|_| ScriptError::InvalidUtf8 {
            path: path.to_path_buf(),
        })?;

        let mut script = Userscript::parse(&content);
        script.file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if script.name.is_empty() {
            script.name = path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, content: &[u8]) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_load_skips_temp_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.js", b"// @name A\na();\n");
        write(dir.path(), "b.js.tmp", b"// @name B\nb();\n");

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].name(), "A");
    }

    #[test]
    fn test_name_defaults_to_file_stem() {
        let dir = tempdir().unwrap();
        write(dir.path(), "dark-mode.js", b"// @version 2\nx();\n");

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        let script = scripts[0].script().unwrap();
        assert_eq!(script.name, "dark-mode");
        assert_eq!(script.file_name, "dark-mode.js");
        assert_eq!(script.version, "2");
    }

    #[test]
    fn test_invalid_file_becomes_placeholder() {
        let dir = tempdir().unwrap();
        write(dir.path(), "broken.js", &[0xff, 0xfe, 0x00, 0x80]);
        write(dir.path(), "good.js", b"// @name Good\n// @match *://*/*\ng();\n");

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        assert_eq!(scripts.len(), 2);

        let broken = scripts.iter().find(|s| s.file_name() == "broken.js").unwrap();
        assert!(broken.is_error());
        assert_eq!(broken.name(), "broken.js");
        assert!(broken.description().starts_with("Error: "));
        assert!(!broken.matches("https", "example.com", "/"));

        let good = scripts.iter().find(|s| s.name() == "Good").unwrap();
        assert!(!good.is_error());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_becomes_placeholder() {
        let dir = tempdir().unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling.js"))
            .unwrap();

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].is_error());
        assert_eq!(scripts[0].file_name(), "dangling.js");
    }

    #[test]
    fn test_subdirectories_are_skipped() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write(dir.path(), "a.js", b"a();\n");

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        assert_eq!(scripts.len(), 1);
    }

    #[test]
    fn test_directory_created_if_missing() {
        let dir = tempdir().unwrap();
        let scripts_dir = dir.path().join("js_injector");

        let registry = ScriptRegistry::new(&scripts_dir);
        assert!(scripts_dir.is_dir());
        assert!(registry.scripts().is_empty());

        // Creating it again is not an error
        assert!(ScriptRegistry::load(&scripts_dir).unwrap().is_empty());
    }

    #[test]
    fn test_load_preserves_directory_order() {
        let dir = tempdir().unwrap();
        for name in ["c.js", "a.js", "b.js"] {
            write(dir.path(), name, b"x();\n");
        }

        let listing: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        let loaded: Vec<String> = ScriptRegistry::load(dir.path())
            .unwrap()
            .iter()
            .map(|s| s.file_name().to_string())
            .collect();

        assert_eq!(loaded, listing);
    }

    #[test]
    fn test_invalidate_triggers_reload() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.js", b"// @name A\na();\n");

        let registry = ScriptRegistry::new(dir.path());
        assert_eq!(registry.scripts().len(), 1);

        write(dir.path(), "b.js", b"// @name B\nb();\n");
        // Not visible until invalidated
        assert_eq!(registry.scripts().len(), 1);

        registry.invalidate();
        assert!(registry.needs_reload());
        assert_eq!(registry.scripts().len(), 2);
        assert!(!registry.needs_reload());
    }

    #[test]
    fn test_script_path() {
        let dir = tempdir().unwrap();
        let registry = ScriptRegistry::new(dir.path().join("scripts"));
        assert_eq!(registry.script_path("a.js"), dir.path().join("scripts").join("a.js"));
    }

    #[test]
    fn test_summary_lists_rules() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "a.js",
            b"// @name A\n// @match https://*/*\n// @match http://x.org\na();\n",
        );

        let scripts = ScriptRegistry::load(dir.path()).unwrap();
        let summary = scripts[0].summary();
        assert_eq!(summary.matches, vec!["https://*/*", "http://x.org"]);
        assert!(!summary.error);
    }
}
