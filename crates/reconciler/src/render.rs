//! Configuration rendering and restart-on-change.
//!
//! Rendering is split in two phases that can be exercised independently:
//!
//! 1. [`ConfigRenderer::render_all`] renders every mapped file and reports
//!    which paths actually changed (SHA-256 of old vs new content).
//! 2. [`restart_set`] turns that changed set into the services to restart,
//!    each exactly once, sorted by name.
//!
//! Unchanged files are never rewritten, so a second pass with the same
//! inputs writes nothing and restarts nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::collaborators::TemplateRenderer;
use crate::error::{Error, Result};

/// Values available to templates, keyed by placeholder name.
pub type RenderContext = BTreeMap<String, String>;

/// Mode of the directory holding the gateway's Ceph configuration.
pub const CONFIG_DIR_MODE: u32 = 0o750;

#[expect(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("hardcoded regex pattern is valid")
});

/// Substitute every `{{ key }}` in `text` from `context`.
///
/// # Errors
///
/// Returns `TemplateValueMissing` naming the first unknown key.
pub fn render_placeholders(template: &str, text: &str, context: &RenderContext) -> Result<String> {
    let missing = PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|key| key.as_str())
        .find(|key| !context.contains_key(*key));
    if let Some(key) = missing {
        return Err(Error::template_value_missing(template, key));
    }

    let rendered = PLACEHOLDER.replace_all(text, |caps: &Captures<'_>| {
        caps.get(1)
            .and_then(|key| context.get(key.as_str()))
            .cloned()
            .unwrap_or_default()
    });
    Ok(rendered.into_owned())
}

// ═══════════════════════════════════════════════════════════════════════════
// RESTART MAP
// ═══════════════════════════════════════════════════════════════════════════

/// How a service is bounced after its configuration changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartProcedure {
    /// `systemctl restart <service>`
    #[default]
    Restart,
    /// `systemctl daemon-reload`, then `systemctl restart <service>`
    ReloadThenRestart,
}

/// One rendered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub path: PathBuf,
    /// Template name handed to the renderer.
    pub template: String,
    /// Services that must restart when this file changes.
    pub services: BTreeSet<String>,
    /// Permission bits applied on write.
    pub mode: u32,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>, template: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
            services: BTreeSet::new(),
            mode,
        }
    }

    #[must_use]
    pub fn restarts(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }
}

/// Rendered files plus per-service restart overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartMap {
    pub files: Vec<ConfigFile>,
    pub procedures: BTreeMap<String, RestartProcedure>,
}

impl RestartMap {
    /// Procedure for `service`, [`RestartProcedure::Restart`] unless overridden.
    pub fn procedure(&self, service: &str) -> RestartProcedure {
        self.procedures.get(service).copied().unwrap_or_default()
    }
}

/// Services mapped to any of the `changed` paths, deduplicated and sorted.
pub fn restart_set(changed: &BTreeSet<PathBuf>, map: &RestartMap) -> BTreeSet<String> {
    map.files
        .iter()
        .filter(|file| changed.contains(&file.path))
        .flat_map(|file| file.services.iter().cloned())
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════

/// Renders the restart map's files through a [`TemplateRenderer`].
pub struct ConfigRenderer {
    templates: Arc<dyn TemplateRenderer>,
}

impl ConfigRenderer {
    pub fn new(templates: Arc<dyn TemplateRenderer>) -> Self {
        Self { templates }
    }

    /// Render every file in `map` and return the paths whose content changed.
    ///
    /// All templates render before any file is written, so a template error
    /// leaves the filesystem untouched.
    ///
    /// # Errors
    ///
    /// Returns error if a template fails or a file cannot be read or written.
    pub fn render_all(&self, map: &RestartMap, context: &RenderContext) -> Result<BTreeSet<PathBuf>> {
        let rendered = map
            .files
            .iter()
            .map(|file| {
                self.templates
                    .render(&file.template, context)
                    .map(|content| (file, content))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut changed = BTreeSet::new();
        for (file, content) in rendered {
            if content_hash(&file.path)? == Some(digest(content.as_bytes())) {
                debug!(path = %file.path.display(), "Unchanged");
                continue;
            }
            write_with_mode(&file.path, content.as_bytes(), file.mode)?;
            info!(path = %file.path.display(), "Rendered");
            changed.insert(file.path.clone());
        }
        Ok(changed)
    }
}

/// Create `dir` (and parents) with [`CONFIG_DIR_MODE`].
///
/// # Errors
///
/// Returns error if the directory cannot be created.
pub fn ensure_config_dir(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(CONFIG_DIR_MODE)
        .create(dir)
        .map_err(|e| igw_core::Error::directory_creation_failed(dir, e.to_string()).into())
}

/// Write `content` to `path`, creating parents, and set `mode`.
///
/// # Errors
///
/// Returns error if the file cannot be written or its mode set.
pub fn write_with_mode(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let write_err = |e: std::io::Error| igw_core::Error::file_write_failed(path, e.to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| igw_core::Error::directory_creation_failed(parent, e.to_string()))?;
    }
    fs::write(path, content).map_err(write_err)?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(write_err)?;
    Ok(())
}

fn content_hash(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(digest(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(igw_core::Error::file_read_failed(path, e.to_string()).into()),
    }
}

fn digest(bytes: &[u8]) -> Vec<u8> {
    Sha256::digest(bytes).to_vec()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use tempfile::TempDir;

    use super::*;
    use crate::memory::MapTemplates;

    fn context(pairs: &[(&str, &str)]) -> RenderContext {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_render_placeholders() {
        let ctx = context(&[("pool", "iscsi"), ("loglevel", "1")]);
        let out = render_placeholders("t", "pool = {{ pool }}\nlog={{loglevel}}", &ctx).unwrap();
        assert_eq!(out, "pool = iscsi\nlog=1");
    }

    #[test]
    fn test_render_placeholders_unknown_key() {
        let err = render_placeholders("ceph.conf", "{{ nope }}", &RenderContext::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::TemplateValueMissing { ref template, ref key } if template == "ceph.conf" && key == "nope"
        ));
    }

    #[test]
    fn test_restart_set_dedups_and_sorts() {
        let map = RestartMap {
            files: vec![
                ConfigFile::new("/a", "a", 0o644).restarts("zeta").restarts("alpha"),
                ConfigFile::new("/b", "b", 0o644).restarts("alpha"),
                ConfigFile::new("/c", "c", 0o644).restarts("omega"),
            ],
            procedures: BTreeMap::new(),
        };
        let changed: BTreeSet<PathBuf> = [PathBuf::from("/a"), PathBuf::from("/b")].into();

        let services: Vec<String> = restart_set(&changed, &map).into_iter().collect();
        assert_eq!(services, vec!["alpha", "zeta"]);
        assert!(restart_set(&BTreeSet::new(), &map).is_empty());
    }

    #[test]
    fn test_procedure_override() {
        let mut map = RestartMap::default();
        map.procedures
            .insert("rbd-target-api".to_string(), RestartProcedure::ReloadThenRestart);

        assert_eq!(map.procedure("rbd-target-api"), RestartProcedure::ReloadThenRestart);
        assert_eq!(map.procedure("tcmu-runner"), RestartProcedure::Restart);
    }

    #[test]
    fn test_render_all_reports_only_changes() {
        let dir = TempDir::new().unwrap();
        let templates = Arc::new(
            MapTemplates::new()
                .with("one", "value={{ v }}")
                .with("two", "fixed"),
        );
        let renderer = ConfigRenderer::new(templates);
        let map = RestartMap {
            files: vec![
                ConfigFile::new(dir.path().join("one.conf"), "one", 0o640).restarts("svc"),
                ConfigFile::new(dir.path().join("two.conf"), "two", 0o644).restarts("svc"),
            ],
            procedures: BTreeMap::new(),
        };

        let first = renderer.render_all(&map, &context(&[("v", "1")])).unwrap();
        assert_eq!(first.len(), 2);

        let second = renderer.render_all(&map, &context(&[("v", "1")])).unwrap();
        assert!(second.is_empty());

        let third = renderer.render_all(&map, &context(&[("v", "2")])).unwrap();
        assert_eq!(third, [dir.path().join("one.conf")].into());

        let mode = fs::metadata(dir.path().join("one.conf"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn test_render_all_template_error_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let renderer = ConfigRenderer::new(Arc::new(MapTemplates::new().with("ok", "ok")));
        let map = RestartMap {
            files: vec![
                ConfigFile::new(dir.path().join("ok.conf"), "ok", 0o644),
                ConfigFile::new(dir.path().join("missing.conf"), "missing", 0o644),
            ],
            procedures: BTreeMap::new(),
        };

        assert!(renderer.render_all(&map, &RenderContext::new()).is_err());
        assert!(!dir.path().join("ok.conf").exists());
    }

    #[test]
    fn test_ensure_config_dir_mode() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("etc/ceph/iscsi");
        ensure_config_dir(&target).unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, CONFIG_DIR_MODE);
    }
}
