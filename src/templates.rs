//! Templates read from a directory on disk.

use std::fs;
use std::path::PathBuf;

use igw_reconciler::{RenderContext, Result, TemplateRenderer, render_placeholders};

/// Renders `{{ key }}` templates found under one directory.
#[derive(Debug, Clone)]
pub struct FileTemplates {
    dir: PathBuf,
}

impl FileTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TemplateRenderer for FileTemplates {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String> {
        let path = self.dir.join(template);
        let text = fs::read_to_string(&path)
            .map_err(|e| igw_core::Error::file_read_failed(&path, e.to_string()))?;
        render_placeholders(template, &text, context)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_renders_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ceph.conf"), "mon host = {{ mon_hosts }}\n").unwrap();
        let templates = FileTemplates::new(dir.path());
        let context: RenderContext = [("mon_hosts".to_string(), "10.0.0.1".to_string())].into();

        let out = templates.render("ceph.conf", &context).unwrap();
        assert_eq!(out, "mon host = 10.0.0.1\n");
    }

    #[test]
    fn test_missing_template() {
        let dir = TempDir::new().unwrap();
        let templates = FileTemplates::new(dir.path());
        assert!(templates.render("absent.cfg", &RenderContext::new()).is_err());
    }

    #[test]
    fn test_shipped_templates_render_with_full_context() {
        let templates = FileTemplates::new(concat!(env!("CARGO_MANIFEST_DIR"), "/templates"));
        let context: RenderContext = [
            "admin_password",
            "ceph_config_dir",
            "ceph_key",
            "client_name",
            "enable_tls",
            "gateway_ip",
            "loglevel",
            "mon_hosts",
            "pool_name",
            "release",
            "trusted_ips",
            "use_syslog",
        ]
        .into_iter()
        .map(|key| (key.to_string(), format!("<{key}>")))
        .collect();

        for name in ["ceph.conf", "iscsi-gateway.cfg", "ceph.client.ceph-iscsi.keyring"] {
            let out = templates.render(name, &context).unwrap();
            assert!(!out.contains("{{"), "{name} left a placeholder");
        }
    }
}
