//! Configuration renderer
//!
//! Maps `(template, context)` to the bytes of the managed service's
//! configuration file. Rendering is a pure function: the same template and
//! context always give byte-identical output. Writing is a separate, atomic
//! step ([`write_atomic`]) so the service never observes a half-written file.
//!
//! Templates use `{{ key }}` placeholders. Every placeholder must have a
//! value in the context; an unknown key fails the render instead of leaving
//! a hole in the file. Values are escaped for YAML double-quoted strings,
//! and the rendered document is parsed back as YAML before it is returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::backend::BackendContext;
use crate::error::{Error, Result};

/// Template id of the PostgreSQL configuration
pub const POSTGRESQL_TEMPLATE: &str = "thingsboard-postgresql.yml";

/// Template id of the Cassandra configuration
pub const CASSANDRA_TEMPLATE: &str = "thingsboard-cassandra.yml";

/// Context keys supplied by the reconciler on top of the backend fields
pub mod keys {
    /// Service HTTP port
    pub const PORT: &str = "port";
    /// `true` while coordination is enabled
    pub const COORDINATION_ENABLED: &str = "coordination_enabled";
    /// Comma separated coordination peers
    pub const COORDINATION_NODES: &str = "coordination_nodes";
    /// Cluster RPC port
    pub const RPC_PORT: &str = "rpc_port";
}

/// Values substituted into a template
#[derive(Clone, Default, PartialEq, Eq)]
pub struct RenderContext(BTreeMap<String, String>);

impl RenderContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the fields of a backend context
    pub fn from_backend(backend: &BackendContext) -> Self {
        Self(backend.fields().clone())
    }

    /// Replace or add one field, leaving the rest untouched
    pub fn overlay(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| {
                let shown = if k == crate::backend::keys::PASSWORD {
                    "<REDACTED>"
                } else {
                    v.as_str()
                };
                (k, shown)
            }))
            .finish()
    }
}

/// Template store and renderer
#[derive(Debug, Clone, Default)]
pub struct ConfigRenderer {
    templates: BTreeMap<String, String>,
}

impl ConfigRenderer {
    /// Create a renderer without templates
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a renderer holding the built-in templates
    pub fn with_builtin_templates() -> Self {
        let mut renderer = Self::new();
        renderer.register(
            POSTGRESQL_TEMPLATE,
            include_str!("../templates/thingsboard-postgresql.yml"),
        );
        renderer.register(
            CASSANDRA_TEMPLATE,
            include_str!("../templates/thingsboard-cassandra.yml"),
        );
        renderer
    }

    /// Register (or replace) a template
    pub fn register(&mut self, id: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(id.into(), source.into());
    }

    /// Whether a template is registered
    pub fn has_template(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    /// Replace templates with files of the same name found in `dir`
    ///
    /// Files that do not match a registered template id are ignored.
    /// Returns the number of templates replaced.
    pub async fn load_overrides(&mut self, dir: &Path) -> Result<usize> {
        let mut replaced = 0;
        let ids: Vec<String> = self.templates.keys().cloned().collect();

        for id in ids {
            let path = dir.join(&id);
            if !path.is_file() {
                continue;
            }
            let source = fs::read_to_string(&path).await.map_err(|e| {
                Error::render(format!("Failed to read template {}: {}", path.display(), e))
            })?;
            debug!("Template {} overridden from {}", id, path.display());
            self.templates.insert(id, source);
            replaced += 1;
        }

        Ok(replaced)
    }

    /// Render a template
    ///
    /// # Errors
    ///
    /// `Error::Render` if the template is unknown, references a key the
    /// context does not carry, is malformed, or does not produce valid YAML.
    pub fn render(&self, template_id: &str, context: &RenderContext) -> Result<Vec<u8>> {
        let source = self
            .templates
            .get(template_id)
            .ok_or_else(|| Error::render(format!("Unknown template '{}'", template_id)))?;

        let mut out = String::with_capacity(source.len());
        let mut rest = source.as_str();

        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                Error::render(format!("Unclosed placeholder in template '{}'", template_id))
            })?;

            let key = after[..close].trim();
            let value = context.get(key).ok_or_else(|| {
                Error::render(format!(
                    "Template '{}' references unknown key '{}'",
                    template_id, key
                ))
            })?;
            out.push_str(&escape(value));
            rest = &after[close + 2..];
        }
        out.push_str(rest);

        serde_yaml::from_str::<serde_yaml::Value>(&out).map_err(|e| {
            Error::render(format!("Template '{}' rendered invalid YAML: {}", template_id, e))
        })?;

        trace!("Rendered template {} ({} bytes)", template_id, out.len());
        Ok(out.into_bytes())
    }

    /// Render a template and write it atomically to `target`
    ///
    /// Returns `true` if the file content changed.
    pub async fn render_to(
        &self,
        template_id: &str,
        context: &RenderContext,
        target: &Path,
    ) -> Result<bool> {
        let bytes = self.render(template_id, context)?;
        write_atomic(target, &bytes).await
    }
}

// Safe inside YAML double-quoted scalars
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c.is_control() => escaped.push_str(&format!("\\x{:02x}", u32::from(c))),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Write `bytes` to `target` via a temp file in the same directory
///
/// Either the new file is in place complete, or the old one is left
/// untouched. Returns `false` without writing when the content is already
/// identical.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<bool> {
    if let Ok(existing) = fs::read(target).await
        && existing == bytes
    {
        trace!("{} unchanged, skipping write", target.display());
        return Ok(false);
    }

    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.exists() {
        fs::create_dir_all(parent).await.map_err(|e| {
            Error::render(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    let temp = temp_path(target);
    let written = async {
        let mut out = fs::File::create(&temp).await?;
        out.write_all(bytes).await?;
        out.sync_all().await?;
        fs::rename(&temp, target).await
    }
    .await;

    if let Err(e) = written {
        let _ = fs::remove_file(&temp).await;
        return Err(Error::render(format!(
            "Failed to write {}: {}",
            target.display(),
            e
        )));
    }

    debug!("Wrote {} ({} bytes)", target.display(), bytes.len());
    Ok(true)
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendKind, keys as backend_keys};
    use tempfile::tempdir;

    fn postgres_context(port: u16) -> RenderContext {
        let backend = BackendContext::new(BackendKind::Postgresql)
            .with(backend_keys::HOST, "10.0.0.5")
            .with(backend_keys::DB_PORT, "5432")
            .with(backend_keys::DATABASE, "tb_1")
            .with(backend_keys::USERNAME, "tb")
            .with(backend_keys::PASSWORD, "x");

        RenderContext::from_backend(&backend)
            .overlay(keys::PORT, port)
            .overlay(keys::COORDINATION_ENABLED, false)
            .overlay(keys::COORDINATION_NODES, "")
            .overlay(keys::RPC_PORT, 9001)
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = ConfigRenderer::with_builtin_templates();
        let first = renderer.render(POSTGRESQL_TEMPLATE, &postgres_context(8080)).unwrap();
        let second = renderer.render(POSTGRESQL_TEMPLATE, &postgres_context(8080)).unwrap();
        assert_eq!(first, second);

        let text = String::from_utf8(first).unwrap();
        assert!(text.contains("port: 8080"));
        assert!(text.contains("jdbc:postgresql://10.0.0.5:5432/tb_1"));
        assert!(text.contains("type: \"sql\""));
    }

    #[test]
    fn test_port_overlay_changes_only_port_line() {
        let renderer = ConfigRenderer::with_builtin_templates();
        let before = String::from_utf8(
            renderer.render(POSTGRESQL_TEMPLATE, &postgres_context(8080)).unwrap(),
        )
        .unwrap();
        let after = String::from_utf8(
            renderer
                .render(POSTGRESQL_TEMPLATE, &postgres_context(8080).overlay(keys::PORT, 9090))
                .unwrap(),
        )
        .unwrap();

        let changed: Vec<(&str, &str)> = before
            .lines()
            .zip(after.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed, vec![("  port: 8080", "  port: 9090")]);
    }

    #[test]
    fn test_missing_key_fails() {
        let renderer = ConfigRenderer::with_builtin_templates();
        let context = RenderContext::new().overlay(keys::PORT, 8080);
        let err = renderer.render(POSTGRESQL_TEMPLATE, &context).unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }

    #[test]
    fn test_unclosed_placeholder_fails() {
        let mut renderer = ConfigRenderer::new();
        renderer.register("broken", "port: {{ port");
        let context = RenderContext::new().overlay(keys::PORT, 8080);
        assert!(renderer.render("broken", &context).is_err());
    }

    #[test]
    fn test_values_are_escaped() {
        let mut renderer = ConfigRenderer::new();
        renderer.register("t", "password: \"{{ password }}\"\n");
        let context = RenderContext::new().overlay("password", "a\"b\\c");

        let rendered = renderer.render("t", &context).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_slice(&rendered).unwrap();
        assert_eq!(value["password"].as_str(), Some("a\"b\\c"));
    }

    #[test]
    fn test_control_characters_survive_rendering() {
        let mut renderer = ConfigRenderer::new();
        renderer.register("t", "password: \"{{ password }}\"\n");
        let raw = "a\r\nb\tc\u{1}d  e";
        let context = RenderContext::new().overlay("password", raw);

        let rendered = renderer.render("t", &context).unwrap();
        let text = String::from_utf8(rendered.clone()).unwrap();
        assert!(text.contains("a\\r\\nb\\tc\\x01d"));

        let value: serde_yaml::Value = serde_yaml::from_slice(&rendered).unwrap();
        assert_eq!(value["password"].as_str(), Some(raw));
    }

    #[test]
    fn test_debug_redacts_password() {
        let context = postgres_context(8080);
        assert!(!format!("{context:?}").contains("\"x\""));
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_and_skips_identical() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("conf").join("thingsboard.yml");

        assert!(write_atomic(&target, b"port: 1\n").await.unwrap());
        assert!(!write_atomic(&target, b"port: 1\n").await.unwrap());
        assert!(write_atomic(&target, b"port: 2\n").await.unwrap());

        assert_eq!(fs::read(&target).await.unwrap(), b"port: 2\n");
        assert!(!temp_path(&target).exists());
    }

    #[tokio::test]
    async fn test_failed_render_leaves_file_untouched() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("thingsboard.yml");
        fs::write(&target, b"port: 1\n").await.unwrap();

        let renderer = ConfigRenderer::with_builtin_templates();
        let result = renderer
            .render_to(POSTGRESQL_TEMPLATE, &RenderContext::new(), &target)
            .await;

        assert!(result.is_err());
        assert_eq!(fs::read(&target).await.unwrap(), b"port: 1\n");
    }

    #[tokio::test]
    async fn test_overrides_replace_builtin_by_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CASSANDRA_TEMPLATE), "server:\n  port: {{ port }}\n")
            .await
            .unwrap();
        fs::write(dir.path().join("unrelated.yml"), "x: 1\n").await.unwrap();

        let mut renderer = ConfigRenderer::with_builtin_templates();
        assert_eq!(renderer.load_overrides(dir.path()).await.unwrap(), 1);
        assert!(!renderer.has_template("unrelated.yml"));

        let rendered = renderer
            .render(CASSANDRA_TEMPLATE, &RenderContext::new().overlay(keys::PORT, 8080))
            .unwrap();
        assert_eq!(rendered, b"server:\n  port: 8080\n");
    }
}
