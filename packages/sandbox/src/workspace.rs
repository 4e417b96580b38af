// ABOUTME: Ephemeral project builder
// ABOUTME: Materializes a task's files into a fresh, uniquely named workspace and removes it afterwards

use crate::error::BuildError;
use crate::types::{Language, Task, TaskPayload};
use crate::validation::validate_project_path;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entry points probed, in order, when a node project has no manifest.
const NODE_ENTRY_CANDIDATES: [&str; 4] = ["index.js", "server.js", "app.js", "main.js"];

/// Static file server used when a node project ships no entry point at all.
const DEFAULT_NODE_SERVER: &str = r#"const http = require('http');
const fs = require('fs');
const path = require('path');

const root = fs.existsSync(path.join(__dirname, 'public'))
  ? path.join(__dirname, 'public')
  : __dirname;
const types = {
  '.html': 'text/html', '.css': 'text/css', '.js': 'text/javascript',
  '.json': 'application/json', '.png': 'image/png', '.svg': 'image/svg+xml',
};

http.createServer((req, res) => {
  const url = decodeURIComponent(req.url.split('?')[0]);
  let file = path.join(root, path.normalize(url));
  if (!file.startsWith(root)) { res.writeHead(403); return res.end(); }
  if (fs.existsSync(file) && fs.statSync(file).isDirectory()) file = path.join(file, 'index.html');
  if (!fs.existsSync(file) && fs.existsSync(file + '.html')) file += '.html';
  fs.readFile(file, (err, data) => {
    if (err) { res.writeHead(404, { 'Content-Type': 'text/plain' }); return res.end('Not found'); }
    res.writeHead(200, { 'Content-Type': types[path.extname(file)] || 'application/octet-stream' });
    res.end(data);
  });
}).listen(process.env.PORT || 3000, process.env.HOST || '0.0.0.0');
"#;

/// A task's private directory tree.
///
/// Removed by [`Workspace::remove`]; if that never runs, `Drop` removes the
/// directory synchronously.
#[derive(Debug)]
pub struct Workspace {
    task_id: String,
    path: PathBuf,
    files: Vec<String>,
    dev_script: Option<String>,
    removed: bool,
}

impl Workspace {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Relative paths of every file written, scaffolds included.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The manifest's `dev` script, for node projects.
    pub fn dev_script(&self) -> Option<&str> {
        self.dev_script.as_deref()
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Delete the workspace directory. Safe to call more than once.
    pub async fn remove(&mut self) -> std::io::Result<()> {
        if self.removed {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.removed = true;
        debug!("Removed workspace {}", self.path.display());
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed workspace {} on drop", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove workspace {} on drop: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Creates workspaces under a single root directory.
#[derive(Debug, Clone)]
pub struct ProjectBuilder {
    root: PathBuf,
}

impl ProjectBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root if needed and prove it is writable.
    pub async fn ensure_root(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(format!(".probe-{}", Uuid::new_v4().simple()));
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }

    /// Materialize a validated task: its single source becomes the language's
    /// entry file, its project is written as-is, then scaffolds are added.
    pub async fn materialize(&self, task: &Task) -> Result<Workspace, BuildError> {
        let files = match &task.payload {
            TaskPayload::Single(source) => {
                let content = if task.language == Language::Html {
                    wrap_html_fragment(source)
                } else {
                    source.clone()
                };
                BTreeMap::from([(task.language.entry_file().to_string(), content)])
            }
            TaskPayload::Project(files) => files.clone(),
        };

        self.materialize_files(&task.id, files, task.language).await
    }

    /// Write `files` into a new workspace. Nothing is left behind on failure.
    pub async fn materialize_files(
        &self,
        task_id: &str,
        mut files: BTreeMap<String, String>,
        language: Language,
    ) -> Result<Workspace, BuildError> {
        for path in files.keys() {
            validate_project_path(path).map_err(|reason| BuildError::InvalidPath {
                path: path.clone(),
                reason,
            })?;
        }

        let dev_script = synthesize_scaffold(&mut files, language)?;

        let dir_name = format!("{}-{}", task_id, Uuid::new_v4().simple());
        let path = self.root.join(dir_name);

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| BuildError::Write {
                path: self.root.display().to_string(),
                source,
            })?;
        tokio::fs::create_dir(&path)
            .await
            .map_err(|source| BuildError::Write {
                path: path.display().to_string(),
                source,
            })?;

        let mut workspace = Workspace {
            task_id: task_id.to_string(),
            path,
            files: files.keys().cloned().collect(),
            dev_script,
            removed: false,
        };

        if let Err(e) = write_files(workspace.path(), &files).await {
            if let Err(cleanup) = workspace.remove().await {
                warn!(
                    "Failed to roll back workspace {}: {}",
                    workspace.path().display(),
                    cleanup
                );
            }
            return Err(e);
        }

        info!(
            "Materialized {} file(s) for task {} in {}",
            files.len(),
            task_id,
            workspace.path().display()
        );
        Ok(workspace)
    }
}

async fn write_files(root: &Path, files: &BTreeMap<String, String>) -> Result<(), BuildError> {
    for (relative, content) in files {
        let target = root.join(relative);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BuildError::Write {
                    path: relative.clone(),
                    source,
                })?;
        }
        tokio::fs::write(&target, content)
            .await
            .map_err(|source| BuildError::Write {
                path: relative.clone(),
                source,
            })?;
    }
    Ok(())
}

/// Add the files a language needs but the task omitted. Returns the node
/// `dev` script when there is one.
fn synthesize_scaffold(
    files: &mut BTreeMap<String, String>,
    language: Language,
) -> Result<Option<String>, BuildError> {
    match language {
        Language::Html => {
            if !files.contains_key("index.html") {
                let index = html_index(files);
                files.insert("index.html".to_string(), index);
            }
            Ok(None)
        }
        Language::Node => node_scaffold(files).map(Some),
        _ => Ok(None),
    }
}

fn node_scaffold(files: &mut BTreeMap<String, String>) -> Result<String, BuildError> {
    let entry = NODE_ENTRY_CANDIDATES
        .iter()
        .find(|candidate| files.contains_key(**candidate))
        .map(|candidate| candidate.to_string());

    let Some(raw_manifest) = files.get("package.json").cloned() else {
        let entry = entry.unwrap_or_else(|| {
            files.insert("index.js".to_string(), DEFAULT_NODE_SERVER.to_string());
            "index.js".to_string()
        });
        let dev = format!("node {}", entry);
        let manifest = serde_json::json!({
            "name": "labrun-project",
            "private": true,
            "scripts": { "dev": dev, "start": dev },
        });
        files.insert("package.json".to_string(), pretty(&manifest)?);
        return Ok(dev);
    };

    let mut manifest: serde_json::Value =
        serde_json::from_str(&raw_manifest).map_err(|e| BuildError::InvalidPath {
            path: "package.json".to_string(),
            reason: format!("not valid JSON: {}", e),
        })?;

    let scripts = manifest
        .as_object_mut()
        .ok_or_else(|| BuildError::InvalidPath {
            path: "package.json".to_string(),
            reason: "top level must be an object".to_string(),
        })?
        .entry("scripts")
        .or_insert_with(|| serde_json::json!({}));

    if let Some(dev) = scripts.get("dev").and_then(|v| v.as_str()) {
        return Ok(dev.to_string());
    }

    let dev = scripts
        .get("start")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| entry.map(|e| format!("node {}", e)))
        .ok_or_else(|| BuildError::InvalidPath {
            path: "package.json".to_string(),
            reason: "no 'dev' or 'start' script and no entry file".to_string(),
        })?;

    if let Some(map) = scripts.as_object_mut() {
        map.insert("dev".to_string(), serde_json::Value::String(dev.clone()));
    }
    files.insert("package.json".to_string(), pretty(&manifest)?);
    Ok(dev)
}

fn pretty(value: &serde_json::Value) -> Result<String, BuildError> {
    serde_json::to_string_pretty(value).map_err(|e| BuildError::InvalidPath {
        path: "package.json".to_string(),
        reason: e.to_string(),
    })
}

/// Minimal index linking every other page of an html project.
fn html_index(files: &BTreeMap<String, String>) -> String {
    let links: String = files
        .keys()
        .filter(|path| path.ends_with(".html") || path.ends_with(".htm"))
        .map(|path| format!("<li><a href=\"{0}\">{0}</a></li>\n", path))
        .collect();
    wrap_html_fragment(&format!("<h1>Pages</h1>\n<ul>\n{}</ul>", links))
}

/// Wrap an html fragment in a complete document. Complete documents pass
/// through unchanged.
pub fn wrap_html_fragment(source: &str) -> String {
    let head = source.trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype") || head.starts_with("<html") {
        return source.to_string();
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Output</title>
<style>
body {{ margin: 0; padding: 20px; font-family: Arial, sans-serif; background: #ffffff; color: #333333; line-height: 1.6; }}
</style>
</head>
<body>
{}
</body>
</html>
"#,
        source
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn files(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_materialize_writes_nested_files() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());

        let ws = builder
            .materialize_files(
                "t1",
                files(&[("index.html", "<h1>hi</h1>"), ("css/site.css", "h1{}")]),
                Language::Html,
            )
            .await
            .unwrap();

        assert!(ws.path().starts_with(root.path()));
        assert_eq!(
            std::fs::read_to_string(ws.path().join("css/site.css")).unwrap(),
            "h1{}"
        );
    }

    #[tokio::test]
    async fn test_same_task_gets_distinct_workspaces() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());

        let a = builder
            .materialize_files("same", files(&[("main.sh", "echo a")]), Language::Shell)
            .await
            .unwrap();
        let b = builder
            .materialize_files("same", files(&[("main.sh", "echo a")]), Language::Shell)
            .await
            .unwrap();

        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_anything_is_written() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());

        let err = builder
            .materialize_files(
                "t2",
                files(&[("ok.js", "1"), ("../../evil.js", "2")]),
                Language::Node,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::InvalidPath { .. }));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_rolls_back() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());

        // "a" is written as a file, so "a/b.txt" cannot be created under it.
        let err = builder
            .materialize_files(
                "t3",
                files(&[("a", "file"), ("a/b.txt", "nested")]),
                Language::Shell,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Write { .. }));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());
        let mut ws = builder
            .materialize_files("t4", files(&[("main.py", "print(1)")]), Language::Python)
            .await
            .unwrap();

        let path = ws.path().to_path_buf();
        ws.remove().await.unwrap();
        ws.remove().await.unwrap();
        assert!(!path.exists());
        assert!(ws.is_removed());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());
        let ws = builder
            .materialize_files("t5", files(&[("main.py", "print(1)")]), Language::Python)
            .await
            .unwrap();

        let path = ws.path().to_path_buf();
        drop(ws);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_node_scaffold_without_manifest_or_entry() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());
        let ws = builder
            .materialize_files(
                "t6",
                files(&[("public/index.html", "<h1>home</h1>")]),
                Language::Node,
            )
            .await
            .unwrap();

        assert_eq!(ws.dev_script(), Some("node index.js"));
        assert!(ws.path().join("index.js").exists());
        let manifest = std::fs::read_to_string(ws.path().join("package.json")).unwrap();
        assert!(manifest.contains("\"dev\": \"node index.js\""));
    }

    #[tokio::test]
    async fn test_node_manifest_gets_dev_from_start() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());
        let ws = builder
            .materialize_files(
                "t7",
                files(&[
                    ("package.json", r#"{"name":"x","scripts":{"start":"node server.js"}}"#),
                    ("server.js", "require('http')"),
                ]),
                Language::Node,
            )
            .await
            .unwrap();

        assert_eq!(ws.dev_script(), Some("node server.js"));
    }

    #[tokio::test]
    async fn test_node_manifest_must_be_json() {
        let root = TempDir::new().unwrap();
        let builder = ProjectBuilder::new(root.path());
        let err = builder
            .materialize_files("t8", files(&[("package.json", "{oops")]), Language::Node)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("package.json"));
    }

    #[test]
    fn test_wrap_html_fragment() {
        let wrapped = wrap_html_fragment("<p>fragment</p>");
        assert!(wrapped.starts_with("<!DOCTYPE html>"));
        assert!(wrapped.contains("<p>fragment</p>"));

        let full = "<!doctype html><html><body>x</body></html>";
        assert_eq!(wrap_html_fragment(full), full);
    }

    #[test]
    fn test_html_index_links_pages() {
        let mut project = files(&[("about.html", "a"), ("contact.html", "c")]);
        synthesize_scaffold(&mut project, Language::Html).unwrap();
        let index = &project["index.html"];
        assert!(index.contains("href=\"about.html\""));
        assert!(index.contains("href=\"contact.html\""));
    }
}
