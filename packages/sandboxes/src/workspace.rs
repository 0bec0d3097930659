// ABOUTME: On-disk project trees backing each sandbox
// ABOUTME: Materializes file maps, reads and overwrites single files, and lists a whole tree

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{IoOp, Result, SandboxError};

/// Directories produced inside the bind mount by the container, never part of the project listing
const SKIPPED_DIRS: &[&str] = &["node_modules", ".next", ".git"];

/// Root directory holding one `sandbox-<id>` tree per sandbox
#[derive(Debug, Clone)]
pub struct SandboxWorkspace {
    root: PathBuf,
}

impl SandboxWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the tree of one sandbox
    pub fn sandbox_dir(&self, sandbox_id: &str) -> Result<PathBuf> {
        let valid = !sandbox_id.is_empty()
            && sandbox_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SandboxError::InvalidPath(format!(
                "invalid sandbox id '{}'",
                sandbox_id
            )));
        }
        Ok(self.root.join(format!("sandbox-{}", sandbox_id)))
    }

    /// Resolve a project-relative path under the sandbox tree.
    ///
    /// A leading `/` is stripped; anything that would leave the tree is rejected.
    pub fn resolve(&self, sandbox_id: &str, file_path: &str) -> Result<PathBuf> {
        let relative = normalize_relative(file_path)?;
        Ok(self.sandbox_dir(sandbox_id)?.join(relative))
    }

    /// Resolve like [`Self::resolve`], then follow symlinks already on disk.
    ///
    /// The deepest existing component of the path must canonicalize to a
    /// location under the sandbox tree, so a link planted inside the tree
    /// cannot redirect reads or writes elsewhere on the host.
    async fn resolve_on_disk(&self, sandbox_id: &str, file_path: &str) -> Result<PathBuf> {
        let full_path = self.resolve(sandbox_id, file_path)?;
        let sandbox_root = self.sandbox_dir(sandbox_id)?;

        let canonical_root = match tokio::fs::canonicalize(&sandbox_root).await {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(full_path),
            Err(e) => return Err(SandboxError::io(IoOp::Read, &sandbox_root, e)),
        };

        for candidate in full_path
            .ancestors()
            .take_while(|p| p.starts_with(&sandbox_root))
        {
            if tokio::fs::symlink_metadata(candidate).await.is_err() {
                continue;
            }
            // Dangling links fail to canonicalize and are rejected as well
            let contained = tokio::fs::canonicalize(candidate)
                .await
                .map(|target| target.starts_with(&canonical_root))
                .unwrap_or(false);
            if !contained {
                warn!(
                    "Rejected {} in sandbox {}: resolves outside the sandbox tree",
                    file_path, sandbox_id
                );
                return Err(SandboxError::InvalidPath(file_path.to_string()));
            }
            break;
        }

        Ok(full_path)
    }

    /// Write every entry of `files` under the sandbox tree.
    ///
    /// Intermediate directories are created as needed and existing files are
    /// overwritten. Stops at the first failure without rolling back.
    pub async fn materialize(
        &self,
        sandbox_id: &str,
        files: &HashMap<String, String>,
    ) -> Result<()> {
        let sandbox_root = self.sandbox_dir(sandbox_id)?;
        tokio::fs::create_dir_all(&sandbox_root)
            .await
            .map_err(|e| SandboxError::io(IoOp::Mkdir, &sandbox_root, e))?;

        for (file_path, content) in files {
            let full_path = self.resolve_on_disk(sandbox_id, file_path).await?;

            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SandboxError::io(IoOp::Mkdir, parent, e))?;
            }

            tokio::fs::write(&full_path, content)
                .await
                .map_err(|e| SandboxError::io(IoOp::Write, &full_path, e))?;
        }

        info!(
            "Materialized {} files for sandbox {} at {}",
            files.len(),
            sandbox_id,
            sandbox_root.display()
        );
        Ok(())
    }

    /// Read one file as UTF-8
    pub async fn read_file(&self, sandbox_id: &str, file_path: &str) -> Result<String> {
        let full_path = self.resolve_on_disk(sandbox_id, file_path).await?;

        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(SandboxError::FileNotFound(file_path.to_string()))
            }
            Err(e) => Err(SandboxError::io(IoOp::Read, &full_path, e)),
        }
    }

    /// Overwrite one file.
    ///
    /// The parent directory must already exist; new directories are only
    /// created at materialization time.
    pub async fn write_file(&self, sandbox_id: &str, file_path: &str, content: &str) -> Result<()> {
        let full_path = self.resolve_on_disk(sandbox_id, file_path).await?;

        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| SandboxError::io(IoOp::Write, &full_path, e))?;

        debug!("Updated {} in sandbox {}", file_path, sandbox_id);
        Ok(())
    }

    /// Walk the whole tree and return every project file keyed by its relative path
    pub async fn list_project_files(&self, sandbox_id: &str) -> Result<HashMap<String, String>> {
        let sandbox_root = self.sandbox_dir(sandbox_id)?;
        if !sandbox_root.is_dir() {
            return Err(SandboxError::SandboxNotFound(sandbox_id.to_string()));
        }

        let walk_root = sandbox_root.clone();
        tokio::task::spawn_blocking(move || collect_files(&walk_root))
            .await
            .map_err(|e| {
                SandboxError::io(IoOp::Read, &sandbox_root, std::io::Error::other(e))
            })?
    }

    /// Delete the sandbox tree; a missing tree is not an error
    pub async fn remove(&self, sandbox_id: &str) -> Result<()> {
        let sandbox_root = self.sandbox_dir(sandbox_id)?;

        match tokio::fs::remove_dir_all(&sandbox_root).await {
            Ok(()) => {
                info!("Removed tree for sandbox {}", sandbox_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::io(IoOp::Remove, &sandbox_root, e)),
        }
    }
}

/// Turn a client-supplied path into a relative path made only of normal components
fn normalize_relative(file_path: &str) -> Result<PathBuf> {
    let trimmed = file_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(SandboxError::InvalidPath(file_path.to_string()));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return Err(SandboxError::InvalidPath(file_path.to_string())),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(SandboxError::InvalidPath(file_path.to_string()));
    }
    Ok(relative)
}

fn collect_files(root: &Path) -> Result<HashMap<String, String>> {
    let mut files = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !SKIPPED_DIRS.iter().any(|skipped| *skipped == name)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match std::fs::read(entry.path()) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(content) => {
                    files.insert(key, content);
                }
                Err(_) => debug!("Skipping non UTF-8 file {}", key),
            },
            Err(e) => warn!("Failed to read file {}: {}", key, e),
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn workspace() -> (SandboxWorkspace, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        (SandboxWorkspace::new(temp_dir.path()), temp_dir)
    }

    fn file_map(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_materialize_then_read_every_file() {
        let (workspace, _temp_dir) = workspace();
        let files = file_map(&[
            ("package.json", "{\"name\":\"demo\"}"),
            ("src/app/page.tsx", "export default function Page() {}"),
            ("/src/app/layout.tsx", "layout"),
            ("src/components/ui/button.tsx", "button"),
        ]);

        workspace.materialize("sbx1", &files).await.unwrap();

        for (path, content) in &files {
            let read = workspace.read_file("sbx1", path).await.unwrap();
            assert_eq!(&read, content);
        }
    }

    #[tokio::test]
    async fn test_materialize_overwrites_existing_files() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/a.ts", "old")]))
            .await
            .unwrap();
        workspace
            .materialize("sbx1", &file_map(&[("src/a.ts", "new")]))
            .await
            .unwrap();

        assert_eq!(workspace.read_file("sbx1", "src/a.ts").await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_write_then_read_round_trip() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/app/page.tsx", "A")]))
            .await
            .unwrap();

        workspace
            .write_file("sbx1", "src/app/page.tsx", "X")
            .await
            .unwrap();
        assert_eq!(
            workspace.read_file("sbx1", "src/app/page.tsx").await.unwrap(),
            "X"
        );
    }

    #[tokio::test]
    async fn test_write_outside_materialized_tree_fails() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/app/page.tsx", "A")]))
            .await
            .unwrap();

        let result = workspace.write_file("sbx1", "lib/new/file.ts", "X").await;
        assert!(matches!(
            result,
            Err(SandboxError::Io { op: IoOp::Write, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/app/page.tsx", "A")]))
            .await
            .unwrap();

        let result = workspace.read_file("sbx1", "does/not/exist.ts").await;
        assert!(matches!(result, Err(SandboxError::FileNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_project_files_recurses_and_skips_install_output() {
        let (workspace, _temp_dir) = workspace();
        let files = file_map(&[
            ("package.json", "{}"),
            ("src/app/page.tsx", "page"),
            ("src/app/dashboard/settings/page.tsx", "deep"),
            ("public/logo.svg", "<svg/>"),
        ]);
        workspace.materialize("sbx1", &files).await.unwrap();
        workspace
            .materialize(
                "sbx1",
                &file_map(&[("node_modules/react/index.js", "module.exports = {}")]),
            )
            .await
            .unwrap();

        let listed = workspace.list_project_files("sbx1").await.unwrap();
        assert_eq!(listed, files);
    }

    #[tokio::test]
    async fn test_remove_deletes_tree_and_is_idempotent() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/a.ts", "a")]))
            .await
            .unwrap();

        workspace.remove("sbx1").await.unwrap();
        assert!(!workspace.sandbox_dir("sbx1").unwrap().exists());
        workspace.remove("sbx1").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_cannot_lead_outside_the_tree() {
        let (workspace, _temp_dir) = workspace();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "host secret").unwrap();
        workspace
            .materialize("sbx1", &file_map(&[("src/app/page.tsx", "A")]))
            .await
            .unwrap();

        let sandbox_dir = workspace.sandbox_dir("sbx1").unwrap();
        std::os::unix::fs::symlink(outside.path(), sandbox_dir.join("src/linked")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            sandbox_dir.join("secret.txt"),
        )
        .unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("missing.txt"),
            sandbox_dir.join("dangling.txt"),
        )
        .unwrap();

        for path in ["src/linked/secret.txt", "secret.txt"] {
            assert!(matches!(
                workspace.read_file("sbx1", path).await,
                Err(SandboxError::InvalidPath(_))
            ));
        }
        for path in ["src/linked/secret.txt", "src/linked/new.txt", "dangling.txt"] {
            assert!(matches!(
                workspace.write_file("sbx1", path, "X").await,
                Err(SandboxError::InvalidPath(_))
            ));
        }
        assert!(matches!(
            workspace
                .materialize("sbx1", &file_map(&[("src/linked/nested/a.ts", "X")]))
                .await,
            Err(SandboxError::InvalidPath(_))
        ));

        assert_eq!(
            std::fs::read_to_string(outside.path().join("secret.txt")).unwrap(),
            "host secret"
        );
        assert!(!outside.path().join("new.txt").exists());
        assert!(!outside.path().join("missing.txt").exists());
        assert!(!outside.path().join("nested").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_within_the_tree_are_followed() {
        let (workspace, _temp_dir) = workspace();
        workspace
            .materialize("sbx1", &file_map(&[("src/app/page.tsx", "A")]))
            .await
            .unwrap();

        let sandbox_dir = workspace.sandbox_dir("sbx1").unwrap();
        std::os::unix::fs::symlink(sandbox_dir.join("src/app"), sandbox_dir.join("app")).unwrap();

        assert_eq!(workspace.read_file("sbx1", "app/page.tsx").await.unwrap(), "A");
    }

    #[rstest]
    #[case("../escape.ts")]
    #[case("src/../../escape.ts")]
    #[case("")]
    #[case("/")]
    fn test_resolve_rejects_paths_leaving_the_tree(#[case] path: &str) {
        let workspace = SandboxWorkspace::new("/tmp/previewbox");
        assert!(matches!(
            workspace.resolve("sbx1", path),
            Err(SandboxError::InvalidPath(_))
        ));
    }

    #[rstest]
    #[case("src/app/page.tsx", "src/app/page.tsx")]
    #[case("/src/app/page.tsx", "src/app/page.tsx")]
    #[case("./package.json", "package.json")]
    fn test_resolve_strips_leading_separator(#[case] path: &str, #[case] expected: &str) {
        let workspace = SandboxWorkspace::new("/tmp/previewbox");
        assert_eq!(
            workspace.resolve("sbx1", path).unwrap(),
            PathBuf::from("/tmp/previewbox/sandbox-sbx1").join(expected)
        );
    }

    #[test]
    fn test_sandbox_dir_rejects_traversal_ids() {
        let workspace = SandboxWorkspace::new("/tmp/previewbox");
        assert!(workspace.sandbox_dir("../etc").is_err());
        assert!(workspace.sandbox_dir("").is_err());
    }
}
