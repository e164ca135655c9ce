//! Snapshot command handlers

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::debug;

use chatsync_core::{DirectoryMaterializer, FileEntry, FileTree};

use super::Engine;
use crate::output::Output;

/// Directories never captured in a snapshot
const SKIPPED_DIRS: [&str; 3] = [".git", "node_modules", "target"];

/// Read a directory into a file tree keyed by `/`-separated relative paths
///
/// Files that are not valid UTF-8 are skipped.
pub fn read_tree(root: &Path) -> Result<FileTree> {
    let mut files = FileTree::new();
    collect(root, root, &mut files)?;
    Ok(files)
}

fn collect(root: &Path, dir: &Path, files: &mut FileTree) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let relative = relative_path(root, &path)?;

        if entry.file_type()?.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            files.insert(relative, FileEntry::Folder);
            collect(root, &path, files)?;
        } else {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    files.insert(relative, FileEntry::file(content));
                }
                Err(e) => debug!("Skipping {:?}: {}", path, e),
            }
        }
    }
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{:?} is outside {:?}", path, root))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Snapshot a directory as the project state at `message_id`
pub async fn take(
    engine: &mut Engine,
    project_id: String,
    message_id: String,
    dir: PathBuf,
    summary: Option<String>,
    force: bool,
    output: &Output,
) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let files = read_tree(&dir)?;

    let taken = if force {
        Some(
            engine
                .sync
                .take_snapshot(&project_id, &message_id, files, summary)
                .await?,
        )
    } else {
        engine
            .sync
            .snapshots()
            .take_if_changed(&project_id, &message_id, files, summary)
            .await?
    };

    match taken {
        Some(snapshot) => {
            if output.is_json() {
                output.print_json(&snapshot);
            } else {
                output.success(&format!(
                    "Snapshot of {} file(s) taken at {}",
                    snapshot.file_count(),
                    snapshot.chat_index
                ));
            }
        }
        None => output.message("Files unchanged since the last snapshot"),
    }
    Ok(())
}

/// Show the project's stored snapshot
pub async fn show(engine: &mut Engine, project_id: String, output: &Output) -> Result<()> {
    match engine.sync.snapshots().load(&project_id).await? {
        Some(snapshot) => output.print_snapshot(&snapshot),
        None => output.message(&format!("No snapshot for {}", project_id)),
    }
    Ok(())
}

/// Write the project's snapshot into `dir`
pub async fn restore(
    engine: &mut Engine,
    project_id: String,
    dir: PathBuf,
    output: &Output,
) -> Result<()> {
    let workspace = DirectoryMaterializer::new(&dir);
    let report = engine.sync.restore_snapshot(&project_id, &workspace).await?;
    engine.report_events(output);
    output.print_restore(&report);

    if !report.failures.is_empty() {
        bail!("{} path(s) could not be restored", report.failures.len());
    }
    output.success(&format!("Restored into {}", dir.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_tree() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/components")).unwrap();
        fs::create_dir_all(root.join("node_modules/react")).unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::write(root.join("src/components/App.tsx"), "export {}").unwrap();
        fs::write(root.join("node_modules/react/index.js"), "x").unwrap();
        fs::write(root.join("logo.bin"), [0xff, 0xfe, 0x00]).unwrap();

        let files = read_tree(root).unwrap();

        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(
            paths,
            vec!["package.json", "src", "src/components", "src/components/App.tsx"]
        );
        assert!(files["src"].is_folder());
        assert_eq!(files["package.json"], FileEntry::file("{}"));
    }

    #[test]
    fn test_read_tree_missing_dir() {
        assert!(read_tree(Path::new("/nonexistent/chatsync")).is_err());
    }
}
