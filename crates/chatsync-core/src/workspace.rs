//! Writing a snapshot's file tree into a workspace
//!
//! Snapshot restoration only needs two primitives: create a folder and
//! create a file. Re-creating an existing path must be harmless.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from materializing a file tree
#[derive(Error, Debug)]
pub enum MaterializeError {
    /// Path exists already; restoration treats this as success
    #[error("'{0}' already exists")]
    AlreadyExists(String),

    /// Path is absolute or escapes the workspace root
    #[error("Invalid workspace path '{0}'")]
    InvalidPath(String),

    #[error("Failed to write '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Sink for restored folders and files
#[async_trait]
pub trait FileTreeMaterializer: Send + Sync {
    async fn create_folder(&self, path: &str) -> Result<(), MaterializeError>;

    async fn create_file(&self, path: &str, content: &str) -> Result<(), MaterializeError>;
}

/// Materializer writing below a directory on disk
pub struct DirectoryMaterializer {
    root: PathBuf,
}

impl DirectoryMaterializer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a tree path onto the root, refusing anything that could escape it
    fn resolve(&self, path: &str) -> Result<PathBuf, MaterializeError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut resolved = self.root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(MaterializeError::InvalidPath(path.to_string())),
            }
        }

        if resolved == self.root {
            return Err(MaterializeError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileTreeMaterializer for DirectoryMaterializer {
    async fn create_folder(&self, path: &str) -> Result<(), MaterializeError> {
        let target = self.resolve(path)?;
        if target.is_dir() {
            return Err(MaterializeError::AlreadyExists(path.to_string()));
        }

        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| MaterializeError::Io {
                path: path.to_string(),
                source,
            })
    }

    async fn create_file(&self, path: &str, content: &str) -> Result<(), MaterializeError> {
        let target = self.resolve(path)?;
        let io_err = |source| MaterializeError::Io {
            path: path.to_string(),
            source,
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&target, content).await.map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_folder_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = DirectoryMaterializer::new(temp_dir.path());

        workspace.create_folder("src/components").await.unwrap();
        workspace
            .create_file("src/components/App.tsx", "export default {}")
            .await
            .unwrap();

        let written =
            std::fs::read_to_string(temp_dir.path().join("src/components/App.tsx")).unwrap();
        assert_eq!(written, "export default {}");
    }

    #[tokio::test]
    async fn test_existing_folder_reported() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = DirectoryMaterializer::new(temp_dir.path());

        workspace.create_folder("src").await.unwrap();
        let err = workspace.create_folder("src").await.unwrap_err();
        assert!(matches!(err, MaterializeError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_file_overwrite_allowed() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = DirectoryMaterializer::new(temp_dir.path());

        workspace.create_file("README.md", "one").await.unwrap();
        workspace.create_file("README.md", "two").await.unwrap();
        let written = std::fs::read_to_string(temp_dir.path().join("README.md")).unwrap();
        assert_eq!(written, "two");
    }

    #[tokio::test]
    async fn test_escaping_paths_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = DirectoryMaterializer::new(temp_dir.path());

        for path in ["../outside.txt", "src/../../x", "", "/"] {
            let err = workspace.create_file(path, "x").await.unwrap_err();
            assert!(matches!(err, MaterializeError::InvalidPath(_)), "{}", path);
        }
    }

    #[tokio::test]
    async fn test_leading_slash_is_relative_to_root() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = DirectoryMaterializer::new(temp_dir.path());

        workspace.create_file("/home/project/index.html", "<html>").await.unwrap();
        assert!(temp_dir.path().join("home/project/index.html").exists());
    }
}
