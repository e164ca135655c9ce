//! Status command handler

use anyhow::{Context, Result};

use chatsync_core::{Config, SqliteLocalStore};

use super::Engine;
use crate::output::Output;

/// Show a project's sync status
pub async fn show(engine: &mut Engine, project_id: String, output: &Output) -> Result<()> {
    // The registry is rebuilt from the stored markers on open
    engine.open(&project_id, None, output).await?;
    let status = engine.sync.status(&project_id);
    output.print_status(&project_id, &status);
    Ok(())
}

/// Ids of the projects in the local database
fn local_project_ids(config: &Config) -> Result<Vec<String>> {
    let store = SqliteLocalStore::open(&config.sqlite_path())
        .with_context(|| format!("Failed to open database {:?}", config.sqlite_path()))?;
    Ok(store.project_ids()?)
}

/// List projects with a local copy
pub fn projects(config: &Config, output: &Output) -> Result<()> {
    let ids = local_project_ids(config)?;

    if output.is_json() {
        output.print_json(&ids);
        return Ok(());
    }
    if ids.is_empty() {
        output.message("No projects stored locally.");
    }
    for id in ids {
        println!("{}", id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use chatsync_core::{LocalStore, StoredChat};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_projects_reads_local_database() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = SqliteLocalStore::open(&config.sqlite_path()).unwrap();
        store.set_messages("p1", &StoredChat::default()).await.unwrap();
        drop(store);

        assert_eq!(local_project_ids(&config).unwrap(), vec!["p1".to_string()]);
        projects(&config, &Output::new(OutputFormat::Quiet)).unwrap();
    }
}
