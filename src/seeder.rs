use std::path::{Path, PathBuf};

use deadpool_postgres::Pool;

use crate::error::{BranchError, Result};

/// One discovered seed script, content already in memory.
#[derive(Debug, Clone)]
pub struct SeedFile {
    /// File name without the `.sql` extension.
    pub name: String,
    pub path: PathBuf,
    pub content: String,
}

/// Discovers ordered `.sql` files in a directory and executes them against a
/// branch database. Callers order files with a zero-padded numeric prefix
/// such as `001_schema.sql`.
#[derive(Debug, Clone)]
pub struct Seeder {
    seeds_dir: PathBuf,
}

impl Seeder {
    pub fn new(seeds_dir: impl Into<PathBuf>) -> Self {
        Self {
            seeds_dir: seeds_dir.into(),
        }
    }

    pub fn seeds_dir(&self) -> &Path {
        &self.seeds_dir
    }

    /// Lists seed files non-recursively, sorted by filename. A missing
    /// directory is not an error and yields an empty list.
    pub async fn discover_seed_files(&self) -> Result<Vec<SeedFile>> {
        let mut dir = match tokio::fs::read_dir(&self.seeds_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "seeds directory {} does not exist, nothing to seed",
                    self.seeds_dir.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(BranchError::SeedFailed {
                    slug: String::new(),
                    message: format!(
                        "failed to read seeds directory {}: {e}",
                        self.seeds_dir.display()
                    ),
                });
            }
        };

        let mut paths = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| BranchError::SeedFailed {
            slug: String::new(),
            message: format!("failed to list seeds directory: {e}"),
        })? {
            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file && path.extension().and_then(|e| e.to_str()) == Some("sql") {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content =
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| BranchError::SeedFailed {
                        slug: String::new(),
                        message: format!("failed to read seed file {}: {e}", path.display()),
                    })?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            files.push(SeedFile {
                name,
                path,
                content,
            });
        }

        Ok(files)
    }

    /// Runs every discovered seed file, in order, inside one transaction on
    /// the given pool. Returns the number of files applied. The first failing
    /// file rolls everything back and is named in the error.
    pub async fn execute_seeds(&self, pool: &Pool, branch_slug: &str) -> Result<usize> {
        let files = self.discover_seed_files().await.map_err(|e| {
            // Re-tag discovery errors with the branch being seeded.
            match e {
                BranchError::SeedFailed { message, .. } => BranchError::SeedFailed {
                    slug: branch_slug.to_string(),
                    message,
                },
                other => other,
            }
        })?;

        if files.is_empty() {
            log::debug!("no seed files for branch {branch_slug}");
            return Ok(0);
        }

        let mut client = pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| BranchError::SeedFailed {
                slug: branch_slug.to_string(),
                message: format!("failed to begin seed transaction: {e}"),
            })?;

        for file in &files {
            log::debug!("applying seed file {} for branch {branch_slug}", file.name);
            // Each file is a verbatim Postgres script; batch execution keeps
            // multi-statement files intact.
            tx.batch_execute(&file.content)
                .await
                .map_err(|e| BranchError::SeedFailed {
                    slug: branch_slug.to_string(),
                    message: format!("seed file '{}' failed: {e}", file.name),
                })?;
        }

        tx.commit().await.map_err(|e| BranchError::SeedFailed {
            slug: branch_slug.to_string(),
            message: format!("failed to commit seeds: {e}"),
        })?;

        log::info!(
            "applied {} seed file(s) to branch {branch_slug}",
            files.len()
        );
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_directory_yields_empty_list() {
        let seeder = Seeder::new("/nonexistent/seeds/dir");
        let files = seeder.discover_seed_files().await.unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn discovery_filters_and_orders_by_filename() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("002_users.sql"), "INSERT INTO users;").unwrap();
        fs::write(dir.path().join("001_schema.sql"), "CREATE TABLE users;").unwrap();
        fs::write(dir.path().join("010_last.sql"), "-- last").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        fs::write(dir.path().join("README.md"), "ignore me too").unwrap();
        fs::create_dir(dir.path().join("nested.sql")).unwrap();

        let seeder = Seeder::new(dir.path());
        let files = seeder.discover_seed_files().await.unwrap();

        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["001_schema", "002_users", "010_last"]);
        assert_eq!(files[0].content, "CREATE TABLE users;");
    }

    #[tokio::test]
    async fn discovery_reads_unicode_content() {
        let dir = TempDir::new().unwrap();
        let content = "INSERT INTO greetings (text) VALUES ('héllø wörld — 你好');";
        fs::write(dir.path().join("001_greetings.sql"), content).unwrap();

        let seeder = Seeder::new(dir.path());
        let files = seeder.discover_seed_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, content);
    }

    #[tokio::test]
    async fn discovery_is_non_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("001_hidden.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("001_top.sql"), "SELECT 1;").unwrap();

        let seeder = Seeder::new(dir.path());
        let files = seeder.discover_seed_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "001_top");
    }
}
