//! Remote (POSIX) path joining and local directory creation.

use std::io;
use std::path::Path;

use tracing::{debug, info};

/// Join a remote base and a name the way POSIX `os.path.join` does:
/// an absolute `name` replaces the base.
pub fn remote_join(base: &str, name: &str) -> String {
    if name.starts_with('/') || base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Last component of a remote path, ignoring trailing slashes.
pub fn remote_basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Create `path` and any missing parents. An existing directory is fine.
pub async fn ensure_dir(path: &Path) -> io::Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            debug!("Directory already exists: {}", path.display());
            Ok(())
        }
        _ => {
            tokio::fs::create_dir_all(path).await?;
            info!("Directory created: {}", path.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_relative_and_absolute() {
        assert_eq!(remote_join("./wp-content/", "themes"), "./wp-content/themes");
        assert_eq!(remote_join("/srv/www", "site.tar.gz"), "/srv/www/site.tar.gz");
        assert_eq!(remote_join("/srv/www", "/abs/x"), "/abs/x");
        assert_eq!(remote_join("", "x"), "x");
    }

    #[test]
    fn basename_of_remote_paths() {
        assert_eq!(remote_basename("a/b/file.txt"), "file.txt");
        assert_eq!(remote_basename("file.txt"), "file.txt");
        assert_eq!(remote_basename("/srv/themes/"), "themes");
    }

    #[tokio::test]
    async fn ensure_dir_creates_nested_and_tolerates_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).await.unwrap();
    }
}
