use crate::error::{Error, Result};

/// Normalize a remote path: leading `/`, no trailing `/`, no empty or `.`
/// segments. `root://host//tmp/f` style double slashes collapse to one.
pub fn normalize_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".to_string()));
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::InvalidPath(format!(
                    "Parent references are not allowed: {}",
                    path
                )))
            }
            s => {
                normalized.push('/');
                normalized.push_str(s);
            }
        }
    }

    if normalized.is_empty() {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Get the parent path
pub fn parent_path(path: &str) -> Option<String> {
    let normalized = normalize_path(path).ok()?;
    if normalized == "/" {
        return None;
    }

    match normalized.rfind('/') {
        Some(0) | None => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
    }
}

/// Get the file name from a path
pub fn file_name(path: &str) -> Option<String> {
    let normalized = normalize_path(path).ok()?;
    if normalized == "/" {
        return Some("/".to_string());
    }
    normalized.rsplit('/').next().map(|s| s.to_string())
}

/// Every proper ancestor of `path`, outermost first, excluding the root.
pub fn ancestors(path: &str) -> Result<Vec<String>> {
    let normalized = normalize_path(path)?;
    let mut out = Vec::new();
    let mut current = parent_path(&normalized);
    while let Some(p) = current {
        if p == "/" {
            break;
        }
        current = parent_path(&p);
        out.push(p);
    }
    out.reverse();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/tmp/data").unwrap(), "/tmp/data");
        assert_eq!(normalize_path("tmp/data").unwrap(), "/tmp/data");
        assert_eq!(normalize_path("/tmp/data/").unwrap(), "/tmp/data");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("//tmp//./data//").unwrap(), "/tmp/data");
        assert!(normalize_path("").is_err());
        assert!(normalize_path("/tmp/../etc").is_err());
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/tmp/data").unwrap(), "/tmp");
        assert_eq!(parent_path("/tmp").unwrap(), "/");
        assert_eq!(parent_path("/"), None);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("/tmp/Event.root").unwrap(), "Event.root");
        assert_eq!(file_name("/tmp").unwrap(), "tmp");
        assert_eq!(file_name("/").unwrap(), "/");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c").unwrap(), vec!["/a", "/a/b"]);
        assert!(ancestors("/a").unwrap().is_empty());
        assert!(ancestors("/").unwrap().is_empty());
    }
}
