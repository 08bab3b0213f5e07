//! Remote path helpers
//!
//! FTP paths are always `/`-separated regardless of the local platform.

/// Joins a remote directory and a relative name.
pub fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    if base.is_empty() {
        return name.to_string();
    }
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// Parent directory of a remote path, `None` at the root or for a bare name.
pub fn parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) => None,
        Some(i) => Some(&trimmed[..i]),
        None => None,
    }
}

/// Collapses `.`, `..` and repeated separators.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Resolves `path` against the working directory `cwd`.
pub fn resolve(cwd: &str, path: &str) -> String {
    normalize(&join(cwd, path))
}

/// Cumulative prefixes of a path: `/a/b/c` gives `/a`, `/a/b`, `/a/b/c`.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    let absolute = normalized.starts_with('/');
    let mut current = String::new();
    let mut out = Vec::new();
    for part in normalized.split('/').filter(|p| !p.is_empty() && *p != ".") {
        if absolute || !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_and_resolves() {
        assert_eq!(join("/pub", "a.txt"), "/pub/a.txt");
        assert_eq!(join("/", "a.txt"), "/a.txt");
        assert_eq!(join("/pub", "/abs"), "/abs");
        assert_eq!(resolve("/pub/x", "../y/./z"), "/pub/y/z");
        assert_eq!(resolve("/", ".."), "/");
    }

    #[test]
    fn computes_parents() {
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(parent("a/b/"), Some("a"));
        assert_eq!(parent("a"), None);
    }

    #[test]
    fn lists_ancestors() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(ancestors("a//b"), vec!["a", "a/b"]);
        assert!(ancestors("/").is_empty());
    }
}
