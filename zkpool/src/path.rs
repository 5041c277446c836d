//! Node path validation and the chroot prefix.

use crate::{ZkError, ZkResult};

/// Check a caller-supplied node path before it goes anywhere near the socket.
///
/// `sequential` allows a trailing `/`, since a sequential create appends the
/// suffix directly to the given prefix.
pub fn validate_path(path: &str, sequential: bool) -> ZkResult<()> {
    let invalid = |reason: &str| Err(ZkError::InvalidArguments(format!("path {path:?}: {reason}")));

    if !path.starts_with('/') {
        return invalid("must start with '/'");
    }
    if path.contains('\0') {
        return invalid("contains NUL");
    }
    if path == "/" {
        return Ok(());
    }
    let body = match path.strip_suffix('/') {
        Some(_) if !sequential => return invalid("must not end with '/'"),
        Some(stripped) => stripped,
        None => path,
    };
    // Skip the leading empty segment before the first '/'.
    for segment in body.split('/').skip(1) {
        match segment {
            "" => return invalid("empty segment"),
            "." | ".." => return invalid("relative segment"),
            _ => {}
        }
    }
    Ok(())
}

/// A path prefix applied to every outgoing path and stripped from returned ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chroot {
    prefix: Option<String>,
}

impl Chroot {
    /// Build a chroot from a prefix such as `/app`. `/` means no prefix.
    pub fn new(prefix: &str) -> ZkResult<Self> {
        validate_path(prefix, false)
            .map_err(|_| ZkError::InvalidConfig(format!("invalid chroot {prefix:?}")))?;
        let prefix = (prefix != "/").then(|| prefix.to_string());
        Ok(Self { prefix })
    }

    /// The prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Map a client path to the ensemble path.
    pub fn apply(&self, path: &str) -> String {
        match &self.prefix {
            None => path.to_string(),
            Some(prefix) if path == "/" => prefix.clone(),
            Some(prefix) => format!("{prefix}{path}"),
        }
    }

    /// Map an ensemble path back to the client's view.
    ///
    /// Paths outside the prefix are returned unchanged.
    pub fn strip(&self, path: &str) -> String {
        let Some(prefix) = &self.prefix else {
            return path.to_string();
        };
        match path.strip_prefix(prefix.as_str()) {
            Some("") => "/".to_string(),
            Some(rest) if rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        }
    }
}
