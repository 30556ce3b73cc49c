//! Hierarchical outcome reporting.
//!
//! A [`Status`] carries a severity, a machine-readable [`StatusCode`], a
//! message and any number of child statuses. The severity of a status with
//! children is never lower than the worst child, so callers can branch on the
//! root while reporting walks the whole tree.

use serde::{Deserialize, Serialize};

/// Outcome severity, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Everything worked.
    Ok,
    /// Worked, with something worth knowing.
    Info,
    /// Worked, but something looked wrong.
    Warning,
    /// Failed.
    Error,
    /// Stopped on request.
    Cancel,
}

/// What a status is about. Drives retry and reporting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusCode {
    /// No specific code.
    Ok,
    /// The artifact is not present at the resolved location.
    ArtifactNotFound,
    /// No location could be resolved for the descriptor.
    NoLocation,
    /// The transport failed (network, HTTP status, local I/O while reading).
    Transport,
    /// The artifact content is bad: checksum, signature or structure failure.
    /// Retrying against another mirror will not help.
    ArtifactProcessing,
    /// The attempt failed on this mirror and another mirror should be tried.
    Retry,
    /// The operation was cancelled.
    Cancelled,
    /// Writing to the destination failed.
    Io,
    /// Summary of a transfer (bytes and rate).
    DownloadSize,
}

/// A node in a status tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    severity: Severity,
    code: StatusCode,
    message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Status>,
}

impl Status {
    /// A plain OK status.
    pub fn ok() -> Self {
        Self::new(Severity::Ok, StatusCode::Ok, "OK")
    }

    /// Build a status from parts.
    pub fn new(severity: Severity, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            children: Vec::new(),
        }
    }

    /// An INFO status.
    pub fn info(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Info, code, message)
    }

    /// A WARNING status.
    pub fn warning(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// An ERROR status.
    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// A CANCEL status.
    pub fn cancel() -> Self {
        Self::new(Severity::Cancel, StatusCode::Cancelled, "Operation cancelled")
    }

    /// An OK-severity container meant to collect children.
    pub fn multi(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Ok, code, message)
    }

    /// Add a child, raising this node's severity to the child's if worse.
    pub fn add(&mut self, child: Status) {
        self.severity = self.severity.max(child.severity);
        self.children.push(child);
    }

    /// Add every child.
    pub fn add_all(&mut self, children: impl IntoIterator<Item = Status>) {
        for child in children {
            self.add(child);
        }
    }

    /// Builder form of [`add`](Self::add).
    pub fn with_child(mut self, child: Status) -> Self {
        self.add(child);
        self
    }

    /// Severity of this node (already the maximum over its children).
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Code of this node.
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Message of this node.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Direct children.
    pub fn children(&self) -> &[Status] {
        &self.children
    }

    /// `true` when severity is OK.
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// `true` when severity is OK, INFO or WARNING.
    pub fn is_success(&self) -> bool {
        self.severity <= Severity::Warning
    }

    /// `true` when severity is ERROR.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// `true` when severity is CANCEL.
    pub fn is_cancel(&self) -> bool {
        self.severity == Severity::Cancel
    }

    /// `true` when this node carries the retry marker.
    pub fn is_retry(&self) -> bool {
        self.code == StatusCode::Retry
    }

    /// Depth-first iterator over this node and every descendant, paired with
    /// its depth.
    pub fn walk(&self) -> Vec<(usize, &Status)> {
        let mut out = Vec::new();
        let mut stack = vec![(0, self)];
        while let Some((depth, status)) = stack.pop() {
            out.push((depth, status));
            for child in status.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }

    /// `true` when any node in the tree carries `code`.
    pub fn contains_code(&self, code: StatusCode) -> bool {
        self.code == code || self.children.iter().any(|c| c.contains_code(code))
    }

    /// `true` when any node in the tree is an identical copy of `other`.
    pub fn contains(&self, other: &Status) -> bool {
        self == other || self.children.iter().any(|c| c.contains(other))
    }
}

/// `true` when `status` or any descendant reports bad artifact content.
///
/// Such failures are not retried against other mirrors: the bytes are wrong
/// regardless of where they came from.
pub fn artifact_error(status: &Status) -> bool {
    status.contains_code(StatusCode::ArtifactProcessing)
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (depth, status)) in self.walk().into_iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{:indent$}{:?}: {}",
                "",
                status.severity,
                status.message,
                indent = depth * 2
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_bubbles_up() {
        let mut root = Status::multi(StatusCode::Ok, "batch");
        root.add(Status::warning(StatusCode::Ok, "slow"));
        assert_eq!(root.severity(), Severity::Warning);
        root.add(Status::error(StatusCode::Transport, "down"));
        assert!(root.is_error());
        root.add(Status::ok());
        assert!(root.is_error());
    }

    #[test]
    fn artifact_error_is_recursive() {
        let leaf = Status::error(StatusCode::ArtifactProcessing, "bad checksum");
        let mid = Status::multi(StatusCode::Ok, "stages").with_child(leaf);
        let root = Status::multi(StatusCode::Ok, "fetch").with_child(mid);
        assert!(artifact_error(&root));
        assert!(!artifact_error(&Status::error(StatusCode::Transport, "x")));
    }

    #[test]
    fn display_walks_whole_tree() {
        let root = Status::multi(StatusCode::Ok, "fetch")
            .with_child(Status::error(StatusCode::Transport, "mirror a failed"))
            .with_child(Status::error(StatusCode::ArtifactProcessing, "bad checksum"));
        let text = root.to_string();
        assert!(text.contains("mirror a failed"));
        assert!(text.contains("bad checksum"));
        assert_eq!(text.lines().count(), 3);
    }
}
