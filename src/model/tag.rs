use chrono::{DateTime, Utc};

/// A named and dated point in the version history of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    /// The tagged commit, missing for synthetic tags not yet pushed
    pub commit: Option<String>,
    pub date: DateTime<Utc>,
    /// Release page of the tag if published, otherwise the tag page itself
    pub url: String,
}

impl Tag {
    /// Builds a commit-less tag for the not-yet-released activity, dated at the given instant
    pub fn unreleased(name: impl Into<String>, url: impl Into<String>, date: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            commit: None,
            date,
            url: url.into(),
        }
    }
}
