use super::{Issue, MergeRequest};

/// The format used to display the date of a release
pub const RELEASE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Issues and merge requests attributed to the time window ending at a tag.
///
/// Releases are never fetched, they're always derived from the tags, issues and merge requests of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub name: String,
    pub url: String,
    pub formatted_date: String,
    pub issues: Vec<Issue>,
    pub merge_requests: Vec<MergeRequest>,
}

impl Release {
    /// Whether the release has no issues nor merge requests
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.merge_requests.is_empty()
    }
}
