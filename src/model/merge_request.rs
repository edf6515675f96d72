use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// A merged change request (pull request on GitHub, merge request on GitLab)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub id: u64,
    pub name: String,
    pub url: String,
    pub author: String,
    pub author_url: String,
    pub merged_date: DateTime<Utc>,
    pub labels: BTreeSet<String>,
}
