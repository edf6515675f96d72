use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// A closed tracker issue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: u64,
    pub name: String,
    pub closed_date: DateTime<Utc>,
    pub url: String,
    pub labels: BTreeSet<String>,
}
