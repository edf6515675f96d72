use std::sync::Arc;

use crate::{
    errors::Result,
    source::{Page, RemoteChange, RemoteIssue, RemoteTag, Source},
};

/// Fetches single pages of one of the listings of a [Source]
pub trait PageFetcher: Send + Sync + 'static {
    /// The raw item listed
    type Item: Send + 'static;

    /// Name of the query, used to annotate its errors
    const QUERY: &'static str;

    /// Fetches the given page, returning its items along with the pagination details
    fn fetch_page(&self, page: u32, page_size: u32) -> impl Future<Output = Result<Page<Self::Item>>> + Send;
}

/// Declares a [PageFetcher] over one of the listings of a [Source]
macro_rules! page_fetcher {
    ($(#[$meta:meta])* $name:ident($item:ty, $query:literal) => $method:ident) => {
        $(#[$meta])*
        pub struct $name<S>(Arc<S>);

        impl<S> $name<S> {
            pub fn new(source: Arc<S>) -> Self {
                Self(source)
            }
        }

        impl<S: Source + Send + 'static> PageFetcher for $name<S> {
            type Item = $item;

            const QUERY: &'static str = $query;

            async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Page<Self::Item>> {
                self.0.$method(page, page_size).await
            }
        }
    };
}

page_fetcher!(
    /// Pages of the project tags
    TagPages(RemoteTag, "ListTagsPage") => list_tags_page
);
page_fetcher!(
    /// Pages of the closed issues of the project
    IssuePages(RemoteIssue, "ListClosedIssuesPage") => list_closed_issues_page
);
page_fetcher!(
    /// Pages of the merged changes of the project
    ChangePages(RemoteChange, "ListMergedChangesPage") => list_merged_changes_page
);

/// Computes the total number of items of a listing, given the number of items found on its last page
pub fn total_items(last_page_len: usize, total_pages: u32, page_size: u32) -> u64 {
    last_page_len as u64 + u64::from(total_pages.saturating_sub(1)) * u64::from(page_size)
}
