//! Builds a changelog from the history of a project hosted on GitHub or GitLab.
//!
//! The tags, closed issues and merged changes of the project are retrieved concurrently page by page, and every
//! issue and merge request is then attributed to the release whose time window contains its date.
//!
//! # Release windows
//!
//! Tags are sorted by date and each one owns the items dated after the previous tag and up to (and including) its own
//! date. The oldest tag owns everything since the epoch, while anything newer than the latest tag is only included
//! when a new release name is provided.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod errors;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod process;
pub mod release;
pub mod render;
pub mod source;
pub mod utils;
