mod issue;
mod merge_request;
mod release;
mod tag;

pub use issue::*;
pub use merge_request::*;
pub use release::*;
pub use tag::*;
