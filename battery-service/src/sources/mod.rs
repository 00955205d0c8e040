pub mod mastr_http;

pub use mastr_http::{registry_filter, ListingPage, MastrClient, MastrHttpSource};
