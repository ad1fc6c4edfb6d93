mod client;
mod source;

pub use client::{fetch_first, Fetcher, HttpFetcher};
#[cfg(test)]
pub use client::MockFetcher;
pub use source::{select_best, DownloadKind, DownloadSource};
