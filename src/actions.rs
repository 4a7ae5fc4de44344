//! Messages delivered from background tasks to the controller
use crate::metadata::SourceStatus;
use anyhow::Error;

#[derive(Debug)]
pub enum Response {
    /// Result of one status poll.
    Metadata(Result<Option<SourceStatus>, Error>),
    /// Local wall-clock hour, sent by the theme ticker.
    Clock { hour: u32 },
    /// Outcome of registering the offline asset cache.
    CacheRegistered(Result<String, Error>),
}
