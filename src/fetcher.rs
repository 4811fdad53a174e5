//! The async fetch seam.
//!
//! Verbs that load from a URI (`archetype src=…`, `update from=…`) do not
//! talk to the network themselves: they submit a request here and yield.
//! Completions are polled by the instance run loop and resume the
//! suspended frame through its recorded continuation.
//!
//! The crate ships [`StaticFetcher`], an in-memory implementation that
//! resolves against a preloaded URI map; real HTTP/file fetchers plug in
//! through the same trait.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::error::{ExecResult, RuntimeError};

/// One outstanding fetch. The id is allocated by the scheduler and keys
/// the pending-request table.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub id: u64,
    pub uri: String,
}

/// Completion delivered back to the scheduler.
#[derive(Debug)]
pub struct FetchCompletion {
    pub id: u64,
    pub result: ExecResult<Vec<u8>>,
}

/// Fetcher interface consumed by the runtime.
pub trait Fetcher {
    /// Dispatch a request; completion arrives via `poll`.
    fn submit(&mut self, req: FetchRequest) -> ExecResult<()>;

    /// Next available completion, if any.
    fn poll(&mut self) -> Option<FetchCompletion>;

    /// Drop an in-flight request; a completion that already raced in is
    /// discarded by the scheduler instead.
    fn cancel(&mut self, id: u64);
}

/// In-memory fetcher resolving against a fixed URI map. Unknown URIs
/// complete with `no-data` (the shape a 404 surfaces as).
#[derive(Default)]
pub struct StaticFetcher {
    resources: FxHashMap<String, Vec<u8>>,
    completions: VecDeque<FetchCompletion>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.resources.insert(uri.into(), body.into());
    }
}

impl Fetcher for StaticFetcher {
    fn submit(&mut self, req: FetchRequest) -> ExecResult<()> {
        let result = match self.resources.get(&req.uri) {
            Some(body) => Ok(body.clone()),
            None => Err(RuntimeError::NoData(format!("'{}' not found", req.uri))),
        };
        self.completions.push_back(FetchCompletion { id: req.id, result });
        Ok(())
    }

    fn poll(&mut self) -> Option<FetchCompletion> {
        self.completions.pop_front()
    }

    fn cancel(&mut self, id: u64) {
        self.completions.retain(|c| c.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_fetcher_hit_and_miss() {
        let mut fetcher = StaticFetcher::new();
        fetcher.insert("file://a.json", br#"{"x":1}"#.to_vec());

        fetcher.submit(FetchRequest { id: 1, uri: "file://a.json".into() }).unwrap();
        fetcher.submit(FetchRequest { id: 2, uri: "file://missing".into() }).unwrap();

        let first = fetcher.poll().unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(first.result.unwrap(), br#"{"x":1}"#.to_vec());

        let second = fetcher.poll().unwrap();
        assert_eq!(second.result.unwrap_err().kind(), "no-data");
        assert!(fetcher.poll().is_none());
    }

    #[test]
    fn test_cancel_discards_completion() {
        let mut fetcher = StaticFetcher::new();
        fetcher.insert("u", b"x".to_vec());
        fetcher.submit(FetchRequest { id: 7, uri: "u".into() }).unwrap();
        fetcher.cancel(7);
        assert!(fetcher.poll().is_none());
    }
}
