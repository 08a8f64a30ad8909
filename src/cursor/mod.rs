//! Windowed cursor over a backing store.
//!
//! A [`CursorEnumerator`] pulls bounded windows from a [`QuerySource`] and
//! hands records out one at a time through `advance` / `current` / `close`.
//! The total number of records it will ever emit is capped by the chunk
//! limit of its [`CursorConfig`].
//!
//! # Ordering
//!
//! With `order_by_id` set the source scans by ascending identifier. This is
//! a best-effort stable order, not a snapshot: each window is a separate
//! query, so rows inserted or deleted by concurrent writers between two
//! windows shift the window boundaries and can cause rows to be skipped or
//! returned twice.

mod memory;
mod source;
mod state;

pub use memory::{MemorySession, MemorySource};
pub use source::{Loader, QuerySource, Resolvable, ScanSession, ScanTarget};
pub use state::{plan_chunks, CursorState, WindowRequest};

use crate::config::CursorConfig;
use crate::error::{Error, Result};
use crate::metrics;
use std::vec;
use tracing::{debug, error, warn};

enum SessionSlot<S> {
    Unopened,
    Open(S),
    Released,
}

/// Counters for one cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorStats {
    pub windows_fetched: u64,
    pub records_emitted: u64,
    pub references_resolved: u64,
}

/// Single-consumer cursor. Not thread-safe and not reentrant.
pub struct CursorEnumerator<S: QuerySource> {
    source: S,
    target: ScanTarget,
    config: CursorConfig,
    state: CursorState,
    session: SessionSlot<S::Session>,
    window: Option<vec::IntoIter<Resolvable<S::Record>>>,
    current: Option<Resolvable<S::Record>>,
    stats: CursorStats,
}

impl<S: QuerySource> CursorEnumerator<S> {
    /// Nothing is opened until the first call to [`advance`](Self::advance).
    pub fn new(source: S, target: ScanTarget, config: CursorConfig) -> Self {
        Self {
            source,
            target,
            state: CursorState::new(&config),
            config,
            session: SessionSlot::Unopened,
            window: None,
            current: None,
            stats: CursorStats::default(),
        }
    }

    pub fn state(&self) -> &CursorState {
        &self.state
    }

    pub fn stats(&self) -> CursorStats {
        self.stats
    }

    pub fn target(&self) -> &ScanTarget {
        &self.target
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.exhausted
    }

    /// Move to the next record. Returns `Ok(true)` iff a new current record
    /// is available.
    ///
    /// Initialization and window fetch failures end the enumeration: the
    /// session is released and every later call returns `Ok(false)`.
    pub fn advance(&mut self) -> Result<bool> {
        self.current = None;
        if self.state.exhausted {
            return Ok(false);
        }
        if self.state.chunk_reached() {
            debug!(emitted = self.state.emitted_count, "chunk limit reached");
            self.finish();
            return Ok(false);
        }
        if matches!(self.session, SessionSlot::Unopened) {
            self.open_session()?;
        }

        if let Some(item) = self.window.as_mut().and_then(Iterator::next) {
            self.emit(item);
            return Ok(true);
        }

        let mut records = self.fetch_next_window()?.into_iter();
        match records.next() {
            Some(item) => {
                self.window = Some(records);
                self.emit(item);
                Ok(true)
            }
            None => {
                debug!(window = self.state.window_index - 1, "empty window, cursor exhausted");
                self.finish();
                Ok(false)
            }
        }
    }

    /// The current record, with any deferred reference resolved. Repeated
    /// calls before the next `advance` return the same resolved instance.
    pub fn current(&mut self) -> Result<&S::Record> {
        let item = self.current.as_mut().ok_or_else(|| Error::InvalidOperation {
            reason: "cursor has no current record".to_string(),
        })?;
        let (record, loaded) = item.resolve_loaded()?;
        if loaded {
            self.stats.references_resolved += 1;
        }
        Ok(record)
    }

    /// Release the backing session. Safe to call any number of times and
    /// after natural exhaustion.
    pub fn close(&mut self) -> Result<()> {
        self.state = self.state.exhaust();
        self.window = None;
        self.current = None;
        self.release()
    }

    fn open_session(&mut self) -> Result<()> {
        let opened = self
            .config
            .validate()
            .and_then(|_| self.source.open(&self.target, self.config.order_by_id));
        match opened {
            Ok(session) => {
                debug!(scan = %self.target, "cursor session opened");
                self.session = SessionSlot::Open(session);
                Ok(())
            }
            Err(e) => {
                error!(scan = %self.target, error = %e, "failed to construct enumerator");
                self.state = self.state.exhaust();
                self.session = SessionSlot::Released;
                Err(match e {
                    Error::Initialization { .. } => e,
                    other => Error::Initialization {
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    fn fetch_next_window(&mut self) -> Result<Vec<Resolvable<S::Record>>> {
        let request = self
            .state
            .next_window(self.config.order_by_id)
            .ok_or_else(|| Error::InvalidOperation {
                reason: "no window left to fetch".to_string(),
            })?;
        self.state = self.state.window_issued();

        let session = match &mut self.session {
            SessionSlot::Open(session) => session,
            _ => {
                return Err(Error::InvalidOperation {
                    reason: "cursor session is not open".to_string(),
                })
            }
        };

        debug!(
            window = request.window_index,
            offset = request.offset,
            limit = request.limit,
            "fetching window"
        );
        match session.fetch_window(&request) {
            Ok(records) => {
                self.stats.windows_fetched += 1;
                metrics::record_window(if records.is_empty() { "empty" } else { "ok" });
                Ok(records)
            }
            Err(e) => {
                error!(window = request.window_index, error = %e, "window fetch failed");
                metrics::record_window("error");
                self.finish();
                Err(match e {
                    Error::WindowFetch { .. } => e,
                    other => Error::WindowFetch {
                        window_index: request.window_index,
                        offset: request.offset,
                        reason: other.to_string(),
                    },
                })
            }
        }
    }

    fn emit(&mut self, item: Resolvable<S::Record>) {
        self.state = self.state.item_emitted();
        self.stats.records_emitted += 1;
        metrics::record_emitted();
        self.current = Some(item);
    }

    /// Exhaustion-triggered cleanup.
    fn finish(&mut self) {
        self.state = self.state.exhaust();
        self.window = None;
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to close cursor session");
        }
    }

    fn release(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.session, SessionSlot::Released) {
            SessionSlot::Open(mut session) => {
                debug!(
                    emitted = self.state.emitted_count,
                    windows = self.stats.windows_fetched,
                    "cursor session closed"
                );
                session.close()
            }
            SessionSlot::Unopened | SessionSlot::Released => Ok(()),
        }
    }
}

impl<S: QuerySource> Drop for CursorEnumerator<S> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "failed to close cursor session on drop");
        }
    }
}

impl<S> Iterator for CursorEnumerator<S>
where
    S: QuerySource,
    S::Record: Clone,
{
    type Item = Result<S::Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => Some(self.current().cloned()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
