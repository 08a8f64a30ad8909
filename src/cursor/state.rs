use crate::config::CursorConfig;
use crate::error::{Error, Result};

/// One bounded fetch against the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    pub window_index: u64,
    pub offset: u64,
    pub limit: u64,
    pub order_by_id: bool,
}

/// Position of a cursor. Every transition returns a new value, the
/// enumerator only ever replaces its state wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub window_index: u64,
    pub emitted_count: u64,
    pub chunk_limit: u64,
    pub window_size: u64,
    pub base_offset: u64,
    pub exhausted: bool,
}

impl CursorState {
    pub fn new(config: &CursorConfig) -> Self {
        Self {
            window_index: 0,
            emitted_count: 0,
            chunk_limit: config.chunk_limit,
            window_size: config.window_size,
            base_offset: config.base_offset,
            exhausted: false,
        }
    }

    pub fn chunk_reached(&self) -> bool {
        self.emitted_count >= self.chunk_limit
    }

    pub fn remaining(&self) -> u64 {
        self.chunk_limit.saturating_sub(self.emitted_count)
    }

    /// The request for the next window, or `None` once nothing more may be
    /// emitted.
    pub fn next_window(&self, order_by_id: bool) -> Option<WindowRequest> {
        if self.exhausted || self.chunk_reached() {
            return None;
        }
        Some(WindowRequest {
            window_index: self.window_index,
            offset: self
                .base_offset
                .saturating_add(self.window_index.saturating_mul(self.window_size)),
            limit: self.window_size.min(self.remaining()),
            order_by_id,
        })
    }

    pub fn window_issued(self) -> Self {
        Self {
            window_index: self.window_index + 1,
            ..self
        }
    }

    pub fn item_emitted(self) -> Self {
        debug_assert!(self.emitted_count < self.chunk_limit);
        Self {
            emitted_count: self.emitted_count + 1,
            ..self
        }
    }

    pub fn exhaust(self) -> Self {
        Self {
            exhausted: true,
            ..self
        }
    }
}

/// Split an initial load of `total_records` into cursors of at most
/// `chunk_size` records each.
pub fn plan_chunks(
    total_records: u64,
    chunk_size: u64,
    window_size: u64,
    order_by_id: bool,
) -> Result<Vec<CursorConfig>> {
    if chunk_size == 0 {
        return Err(Error::Config("chunk size must be at least 1".to_string()));
    }
    let template = CursorConfig::new(window_size).with_order_by_id(order_by_id);
    template.validate()?;

    let mut chunks = Vec::new();
    let mut base_offset = 0;
    while base_offset < total_records {
        let limit = chunk_size.min(total_records - base_offset);
        chunks.push(template.with_chunk(base_offset, limit));
        base_offset += limit;
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(window_size: u64, chunk_limit: u64, base_offset: u64) -> CursorState {
        CursorState::new(&CursorConfig::new(window_size).with_chunk(base_offset, chunk_limit))
    }

    #[test]
    fn test_window_offsets() {
        let mut s = state(10, u64::MAX, 5);
        for i in 0..4 {
            let request = s.next_window(true).unwrap();
            assert_eq!(request.window_index, i);
            assert_eq!(request.offset, 5 + i * 10);
            assert_eq!(request.limit, 10);
            s = s.window_issued();
        }
    }

    #[test]
    fn test_limit_shrinks_near_chunk_end() {
        let mut s = state(2, 5, 0);
        for _ in 0..4 {
            s = s.item_emitted();
        }
        let request = s.next_window(false).unwrap();
        assert_eq!(request.limit, 1);
        s = s.item_emitted();
        assert!(s.chunk_reached());
        assert_eq!(s.next_window(false), None);
    }

    #[test]
    fn test_exhaust_is_sticky() {
        let s = state(3, 10, 0).exhaust();
        assert!(s.exhausted);
        assert!(s.window_issued().exhausted);
        assert_eq!(s.next_window(true), None);
    }

    #[test]
    fn test_plan_chunks() {
        let chunks = plan_chunks(25, 10, 4, true).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks
                .iter()
                .map(|c| (c.base_offset, c.chunk_limit))
                .collect::<Vec<_>>(),
            vec![(0, 10), (10, 10), (20, 5)]
        );
        assert!(chunks.iter().all(|c| c.window_size == 4 && c.order_by_id));

        assert!(plan_chunks(0, 10, 4, true).unwrap().is_empty());
        assert!(plan_chunks(10, 0, 4, true).is_err());
        assert!(plan_chunks(10, 5, 0, true).is_err());
    }
}
