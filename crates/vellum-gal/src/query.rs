//! GPU timestamp queries.
//!
//! Timestamps are written into native query pools of a fixed size. The pool
//! being filled stays current across frames; once full it is retired into
//! the frame's reclaim queue, its results are read back after the frame's
//! fences signaled and it is handed out again. A recycled pool is reset from
//! the command buffer that writes its first timestamp.

use std::collections::VecDeque;
use std::time::Duration;

use ash::vk;

use crate::backend::Backend;
use crate::error::{GpuError, Result};
use crate::lease::{Lease, LeasePool};

pub type QueryPoolLease = Lease<vk::QueryPool>;

/// Retired pools whose results stay readable.
const RETAINED_READBACKS: usize = 8;

/// A timestamp written into recorded commands.
///
/// Resolve it with [`Device::timestamp_result`](crate::Device::timestamp_result)
/// once the commands ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    pool: QueryPoolLease,
    query: u32,
    frame: u64,
}

impl Timestamp {
    /// Frame whose commands carry the write.
    pub fn frame(self) -> u64 {
        self.frame
    }
}

struct Readback {
    pool: QueryPoolLease,
    ticks: Vec<Option<u64>>,
}

pub struct QueryPool {
    pools: LeasePool<vk::QueryPool>,
    /// Pool being filled and the next unused query in it.
    current: Option<(QueryPoolLease, u32)>,
    queries_per_pool: u32,
    valid_mask: u64,
    nanos_per_tick: f64,
    readbacks: VecDeque<Readback>,
}

impl QueryPool {
    /// `valid_bits` and `period` come from the graphics queue family and the
    /// adapter limits. Zero valid bits means the queue cannot write
    /// timestamps.
    pub fn new(queries_per_pool: u32, valid_bits: u32, period: f32) -> Self {
        let valid_mask = match valid_bits {
            0 => 0,
            bits if bits >= 64 => u64::MAX,
            bits => (1_u64 << bits) - 1,
        };
        Self {
            pools: LeasePool::new(),
            current: None,
            queries_per_pool: queries_per_pool.max(1),
            valid_mask,
            nanos_per_tick: f64::from(period),
            readbacks: VecDeque::with_capacity(RETAINED_READBACKS),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.valid_mask != 0
    }

    /// Record a timestamp write into `command_buffer`, which is submitted
    /// with frame `frame`.
    ///
    /// Also returns the current pool when this write filled it; the caller
    /// must reclaim it once the command buffer retired.
    pub fn write_timestamp<B: Backend>(
        &mut self,
        backend: &B,
        command_buffer: vk::CommandBuffer,
        frame: u64,
    ) -> Result<(Timestamp, Option<QueryPoolLease>)> {
        if !self.is_supported() {
            return Err(GpuError::invalid_state(
                "the graphics queue does not support timestamps",
            ));
        }

        let (lease, query) = match self.current {
            Some(current) => current,
            None => {
                let count = self.queries_per_pool;
                let lease = self.pools.acquire(|| backend.create_query_pool(count))?;
                let pool = self.pools.get(lease)?;
                backend.cmd_reset_query_pool(command_buffer, pool, 0, count);
                self.current = Some((lease, 0));
                (lease, 0)
            }
        };

        let pool = self.pools.get(lease)?;
        backend.cmd_write_timestamp(command_buffer, pool, query);
        let next = query + 1;
        let full = if next >= self.queries_per_pool {
            self.current = None;
            Some(lease)
        } else {
            self.current = Some((lease, next));
            None
        };
        Ok((
            Timestamp {
                pool: lease,
                query,
                frame,
            },
            full,
        ))
    }

    /// Stop writing into the current pool, e.g. because the reset recorded
    /// for it was never submitted.
    pub fn retire_current(&mut self) -> Option<QueryPoolLease> {
        self.current.take().map(|(lease, _)| lease)
    }

    /// GPU time of `timestamp`, or `None` until its frame is at or before
    /// `safe_frame`.
    ///
    /// Timestamps whose pool was recycled long ago are stale.
    pub fn result<B: Backend>(
        &self,
        backend: &B,
        timestamp: Timestamp,
        safe_frame: Option<u64>,
    ) -> Result<Option<Duration>> {
        // A recycled pool may still hold the previous user's values until
        // the reset recorded with this frame ran.
        if !matches!(safe_frame, Some(safe) if safe >= timestamp.frame) {
            return Ok(None);
        }
        let ticks = match self.pools.get(timestamp.pool) {
            Ok(pool) => backend
                .query_timestamps(pool, timestamp.query, 1)?
                .first()
                .copied()
                .flatten(),
            Err(_) => self
                .readbacks
                .iter()
                .find(|readback| readback.pool == timestamp.pool)
                .and_then(|readback| readback.ticks.get(timestamp.query as usize).copied())
                .ok_or(GpuError::StaleHandle("Timestamp"))?,
        };
        Ok(ticks.map(|ticks| self.duration(ticks)))
    }

    /// Read back a retired pool and make it available again.
    pub fn reclaim_pool<B: Backend>(&mut self, backend: &B, lease: QueryPoolLease) -> Result<()> {
        let count = self.queries_per_pool;
        let mut ticks = Vec::new();
        self.pools.release(lease, |pool| {
            ticks = backend.query_timestamps(pool, 0, count)?;
            Ok(())
        })?;

        if self.readbacks.len() == RETAINED_READBACKS {
            self.readbacks.pop_front();
        }
        self.readbacks.push_back(Readback { pool: lease, ticks });
        Ok(())
    }

    pub fn allocated(&self) -> usize {
        self.pools.allocated()
    }

    pub fn available(&self) -> usize {
        self.pools.available()
    }

    pub fn destroy<B: Backend>(&mut self, backend: &B) {
        self.current = None;
        self.readbacks.clear();
        for pool in self.pools.drain() {
            backend.destroy_query_pool(pool);
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn duration(&self, ticks: u64) -> Duration {
        let nanos = (ticks & self.valid_mask) as f64 * self.nanos_per_tick;
        Duration::from_nanos(nanos.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_bits_mask_the_counter() {
        let pool = QueryPool::new(4, 36, 1.0);
        assert_eq!(pool.valid_mask, (1 << 36) - 1);
        assert_eq!(pool.duration((1 << 40) | 5), Duration::from_nanos(5));

        let wide = QueryPool::new(4, 64, 1.0);
        assert_eq!(wide.valid_mask, u64::MAX);
    }

    #[test]
    fn period_scales_ticks() {
        let pool = QueryPool::new(4, 64, 52.08);
        assert_eq!(pool.duration(1000), Duration::from_nanos(52_080));
    }

    #[test]
    fn no_valid_bits_means_unsupported() {
        assert!(!QueryPool::new(4, 0, 1.0).is_supported());
        assert!(QueryPool::new(4, 1, 1.0).is_supported());
    }
}
