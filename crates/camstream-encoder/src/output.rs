//! Output buffer pool bookkeeping.

use crate::error::EncoderError;
use crate::EncoderResult;

/// Tracks which output buffer slots are dequeued.
///
/// A slot is taken on dequeue and must be returned exactly once.
#[derive(Debug)]
pub struct OutputPool {
    in_flight: Vec<bool>,
    dequeued: u64,
    released: u64,
}

impl OutputPool {
    /// Create a pool with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            in_flight: vec![false; capacity.max(1)],
            dequeued: 0,
            released: 0,
        }
    }

    /// Take a free slot, if any.
    pub fn acquire(&mut self) -> Option<usize> {
        let index = self.in_flight.iter().position(|busy| !busy)?;
        self.in_flight[index] = true;
        self.dequeued += 1;
        Some(index)
    }

    /// Return a dequeued slot.
    pub fn release(&mut self, index: usize) -> EncoderResult<()> {
        match self.in_flight.get_mut(index) {
            Some(busy) if *busy => {
                *busy = false;
                self.released += 1;
                Ok(())
            }
            _ => Err(EncoderError::InvalidBuffer(index)),
        }
    }

    /// Whether every slot is dequeued.
    pub fn is_exhausted(&self) -> bool {
        self.in_flight.iter().all(|busy| *busy)
    }

    /// Number of slots currently dequeued.
    pub fn in_flight(&self) -> usize {
        self.in_flight.iter().filter(|busy| **busy).count()
    }

    /// Total slots handed out.
    pub fn total_dequeued(&self) -> u64 {
        self.dequeued
    }

    /// Total slots returned.
    pub fn total_released(&self) -> u64 {
        self.released
    }

    /// Invalidate every dequeued slot.
    pub fn reset(&mut self) {
        self.in_flight.iter_mut().for_each(|busy| *busy = false);
    }
}
