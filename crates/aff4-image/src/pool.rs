use std::collections::VecDeque;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::bevy::{Bevy, CompressedBevy};
use crate::compression::ChunkCompression;
use crate::error::{ImageError, Result};

/// Bounded set of threads compressing bevies.
///
/// At most `workers` bevies are in flight. Submitting to a full pool joins
/// the oldest worker first and hands its result back, so completed bevies
/// always come out in segment order. With zero workers bevies are
/// compressed on the calling thread.
pub struct BevyPool {
    workers: usize,
    compression: ChunkCompression,
    in_flight: VecDeque<(u64, JoinHandle<Result<CompressedBevy>>)>,
}

impl BevyPool {
    pub fn new(workers: usize, compression: ChunkCompression) -> Self {
        Self {
            workers,
            compression,
            in_flight: VecDeque::with_capacity(workers),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Queue a bevy; returns any bevies that finished to make room for it.
    pub fn submit(&mut self, bevy: Bevy) -> Result<Vec<CompressedBevy>> {
        if self.workers == 0 {
            return Ok(vec![bevy.compress(self.compression)?]);
        }
        let mut done = Vec::new();
        while self.in_flight.len() >= self.workers {
            done.push(self.join_oldest()?);
        }
        let segment = bevy.segment;
        let compression = self.compression;
        let handle = thread::Builder::new()
            .name(format!("aff4-bevy-{segment}"))
            .spawn(move || bevy.compress(compression))?;
        debug!(segment, in_flight = self.in_flight.len() + 1, "bevy handed to worker");
        self.in_flight.push_back((segment, handle));
        Ok(done)
    }

    /// Join every outstanding worker in submission order.
    pub fn drain(&mut self) -> Result<Vec<CompressedBevy>> {
        let mut done = Vec::with_capacity(self.in_flight.len());
        while !self.in_flight.is_empty() {
            done.push(self.join_oldest()?);
        }
        Ok(done)
    }

    fn join_oldest(&mut self) -> Result<CompressedBevy> {
        let Some((segment, handle)) = self.in_flight.pop_front() else {
            return Err(ImageError::InvalidGeometry("no bevy in flight".into()));
        };
        handle
            .join()
            .map_err(|_| ImageError::WorkerPanicked { segment })?
    }
}

impl Drop for BevyPool {
    fn drop(&mut self) {
        // Never leave detached workers behind.
        for (_, handle) in self.in_flight.drain(..) {
            let _ = handle.join();
        }
    }
}
