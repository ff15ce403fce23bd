//! Bounded queue of particles waiting to enter the simulation.

use std::collections::VecDeque;

use kernel::{ParticleArrays, ParticleSeed};

/// Particles submitted by the host, admitted at the next frame start.
#[derive(Debug, Clone)]
pub struct PendingInsertions {
    queue: VecDeque<ParticleSeed>,
    limit: usize,
    dropped: u64,
}

impl PendingInsertions {
    /// Queue holding at most `limit` seeds.
    pub fn new(limit: usize) -> Self {
        Self { queue: VecDeque::new(), limit, dropped: 0 }
    }

    /// Seeds waiting.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Return `true` if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Seeds refused because the queue was full, since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Enqueue `seeds`; returns how many were accepted.
    pub fn submit(&mut self, seeds: impl IntoIterator<Item = ParticleSeed>) -> usize {
        let mut accepted = 0;
        let mut refused = 0usize;
        for seed in seeds {
            if self.queue.len() < self.limit {
                self.queue.push_back(seed);
                accepted += 1;
            } else {
                refused += 1;
            }
        }
        if refused > 0 {
            self.dropped += refused as u64;
            tracing::warn!(refused, limit = self.limit, "pending particle queue full; submissions dropped");
        }
        accepted
    }

    /// Move as many seeds as fit into `particles`, oldest first. The rest stay
    /// queued for a later frame.
    pub fn admit_into(&mut self, particles: &mut ParticleArrays) -> usize {
        let take = self.queue.len().min(particles.remaining());
        if take == 0 {
            return 0;
        }
        let seeds: Vec<ParticleSeed> = self.queue.drain(..take).collect();
        let admitted = particles.admit(&seeds);
        tracing::info!(admitted, waiting = self.queue.len(), "particles admitted");
        admitted
    }

    /// Drop everything waiting.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
