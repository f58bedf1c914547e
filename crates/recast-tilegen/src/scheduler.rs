//! Build queue and task dispatch
//!
//! Queued tiles are started in Hilbert order, at most `max_concurrent` at a
//! time. Finished builds report back over a channel that the orchestrating
//! thread drains on every tick, so all integration happens on one thread.

use crate::tile_generator::{TileBuildOutput, TileGenerator};
use recast_common::Result;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

/// How tile builds are executed
#[derive(Debug, Clone, Default)]
pub enum BuildMode {
    /// Builds run inline inside `tick`
    #[default]
    Synchronous,
    /// Builds run on the blocking pool of a tokio runtime
    Background(tokio::runtime::Handle),
}

impl BuildMode {
    /// Background mode on the current runtime, or synchronous outside one
    pub fn current() -> Self {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => BuildMode::Background(handle),
            Err(_) => BuildMode::Synchronous,
        }
    }

    pub fn is_background(&self) -> bool {
        matches!(self, BuildMode::Background(_))
    }
}

/// Result of one tile build, tagged with the grid version it was started under
pub(crate) struct Completion {
    pub tile: Arc<TileGenerator>,
    pub version: u32,
    pub result: Result<TileBuildOutput>,
}

pub(crate) struct BuildScheduler {
    mode: BuildMode,
    queue: VecDeque<usize>,
    in_flight: usize,
    max_concurrent: usize,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
}

impl BuildScheduler {
    pub fn new(mode: BuildMode, max_concurrent: usize) -> Self {
        let (sender, receiver) = channel();
        Self {
            mode,
            queue: VecDeque::new(),
            in_flight: 0,
            max_concurrent: max_concurrent.max(1),
            sender,
            receiver,
        }
    }

    pub fn mode(&self) -> &BuildMode {
        &self.mode
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn set_max_concurrent(&mut self, max_concurrent: usize) {
        self.max_concurrent = max_concurrent.max(1);
    }

    /// Appends a tile unless it is already queued
    pub fn enqueue(&mut self, tile: usize) -> bool {
        if self.queue.contains(&tile) {
            return false;
        }
        self.queue.push_back(tile);
        true
    }

    pub fn dequeue(&mut self, tile: usize) -> bool {
        let before = self.queue.len();
        self.queue.retain(|&t| t != tile);
        self.queue.len() != before
    }

    pub fn queued(&self) -> impl Iterator<Item = usize> + '_ {
        self.queue.iter().copied()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queue(&mut self) -> Vec<usize> {
        self.queue.drain(..).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn has_free_slot(&self) -> bool {
        self.in_flight < self.max_concurrent
    }

    /// Next queued tile, if a build slot is free
    pub fn next_ready(&mut self) -> Option<usize> {
        if !self.has_free_slot() {
            return None;
        }
        self.queue.pop_front()
    }

    /// Starts a build. In synchronous mode it has finished when this returns.
    pub fn dispatch<F>(&mut self, job: F)
    where
        F: FnOnce() -> Completion + Send + 'static,
    {
        self.in_flight += 1;
        let sender = self.sender.clone();
        match &self.mode {
            BuildMode::Synchronous => {
                let _ = sender.send(job());
            }
            BuildMode::Background(handle) => {
                handle.spawn_blocking(move || {
                    // the receiver only goes away with the generator
                    let _ = sender.send(job());
                });
            }
        }
    }

    /// Finished builds reported since the last call
    pub fn drain(&mut self) -> Vec<Completion> {
        let done: Vec<Completion> = self.receiver.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(done.len());
        done
    }
}

/// Position of `(x, y)` along a Hilbert curve covering an `n` x `n` grid.
/// `n` must be a power of two.
pub fn hilbert_index(n: u32, x: u32, y: u32) -> u64 {
    let (mut x, mut y) = (x, y);
    let mut d = 0u64;
    let mut s = n / 2;
    while s > 0 {
        let rx = u32::from((x & s) > 0);
        let ry = u32::from((y & s) > 0);
        d += u64::from(s) * u64::from(s) * u64::from((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = n - 1 - x;
                y = n - 1 - y;
            }
            std::mem::swap(&mut x, &mut y);
        }
        s /= 2;
    }
    d
}

/// Hilbert ordering key for a tile of a `tiles_w` x `tiles_h` grid
pub fn tile_order_key(tiles_w: i32, tiles_h: i32, x: i32, y: i32) -> u64 {
    let n = (tiles_w.max(tiles_h).max(1) as u32).next_power_of_two();
    hilbert_index(n, x.max(0) as u32, y.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn completion() -> Completion {
        Completion {
            tile: Arc::new(TileGenerator::new(0, 0, 0, 1)),
            version: 1,
            result: Ok(TileBuildOutput::default()),
        }
    }

    #[test]
    fn test_hilbert_visits_every_cell_once() {
        let n = 8;
        let keys: HashSet<u64> = (0..n)
            .flat_map(|y| (0..n).map(move |x| hilbert_index(n, x, y)))
            .collect();
        assert_eq!(keys.len(), 64);
        assert_eq!(keys.iter().max(), Some(&63));
        assert_eq!(hilbert_index(n, 0, 0), 0);
    }

    #[test]
    fn test_hilbert_neighbours_are_adjacent() {
        let n = 4u32;
        let mut by_key = vec![(0u32, 0u32); 16];
        for y in 0..n {
            for x in 0..n {
                by_key[hilbert_index(n, x, y) as usize] = (x, y);
            }
        }
        for pair in by_key.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert_eq!(a.0.abs_diff(b.0) + a.1.abs_diff(b.1), 1);
        }
    }

    #[test]
    fn test_queue_dedups_and_respects_slots() {
        let mut scheduler = BuildScheduler::new(BuildMode::Synchronous, 1);
        assert!(scheduler.enqueue(3));
        assert!(!scheduler.enqueue(3));
        scheduler.enqueue(5);
        assert_eq!(scheduler.queue_len(), 2);

        assert_eq!(scheduler.next_ready(), Some(3));
        scheduler.in_flight += 1;
        assert_eq!(scheduler.next_ready(), None);
        scheduler.in_flight -= 1;
        assert!(scheduler.dequeue(5));
        assert_eq!(scheduler.next_ready(), None);
    }

    #[test]
    fn test_synchronous_dispatch_completes_inline() {
        let mut scheduler = BuildScheduler::new(BuildMode::Synchronous, 2);
        scheduler.dispatch(completion);
        assert_eq!(scheduler.in_flight(), 1);
        let done = scheduler.drain();
        assert_eq!(done.len(), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_dispatch_reports_back() {
        let mode = BuildMode::current();
        assert!(mode.is_background());
        let mut scheduler = BuildScheduler::new(mode, 2);
        scheduler.dispatch(completion);
        scheduler.dispatch(completion);

        let mut done = 0;
        for _ in 0..200 {
            done += scheduler.drain().len();
            if done == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(done, 2);
        assert_eq!(scheduler.in_flight(), 0);
    }
}
