//! Bounded fuel trend for the tracked sensor

use crate::domain::types::HistoryPoint;
use std::collections::VecDeque;

/// Maximum points kept on the trend chart
pub const HISTORY_CAPACITY: usize = 20;

/// FIFO of the most recent points, oldest first
#[derive(Debug, Clone, Default)]
pub struct HistoryBuffer {
    points: VecDeque<HistoryPoint>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self { points: VecDeque::with_capacity(HISTORY_CAPACITY) }
    }

    /// Append, evicting the oldest point when full
    pub fn append(&mut self, point: HistoryPoint) {
        if self.points.len() == HISTORY_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    /// Called whenever the tracked sensor changes
    pub fn reset(&mut self) {
        self.points.clear();
    }

    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
