use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::sensing::CHANNELS;

/// Whether each tick is persisted. Polling and drawing happen in both states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

impl RecordingState {
    pub fn toggled(self) -> Self {
        match self {
            RecordingState::Idle => RecordingState::Recording,
            RecordingState::Recording => RecordingState::Idle,
        }
    }

    pub fn is_recording(self) -> bool {
        self == RecordingState::Recording
    }

    pub fn label(self) -> &'static str {
        match self {
            RecordingState::Idle => "Data: Not Recording",
            RecordingState::Recording => "Data: Recording",
        }
    }
}

/// Store availability as shown in the status bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StoreState {
    Connected,
    MissingTable,
    Unavailable,
}

impl StoreState {
    pub fn label(self) -> &'static str {
        match self {
            StoreState::Connected => "DB: Connected",
            StoreState::MissingTable => "DB: Missing table",
            StoreState::Unavailable => "DB: Unavailable",
        }
    }
}

/// Rolling window of the most recent readings, one FIFO per channel.
#[derive(Debug, Clone)]
pub struct LiveHistory {
    capacity: usize,
    channels: [VecDeque<f64>; CHANNELS],
}

impl LiveHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity)),
        }
    }

    /// Appends one value per channel, evicting the oldest beyond capacity.
    pub fn push(&mut self, values: [f64; CHANNELS]) {
        for (channel, value) in self.channels.iter_mut().zip(values) {
            if channel.len() == self.capacity {
                channel.pop_front();
            }
            channel.push_back(value);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of one channel, oldest first.
    pub fn channel(&self, index: usize) -> Vec<f64> {
        self.channels
            .get(index)
            .map(|channel| channel.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// The latest polled values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LiveReading {
    pub timestamp: NaiveDateTime,
    pub values: [f64; CHANNELS],
    pub average: f64,
}

impl LiveReading {
    pub fn new(timestamp: NaiveDateTime, values: [f64; CHANNELS]) -> Self {
        let average = values.iter().sum::<f64>() / CHANNELS as f64;
        Self {
            timestamp,
            values,
            average,
        }
    }
}

/// Status labels of the main window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveStatus {
    pub recording: RecordingState,
    pub store: StoreState,
    /// Rows written since the loop started.
    pub persisted: u64,
    pub last_error: Option<String>,
}

impl LiveStatus {
    pub fn new(store: StoreState) -> Self {
        Self {
            recording: RecordingState::Idle,
            store,
            persisted: 0,
            last_error: None,
        }
    }
}
