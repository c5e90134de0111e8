//! Playback units
//!
//! One schedulable voice per segment. A unit reads its decoded source from a
//! start frame for a fixed number of source frames, resampling to the graph
//! rate, and reports when it runs out.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::buffer::{AudioBuffer, GRAPH_SAMPLE_RATE};
use crate::engine::decode::DecodedSource;

/// Convert seconds to frames at `rate`, rounding to the nearest frame
#[inline]
pub fn secs_to_frames(secs: f64, rate: u32) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * rate as f64).round() as u64
    } else {
        0
    }
}

/// A range of source frames to play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledSegment {
    /// First source frame
    pub start_frame: u64,
    /// Source frames to play
    pub frame_count: u64,
    /// Graph timeline frame to start at; `None` starts on the next pull
    pub at: Option<u64>,
}

/// Unit lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitState {
    /// No readable source
    Unbound,
    /// Bound, nothing scheduled
    Idle,
    /// Waiting for its start time
    Scheduled,
    Playing,
    /// Ran out of scheduled frames
    Finished,
}

/// Snapshot of a unit for inspection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitInfo {
    pub index: usize,
    pub source: Option<std::path::PathBuf>,
    pub state: UnitState,
    pub scheduled: Option<ScheduledSegment>,
    /// Graph frames produced since the last schedule
    pub played_frames: u64,
}

/// A schedulable voice bound to one decoded source
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    index: usize,
    source: Option<Arc<DecodedSource>>,
    schedule: Option<ScheduledSegment>,
    state: UnitState,
    /// Source frames advanced per graph frame
    step: f64,
    played: u64,
}

impl PlaybackUnit {
    /// Create a unit, unbound when `source` is `None`
    pub fn new(index: usize, source: Option<Arc<DecodedSource>>) -> Self {
        let step = source
            .as_ref()
            .map_or(1.0, |s| s.sample_rate() as f64 / GRAPH_SAMPLE_RATE as f64);
        let state = if source.is_some() {
            UnitState::Idle
        } else {
            UnitState::Unbound
        };
        Self {
            index,
            source,
            schedule: None,
            state,
            step,
            played: 0,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_bound(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&Arc<DecodedSource>> {
        self.source.as_ref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref().map(DecodedSource::path)
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn scheduled(&self) -> Option<ScheduledSegment> {
        self.schedule
    }

    pub fn played_frames(&self) -> u64 {
        self.played
    }

    /// Graph frames the scheduled segment lasts
    pub fn scheduled_output_frames(&self) -> u64 {
        self.schedule
            .map_or(0, |s| (s.frame_count as f64 / self.step).ceil() as u64)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, UnitState::Scheduled | UnitState::Playing)
    }

    /// Schedule a segment, replacing anything already scheduled
    ///
    /// Returns `false` (and schedules nothing) for unbound units and empty
    /// segments.
    pub fn schedule(&mut self, segment: ScheduledSegment) -> bool {
        if self.source.is_none() || segment.frame_count == 0 {
            return false;
        }
        self.schedule = Some(segment);
        self.played = 0;
        self.state = UnitState::Scheduled;
        true
    }

    /// Stop and forget the schedule; never signals completion
    pub fn stop(&mut self) {
        self.schedule = None;
        self.played = 0;
        if self.source.is_some() {
            self.state = UnitState::Idle;
        }
    }

    /// Add this unit's output for one block into `out`
    ///
    /// `block_start` is the graph timeline frame of `out[0]`. Returns `true`
    /// exactly once, on the block where the scheduled segment runs out.
    pub fn mix_into(&mut self, out: &mut AudioBuffer, block_start: u64) -> bool {
        if !self.is_active() {
            return false;
        }
        let (Some(source), Some(segment)) = (self.source.as_ref(), self.schedule) else {
            return false;
        };

        let frames = out.num_samples() as u64;
        let offset = match (self.state, segment.at) {
            (UnitState::Scheduled, Some(at)) => {
                if at >= block_start + frames {
                    return false;
                }
                at.saturating_sub(block_start)
            }
            _ => 0,
        };
        self.state = UnitState::Playing;

        let total = segment.frame_count as f64;
        let end = (segment.start_frame + segment.frame_count).min(source.frames() as u64) as usize;
        let Some((left, right)) = out.stereo_mut() else {
            return false;
        };

        for i in offset as usize..frames as usize {
            let position = self.played as f64 * self.step;
            if position >= total {
                break;
            }
            let pos = segment.start_frame as f64 + position;
            let i0 = pos.floor() as usize;
            let frac = (pos - i0 as f64) as f32;
            let (l0, r0) = source.stereo_frame(i0);
            let (l1, r1) = if frac > 0.0 && i0 + 1 < end {
                source.stereo_frame(i0 + 1)
            } else {
                (l0, r0)
            };
            left[i] += l0 + (l1 - l0) * frac;
            right[i] += r0 + (r1 - r0) * frac;
            self.played += 1;
        }

        if self.played as f64 * self.step >= total {
            self.state = UnitState::Finished;
            return true;
        }
        false
    }

    pub fn info(&self) -> UnitInfo {
        UnitInfo {
            index: self.index,
            source: self.source_path().map(Path::to_path_buf),
            state: self.state,
            scheduled: self.schedule,
            played_frames: self.played,
        }
    }
}
