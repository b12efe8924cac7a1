//! Frame pacing
//!
//! Each window owns a [`FrameClock`] that schedules redraws and a
//! [`FramePacer`] that ties the clock to the compositor's frame callback.
//! After a commit the clock is frozen until the compositor answers the
//! frame callback, so we never draw faster than the compositor presents.
//!
//! All times are microseconds on `CLOCK_MONOTONIC`.

use std::collections::VecDeque;

use rustix::time::{clock_gettime, ClockId};

/// Refresh interval assumed when no output reports a rate (60 Hz)
pub const DEFAULT_REFRESH_INTERVAL: i64 = 16_667;

/// Number of frames whose timings are kept
pub const DEFAULT_HISTORY_LENGTH: usize = 16;

/// Presentation times older than this are not extrapolated from
const MAX_HISTORY_AGE: i64 = 150_000;

/// Current monotonic time in microseconds
pub fn monotonic_time() -> i64 {
    let ts = clock_gettime(ClockId::Monotonic);
    i64::from(ts.tv_sec) * 1_000_000 + i64::from(ts.tv_nsec) / 1_000
}

/// Refresh interval in microseconds for a rate in millihertz
pub fn refresh_interval_from_mhz(refresh_mhz: i32) -> Option<i64> {
    (refresh_mhz > 0).then(|| 1_000_000_000 / i64::from(refresh_mhz))
}

/// Recover a full timestamp from a 32-bit millisecond frame time.
///
/// The frame callback only carries the low 32 bits of a millisecond
/// timestamp. We assume it lies within a second of `now_us` and accept it
/// only then, so the difference to the low bits of now is taken modulo
/// 2^32 and read as a signed value. This handles the counter wrapping on
/// either side of now.
pub fn reconstruct_frame_time(frame_ms: u32, now_us: i64) -> Option<i64> {
    let now_low = (now_us / 1000) as u32;
    let diff = frame_ms.wrapping_sub(now_low);

    if diff < 1000 || diff > 1000u32.wrapping_neg() {
        Some(now_us + 1000 * i64::from(diff as i32))
    } else {
        None
    }
}

/// Timings of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimings {
    pub frame_counter: i64,
    /// Time the frame started
    pub frame_time: i64,
    /// 0 until known
    pub refresh_interval: i64,
    /// 0 until known
    pub presentation_time: i64,
    pub predicted_presentation_time: i64,
    /// All information for this frame has arrived
    pub complete: bool,
}

/// Per-window redraw scheduler
#[derive(Debug, Clone)]
pub struct FrameClock {
    freeze_count: u32,
    frame_counter: i64,
    frame_time: i64,
    history: VecDeque<FrameTimings>,
    history_length: usize,
    after_paint_requested: bool,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH)
    }
}

impl FrameClock {
    /// Create a clock remembering `history_length` frames
    pub fn new(history_length: usize) -> Self {
        Self {
            freeze_count: 0,
            frame_counter: 0,
            frame_time: 0,
            history: VecDeque::with_capacity(history_length),
            history_length: history_length.max(1),
            after_paint_requested: false,
        }
    }

    /// Stop producing frames until a matching [`thaw`](Self::thaw)
    pub fn freeze(&mut self) {
        self.freeze_count += 1;
    }

    /// Undo one [`freeze`](Self::freeze)
    pub fn thaw(&mut self) {
        if self.freeze_count == 0 {
            log::warn!("Frame clock thawed more often than frozen");
            return;
        }
        self.freeze_count -= 1;
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_count > 0
    }

    /// Counter of the current frame
    pub fn frame_counter(&self) -> i64 {
        self.frame_counter
    }

    /// Start time of the current frame
    pub fn frame_time(&self) -> i64 {
        self.frame_time
    }

    /// Start a new frame at `now`.
    ///
    /// Returns `None` while frozen.
    pub fn begin_frame(&mut self, now: i64) -> Option<i64> {
        if self.is_frozen() {
            return None;
        }

        // Frame time is monotonic even if the caller's clock is not
        self.frame_time = now.max(self.frame_time);
        self.frame_counter += 1;

        if self.history.len() == self.history_length {
            self.history.pop_front();
        }
        self.history.push_back(FrameTimings {
            frame_counter: self.frame_counter,
            frame_time: self.frame_time,
            ..FrameTimings::default()
        });

        Some(self.frame_counter)
    }

    /// Timings of the current frame
    pub fn current_timings(&self) -> Option<&FrameTimings> {
        self.history.back()
    }

    pub fn current_timings_mut(&mut self) -> Option<&mut FrameTimings> {
        self.history.back_mut()
    }

    /// Timings of a frame still in the history
    pub fn timings(&self, frame_counter: i64) -> Option<&FrameTimings> {
        self.history
            .iter()
            .find(|t| t.frame_counter == frame_counter)
    }

    pub fn timings_mut(&mut self, frame_counter: i64) -> Option<&mut FrameTimings> {
        self.history
            .iter_mut()
            .find(|t| t.frame_counter == frame_counter)
    }

    /// Refresh interval and the next presentation time at or after
    /// `base_time`, extrapolated from the newest completed frame.
    ///
    /// The presentation time is `None` without recent history.
    pub fn refresh_info(&self, base_time: i64) -> (i64, Option<i64>) {
        let last = self
            .history
            .iter()
            .rev()
            .find(|t| t.complete && t.presentation_time != 0);

        let Some(last) = last else {
            return (DEFAULT_REFRESH_INTERVAL, None);
        };

        let refresh_interval = if last.refresh_interval > 0 {
            last.refresh_interval
        } else {
            DEFAULT_REFRESH_INTERVAL
        };

        let mut presentation_time = last.presentation_time;
        if (presentation_time - base_time).abs() >= MAX_HISTORY_AGE {
            return (refresh_interval, None);
        }
        while presentation_time < base_time {
            presentation_time += refresh_interval;
        }
        (refresh_interval, Some(presentation_time))
    }

    /// Ask for an after-paint phase in the current frame
    pub fn request_after_paint(&mut self) {
        self.after_paint_requested = true;
    }

    /// Consume the after-paint request
    pub fn take_after_paint_request(&mut self) -> bool {
        std::mem::take(&mut self.after_paint_requested)
    }

    /// Predict when the current frame will be shown.
    ///
    /// Assumes the compositor starts drawing at the vblank after our
    /// commit and presents at the one after that. Without a known vblank
    /// phase we assume we are half way through a refresh cycle.
    pub fn predict_presentation(&mut self) {
        let Some(frame_time) = self.current_timings().map(|t| t.frame_time) else {
            return;
        };
        let (refresh_interval, presentation_time) = self.refresh_info(frame_time);

        let predicted = match presentation_time {
            Some(presentation_time) => presentation_time + refresh_interval,
            None => frame_time + refresh_interval / 2 + refresh_interval,
        };
        if let Some(timings) = self.current_timings_mut() {
            timings.predicted_presentation_time = predicted;
        }
    }
}

/// Commit/frame-callback handshake state of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramePacer {
    /// Damage was submitted and waits for the next commit
    pub pending_commit: bool,
    /// A frame callback is outstanding
    pub awaiting_frame: bool,
    /// Frame counter recorded at the last commit
    pub pending_frame_counter: Option<i64>,
}

impl FramePacer {
    /// Record a commit: the clock stays frozen until the frame callback
    pub fn committed(&mut self, clock: &mut FrameClock) {
        clock.freeze();
        self.pending_commit = false;
        self.pending_frame_counter = Some(clock.frame_counter());
        self.awaiting_frame = true;
    }

    /// Handle the frame callback.
    ///
    /// Returns false when no frame was outstanding.
    pub fn frame_done(
        &mut self,
        clock: &mut FrameClock,
        frame_ms: u32,
        now_us: i64,
        refresh_interval: i64,
    ) -> bool {
        if !self.awaiting_frame {
            return false;
        }

        self.awaiting_frame = false;
        clock.thaw();

        let Some(counter) = self.pending_frame_counter.take() else {
            return true;
        };
        let Some(timings) = clock.timings_mut(counter) else {
            return true;
        };

        timings.refresh_interval = refresh_interval;
        if let Some(frame_time) = reconstruct_frame_time(frame_ms, now_us) {
            timings.presentation_time = frame_time + refresh_interval;
        }
        timings.complete = true;

        log::debug!(
            "Frame {} presented at {} (refresh {} us)",
            counter,
            timings.presentation_time,
            refresh_interval
        );
        true
    }

    /// Drop an outstanding frame callback, thawing the clock
    pub fn cancel(&mut self, clock: &mut FrameClock) {
        if self.awaiting_frame {
            self.awaiting_frame = false;
            self.pending_frame_counter = None;
            clock.thaw();
        }
    }
}
