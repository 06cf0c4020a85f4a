use crate::delivery::TrackerSink;
use crate::error::VastErrorCode;
use crate::models::SkipOffset;
use crate::resolver::ResolvedVideoAd;
use crate::selector::Orientation;
use crate::tracker::{fire_all, MacroContext, VastTracker};
use log::debug;
use std::sync::Arc;

pub const DEFAULT_CLOSE_BUTTON_DELAY_MS: u64 = 5000;
/// Videos shorter than this cannot be skipped before they end
pub const MAX_VIDEO_DURATION_FOR_CLOSE_BUTTON_MS: u64 = 16_000;

/// What the player should do after a position update
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Set exactly once, on the first update at or past the close delay
    pub reveal_close_control: bool,
    /// Whether the icon should currently be visible
    pub show_icon: bool,
    /// Number of trackers sent by this update
    pub fired: usize,
}

/// Fires the trackers of one resolved ad as playback advances.
///
/// Owned by a single periodic caller; nothing here is synchronized.
pub struct PlaybackTrackerScheduler {
    ad: ResolvedVideoAd,
    sink: Arc<dyn TrackerSink>,
    duration_ms: u64,
    elapsed_ms: u64,
    close_button_delay_ms: u64,
    has_skip_offset: bool,
    close_revealed: bool,
    video_error: bool,
    is_closing: bool,
    icon_shown: bool,
}

impl PlaybackTrackerScheduler {
    pub fn new(ad: ResolvedVideoAd, duration_ms: u64, sink: Arc<dyn TrackerSink>) -> Self {
        let (close_button_delay_ms, has_skip_offset) = close_button_delay(ad.skip_offset.as_ref(), duration_ms);
        debug!(
            "Close delay {} ms for {} ms video (skip offset: {})",
            close_button_delay_ms, duration_ms, has_skip_offset
        );
        Self {
            ad,
            sink,
            duration_ms,
            elapsed_ms: 0,
            close_button_delay_ms,
            has_skip_offset,
            close_revealed: false,
            video_error: false,
            is_closing: false,
            icon_shown: false,
        }
    }

    pub fn ad(&self) -> &ResolvedVideoAd {
        &self.ad
    }

    pub fn into_ad(self) -> ResolvedVideoAd {
        self.ad
    }

    pub fn close_button_delay_ms(&self) -> u64 {
        self.close_button_delay_ms
    }

    pub fn has_skip_offset(&self) -> bool {
        self.has_skip_offset
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn set_closing(&mut self, closing: bool) {
        self.is_closing = closing;
    }

    fn context(&self) -> MacroContext {
        MacroContext::new()
            .with_asset_uri(self.ad.media_file_url.clone())
            .with_content_play_head(self.elapsed_ms)
    }

    /// Fire every progress tracker that became due and update overlay state.
    pub fn on_progress(&mut self, elapsed_ms: u64) -> ProgressUpdate {
        self.elapsed_ms = elapsed_ms;
        let context = self.context();
        let sink = self.sink.as_ref();
        let mut update = ProgressUpdate::default();

        for tracker in &mut self.ad.absolute_trackers {
            if tracker.offset_ms <= elapsed_ms && tracker.tracker.fire(sink, &context) {
                update.fired += 1;
            }
        }
        if self.duration_ms > 0 {
            for tracker in &mut self.ad.fractional_trackers {
                if tracker.threshold_ms(self.duration_ms) <= elapsed_ms && tracker.tracker.fire(sink, &context) {
                    update.fired += 1;
                }
            }
        }

        if let Some(icon) = self.ad.icon.as_mut() {
            let started = elapsed_ms >= icon.offset_ms;
            let ended = icon
                .duration_ms
                .is_some_and(|duration| elapsed_ms >= icon.offset_ms.saturating_add(duration));
            update.show_icon = started && !ended;
            if update.show_icon && !self.icon_shown {
                self.icon_shown = true;
                update.fired += fire_all(&mut icon.view_trackers, sink, &context);
            }
        }

        if !self.close_revealed && elapsed_ms >= self.close_button_delay_ms {
            self.close_revealed = true;
            update.reveal_close_control = true;
        }

        update
    }

    pub fn on_impression(&mut self) -> usize {
        let context = self.context();
        fire_all(&mut self.ad.impression_trackers, self.sink.as_ref(), &context)
    }

    /// Fire click trackers and return the click-through URL, if any.
    pub fn on_click(&mut self) -> Option<&str> {
        let context = self.context();
        fire_all(&mut self.ad.click_trackers, self.sink.as_ref(), &context);
        self.ad.click_through_url.as_deref()
    }

    /// Complete trackers fire only when no playback error was recorded.
    pub fn on_complete(&mut self) -> usize {
        if self.video_error {
            debug!("Skipping complete trackers after a playback error");
            return 0;
        }
        self.elapsed_ms = self.duration_ms.max(self.elapsed_ms);
        let context = self.context();
        fire_all(&mut self.ad.complete_trackers, self.sink.as_ref(), &context)
    }

    pub fn on_error(&mut self, code: VastErrorCode) -> usize {
        self.video_error = true;
        let context = self.context().with_error_code(code);
        fire_all(&mut self.ad.error_trackers, self.sink.as_ref(), &context)
    }

    pub fn on_pause(&mut self) -> usize {
        if self.is_closing {
            return 0;
        }
        let context = self.context();
        fire_all(&mut self.ad.pause_trackers, self.sink.as_ref(), &context)
    }

    pub fn on_resume(&mut self) -> usize {
        let context = self.context();
        fire_all(&mut self.ad.resume_trackers, self.sink.as_ref(), &context)
    }

    /// The ad was closed or skipped: close and skip trackers both fire.
    pub fn on_close(&mut self) -> usize {
        self.is_closing = true;
        let context = self.context();
        let sink = self.sink.as_ref();
        fire_all(&mut self.ad.close_trackers, sink, &context) + fire_all(&mut self.ad.skip_trackers, sink, &context)
    }

    /// Companion shown after the video ended
    pub fn on_companion_shown(&mut self, orientation: Orientation) -> usize {
        let context = self.context();
        let sink = self.sink.as_ref();
        let companion = match orientation {
            Orientation::Landscape => self.ad.landscape_companion.as_mut(),
            Orientation::Portrait => self.ad.portrait_companion.as_mut(),
        };
        companion.map_or(0, |c| fire_all(&mut c.creative_view_trackers, sink, &context))
    }

    /// Progress trackers due at `position_ms` that have not fired yet
    pub fn untriggered_trackers_before(&self, position_ms: u64) -> Vec<&VastTracker> {
        let absolute = self
            .ad
            .absolute_trackers
            .iter()
            .filter(|t| t.offset_ms <= position_ms && !t.tracker.is_fired())
            .map(|t| &t.tracker);
        let fractional = self
            .ad
            .fractional_trackers
            .iter()
            .filter(|t| self.duration_ms > 0 && t.threshold_ms(self.duration_ms) <= position_ms)
            .filter(|t| !t.tracker.is_fired())
            .map(|t| &t.tracker);
        absolute.chain(fractional).collect()
    }

    pub fn remaining_progress_trackers(&self) -> usize {
        self.untriggered_trackers_before(u64::MAX).len()
    }
}

/// Delay before the close or skip control appears, and whether it came from a skip offset.
pub fn close_button_delay(skip_offset: Option<&SkipOffset>, duration_ms: u64) -> (u64, bool) {
    match skip_offset {
        Some(offset) => (offset.to_millis(duration_ms), true),
        None if duration_ms < MAX_VIDEO_DURATION_FOR_CLOSE_BUTTON_MS => (duration_ms, false),
        None => (DEFAULT_CLOSE_BUTTON_DELAY_MS, false),
    }
}
