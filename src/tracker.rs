use crate::delivery::TrackerSink;
use crate::error::VastErrorCode;
use rand::Rng;
use serde::{Deserialize, Serialize};

const ERROR_CODE_MACRO: &str = "[ERRORCODE]";
const CONTENT_PLAY_HEAD_MACRO: &str = "[CONTENTPLAYHEAD]";
const ASSET_URI_MACRO: &str = "[ASSETURI]";
const CACHE_BUSTING_MACRO: &str = "[CACHEBUSTING]";

/// A URL requested when a playback event occurs
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct VastTracker {
    url_template: String,
    repeatable: bool,
    fired: bool,
}

impl VastTracker {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            repeatable: false,
            fired: false,
        }
    }

    pub fn repeatable(url_template: impl Into<String>) -> Self {
        Self {
            repeatable: true,
            ..Self::new(url_template)
        }
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    pub fn is_fired(&self) -> bool {
        self.fired
    }

    /// Send the expanded URL unless this one-shot tracker already fired.
    /// Returns whether a send happened.
    pub fn fire(&mut self, sink: &dyn TrackerSink, context: &MacroContext) -> bool {
        if self.fired && !self.repeatable {
            return false;
        }
        sink.send(context.expand(&self.url_template));
        self.fired = true;
        true
    }
}

/// Tracker fired once playback passes an absolute offset
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AbsoluteProgressTracker {
    pub tracker: VastTracker,
    pub offset_ms: u64,
}

impl AbsoluteProgressTracker {
    pub fn new(url_template: impl Into<String>, offset_ms: u64) -> Self {
        Self {
            tracker: VastTracker::new(url_template),
            offset_ms,
        }
    }
}

/// Tracker fired once playback passes a fraction of the duration
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FractionalProgressTracker {
    pub tracker: VastTracker,
    pub fraction: f32,
}

impl FractionalProgressTracker {
    pub fn new(url_template: impl Into<String>, fraction: f32) -> Self {
        Self {
            tracker: VastTracker::new(url_template),
            fraction,
        }
    }

    /// Position in milliseconds at which this tracker becomes due.
    pub fn threshold_ms(&self, duration_ms: u64) -> u64 {
        (f64::from(self.fraction) * duration_ms as f64).round() as u64
    }
}

/// Fire every tracker in `trackers`, returning the number of sends.
pub fn fire_all(trackers: &mut [VastTracker], sink: &dyn TrackerSink, context: &MacroContext) -> usize {
    trackers
        .iter_mut()
        .map(|t| t.fire(sink, context))
        .filter(|sent| *sent)
        .count()
}

/// Values substituted into tracker URL macros
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MacroContext {
    pub error_code: Option<VastErrorCode>,
    pub asset_uri: Option<String>,
    pub content_play_head_ms: Option<u64>,
}

impl MacroContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_code(mut self, code: VastErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_asset_uri(mut self, uri: impl Into<String>) -> Self {
        self.asset_uri = Some(uri.into());
        self
    }

    pub fn with_content_play_head(mut self, ms: u64) -> Self {
        self.content_play_head_ms = Some(ms);
        self
    }

    pub fn expand(&self, template: &str) -> String {
        substitute(
            template,
            self.error_code.map(|c| c.code()),
            self.asset_uri.as_deref(),
            self.content_play_head_ms,
        )
    }
}

/// Replace the VAST macros in `template`. Absent values become empty strings
/// and unrecognised bracketed names are left as they are.
pub fn substitute(
    template: &str,
    error_code: Option<u32>,
    asset_uri: Option<&str>,
    content_play_head_ms: Option<u64>,
) -> String {
    let mut url = template.to_string();
    if url.contains(ERROR_CODE_MACRO) {
        let code = error_code.map(|c| c.to_string()).unwrap_or_default();
        url = url.replace(ERROR_CODE_MACRO, &code);
    }
    if url.contains(CONTENT_PLAY_HEAD_MACRO) {
        let play_head = content_play_head_ms.map(format_play_head).unwrap_or_default();
        url = url.replace(CONTENT_PLAY_HEAD_MACRO, &play_head);
    }
    if url.contains(ASSET_URI_MACRO) {
        let asset = asset_uri
            .map(|uri| url::form_urlencoded::byte_serialize(uri.as_bytes()).collect::<String>())
            .unwrap_or_default();
        url = url.replace(ASSET_URI_MACRO, &asset);
    }
    if url.contains(CACHE_BUSTING_MACRO) {
        let buster = format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u32));
        url = url.replace(CACHE_BUSTING_MACRO, &buster);
    }
    url
}

/// `HH:MM:SS.mmm`; hours are not capped at two digits.
pub fn format_play_head(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = ms / 60_000 % 60;
    let seconds = ms / 1000 % 60;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RecordingSink;

    const TEMPLATE: &str = "err?errorcode=[ERRORCODE]&asseturi=[ASSETURI]&contentplayhead=[CONTENTPLAYHEAD]";

    #[test]
    fn substitutes_all_macros() {
        assert_eq!(
            substitute(TEMPLATE, Some(400), Some("v.mp4"), Some(15094)),
            "err?errorcode=400&asseturi=v.mp4&contentplayhead=00:00:15.094"
        );
    }

    #[test]
    fn absent_values_become_empty() {
        assert_eq!(
            substitute(TEMPLATE, None, None, None),
            "err?errorcode=&asseturi=&contentplayhead="
        );
    }

    #[test]
    fn asset_uri_is_url_encoded() {
        assert_eq!(
            substitute("a=[ASSETURI]", None, Some("https://cdn.example/v 1.mp4?x=1"), None),
            "a=https%3A%2F%2Fcdn.example%2Fv+1.mp4%3Fx%3D1"
        );
    }

    #[test]
    fn unknown_macros_untouched() {
        assert_eq!(substitute("t=[TIMESTAMP]&e=[ERRORCODE]", Some(900), None, None), "t=[TIMESTAMP]&e=900");
    }

    #[test]
    fn cache_busting_is_eight_digits() {
        let url = substitute("cb=[CACHEBUSTING]", None, None, None);
        let digits = url.trim_start_matches("cb=");
        assert_eq!(digits.len(), 8);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn play_head_format() {
        assert_eq!(format_play_head(45_296_789), "12:34:56.789");
        assert_eq!(format_play_head(360_000_000), "100:00:00.000");
        assert_eq!(format_play_head(0), "00:00:00.000");
    }

    #[test]
    fn one_shot_tracker_fires_once() {
        let sink = RecordingSink::default();
        let mut tracker = VastTracker::new("https://t.example/imp");
        for _ in 0..3 {
            tracker.fire(&sink, &MacroContext::new());
        }
        assert_eq!(sink.urls(), vec!["https://t.example/imp".to_string()]);
        assert!(tracker.is_fired());
        assert_eq!(tracker.url_template(), "https://t.example/imp");
    }

    #[test]
    fn repeatable_tracker_fires_every_time() {
        let sink = RecordingSink::default();
        let mut tracker = VastTracker::repeatable("https://t.example/pause");
        for _ in 0..4 {
            tracker.fire(&sink, &MacroContext::new());
        }
        assert_eq!(sink.urls().len(), 4);
    }

    #[test]
    fn fire_all_counts_sends() {
        let sink = RecordingSink::default();
        let mut trackers = vec![VastTracker::new("a"), VastTracker::repeatable("b")];
        let context = MacroContext::new().with_error_code(VastErrorCode::WrapperTimeout);
        assert_eq!(fire_all(&mut trackers, &sink, &context), 2);
        assert_eq!(fire_all(&mut trackers, &sink, &context), 1);
        assert_eq!(sink.urls(), vec!["a", "b", "b"]);
    }

    #[test]
    fn fractional_threshold() {
        assert_eq!(FractionalProgressTracker::new("q", 0.25).threshold_ms(10_000), 2500);
    }
}
