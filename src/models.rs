use serde::{Deserialize, Serialize};

/// Image MIME types accepted for static companion and icon resources
pub const VALID_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/bmp", "image/gif"];

/// MIME types rendered as a script tag rather than an image
pub const VALID_APPLICATION_TYPES: [&str; 1] = ["application/x-javascript"];

/// Result of parsing one VAST document
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ParseResult {
    /// Ads in document order
    pub ads: Vec<VastAd>,
    /// `MP_TRACKING_URL` values found outside the `<VAST>` element
    pub out_of_band_impressions: Vec<String>,
    /// `<Error>` URLs attached directly to `<VAST>`
    pub error_trackers: Vec<String>,
    /// Whether a `<VAST>` root element was seen at all
    pub vast_found: bool,
}

/// A single `<Ad>` element
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct VastAd {
    /// The ad identifier
    pub id: Option<String>,
    /// Raw `sequence` attribute
    pub sequence: Option<String>,
    /// InLine or Wrapper body
    pub ad: Ad,
}

impl VastAd {
    /// Ads with a sequence number at or above this bound are not playable
    pub const MAX_SEQUENCE: i64 = 2;

    /// Missing, unparseable or negative sequence numbers are accepted and rank first.
    pub fn has_valid_sequence(&self) -> bool {
        match self.parsed_sequence() {
            Some(seq) if seq >= 0 => seq < Self::MAX_SEQUENCE,
            _ => true,
        }
    }

    /// Rank used to pick the primary ad; lower is better
    pub fn sequence_rank(&self) -> i64 {
        match self.parsed_sequence() {
            Some(seq) if seq >= 0 => seq,
            _ => 0,
        }
    }

    fn parsed_sequence(&self) -> Option<i64> {
        self.sequence.as_deref().and_then(|s| s.trim().parse::<i64>().ok())
    }
}

/// Terminal or redirecting ad body
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum Ad {
    InLine(InLine),
    Wrapper(Wrapper),
}

/// InLine ad: contains everything needed to play
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct InLine {
    /// The ad system that returned the ad
    pub ad_system: Option<AdSystem>,
    /// The title of the ad
    pub ad_title: Option<String>,
    /// Impression tracking URLs
    pub impressions: Vec<String>,
    /// Error tracking URLs
    pub errors: Vec<String>,
    /// Linear and companion creatives
    pub creatives: Creatives,
    /// Values from the first `<Extensions>` block
    pub extensions: Extensions,
}

/// Wrapper ad: points at another VAST document
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Wrapper {
    /// The ad system that returned the ad
    pub ad_system: Option<AdSystem>,
    /// URL of the next document in the chain
    pub vast_ad_tag_uri: Option<String>,
    /// Impression tracking URLs
    pub impressions: Vec<String>,
    /// Error tracking URLs
    pub errors: Vec<String>,
    /// Trackers and companions contributed by this hop
    pub creatives: Creatives,
    /// Values from the first `<Extensions>` block
    pub extensions: Extensions,
}

/// Ad system information
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AdSystem {
    /// The name of the ad system
    pub name: String,
    /// The version of the ad system
    pub version: Option<String>,
}

/// All creatives of one ad, flattened across `<Creative>` elements
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Creatives {
    pub linears: Vec<Linear>,
    pub companion_ads: Vec<CompanionAd>,
}

/// Linear (video) creative
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Linear {
    /// `<Duration>` in milliseconds
    pub duration_ms: Option<u64>,
    /// Parsed `skipoffset` attribute
    pub skip_offset: Option<SkipOffset>,
    /// Media files
    pub media_files: Vec<MediaFile>,
    /// Tracking events in document order
    pub tracking_events: Vec<TrackingEvent>,
    /// Video clicks
    pub video_clicks: VideoClicks,
    /// Industry icons
    pub icons: Vec<Icon>,
}

impl Linear {
    const START_TRACKER_OFFSET_MS: u64 = 2000;

    fn urls_for<'a>(&'a self, events: &'a [&'a str]) -> impl Iterator<Item = &'a TrackingEvent> + 'a {
        self.tracking_events
            .iter()
            .filter(move |t| events.contains(&t.event.as_str()))
    }

    /// `creativeView`, `start` and absolute `progress` trackers as `(offset_ms, url)`
    pub fn absolute_progress_trackers(&self) -> Vec<(u64, String)> {
        let mut trackers = Vec::new();
        for event in &self.tracking_events {
            match event.event.as_str() {
                "creativeView" => trackers.push((0, event.url.clone())),
                "start" => trackers.push((Self::START_TRACKER_OFFSET_MS, event.url.clone())),
                "progress" => {
                    if let Some(ms) = event.offset.as_deref().and_then(parse_absolute_offset) {
                        trackers.push((ms, event.url.clone()));
                    }
                }
                _ => (),
            }
        }
        trackers
    }

    /// Quartile and percentage `progress` trackers as `(fraction, url)`
    pub fn fractional_progress_trackers(&self) -> Vec<(f32, String)> {
        let mut trackers = Vec::new();
        for event in &self.tracking_events {
            let fraction = match event.event.as_str() {
                "firstQuartile" => Some(0.25),
                "midpoint" => Some(0.5),
                "thirdQuartile" => Some(0.75),
                "progress" => event
                    .offset
                    .as_deref()
                    .and_then(parse_percentage)
                    .filter(|p| (0.0..=100.0).contains(p))
                    .map(|p| p / 100.0),
                _ => None,
            };
            if let Some(fraction) = fraction {
                trackers.push((fraction, event.url.clone()));
            }
        }
        trackers
    }

    pub fn pause_trackers(&self) -> Vec<String> {
        self.urls_for(&["pause"]).map(|t| t.url.clone()).collect()
    }

    pub fn resume_trackers(&self) -> Vec<String> {
        self.urls_for(&["resume"]).map(|t| t.url.clone()).collect()
    }

    pub fn complete_trackers(&self) -> Vec<String> {
        self.urls_for(&["complete"]).map(|t| t.url.clone()).collect()
    }

    /// `close` and `closeLinear` trackers
    pub fn close_trackers(&self) -> Vec<String> {
        self.urls_for(&["close", "closeLinear"]).map(|t| t.url.clone()).collect()
    }

    pub fn skip_trackers(&self) -> Vec<String> {
        self.urls_for(&["skip"]).map(|t| t.url.clone()).collect()
    }
}

/// Media file information
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct MediaFile {
    /// The URL of the media file
    pub url: String,
    /// The MIME type of the media file
    pub mime_type: Option<String>,
    /// The codec of the media file
    pub codec: Option<String>,
    /// The bitrate of the media file
    pub bitrate: Option<u32>,
    /// The width of the media file
    pub width: Option<u32>,
    /// The height of the media file
    pub height: Option<u32>,
    /// The delivery method (progressive or streaming)
    pub delivery: Option<String>,
}

/// Video click information
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct VideoClicks {
    /// The click-through URL
    pub click_through: Option<String>,
    /// Click tracking URLs
    pub click_tracking: Vec<String>,
}

/// Tracking event
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TrackingEvent {
    /// The event type
    pub event: String,
    /// Raw `offset` attribute, used by `progress` events
    pub offset: Option<String>,
    /// The tracking URL
    pub url: String,
}

/// Resource candidates found on a companion or icon
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct ResourceCandidates {
    /// `<StaticResource>` URL and its `creativeType` attribute
    pub static_resource: Option<(String, Option<String>)>,
    /// `<HTMLResource>` markup
    pub html_resource: Option<String>,
    /// `<IFrameResource>` URL
    pub iframe_resource: Option<String>,
}

impl ResourceCandidates {
    /// Resolve the candidate of the given type, if it is present and valid.
    pub fn resolve(&self, resource_type: ResourceType) -> Option<VastResource> {
        match resource_type {
            ResourceType::Static => {
                let (url, mime) = self.static_resource.as_ref()?;
                let mime = mime.as_deref().map(|m| m.trim().to_lowercase()).unwrap_or_default();
                let creative_type = CreativeType::from_mime(&mime);
                if url.is_empty() || creative_type == CreativeType::Unknown {
                    return None;
                }
                Some(VastResource::Static {
                    url: url.clone(),
                    mime_type: mime,
                })
            }
            ResourceType::Html => self
                .html_resource
                .as_ref()
                .filter(|m| !m.is_empty())
                .map(|m| VastResource::Html(m.clone())),
            ResourceType::IFrame => self
                .iframe_resource
                .as_ref()
                .filter(|u| !u.is_empty())
                .map(|u| VastResource::IFrame(u.clone())),
        }
    }

    /// Highest-priority valid resource
    pub fn best(&self) -> Option<VastResource> {
        ResourceType::PRIORITY.iter().find_map(|t| self.resolve(*t))
    }

    pub fn is_empty(&self) -> bool {
        self.static_resource.is_none() && self.html_resource.is_none() && self.iframe_resource.is_none()
    }
}

/// Resource kinds in selection priority order
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Static,
    Html,
    IFrame,
}

impl ResourceType {
    pub const PRIORITY: [ResourceType; 3] = [ResourceType::Static, ResourceType::Html, ResourceType::IFrame];
}

/// Displayable resource of a companion or icon
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub enum VastResource {
    Static { url: String, mime_type: String },
    Html(String),
    IFrame(String),
}

impl VastResource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            VastResource::Static { .. } => ResourceType::Static,
            VastResource::Html(_) => ResourceType::Html,
            VastResource::IFrame(_) => ResourceType::IFrame,
        }
    }

    /// URL or markup
    pub fn resource(&self) -> &str {
        match self {
            VastResource::Static { url, .. } => url,
            VastResource::Html(markup) => markup,
            VastResource::IFrame(url) => url,
        }
    }

    pub fn creative_type(&self) -> CreativeType {
        match self {
            VastResource::Static { mime_type, .. } => CreativeType::from_mime(mime_type),
            _ => CreativeType::Unknown,
        }
    }
}

/// Kind of static resource, derived from its MIME type
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
pub enum CreativeType {
    Image,
    JavaScript,
    Unknown,
}

impl CreativeType {
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime.trim().to_lowercase();
        if VALID_IMAGE_TYPES.contains(&mime.as_str()) {
            CreativeType::Image
        } else if VALID_APPLICATION_TYPES.contains(&mime.as_str()) {
            CreativeType::JavaScript
        } else {
            CreativeType::Unknown
        }
    }
}

/// Companion ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct CompanionAd {
    /// The width of the companion ad
    pub width: Option<u32>,
    /// The height of the companion ad
    pub height: Option<u32>,
    /// The ad slot ID, used for social action slots
    pub ad_slot_id: Option<String>,
    /// Static, HTML and IFrame resources
    pub resources: ResourceCandidates,
    /// The click-through URL
    pub click_through: Option<String>,
    /// Click tracking URLs
    pub click_trackers: Vec<String>,
    /// `creativeView` tracking URLs
    pub creative_view_trackers: Vec<String>,
}

/// Industry icon shown over the video
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Icon {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Display start in milliseconds
    pub offset_ms: Option<u64>,
    /// Display duration in milliseconds
    pub duration_ms: Option<u64>,
    pub resources: ResourceCandidates,
    pub click_through: Option<String>,
    pub click_trackers: Vec<String>,
    pub view_trackers: Vec<String>,
}

/// Skip offset of a linear creative
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub enum SkipOffset {
    /// Percentage of the duration, 0 to 100 inclusive
    Percentage(f32),
    /// Absolute offset in milliseconds
    Absolute(u64),
}

impl SkipOffset {
    /// Parse `NN%` or `HH:MM:SS[.mmm]`. Blank or invalid input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if raw.ends_with('%') {
            let percent = parse_percentage(raw)?;
            return (0.0..=100.0).contains(&percent).then_some(SkipOffset::Percentage(percent));
        }
        parse_absolute_offset(raw).map(SkipOffset::Absolute)
    }

    /// Offset in milliseconds for a video of the given duration, clamped to it.
    pub fn to_millis(&self, duration_ms: u64) -> u64 {
        let ms = match self {
            SkipOffset::Percentage(p) => (duration_ms as f64 * f64::from(*p) / 100.0).round() as u64,
            SkipOffset::Absolute(ms) => *ms,
        };
        ms.min(duration_ms)
    }
}

/// Custom extension values carried under `<Extensions>`
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Extensions {
    /// `MoPubCtaText`, at most 15 characters
    pub cta_text: Option<String>,
    /// `MoPubSkipText`, at most 8 characters
    pub skip_text: Option<String>,
    /// `MoPubCloseIcon` image URL
    pub close_icon_url: Option<String>,
    /// `MoPubForceOrientation`
    pub force_orientation: Option<ForceOrientation>,
    /// `MoPubViewabilityTracker`
    pub viewability_tracker: Option<ViewabilityTracker>,
}

impl Extensions {
    pub const MAX_CTA_TEXT_LENGTH: usize = 15;
    pub const MAX_SKIP_TEXT_LENGTH: usize = 8;

    /// Overwrite every value that `later` sets.
    pub fn overlay(&mut self, later: &Extensions) {
        if later.cta_text.is_some() {
            self.cta_text = later.cta_text.clone();
        }
        if later.skip_text.is_some() {
            self.skip_text = later.skip_text.clone();
        }
        if later.close_icon_url.is_some() {
            self.close_icon_url = later.close_icon_url.clone();
        }
        if later.force_orientation.is_some() {
            self.force_orientation = later.force_orientation;
        }
        if later.viewability_tracker.is_some() {
            self.viewability_tracker = later.viewability_tracker.clone();
        }
    }
}

/// Requested player orientation
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
pub enum ForceOrientation {
    ForcePortrait,
    #[default]
    ForceLandscape,
    DeviceOrientation,
}

impl ForceOrientation {
    /// Unknown keys fall back to landscape.
    pub fn from_key(key: &str) -> Self {
        match key.trim().to_lowercase().as_str() {
            "portrait" => ForceOrientation::ForcePortrait,
            "device" => ForceOrientation::DeviceOrientation,
            _ => ForceOrientation::ForceLandscape,
        }
    }
}

/// Viewability tracker extension
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ViewabilityTracker {
    pub url: String,
    /// Required viewable play time in milliseconds
    pub viewable_playtime_ms: u64,
    /// Required viewable area, 0 to 100
    pub percent_viewable: u8,
}

impl ViewabilityTracker {
    /// Build from the raw attributes and element text; any missing or invalid piece yields `None`.
    pub fn from_parts(url: Option<&str>, playtime: Option<&str>, percent: Option<&str>) -> Option<Self> {
        let url = url.map(str::trim).filter(|u| !u.is_empty())?;
        let playtime = playtime?.trim();
        let viewable_playtime_ms = match parse_absolute_offset(playtime) {
            Some(ms) => ms,
            None => {
                let secs = playtime.parse::<f64>().ok().filter(|s| s.is_finite() && *s >= 0.0)?;
                (secs * 1000.0).round() as u64
            }
        };
        let percent = parse_percentage(percent?)?;
        if !(0.0..=100.0).contains(&percent) {
            return None;
        }
        Some(ViewabilityTracker {
            url: url.to_string(),
            viewable_playtime_ms,
            percent_viewable: percent.round() as u8,
        })
    }
}

/// Parse `HH:MM:SS` or `HH:MM:SS.mmm` into milliseconds.
pub fn parse_absolute_offset(raw: &str) -> Option<u64> {
    let mut parts = raw.trim().split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?;
    if parts.next().is_some() || minutes >= 60 {
        return None;
    }
    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    let whole = whole.parse::<u64>().ok()?;
    if whole >= 60 || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let millis = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .collect::<String>()
        .parse::<u64>()
        .ok()?;
    hours
        .checked_mul(3_600_000)?
        .checked_add(minutes * 60_000 + whole * 1000 + millis)
}

/// Parse `NN%` or `NN.N%` into a percentage value.
pub fn parse_percentage(raw: &str) -> Option<f32> {
    let value = raw.trim().strip_suffix('%')?.trim();
    value.parse::<f32>().ok().filter(|p| p.is_finite())
}
