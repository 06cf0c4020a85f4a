//! Best-fit selection of media files, companions, icons and social slots.

use crate::models::{CompanionAd, Icon, MediaFile, ResourceType, VastResource};
use crate::tracker::VastTracker;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Two deltas closer than this are treated as equal.
const EPSILON: f64 = 1e-6;

pub const MAX_ICON_WIDTH: u32 = 300;
pub const MAX_ICON_HEIGHT: u32 = 300;

pub const ADS_BY_AD_SLOT_ID: &str = "adsBy";
pub const SOCIAL_ACTIONS_AD_SLOT_ID: &str = "socialActions";

/// Largest `(width, height)` allowed for each social slot
const SOCIAL_ACTION_SLOTS: [(&str, u32, u32); 2] = [(ADS_BY_AD_SLOT_ID, 75, 50), (SOCIAL_ACTIONS_AD_SLOT_ID, 150, 50)];

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
pub enum Orientation {
    Landscape,
    Portrait,
}

/// Device screen in pixels
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct ScreenMetrics {
    pub width: u32,
    pub height: u32,
    /// Pixels per density-independent unit
    pub density: f32,
}

impl Default for ScreenMetrics {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            density: 1.0,
        }
    }
}

impl ScreenMetrics {
    pub fn new(width: u32, height: u32, density: f32) -> Self {
        Self { width, height, density }
    }

    /// Long side over short side
    pub fn aspect_ratio(&self) -> f64 {
        let (long, short) = (self.width.max(self.height), self.width.min(self.height));
        if short == 0 {
            return 0.0;
        }
        f64::from(long) / f64::from(short)
    }

    /// Area in density-independent units
    pub fn area(&self) -> f64 {
        let density = if self.density > 0.0 { f64::from(self.density) } else { 1.0 };
        (f64::from(self.width) / density) * (f64::from(self.height) / density)
    }

    /// `(width, height)` with the long side along the orientation's axis
    pub fn dimensions(&self, orientation: Orientation) -> (u32, u32) {
        let (long, short) = (self.width.max(self.height), self.width.min(self.height));
        match orientation {
            Orientation::Landscape => (long, short),
            Orientation::Portrait => (short, long),
        }
    }
}

/// Distance of a candidate from a target; smaller is better.
#[derive(Debug, Clone, Copy)]
struct Fitness {
    aspect_delta: f64,
    area_delta: f64,
}

impl Fitness {
    fn of(width: u32, height: u32, target_aspect: f64, target_area: f64) -> Self {
        let aspect = f64::from(width) / f64::from(height);
        let area = f64::from(width) * f64::from(height);
        Self {
            aspect_delta: (aspect - target_aspect).abs(),
            area_delta: (area - target_area).abs(),
        }
    }

    /// Aspect deviation first, area deviation breaks ties.
    fn beats(&self, other: &Fitness) -> bool {
        if (self.aspect_delta - other.aspect_delta).abs() > EPSILON {
            return self.aspect_delta < other.aspect_delta;
        }
        other.area_delta - self.area_delta > EPSILON
    }
}

/// Index of the closest candidate; earlier candidates win ties.
fn closest<I>(dims: I, target_aspect: f64, target_area: f64) -> Option<usize>
where
    I: IntoIterator<Item = (usize, u32, u32)>,
{
    let mut best: Option<(usize, Fitness)> = None;
    for (index, width, height) in dims {
        let fitness = Fitness::of(width, height, target_aspect, target_area);
        match &best {
            Some((_, current)) if !fitness.beats(current) => (),
            _ => best = Some((index, fitness)),
        }
    }
    best.map(|(index, _)| index)
}

fn positive(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

/// Pick the media file URL closest to the screen shape, then size.
pub fn best_media_file(
    files: &[MediaFile],
    wanted_mime_prefixes: &[String],
    screen_aspect_ratio: f64,
    screen_area: f64,
) -> Option<String> {
    let eligible = files.iter().enumerate().filter_map(|(index, file)| {
        let mime = file.mime_type.as_deref()?.trim().to_lowercase();
        if !wanted_mime_prefixes.iter().any(|prefix| mime.starts_with(&prefix.to_lowercase())) {
            return None;
        }
        Some((index, positive(file.width)?, positive(file.height)?))
    });
    closest(eligible, screen_aspect_ratio, screen_area).map(|index| files[index].url.clone())
}

/// Companion chosen for one orientation
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct CompanionAdConfig {
    pub width: u32,
    pub height: u32,
    pub resource: VastResource,
    pub click_through_url: Option<String>,
    pub click_trackers: Vec<VastTracker>,
    pub creative_view_trackers: Vec<VastTracker>,
}

impl CompanionAdConfig {
    fn from_candidate(companion: &CompanionAd, resource: VastResource) -> Option<Self> {
        Some(Self {
            width: companion.width?,
            height: companion.height?,
            resource,
            click_through_url: companion.click_through.clone(),
            click_trackers: companion.click_trackers.iter().map(VastTracker::new).collect(),
            creative_view_trackers: companion.creative_view_trackers.iter().map(VastTracker::new).collect(),
        })
    }

    pub fn add_click_trackers(&mut self, urls: &[String]) {
        self.click_trackers.extend(urls.iter().map(VastTracker::new));
    }

    pub fn add_creative_view_trackers(&mut self, urls: &[String]) {
        self.creative_view_trackers.extend(urls.iter().map(VastTracker::new));
    }
}

/// Best companion for `orientation`: resource priority first, closeness second.
pub fn best_companion_ad(
    candidates: &[CompanionAd],
    orientation: Orientation,
    screen: &ScreenMetrics,
    min_width: u32,
    min_height: u32,
) -> Option<CompanionAdConfig> {
    let (screen_width, screen_height) = screen.dimensions(orientation);
    let target_aspect = f64::from(screen_width) / f64::from(screen_height.max(1));
    let target_area = screen.area();

    for resource_type in ResourceType::PRIORITY {
        let eligible: Vec<(usize, u32, u32, VastResource)> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, companion)| {
                let width = companion.width.filter(|w| *w >= min_width && *w > 0)?;
                let height = companion.height.filter(|h| *h >= min_height && *h > 0)?;
                let resource = companion.resources.resolve(resource_type)?;
                Some((index, width, height, resource))
            })
            .collect();

        let dims = eligible.iter().enumerate().map(|(slot, (_, w, h, _))| (slot, *w, *h));
        if let Some(slot) = closest(dims, target_aspect, target_area) {
            let (index, _, _, resource) = &eligible[slot];
            return CompanionAdConfig::from_candidate(&candidates[*index], resource.clone());
        }
    }
    None
}

/// Icon chosen for the linear creative
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct IconConfig {
    pub width: u32,
    pub height: u32,
    pub offset_ms: u64,
    pub duration_ms: Option<u64>,
    pub resource: VastResource,
    pub click_through_url: Option<String>,
    pub click_trackers: Vec<VastTracker>,
    pub view_trackers: Vec<VastTracker>,
}

/// Best icon within `0 < size <= 300` on both axes.
pub fn best_icon(icons: &[Icon], screen: &ScreenMetrics) -> Option<IconConfig> {
    let target_aspect = screen.aspect_ratio();
    let target_area = screen.area();

    for resource_type in ResourceType::PRIORITY {
        let eligible: Vec<(usize, u32, u32, VastResource)> = icons
            .iter()
            .enumerate()
            .filter_map(|(index, icon)| {
                let width = positive(icon.width).filter(|w| *w <= MAX_ICON_WIDTH)?;
                let height = positive(icon.height).filter(|h| *h <= MAX_ICON_HEIGHT)?;
                let resource = icon.resources.resolve(resource_type)?;
                Some((index, width, height, resource))
            })
            .collect();

        let dims = eligible.iter().enumerate().map(|(slot, (_, w, h, _))| (slot, *w, *h));
        if let Some(slot) = closest(dims, target_aspect, target_area) {
            let (index, width, height, resource) = &eligible[slot];
            let icon = &icons[*index];
            return Some(IconConfig {
                width: *width,
                height: *height,
                offset_ms: icon.offset_ms.unwrap_or(0),
                duration_ms: icon.duration_ms,
                resource: resource.clone(),
                click_through_url: icon.click_through.clone(),
                click_trackers: icon.click_trackers.iter().map(VastTracker::new).collect(),
                view_trackers: icon.view_trackers.iter().map(VastTracker::new).collect(),
            });
        }
    }
    None
}

/// Companions for the `adsBy` and `socialActions` slots. Oversized or
/// non-HTML candidates are dropped; the first valid one per slot wins.
pub fn social_actions_companion_ads(candidates: &[CompanionAd]) -> HashMap<String, CompanionAdConfig> {
    let mut slots = HashMap::new();

    for companion in candidates {
        let Some(slot_id) = companion.ad_slot_id.as_deref() else {
            continue;
        };
        let Some((_, max_width, max_height)) = SOCIAL_ACTION_SLOTS.iter().find(|(id, _, _)| *id == slot_id) else {
            continue;
        };
        if slots.contains_key(slot_id) {
            continue;
        }
        let (Some(width), Some(height)) = (positive(companion.width), positive(companion.height)) else {
            continue;
        };
        if width > *max_width || height > *max_height {
            continue;
        }
        let Some(resource) = companion.resources.resolve(ResourceType::Html) else {
            continue;
        };
        if let Some(config) = CompanionAdConfig::from_candidate(companion, resource) {
            slots.insert(slot_id.to_string(), config);
        }
    }

    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceCandidates;

    fn video(url: &str, mime: &str, width: u32, height: u32) -> MediaFile {
        MediaFile {
            url: url.into(),
            mime_type: Some(mime.into()),
            width: Some(width),
            height: Some(height),
            ..Default::default()
        }
    }

    fn companion(width: u32, height: u32, resources: ResourceCandidates) -> CompanionAd {
        CompanionAd {
            width: Some(width),
            height: Some(height),
            resources,
            ..Default::default()
        }
    }

    fn static_png(url: &str) -> ResourceCandidates {
        ResourceCandidates {
            static_resource: Some((url.into(), Some("image/png".into()))),
            ..Default::default()
        }
    }

    fn html(markup: &str) -> ResourceCandidates {
        ResourceCandidates {
            html_resource: Some(markup.into()),
            ..Default::default()
        }
    }

    fn mp4() -> Vec<String> {
        vec!["video/mp4".to_string(), "video/3gpp".to_string()]
    }

    #[test]
    fn media_file_area_breaks_aspect_tie() {
        let screen = ScreenMetrics::new(800, 480, 1.0);
        let files = vec![
            video("big", "video/mp4", 2400, 1440),
            video("right", "video/mp4", 1600, 960),
        ];
        assert_eq!(
            best_media_file(&files, &mp4(), screen.aspect_ratio(), screen.area()),
            Some("right".into())
        );
    }

    #[test]
    fn media_file_aspect_dominates_area() {
        let screen = ScreenMetrics::new(800, 480, 1.0);
        let files = vec![video("square", "video/mp4", 800, 480 * 2), video("wide", "video/mp4", 3200, 1920)];
        assert_eq!(
            best_media_file(&files, &mp4(), screen.aspect_ratio(), screen.area()),
            Some("wide".into())
        );
    }

    #[test]
    fn media_file_eligibility() {
        let screen = ScreenMetrics::new(800, 480, 1.0);
        let mut no_dims = video("no-dims", "video/mp4", 0, 0);
        no_dims.width = None;
        let files = vec![
            video("flash", "video/x-flv", 800, 480),
            video("zero", "video/mp4", 0, 480),
            no_dims,
            video("3gp", "VIDEO/3GPP", 320, 240),
        ];
        assert_eq!(
            best_media_file(&files, &mp4(), screen.aspect_ratio(), screen.area()),
            Some("3gp".into())
        );
        assert_eq!(best_media_file(&files[..3], &mp4(), screen.aspect_ratio(), screen.area()), None);
    }

    #[test]
    fn media_file_ties_keep_document_order() {
        let screen = ScreenMetrics::new(800, 480, 1.0);
        let files = vec![video("first", "video/mp4", 800, 480), video("second", "video/mp4", 800, 480)];
        assert_eq!(
            best_media_file(&files, &mp4(), screen.aspect_ratio(), screen.area()),
            Some("first".into())
        );
    }

    #[test]
    fn companion_resource_priority_beats_fit() {
        let screen = ScreenMetrics::new(1280, 720, 1.0);
        let candidates = vec![
            companion(1280, 720, html("<p>perfect fit</p>")),
            companion(300, 250, static_png("https://img/c.png")),
        ];
        let config = best_companion_ad(&candidates, Orientation::Landscape, &screen, 300, 250).expect("companion");
        assert_eq!(config.resource.resource_type(), ResourceType::Static);
        assert_eq!(config.width, 300);
    }

    #[test]
    fn companion_orientation_uses_swapped_screen() {
        let screen = ScreenMetrics::new(1280, 720, 1.0);
        let candidates = vec![
            companion(1280, 720, static_png("landscape")),
            companion(720, 1280, static_png("portrait")),
        ];
        let landscape = best_companion_ad(&candidates, Orientation::Landscape, &screen, 300, 250).expect("landscape");
        let portrait = best_companion_ad(&candidates, Orientation::Portrait, &screen, 300, 250).expect("portrait");
        assert_eq!(landscape.resource.resource(), "landscape");
        assert_eq!(portrait.resource.resource(), "portrait");
    }

    #[test]
    fn companion_minimum_size_and_mime() {
        let screen = ScreenMetrics::default();
        let mut bad_mime = static_png("https://img/c.mp4");
        bad_mime.static_resource = Some(("https://img/c.mp4".into(), Some("video/mp4".into())));
        let candidates = vec![companion(299, 250, static_png("small")), companion(300, 250, bad_mime)];
        assert_eq!(best_companion_ad(&candidates, Orientation::Landscape, &screen, 300, 250), None);
    }

    #[test]
    fn companion_carries_trackers() {
        let mut candidate = companion(300, 250, html("<b>x</b>"));
        candidate.click_through = Some("https://click".into());
        candidate.click_trackers = vec!["https://ct".into()];
        candidate.creative_view_trackers = vec!["https://cv".into()];
        let mut config = best_companion_ad(&[candidate], Orientation::Landscape, &ScreenMetrics::default(), 300, 250)
            .expect("companion");
        config.add_click_trackers(&["https://ct2".to_string()]);
        assert_eq!(config.click_through_url.as_deref(), Some("https://click"));
        assert_eq!(config.click_trackers.len(), 2);
        assert_eq!(config.creative_view_trackers[0].url_template(), "https://cv");
    }

    #[test]
    fn icon_size_bounds() {
        let screen = ScreenMetrics::default();
        let icon = |w: u32, h: u32, url: &str| Icon {
            width: Some(w),
            height: Some(h),
            offset_ms: Some(1000),
            resources: static_png(url),
            ..Default::default()
        };
        assert_eq!(best_icon(&[icon(301, 40, "wide"), icon(40, 0, "flat")], &screen), None);
        let config = best_icon(&[icon(301, 40, "wide"), icon(300, 300, "max")], &screen).expect("icon");
        assert_eq!(config.resource.resource(), "max");
        assert_eq!(config.offset_ms, 1000);
    }

    #[test]
    fn icon_priority() {
        let icons = vec![
            Icon {
                width: Some(50),
                height: Some(50),
                resources: ResourceCandidates {
                    iframe_resource: Some("https://frame".into()),
                    ..Default::default()
                },
                ..Default::default()
            },
            Icon {
                width: Some(50),
                height: Some(50),
                resources: html("<i>icon</i>"),
                ..Default::default()
            },
        ];
        let config = best_icon(&icons, &ScreenMetrics::default()).expect("icon");
        assert_eq!(config.resource, VastResource::Html("<i>icon</i>".into()));
    }

    #[test]
    fn social_slots() {
        let slot = |id: &str, w: u32, h: u32, resources: ResourceCandidates| CompanionAd {
            ad_slot_id: Some(id.into()),
            ..companion(w, h, resources)
        };
        let candidates = vec![
            slot("adsBy", 75, 50, html("ads by")),
            slot("socialActions", 151, 50, html("too wide")),
            slot("socialActions", 150, 50, static_png("not html")),
            slot("other", 10, 10, html("unknown slot")),
        ];
        let slots = social_actions_companion_ads(&candidates);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots["adsBy"].resource.resource(), "ads by");

        let oversized = vec![slot("adsBy", 76, 50, html("x")), slot("socialActions", 150, 51, html("y"))];
        assert!(social_actions_companion_ads(&oversized).is_empty());
    }

    #[test]
    fn screen_metrics() {
        let screen = ScreenMetrics::new(480, 800, 2.0);
        assert!((screen.aspect_ratio() - 800.0 / 480.0).abs() < 1e-9);
        assert!((screen.area() - 240.0 * 400.0).abs() < 1e-9);
        assert_eq!(screen.dimensions(Orientation::Landscape), (800, 480));
        assert_eq!(screen.dimensions(Orientation::Portrait), (480, 800));
    }
}
