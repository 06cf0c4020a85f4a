//! Redirect-chain resolution.
//!
//! A document is parsed, its primary ad selected, and wrappers are followed
//! one fetch at a time inside a single bounded loop. Everything collected on
//! the way lives in a [`ResolvedVideoAdBuilder`] that becomes a
//! [`ResolvedVideoAd`] only once a playable InLine is reached.

use crate::config::ResolverConfig;
use crate::delivery::TrackerSink;
use crate::error::{ResolveError, VastErrorCode};
use crate::fetch::VastFetcher;
use crate::models::*;
use crate::parser::parse_vast;
use crate::selector::{
    best_companion_ad, best_icon, best_media_file, social_actions_companion_ads, CompanionAdConfig, IconConfig,
    Orientation,
};
use crate::tracker::{fire_all, AbsoluteProgressTracker, FractionalProgressTracker, MacroContext, VastTracker};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked between hops
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A fully resolved, playable ad
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct ResolvedVideoAd {
    pub impression_trackers: Vec<VastTracker>,
    pub click_trackers: Vec<VastTracker>,
    pub error_trackers: Vec<VastTracker>,
    pub pause_trackers: Vec<VastTracker>,
    pub resume_trackers: Vec<VastTracker>,
    pub complete_trackers: Vec<VastTracker>,
    pub close_trackers: Vec<VastTracker>,
    pub skip_trackers: Vec<VastTracker>,
    pub absolute_trackers: Vec<AbsoluteProgressTracker>,
    pub fractional_trackers: Vec<FractionalProgressTracker>,
    pub media_file_url: String,
    pub click_through_url: Option<String>,
    pub duration_ms: Option<u64>,
    pub skip_offset: Option<SkipOffset>,
    pub landscape_companion: Option<CompanionAdConfig>,
    pub portrait_companion: Option<CompanionAdConfig>,
    pub social_actions_companions: HashMap<String, CompanionAdConfig>,
    pub icon: Option<IconConfig>,
    pub extensions: Extensions,
    /// Local copy of the media file, when the cache already holds it
    pub disk_media_file_path: Option<String>,
    pub dsp_creative_id: Option<String>,
}

impl ResolvedVideoAd {
    /// Orientation requested by the extensions, landscape when unset
    pub fn force_orientation(&self) -> ForceOrientation {
        self.extensions.force_orientation.unwrap_or_default()
    }

    pub fn companion(&self, orientation: Orientation) -> Option<&CompanionAdConfig> {
        match orientation {
            Orientation::Landscape => self.landscape_companion.as_ref(),
            Orientation::Portrait => self.portrait_companion.as_ref(),
        }
    }
}

/// Overlay candidates contributed by one wrapper hop
#[derive(Debug, Default)]
struct WrapperLayer {
    companions: Vec<CompanionAd>,
    icons: Vec<Icon>,
    skip_offset: Option<SkipOffset>,
}

/// What the terminal InLine contributed
#[derive(Debug)]
struct InlineSelection {
    media_file_url: String,
    click_through_url: Option<String>,
    duration_ms: Option<u64>,
    skip_offset: Option<SkipOffset>,
    icons: Vec<Icon>,
    companions: Vec<CompanionAd>,
}

/// Accumulates trackers and overlays across hops
#[derive(Debug, Default)]
pub struct ResolvedVideoAdBuilder {
    impression_trackers: Vec<VastTracker>,
    click_trackers: Vec<VastTracker>,
    error_trackers: Vec<VastTracker>,
    pause_trackers: Vec<VastTracker>,
    resume_trackers: Vec<VastTracker>,
    complete_trackers: Vec<VastTracker>,
    close_trackers: Vec<VastTracker>,
    skip_trackers: Vec<VastTracker>,
    absolute_trackers: Vec<AbsoluteProgressTracker>,
    fractional_trackers: Vec<FractionalProgressTracker>,
    extensions: Extensions,
    wrappers: Vec<WrapperLayer>,
    inline: Option<InlineSelection>,
}

impl ResolvedVideoAdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_impressions(&mut self, urls: &[String]) {
        self.impression_trackers.extend(urls.iter().map(VastTracker::new));
    }

    /// Error trackers fire on every failure, so they are repeatable.
    pub fn add_error_trackers(&mut self, urls: &[String]) {
        self.error_trackers.extend(urls.iter().map(VastTracker::repeatable));
    }

    pub fn error_trackers(&self) -> &[VastTracker] {
        &self.error_trackers
    }

    fn add_linear_trackers(&mut self, linear: &Linear) {
        self.click_trackers
            .extend(linear.video_clicks.click_tracking.iter().map(VastTracker::new));
        self.pause_trackers
            .extend(linear.pause_trackers().into_iter().map(VastTracker::repeatable));
        self.resume_trackers
            .extend(linear.resume_trackers().into_iter().map(VastTracker::repeatable));
        self.complete_trackers
            .extend(linear.complete_trackers().into_iter().map(VastTracker::new));
        self.close_trackers
            .extend(linear.close_trackers().into_iter().map(VastTracker::new));
        self.skip_trackers
            .extend(linear.skip_trackers().into_iter().map(VastTracker::new));
        self.absolute_trackers.extend(
            linear
                .absolute_progress_trackers()
                .into_iter()
                .map(|(offset_ms, url)| AbsoluteProgressTracker::new(url, offset_ms)),
        );
        self.fractional_trackers.extend(
            linear
                .fractional_progress_trackers()
                .into_iter()
                .map(|(fraction, url)| FractionalProgressTracker::new(url, fraction)),
        );
    }

    /// Fold one wrapper hop into the aggregate.
    pub fn absorb_wrapper(&mut self, wrapper: &Wrapper) {
        self.add_impressions(&wrapper.impressions);
        self.add_error_trackers(&wrapper.errors);
        let mut layer = WrapperLayer {
            companions: wrapper.creatives.companion_ads.clone(),
            ..Default::default()
        };
        for linear in &wrapper.creatives.linears {
            self.add_linear_trackers(linear);
            layer.icons.extend(linear.icons.iter().cloned());
            if layer.skip_offset.is_none() {
                layer.skip_offset = linear.skip_offset;
            }
        }
        self.extensions.overlay(&wrapper.extensions);
        self.wrappers.push(layer);
    }

    /// Fold the terminal InLine into the aggregate. Its error trackers are
    /// kept even when no linear carries a playable media file.
    pub fn absorb_inline(&mut self, inline: &InLine, config: &ResolverConfig) -> Result<(), ResolveError> {
        self.add_error_trackers(&inline.errors);

        let screen = &config.screen;
        let chosen = inline.creatives.linears.iter().find_map(|linear| {
            best_media_file(
                &linear.media_files,
                &config.supported_mime_types,
                screen.aspect_ratio(),
                screen.area(),
            )
            .map(|url| (linear, url))
        });
        let Some((linear, media_file_url)) = chosen else {
            return Err(ResolveError::NoPlayableMedia);
        };

        self.add_impressions(&inline.impressions);
        self.add_linear_trackers(linear);
        self.extensions.overlay(&inline.extensions);
        self.inline = Some(InlineSelection {
            media_file_url,
            click_through_url: linear.video_clicks.click_through.clone(),
            duration_ms: linear.duration_ms,
            skip_offset: linear.skip_offset,
            icons: linear.icons.clone(),
            companions: inline.creatives.companion_ads.clone(),
        });
        Ok(())
    }

    /// Convert into the final ad. Overlays from the InLine win; wrapper
    /// candidates fill the gaps, closest wrapper first.
    pub fn build(self, config: &ResolverConfig) -> Result<ResolvedVideoAd, ResolveError> {
        let inline = self.inline.ok_or(ResolveError::NoPlayableMedia)?;
        let screen = &config.screen;
        let (min_width, min_height) = (config.min_companion_width, config.min_companion_height);

        let skip_offset = inline
            .skip_offset
            .or_else(|| self.wrappers.iter().rev().find_map(|w| w.skip_offset));

        let icon = best_icon(&inline.icons, screen)
            .or_else(|| self.wrappers.iter().rev().find_map(|w| best_icon(&w.icons, screen)));

        let mut landscape = best_companion_ad(&inline.companions, Orientation::Landscape, screen, min_width, min_height);
        let mut portrait = best_companion_ad(&inline.companions, Orientation::Portrait, screen, min_width, min_height);
        let mut social = social_actions_companion_ads(&inline.companions);

        for layer in self.wrappers.iter().rev() {
            if landscape.is_none() {
                landscape = best_companion_ad(&layer.companions, Orientation::Landscape, screen, min_width, min_height);
            }
            if portrait.is_none() {
                portrait = best_companion_ad(&layer.companions, Orientation::Portrait, screen, min_width, min_height);
            }
            for (slot, slot_config) in social_actions_companion_ads(&layer.companions) {
                social.entry(slot).or_insert(slot_config);
            }
        }

        // resource-less wrapper companions only contribute trackers
        for companion in self.wrappers.iter().flat_map(|w| &w.companions) {
            if !companion.resources.is_empty() {
                continue;
            }
            for chosen in [landscape.as_mut(), portrait.as_mut()].into_iter().flatten() {
                chosen.add_click_trackers(&companion.click_trackers);
                chosen.add_creative_view_trackers(&companion.creative_view_trackers);
            }
        }

        Ok(ResolvedVideoAd {
            impression_trackers: self.impression_trackers,
            click_trackers: self.click_trackers,
            error_trackers: self.error_trackers,
            pause_trackers: self.pause_trackers,
            resume_trackers: self.resume_trackers,
            complete_trackers: self.complete_trackers,
            close_trackers: self.close_trackers,
            skip_trackers: self.skip_trackers,
            absolute_trackers: self.absolute_trackers,
            fractional_trackers: self.fractional_trackers,
            media_file_url: inline.media_file_url,
            click_through_url: inline.click_through_url,
            duration_ms: inline.duration_ms,
            skip_offset,
            landscape_companion: landscape,
            portrait_companion: portrait,
            social_actions_companions: social,
            icon,
            extensions: self.extensions,
            disk_media_file_path: None,
            dsp_creative_id: None,
        })
    }
}

/// Primary ad: valid sequence numbers only, lowest first, document order on ties.
pub fn select_primary_ad(ads: &[VastAd]) -> Option<&VastAd> {
    ads.iter()
        .filter(|ad| ad.has_valid_sequence())
        .min_by_key(|ad| ad.sequence_rank())
}

/// Follows a wrapper chain to a playable ad
pub struct Resolver<'a> {
    config: &'a ResolverConfig,
    fetcher: &'a dyn VastFetcher,
    sink: &'a dyn TrackerSink,
    cancel: CancellationFlag,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a ResolverConfig, fetcher: &'a dyn VastFetcher, sink: &'a dyn TrackerSink) -> Self {
        Self {
            config,
            fetcher,
            sink,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve `initial` into a playable ad.
    ///
    /// On failure the error trackers collected so far are fired, except on
    /// cancellation, which fires nothing.
    pub fn resolve(&self, initial: &str) -> Result<ResolvedVideoAd, ResolveError> {
        let mut builder = ResolvedVideoAdBuilder::new();
        let mut document = initial.to_string();
        let mut hops = 0usize;

        loop {
            self.check_cancelled()?;
            let parsed = parse_vast(&document);
            builder.add_impressions(&parsed.out_of_band_impressions);

            let Some(primary) = select_primary_ad(&parsed.ads) else {
                builder.add_error_trackers(&parsed.error_trackers);
                let (error, code) = if !parsed.vast_found {
                    (ResolveError::MalformedResponse, VastErrorCode::XmlParsingError)
                } else if hops == 0 {
                    (ResolveError::NoAds, VastErrorCode::Undefined)
                } else {
                    (ResolveError::NoAds, VastErrorCode::NoAdsVast)
                };
                return Err(self.fail(&mut builder, error, code));
            };

            match &primary.ad {
                Ad::InLine(inline) => {
                    debug!("InLine ad {:?} reached after {} hops", primary.id, hops);
                    if let Err(error) = builder.absorb_inline(inline, self.config) {
                        return Err(self.fail(&mut builder, error, VastErrorCode::Undefined));
                    }
                    self.check_cancelled()?;
                    let resolved = builder.build(self.config)?;
                    info!("Resolved media {} after {} hops", resolved.media_file_url, hops);
                    return Ok(resolved);
                }
                Ad::Wrapper(wrapper) => {
                    if hops + 1 >= self.config.max_hops {
                        let error = ResolveError::RedirectLimitExceeded {
                            max_hops: self.config.max_hops,
                        };
                        return Err(self.fail(&mut builder, error, VastErrorCode::WrapperTimeout));
                    }
                    builder.absorb_wrapper(wrapper);

                    let Some(uri) = wrapper.vast_ad_tag_uri.as_deref() else {
                        // nothing to follow: dropped without firing trackers
                        warn!("Wrapper {:?} has no VASTAdTagURI after {} hops", primary.id, hops);
                        return Err(ResolveError::MissingRedirect);
                    };

                    self.check_cancelled()?;
                    hops += 1;
                    debug!("Following wrapper {:?} to {} (hop {})", primary.id, uri, hops);

                    match self.fetcher.fetch(uri) {
                        Ok(response) if response.is_success() => document = response.body,
                        Ok(response) => {
                            let error = ResolveError::FetchFailed {
                                url: uri.to_string(),
                                status: Some(response.status),
                            };
                            let code = VastErrorCode::HttpStatus(response.status);
                            return Err(self.fail(&mut builder, error, code));
                        }
                        Err(e) => {
                            warn!("Fetching {} failed: {}", uri, e);
                            let error = ResolveError::FetchFailed {
                                url: uri.to_string(),
                                status: None,
                            };
                            return Err(self.fail(&mut builder, error, VastErrorCode::WrapperTimeout));
                        }
                    }
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), ResolveError> {
        if self.cancel.is_cancelled() {
            debug!("Resolution cancelled");
            return Err(ResolveError::Cancelled);
        }
        Ok(())
    }

    fn fail(&self, builder: &mut ResolvedVideoAdBuilder, error: ResolveError, code: VastErrorCode) -> ResolveError {
        if self.cancel.is_cancelled() {
            return ResolveError::Cancelled;
        }
        let fired = fire_all(
            &mut builder.error_trackers,
            self.sink,
            &MacroContext::new().with_error_code(code),
        );
        warn!("Resolution failed: {} (code {}, {} error trackers)", error, code.code(), fired);
        error
    }
}

/// Resolve `initial` with a fresh cancellation flag, reporting failures as `None`.
pub fn resolve(
    initial: &str,
    fetcher: &dyn VastFetcher,
    sink: &dyn TrackerSink,
    config: &ResolverConfig,
) -> Option<ResolvedVideoAd> {
    Resolver::new(config, fetcher, sink).resolve(initial).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::RecordingSink;
    use crate::error::Result as VastResult;
    use crate::fetch::FetchResponse;

    struct NoFetch;

    impl VastFetcher for NoFetch {
        fn fetch(&self, url: &str) -> VastResult<FetchResponse> {
            panic!("unexpected fetch of {}", url);
        }
    }

    const INLINE: &str = r#"<VAST version="3.0"><Ad><InLine>
        <Impression>https://t/imp</Impression>
        <Error>https://t/err?c=[ERRORCODE]</Error>
        <Creatives><Creative><Linear skipoffset="25%">
          <Duration>00:00:10</Duration>
          <MediaFiles><MediaFile type="video/mp4" width="1920" height="1080">https://cdn/v.mp4</MediaFile></MediaFiles>
        </Linear></Creative></Creatives>
    </InLine></Ad></VAST>"#;

    #[test]
    fn inline_resolves_without_fetching() {
        let sink = RecordingSink::default();
        let config = ResolverConfig::default();
        let ad = resolve(INLINE, &NoFetch, &sink, &config).expect("resolved");
        assert_eq!(ad.media_file_url, "https://cdn/v.mp4");
        assert_eq!(ad.duration_ms, Some(10_000));
        assert_eq!(ad.skip_offset, Some(SkipOffset::Percentage(25.0)));
        assert_eq!(ad.impression_trackers.len(), 1);
        assert!(ad.error_trackers[0].is_repeatable());
        assert!(sink.urls().is_empty());
    }

    #[test]
    fn primary_ad_by_sequence() {
        let ad = |id: &str, seq: Option<&str>| VastAd {
            id: Some(id.into()),
            sequence: seq.map(String::from),
            ad: Ad::InLine(InLine::default()),
        };
        let ads = vec![ad("a", Some("1")), ad("b", Some("5")), ad("c", None), ad("d", Some("0"))];
        assert_eq!(select_primary_ad(&ads).and_then(|a| a.id.as_deref()), Some("c"));
        assert!(select_primary_ad(&[ad("x", Some("2"))]).is_none());
    }

    #[test]
    fn no_playable_media_fires_inline_errors() {
        let sink = RecordingSink::default();
        let config = ResolverConfig::default();
        let doc = INLINE.replace("video/mp4", "video/x-flv");
        let result = Resolver::new(&config, &NoFetch, &sink).resolve(&doc);
        assert_eq!(result, Err(ResolveError::NoPlayableMedia));
        assert_eq!(sink.urls(), vec!["https://t/err?c=900"]);
    }

    #[test]
    fn error_only_document_fires_with_900() {
        let sink = RecordingSink::default();
        let config = ResolverConfig::default();
        let result = Resolver::new(&config, &NoFetch, &sink)
            .resolve("<VAST version=\"3.0\"><Error>https://t/e?c=[ERRORCODE]</Error></VAST>");
        assert_eq!(result, Err(ResolveError::NoAds));
        assert_eq!(sink.urls(), vec!["https://t/e?c=900"]);
    }

    #[test]
    fn cancelled_before_start_fires_nothing() {
        let sink = RecordingSink::default();
        let config = ResolverConfig::default();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let result = Resolver::new(&config, &NoFetch, &sink)
            .with_cancellation(cancel)
            .resolve("<VAST><Error>https://t/e</Error></VAST>");
        assert_eq!(result, Err(ResolveError::Cancelled));
        assert!(sink.urls().is_empty());
    }

    #[test]
    fn wrapper_without_redirect_fails_silently() {
        let sink = RecordingSink::default();
        let config = ResolverConfig::default();
        let doc = "<VAST><Ad id=\"w\"><Wrapper><Impression>https://t/imp</Impression>\
                   <Error>https://t/err?c=[ERRORCODE]</Error></Wrapper></Ad></VAST>";
        let result = Resolver::new(&config, &NoFetch, &sink).resolve(doc);
        assert_eq!(result, Err(ResolveError::MissingRedirect));
        assert!(sink.urls().is_empty());
    }

    #[test]
    fn force_orientation_defaults_to_landscape() {
        let sink = RecordingSink::default();
        let ad = resolve(INLINE, &NoFetch, &sink, &ResolverConfig::default()).expect("resolved");
        assert_eq!(ad.force_orientation(), ForceOrientation::ForceLandscape);
        assert!(ad.companion(Orientation::Landscape).is_none());
    }
}
