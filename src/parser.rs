use crate::error::{Result, VastError};
use crate::models::*;
use log::debug;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::str::from_utf8;

/// Parse a VAST document.
///
/// Malformed markup never surfaces as an error: the document is logged and an
/// empty [`ParseResult`] is returned, which callers treat as "no ad".
pub fn parse_vast(xml: &str) -> ParseResult {
    match read_document(xml) {
        Ok(result) => result,
        Err(e) => {
            debug!("Discarding malformed VAST document: {}", e);
            ParseResult::default()
        }
    }
}

/// Walk every root element. `<VAST>` is parsed fully, `MP_TRACKING_URL`
/// elements are collected wherever they sit outside of it.
fn read_document(xml: &str) -> Result<ParseResult> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut result = ParseResult::default();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"VAST" => {
                    result.vast_found = true;
                    parse_vast_element(&mut reader, &mut result)?;
                }
                b"MP_TRACKING_URL" => {
                    push_non_empty(&mut result.out_of_band_impressions, read_text_element(&mut reader)?);
                }
                // descend into unknown containers
                _ => (),
            },
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"VAST" => result.vast_found = true,
            Ok(Event::Eof) => break,
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(result)
}

fn parse_vast_element(reader: &mut Reader<&[u8]>, result: &mut ParseResult) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Ad" => {
                    if let Some(ad) = parse_ad_element(reader, e)? {
                        result.ads.push(ad);
                    }
                }
                b"Error" => push_non_empty(&mut result.error_trackers, read_text_element(reader)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VAST" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Parse a single Ad element. Ads with neither InLine nor Wrapper are dropped.
fn parse_ad_element(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Option<VastAd>> {
    let id = attribute(start, b"id");
    let sequence = attribute(start, b"sequence");
    let mut body = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"InLine" if body.is_none() => {
                    let fields = parse_ad_fields(reader, b"InLine")?;
                    body = Some(Ad::InLine(fields.into_inline()));
                }
                b"Wrapper" if body.is_none() => {
                    let fields = parse_ad_fields(reader, b"Wrapper")?;
                    body = Some(Ad::Wrapper(fields.into_wrapper()));
                }
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Ad" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(body.map(|ad| VastAd { id, sequence, ad }))
}

/// Children shared by InLine and Wrapper
#[derive(Default)]
struct AdFields {
    ad_system: Option<AdSystem>,
    ad_title: Option<String>,
    vast_ad_tag_uri: Option<String>,
    impressions: Vec<String>,
    errors: Vec<String>,
    creatives: Creatives,
    extensions: Option<Extensions>,
}

impl AdFields {
    fn into_inline(self) -> InLine {
        InLine {
            ad_system: self.ad_system,
            ad_title: self.ad_title,
            impressions: self.impressions,
            errors: self.errors,
            creatives: self.creatives,
            extensions: self.extensions.unwrap_or_default(),
        }
    }

    fn into_wrapper(self) -> Wrapper {
        Wrapper {
            ad_system: self.ad_system,
            vast_ad_tag_uri: self.vast_ad_tag_uri,
            impressions: self.impressions,
            errors: self.errors,
            creatives: self.creatives,
            extensions: self.extensions.unwrap_or_default(),
        }
    }
}

/// Parse the body of an InLine or Wrapper element up to its end tag
fn parse_ad_fields(reader: &mut Reader<&[u8]>, end: &[u8]) -> Result<AdFields> {
    let mut fields = AdFields::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"AdSystem" => {
                    let version = attribute(e, b"version");
                    let name = read_text_element(reader)?;
                    fields.ad_system = Some(AdSystem { name, version });
                }
                b"AdTitle" => fields.ad_title = Some(read_text_element(reader)?),
                b"VASTAdTagURI" => {
                    let uri = read_text_element(reader)?;
                    if !uri.is_empty() {
                        fields.vast_ad_tag_uri = Some(uri);
                    }
                }
                b"Impression" => push_non_empty(&mut fields.impressions, read_text_element(reader)?),
                b"Error" => push_non_empty(&mut fields.errors, read_text_element(reader)?),
                b"Creatives" => parse_creatives(reader, &mut fields.creatives)?,
                // only the first block at this level counts
                b"Extensions" if fields.extensions.is_none() => {
                    fields.extensions = Some(parse_extensions(reader)?);
                }
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == end => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(fields)
}

fn parse_creatives(reader: &mut Reader<&[u8]>, creatives: &mut Creatives) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Creative" => parse_creative(reader, creatives)?,
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creatives" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_creative(reader: &mut Reader<&[u8]>, creatives: &mut Creatives) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Linear" => creatives.linears.push(parse_linear(reader, e)?),
                b"CompanionAds" => parse_companion_ads(reader, &mut creatives.companion_ads)?,
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Creative" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_linear(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Linear> {
    let mut linear = Linear {
        skip_offset: attribute(start, b"skipoffset").as_deref().and_then(SkipOffset::parse),
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Duration" => linear.duration_ms = parse_absolute_offset(&read_text_element(reader)?),
                b"MediaFiles" => parse_media_files(reader, &mut linear.media_files)?,
                b"TrackingEvents" => parse_tracking_events(reader, &mut linear.tracking_events)?,
                b"VideoClicks" => parse_video_clicks(reader, &mut linear.video_clicks)?,
                b"Icons" => parse_icons(reader, &mut linear.icons)?,
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Linear" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(linear)
}

fn parse_media_files(reader: &mut Reader<&[u8]>, media_files: &mut Vec<MediaFile>) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"MediaFile" => {
                    let media_file = parse_media_file(reader, e)?;
                    if !media_file.url.is_empty() {
                        media_files.push(media_file);
                    }
                }
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"MediaFiles" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_media_file(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<MediaFile> {
    let mut media_file = MediaFile::default();

    for attr in start.attributes().flatten() {
        let Ok(value) = from_utf8(&attr.value) else {
            continue;
        };
        let value = value.trim();
        match attr.key.as_ref() {
            b"type" => media_file.mime_type = Some(value.to_string()),
            b"width" => media_file.width = value.parse().ok(),
            b"height" => media_file.height = value.parse().ok(),
            b"bitrate" => media_file.bitrate = value.parse().ok(),
            b"codec" => media_file.codec = Some(value.to_string()),
            b"delivery" => media_file.delivery = Some(value.to_string()),
            _ => (),
        }
    }

    media_file.url = read_text_element(reader)?;

    Ok(media_file)
}

fn parse_tracking_events(reader: &mut Reader<&[u8]>, events: &mut Vec<TrackingEvent>) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Tracking" => {
                    let event = attribute(e, b"event");
                    let offset = attribute(e, b"offset");
                    let url = read_text_element(reader)?;
                    if let Some(event) = event.filter(|_| !url.is_empty()) {
                        events.push(TrackingEvent { event, offset, url });
                    }
                }
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"TrackingEvents" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_video_clicks(reader: &mut Reader<&[u8]>, clicks: &mut VideoClicks) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"ClickThrough" => {
                    let url = read_text_element(reader)?;
                    if clicks.click_through.is_none() && !url.is_empty() {
                        clicks.click_through = Some(url);
                    }
                }
                b"ClickTracking" => push_non_empty(&mut clicks.click_tracking, read_text_element(reader)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"VideoClicks" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_companion_ads(reader: &mut Reader<&[u8]>, companions: &mut Vec<CompanionAd>) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Companion" => companions.push(parse_companion(reader, e)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"CompanionAds" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_companion(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<CompanionAd> {
    let mut companion = CompanionAd {
        width: attribute(start, b"width").and_then(|w| w.parse().ok()),
        height: attribute(start, b"height").and_then(|h| h.parse().ok()),
        ad_slot_id: attribute(start, b"adSlotID"),
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"StaticResource" | b"HTMLResource" | b"IFrameResource" => {
                    read_resource(reader, e, &mut companion.resources)?
                }
                b"CompanionClickThrough" => {
                    let url = read_text_element(reader)?;
                    if companion.click_through.is_none() && !url.is_empty() {
                        companion.click_through = Some(url);
                    }
                }
                b"CompanionClickTracking" => {
                    push_non_empty(&mut companion.click_trackers, read_text_element(reader)?)
                }
                b"TrackingEvents" => {
                    let mut events = Vec::new();
                    parse_tracking_events(reader, &mut events)?;
                    companion.creative_view_trackers.extend(
                        events
                            .into_iter()
                            .filter(|t| t.event == "creativeView")
                            .map(|t| t.url),
                    );
                }
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Companion" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(companion)
}

fn parse_icons(reader: &mut Reader<&[u8]>, icons: &mut Vec<Icon>) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Icon" => icons.push(parse_icon(reader, e)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Icons" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn parse_icon(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Icon> {
    let mut icon = Icon {
        width: attribute(start, b"width").and_then(|w| w.parse().ok()),
        height: attribute(start, b"height").and_then(|h| h.parse().ok()),
        offset_ms: attribute(start, b"offset").as_deref().and_then(parse_absolute_offset),
        duration_ms: attribute(start, b"duration").as_deref().and_then(parse_absolute_offset),
        ..Default::default()
    };
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"StaticResource" | b"HTMLResource" | b"IFrameResource" => {
                    read_resource(reader, e, &mut icon.resources)?
                }
                b"IconClicks" => parse_icon_clicks(reader, &mut icon)?,
                b"IconViewTracking" => push_non_empty(&mut icon.view_trackers, read_text_element(reader)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Icon" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(icon)
}

fn parse_icon_clicks(reader: &mut Reader<&[u8]>, icon: &mut Icon) -> Result<()> {
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"IconClickThrough" => {
                    let url = read_text_element(reader)?;
                    if icon.click_through.is_none() && !url.is_empty() {
                        icon.click_through = Some(url);
                    }
                }
                b"IconClickTracking" => push_non_empty(&mut icon.click_trackers, read_text_element(reader)?),
                _ => skip_element(reader)?,
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"IconClicks" => break,
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

/// Read a Static/HTML/IFrame resource into `resources`; the first of each kind wins.
fn read_resource(reader: &mut Reader<&[u8]>, start: &BytesStart, resources: &mut ResourceCandidates) -> Result<()> {
    let kind = start.name().as_ref().to_vec();
    let creative_type = attribute(start, b"creativeType");
    let value = read_text_element(reader)?;
    if value.is_empty() {
        return Ok(());
    }
    match kind.as_slice() {
        b"StaticResource" if resources.static_resource.is_none() => {
            resources.static_resource = Some((value, creative_type));
        }
        b"HTMLResource" if resources.html_resource.is_none() => resources.html_resource = Some(value),
        b"IFrameResource" if resources.iframe_resource.is_none() => resources.iframe_resource = Some(value),
        _ => (),
    }
    Ok(())
}

/// Collect the custom values of one `<Extensions>` block, at any depth.
fn parse_extensions(reader: &mut Reader<&[u8]>) -> Result<Extensions> {
    let mut extensions = Extensions::default();
    let mut seen_cta = false;
    let mut seen_skip = false;
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"MoPubCtaText" => {
                    let text = read_text_element(reader)?;
                    if !seen_cta {
                        seen_cta = true;
                        extensions.cta_text =
                            (text.chars().count() <= Extensions::MAX_CTA_TEXT_LENGTH).then_some(text);
                    }
                }
                b"MoPubSkipText" => {
                    let text = read_text_element(reader)?;
                    if !seen_skip {
                        seen_skip = true;
                        extensions.skip_text =
                            (text.chars().count() <= Extensions::MAX_SKIP_TEXT_LENGTH).then_some(text);
                    }
                }
                b"MoPubCloseIcon" => {
                    let url = read_text_element(reader)?;
                    if extensions.close_icon_url.is_none() && !url.is_empty() {
                        extensions.close_icon_url = Some(url);
                    }
                }
                b"MoPubForceOrientation" => {
                    let key = read_text_element(reader)?;
                    if extensions.force_orientation.is_none() {
                        extensions.force_orientation = Some(ForceOrientation::from_key(&key));
                    }
                }
                b"MoPubViewabilityTracker" => {
                    let playtime = attribute(e, b"viewablePlaytime");
                    let percent = attribute(e, b"percentViewable");
                    let url = read_text_element(reader)?;
                    if extensions.viewability_tracker.is_none() {
                        extensions.viewability_tracker =
                            ViewabilityTracker::from_parts(Some(&url), playtime.as_deref(), percent.as_deref());
                    }
                }
                _ => depth += 1,
            },
            Ok(Event::End(ref e)) => {
                if depth == 0 {
                    if e.name().as_ref() != b"Extensions" {
                        return Err(VastError::Other("Unbalanced Extensions element".to_string()));
                    }
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(extensions)
}

/// Read the text and CDATA of the current element, including nested
/// children, up to its end tag. The result is trimmed.
fn read_text_element(reader: &mut Reader<&[u8]>) -> Result<String> {
    let mut text = String::new();
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(e)) => match e.unescape() {
                Ok(value) => text.push_str(&value),
                Err(_) => text.push_str(&String::from_utf8_lossy(&e)),
            },
            Ok(Event::CData(e)) => text.push_str(&String::from_utf8_lossy(&e)),
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(text.trim().to_string())
}

/// Skip the current element and all its children
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<()> {
    let mut buf = Vec::new();
    let mut depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Ok(Event::Eof) => return Err(unexpected_eof()),
            Err(e) => return Err(VastError::XmlParseError(e)),
            _ => (),
        }
        buf.clear();
    }

    Ok(())
}

fn attribute(start: &BytesStart, name: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == name)
        .and_then(|attr| from_utf8(&attr.value).ok().map(|value| value.trim().to_string()))
        .filter(|value| !value.is_empty())
}

fn push_non_empty(target: &mut Vec<String>, value: String) {
    if !value.is_empty() {
        target.push(value);
    }
}

fn unexpected_eof() -> VastError {
    VastError::Other("Unexpected end of file".to_string())
}
