use std::time::Duration;

use url::Url;

use super::{
    AdaptationSet, AddressingFields, BaseFields, Descriptor, Event, EventStream, Initialization,
    ListFields, Manifest, Period, Presentation, ProtectionDescriptor, Representation, SegmentUrl,
    TemplateFields, TimelineEntry, UtcTiming,
};
use crate::{util::range::ByteRange, IoriError, IoriResult};

/// Turns the raw manifest document into the owned model.
pub trait ManifestParser {
    fn parse(&self, data: &[u8], url: &Url) -> IoriResult<Manifest>;
}

/// [`ManifestParser`] backed by `dash-mpd`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DashMpdParser;

impl ManifestParser for DashMpdParser {
    fn parse(&self, data: &[u8], url: &Url) -> IoriResult<Manifest> {
        let text = std::str::from_utf8(data)
            .map_err(|e| IoriError::ManifestParse(format!("manifest is not valid UTF-8: {e}")))?;
        let mpd = dash_mpd::parse(text)?;
        convert_mpd(mpd, url.clone())
    }
}

/// Some attributes are modelled as required by one `dash-mpd` release and optional by another.
fn optional<T>(value: impl Into<Option<T>>) -> Option<T> {
    value.into()
}

fn seconds(duration: Option<Duration>) -> Option<f64> {
    duration.map(|d| d.as_secs_f64())
}

fn range(value: Option<&str>) -> IoriResult<Option<ByteRange>> {
    value.map(ByteRange::parse).transpose()
}

fn base_urls(urls: &[dash_mpd::BaseURL]) -> Vec<String> {
    urls.iter().map(|u| u.base.clone()).collect()
}

fn initialization(init: Option<&dash_mpd::Initialization>) -> IoriResult<Option<Initialization>> {
    init.map(|init| {
        Ok(Initialization {
            source_url: init.sourceURL.clone(),
            range: range(init.range.as_deref())?,
        })
    })
    .transpose()
}

fn convert_template(template: Option<&dash_mpd::SegmentTemplate>) -> Option<TemplateFields> {
    let template = template?;
    Some(TemplateFields {
        media: template.media.clone(),
        initialization: template.initialization.clone(),
        timescale: template.timescale,
        duration: template.duration,
        start_number: template.startNumber,
        presentation_time_offset: template.presentationTimeOffset,
        timeline: template.SegmentTimeline.as_ref().map(|timeline| {
            timeline
                .segments
                .iter()
                .map(|s| TimelineEntry::new(s.t, s.d, s.r.unwrap_or(0)))
                .collect()
        }),
    })
}

fn convert_list(list: Option<&dash_mpd::SegmentList>) -> IoriResult<Option<ListFields>> {
    let Some(list) = list else {
        return Ok(None);
    };

    let segment_urls = list
        .segment_urls
        .iter()
        .map(|u| {
            Ok(SegmentUrl {
                media: u.media.clone(),
                media_range: range(u.mediaRange.as_deref())?,
                ..Default::default()
            })
        })
        .collect::<IoriResult<Vec<_>>>()?;

    Ok(Some(ListFields {
        timescale: optional::<u64>(list.timescale),
        duration: optional::<u64>(list.duration),
        start_number: optional::<u64>(list.startNumber),
        initialization: initialization(list.Initialization.as_ref())?,
        segment_urls,
    }))
}

fn convert_base(base: Option<&dash_mpd::SegmentBase>) -> IoriResult<Option<BaseFields>> {
    let Some(base) = base else {
        return Ok(None);
    };
    Ok(Some(BaseFields {
        timescale: base.timescale,
        presentation_time_offset: base.presentationTimeOffset,
        index_range: range(base.indexRange.as_deref())?,
        initialization: initialization(base.Initialization.as_ref())?,
    }))
}

fn convert_protection(protection: &[dash_mpd::ContentProtection]) -> Vec<ProtectionDescriptor> {
    protection
        .iter()
        .map(|p| ProtectionDescriptor {
            scheme_id_uri: p.schemeIdUri.to_ascii_lowercase(),
            value: optional::<String>(p.value.clone()),
            default_kid: optional::<String>(p.default_KID.clone()),
        })
        .collect()
}

fn convert_representation(representation: dash_mpd::Representation) -> IoriResult<Representation> {
    Ok(Representation {
        id: representation.id.clone().unwrap_or_default(),
        bandwidth: representation.bandwidth.unwrap_or_default(),
        width: representation.width,
        height: representation.height,
        frame_rate: representation.frameRate.clone(),
        codecs: representation.codecs.clone(),
        mime_type: representation
            .mimeType
            .clone()
            .or_else(|| representation.contentType.clone()),
        base_urls: base_urls(&representation.BaseURL),
        addressing: AddressingFields {
            template: convert_template(representation.SegmentTemplate.as_ref()),
            list: convert_list(representation.SegmentList.as_ref())?,
            base: convert_base(representation.SegmentBase.as_ref())?,
        },
        content_protection: convert_protection(&representation.ContentProtection),
    })
}

fn convert_adaptation_set(adaptation_set: dash_mpd::AdaptationSet) -> IoriResult<AdaptationSet> {
    let roles = adaptation_set
        .Role
        .iter()
        .filter_map(|r| optional::<String>(r.value.clone()))
        .collect();
    let essential_properties = adaptation_set
        .essential_property
        .iter()
        .map(|p| Descriptor {
            scheme_id_uri: optional::<String>(p.schemeIdUri.clone()).unwrap_or_default(),
            value: optional::<String>(p.value.clone()),
        })
        .collect();
    let content_components = adaptation_set
        .ContentComponent
        .iter()
        .filter_map(|c| optional::<String>(c.contentType.clone()))
        .collect();

    let addressing = AddressingFields {
        template: convert_template(adaptation_set.SegmentTemplate.as_ref()),
        list: convert_list(adaptation_set.SegmentList.as_ref())?,
        base: None,
    };

    Ok(AdaptationSet {
        id: adaptation_set.id.as_ref().map(ToString::to_string),
        content_type: adaptation_set.contentType.clone(),
        mime_type: adaptation_set.mimeType.clone(),
        lang: adaptation_set.lang.clone(),
        codecs: adaptation_set.codecs.clone(),
        frame_rate: adaptation_set.frameRate.clone(),
        roles,
        essential_properties,
        content_components,
        content_protection: convert_protection(&adaptation_set.ContentProtection),
        base_urls: base_urls(&adaptation_set.BaseURL),
        addressing,
        representations: adaptation_set
            .representations
            .into_iter()
            .map(convert_representation)
            .collect::<IoriResult<_>>()?,
    })
}

fn convert_event_stream(stream: &dash_mpd::EventStream) -> EventStream {
    EventStream {
        scheme_id_uri: optional::<String>(stream.schemeIdUri.clone()).unwrap_or_default(),
        value: optional::<String>(stream.value.clone()),
        timescale: optional::<u64>(stream.timescale).filter(|&t| t > 0).unwrap_or(1),
        events: stream
            .event
            .iter()
            .map(|e| Event {
                id: optional::<String>(e.id.clone()),
                presentation_time: optional::<u64>(e.presentationTime).unwrap_or_default(),
                duration: optional::<u64>(e.duration),
                message_data: optional::<String>(e.messageData.clone()),
            })
            .collect(),
    }
}

fn convert_period(index: usize, period: dash_mpd::Period) -> IoriResult<Period> {
    Ok(Period {
        // Periods without an id still need a stable key for ad-break bookkeeping.
        id: period.id.clone().unwrap_or_else(|| index.to_string()),
        start: seconds(period.start),
        duration: seconds(period.duration),
        base_urls: base_urls(&period.BaseURL),
        addressing: AddressingFields {
            template: convert_template(period.SegmentTemplate.as_ref()),
            ..Default::default()
        },
        event_streams: period.event_streams.iter().map(convert_event_stream).collect(),
        adaptation_sets: period
            .adaptations
            .into_iter()
            .map(convert_adaptation_set)
            .collect::<IoriResult<_>>()?,
    })
}

pub(crate) fn convert_mpd(mpd: dash_mpd::MPD, url: Url) -> IoriResult<Manifest> {
    let presentation = match mpd.mpdtype.as_deref() {
        Some("dynamic") => Presentation::Dynamic {
            availability_start_time: mpd
                .availabilityStartTime
                .unwrap_or(chrono::DateTime::UNIX_EPOCH),
        },
        _ => Presentation::Static,
    };

    let utc_timing = mpd
        .UTCTiming
        .iter()
        .map(|timing| UtcTiming {
            scheme_id_uri: timing.schemeIdUri.clone(),
            value: timing.value.clone(),
        })
        .collect();

    let periods = mpd
        .periods
        .into_iter()
        .enumerate()
        .map(|(index, period)| convert_period(index, period))
        .collect::<IoriResult<Vec<_>>>()?;

    if periods.is_empty() {
        return Err(IoriError::ManifestParse("manifest has no Period".to_string()));
    }

    Ok(Manifest {
        url,
        presentation,
        media_presentation_duration: seconds(mpd.mediaPresentationDuration),
        minimum_update_period: mpd.minimumUpdatePeriod,
        time_shift_buffer_depth: seconds(mpd.timeShiftBufferDepth),
        suggested_presentation_delay: seconds(mpd.suggestedPresentationDelay),
        base_urls: base_urls(&mpd.base_url),
        utc_timing,
        periods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{MediaType, SegmentAddressing};

    const MULTI_PERIOD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT16S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <BaseURL>https://cdn.example.com/vod/</BaseURL>
  <Period id="main" start="PT0S" duration="PT11S">
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" media="$RepresentationID$/$Time$.m4s" initialization="$RepresentationID$/init.mp4">
        <SegmentTimeline>
          <S t="0" d="2" r="4"/>
          <S t="10" d="1"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v720" bandwidth="3000000" width="1280" height="720" codecs="avc1.64001f"/>
      <Representation id="v1080" bandwidth="6000000" width="1920" height="1080" codecs="avc1.640028"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" lang="en">
      <SegmentTemplate timescale="48000" duration="96000" startNumber="1" media="$RepresentationID$/$Number%05d$.m4s"/>
      <Representation id="aac" bandwidth="128000" codecs="mp4a.40.2"/>
    </AdaptationSet>
  </Period>
  <Period id="credits" duration="PT5S">
    <AdaptationSet mimeType="video/mp4">
      <Representation id="c1" bandwidth="1000000">
        <BaseURL>credits.mp4</BaseURL>
        <SegmentBase indexRange="800-1199" timescale="1000">
          <Initialization range="0-799"/>
        </SegmentBase>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn test_convert_multi_period() -> IoriResult<()> {
        let url = Url::parse("https://example.com/manifest.mpd")?;
        let manifest = DashMpdParser.parse(MULTI_PERIOD.as_bytes(), &url)?;

        assert!(!manifest.is_live());
        assert_eq!(manifest.periods.len(), 2);
        assert_eq!(manifest.base_urls, vec!["https://cdn.example.com/vod/"]);
        assert_eq!(manifest.duration(), 16.);
        assert_eq!(manifest.period_start(1), 11.);

        let main = &manifest.periods[0];
        assert_eq!(main.id, "main");
        assert!(main.adaptation_sets[0].is_content_type(MediaType::Video));
        assert!(main.adaptation_sets[1].is_content_type(MediaType::Audio));

        let video = &main.adaptation_sets[0];
        match SegmentAddressing::resolve(main, video, &video.representations[1]) {
            Some(SegmentAddressing::Timeline { entries, template }) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0], TimelineEntry::new(Some(0), 2, 4));
                assert_eq!(template.media, Some("$RepresentationID$/$Time$.m4s"));
            }
            other => panic!("unexpected addressing {other:?}"),
        }

        let audio = &main.adaptation_sets[1];
        match SegmentAddressing::resolve(main, audio, &audio.representations[0]) {
            Some(SegmentAddressing::Number { template }) => {
                assert_eq!(template.fragment_duration(), 2.);
            }
            other => panic!("unexpected addressing {other:?}"),
        }

        let credits = &manifest.periods[1];
        let set = &credits.adaptation_sets[0];
        match SegmentAddressing::resolve(credits, set, &set.representations[0]) {
            Some(SegmentAddressing::Indexed {
                index_range,
                initialization,
                timescale,
                ..
            }) => {
                assert_eq!(index_range, ByteRange::new(800, Some(400)));
                assert_eq!(timescale, 1000);
                assert_eq!(
                    initialization.and_then(|i| i.range),
                    Some(ByteRange::new(0, Some(800)))
                );
            }
            other => panic!("unexpected addressing {other:?}"),
        }

        Ok(())
    }

    #[test]
    fn test_malformed_manifest() {
        let url = Url::parse("https://example.com/manifest.mpd").unwrap();
        let err = DashMpdParser.parse(b"<MPD><Period", &url).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ManifestParse);
    }
}
