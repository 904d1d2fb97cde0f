use iori_dash::{CollectorEvent, DashConfig};

use super::{collector, drain, setup_mock_server};
use crate::AssertWrapper;

const CHAPTER_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT10S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT4S">
    <EventStream schemeIdUri="urn:example:chapters" timescale="1000">
      <Event id="c1" presentationTime="2000" duration="1500" messageData="chapter one"/>
      <Event presentationTime="5000"/>
    </EventStream>
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_timed_metadata_reported_once() -> anyhow::Result<()> {
    let (manifest_url, _server) = setup_mock_server(CHAPTER_MANIFEST).await;
    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;

    collector.init(0.).await?;
    collector.init(1.).await?;

    let metadata: Vec<CollectorEvent> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, CollectorEvent::TimedMetadata { .. }))
        .collect();
    assert_eq!(
        metadata,
        vec![
            CollectorEvent::TimedMetadata {
                scheme: "urn:example:chapters".to_string(),
                id: "c1".to_string(),
                start_ms: 6000,
                duration_ms: 1500,
                payload: Some("chapter one".to_string()),
            },
            // events without an id are keyed by their presentation time
            CollectorEvent::TimedMetadata {
                scheme: "urn:example:chapters".to_string(),
                id: "5000".to_string(),
                start_ms: 9000,
                duration_ms: 0,
                payload: None,
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_tune_reports_tracks_and_speeds_once() -> anyhow::Result<()> {
    let (manifest_url, _server) = setup_mock_server(CHAPTER_MANIFEST).await;
    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;

    collector.init(0.).await?;
    collector.init(0.).await?;

    let events = drain(&mut events);
    let speeds: Vec<&CollectorEvent> = events
        .iter()
        .filter(|event| matches!(event, CollectorEvent::SupportedSpeedsChanged { .. }))
        .collect();
    assert_eq!(
        speeds,
        vec![&CollectorEvent::SupportedSpeedsChanged { speeds: vec![1.] }]
    );
    let durations = events
        .iter()
        .filter(|event| matches!(event, CollectorEvent::DurationChanged { .. }))
        .count();
    assert_eq!(durations, 2);
    Ok(())
}

const SPLICE_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT20S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S" duration="PT10S">
    <EventStream schemeIdUri="urn:scte:scte35:2013:xml" timescale="1">
      <Event id="s1" presentationTime="4" duration="6"/>
      <Event id="s2" presentationTime="8" duration="2"/>
    </EventStream>
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
  <Period id="p1" duration="PT10S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_splice_events_reserve_one_break_per_period() -> anyhow::Result<()> {
    let (manifest_url, _server) = setup_mock_server(SPLICE_MANIFEST).await;
    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;

    // both splice points still reach the embedder with their own start
    let starts: Vec<u64> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            CollectorEvent::TimedMetadata { start_ms, .. } => Some(start_ms),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![4000, 8000]);

    let cdai = collector.cdai().object().lock().await;
    let ad_break = cdai.ad_break("p0").assert_success();
    assert_eq!(ad_break.break_duration_ms, 6000);
    assert!(ad_break.ads.is_empty());
    assert!(cdai.ad_break("p1").is_none());
    Ok(())
}
