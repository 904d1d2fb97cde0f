use iori_dash::{CollectorEvent, DashConfig, MediaType, TickOutcome};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::{collector, drain, mount_fragment, TestCollector};
use crate::init_tracing;

fn live_manifest(timeline: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="1970-01-01T00:00:00Z" minimumUpdatePeriod="PT2S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="live" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Time$.m4s">
        <SegmentTimeline>{timeline}</SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#
    )
}

/// Tick until every published fragment was fetched.
async fn tick_until_live_edge(collector: &mut TestCollector) -> anyhow::Result<()> {
    for _ in 0..16 {
        match collector.tick().await? {
            TickOutcome::Progress => {}
            TickOutcome::Wait(_) => return Ok(()),
            outcome => anyhow::bail!("unexpected tick outcome {outcome:?}"),
        }
    }
    anyhow::bail!("live edge never reached")
}

#[tokio::test]
async fn test_refresh_continues_sliding_timeline() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(live_manifest(r#"<S t="0" d="2" r="9"/>"#)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    // the window slid by two fragments and grew by two
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(live_manifest(r#"<S t="4" d="2" r="9"/>"#)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_fragment(&server, "/v1/init.mp4", "v1/init", 1).await;
    for time in (0..16).step_by(2) {
        mount_fragment(&server, &format!("/v1/{time}.m4s"), &format!("v1/{time}"), 0).await;
    }
    for time in [16, 18, 20, 22] {
        mount_fragment(&server, &format!("/v1/{time}.m4s"), &format!("v1/{time}"), 1).await;
    }

    let config = DashConfig {
        live_offset_ms: 4_000,
        ..Default::default()
    };
    let manifest_url = format!("{}/manifest.mpd", server.uri());
    let (mut collector, mut events, sink) = collector(&manifest_url, config)?;
    collector.init(0.).await?;
    assert!(collector.is_live());

    tick_until_live_edge(&mut collector).await?;
    collector.refresh_manifest().await?;
    assert_eq!(collector.culled_seconds(), 4.);
    tick_until_live_edge(&mut collector).await?;

    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .collect();
    assert_eq!(bodies, vec!["v1/init", "v1/16", "v1/18", "v1/20", "v1/22"]);
    assert!(sink.discontinuities().is_empty());
    assert!(!drain(&mut events)
        .iter()
        .any(|event| matches!(event, CollectorEvent::Error { .. })));

    server.verify().await;
    Ok(())
}
