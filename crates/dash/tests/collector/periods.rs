use iori_dash::{CollectorEvent, DashConfig, MediaType};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use super::{collector, drain, mount_fragment, setup_mock_server};
use crate::init_tracing;

fn period(id: &str, start: u64, first_time: u64) -> String {
    format!(
        r#"  <Period id="{id}" start="PT{start}S" duration="PT4S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Time$.m4s">
        <SegmentTimeline><S t="{first_time}" d="2" r="1"/></SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
"#
    )
}

/// p1 continues the timestamps of p0, p2 restarts them.
fn three_period_manifest() -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT12S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
{}{}{}</MPD>"#,
        period("p0", 0, 0),
        period("p1", 4, 4),
        period("p2", 8, 100),
    )
}

#[tokio::test]
async fn test_timestamp_jump_signals_discontinuity() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(&three_period_manifest()).await;
    Mock::given(method("GET"))
        .and(path("/v1/init.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_string("v1/init"))
        .mount(&server)
        .await;
    for time in [0, 2, 4, 6, 100, 102] {
        mount_fragment(&server, &format!("/v1/{time}.m4s"), &format!("v1/{time}"), 1).await;
    }

    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;
    assert_eq!(collector.first_pts(), 0.);
    collector.run().await?;
    assert_eq!(collector.period_index(), 2);

    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .filter(|body| body != "v1/init")
        .collect();
    assert_eq!(bodies, vec!["v1/0", "v1/2", "v1/4", "v1/6", "v1/100", "v1/102"]);

    // only the p1 to p2 boundary breaks the timestamps
    assert_eq!(sink.discontinuities(), vec![MediaType::Video]);
    let events = drain(&mut events);
    let discontinuities = events
        .iter()
        .filter(|event| matches!(event, CollectorEvent::Discontinuity { .. }))
        .count();
    assert_eq!(discontinuities, 1);
    assert_eq!(collector.first_pts(), 100.);
    assert_eq!(events.last(), Some(&CollectorEvent::EndOfStream));

    server.verify().await;
    Ok(())
}
