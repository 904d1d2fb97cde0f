use iori_dash::{CollectorEvent, DashConfig, ErrorKind, MediaType};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use super::{collector, drain, mount_fragment, setup_mock_server};
use crate::{init_tracing, AssertWrapper};

const LADDER_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v500" bandwidth="500000" width="640" height="360" codecs="avc1.64001e"/>
      <Representation id="v1000" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
      <Representation id="v2000" bandwidth="2000000" width="1920" height="1080" codecs="avc1.640028"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

/// The ladder manifest after an iframe adaptation set was added.
const LADDER_WITH_IFRAME_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v500" bandwidth="500000" width="640" height="360" codecs="avc1.64001e"/>
      <Representation id="v1000" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
      <Representation id="v2000" bandwidth="2000000" width="1920" height="1080" codecs="avc1.640028"/>
    </AdaptationSet>
    <AdaptationSet id="2" contentType="video" mimeType="video/mp4">
      <EssentialProperty schemeIdUri="http://dashif.org/guidelines/trickmode" value="1"/>
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="i200" bandwidth="200000" width="640" height="360" codecs="avc1.64001e"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_missing_fragment_ramps_down_and_retries() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(LADDER_MANIFEST).await;
    Mock::given(method("GET"))
        .and(path("/v2000/2.m4s"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_fragment(&server, "/v2000/init.mp4", "v2000/init", 1).await;
    mount_fragment(&server, "/v2000/1.m4s", "v2000/1", 1).await;
    mount_fragment(&server, "/v1000/init.mp4", "v1000/init", 1).await;
    mount_fragment(&server, "/v1000/1.m4s", "v1000/1", 0).await;
    mount_fragment(&server, "/v1000/2.m4s", "v1000/2", 1).await;
    mount_fragment(&server, "/v1000/3.m4s", "v1000/3", 1).await;

    // 2.5 Mbit/s start bitrate picks the 2 Mbit/s profile
    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;
    assert_eq!(collector.profile(), 2);

    collector.run().await?;
    assert_eq!(collector.profile(), 1);

    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .collect();
    assert_eq!(
        bodies,
        vec!["v2000/init", "v2000/1", "v1000/init", "v1000/2", "v1000/3"]
    );

    let events = drain(&mut events);
    assert!(events.contains(&CollectorEvent::ProfileChanged {
        bandwidth: 1_000_000,
        width: Some(1280),
        height: Some(720),
    }));
    assert_eq!(events.last(), Some(&CollectorEvent::EndOfStream));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_lowest_profile_skips_then_fails() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(LADDER_MANIFEST).await;
    // the init fragment is cached across the failed attempts
    mount_fragment(&server, "/v500/init.mp4", "v500/init", 1).await;
    for number in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/v500/{number}.m4s")))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = DashConfig {
        initial_bitrate: 500_000,
        max_segment_fail_count: 2,
        ..Default::default()
    };
    let (mut collector, mut events, sink) = collector(&manifest_url, config)?;
    collector.init(0.).await?;
    assert_eq!(collector.profile(), 0);

    // nothing lower to ramp down to: each failure skips a fragment until the limit is exceeded
    collector.run().await.assert_error();
    assert!(sink.fragments_of(MediaType::Video).is_empty());

    let error = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            CollectorEvent::Error { kind, .. } => Some(kind),
            _ => None,
        })
        .assert_success();
    assert_eq!(error, ErrorKind::FragmentDownload);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_refresh_after_rampdown_keeps_profile() -> anyhow::Result<()> {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LADDER_MANIFEST))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LADDER_WITH_IFRAME_MANIFEST))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2000/2.m4s"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    mount_fragment(&server, "/v2000/init.mp4", "v2000/init", 1).await;
    mount_fragment(&server, "/v2000/1.m4s", "v2000/1", 1).await;
    mount_fragment(&server, "/v2000/3.m4s", "v2000/3", 0).await;
    mount_fragment(&server, "/v1000/init.mp4", "v1000/init", 1).await;
    mount_fragment(&server, "/v1000/2.m4s", "v1000/2", 1).await;
    mount_fragment(&server, "/v1000/3.m4s", "v1000/3", 1).await;

    let manifest_url = format!("{}/manifest.mpd", server.uri());
    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;
    assert_eq!(collector.profile(), 2);

    for _ in 0..8 {
        if collector.profile() == 1 {
            break;
        }
        collector.tick().await?;
    }
    assert_eq!(collector.profile(), 1);

    // the new adaptation set makes the refresh select tracks again
    collector.refresh_manifest().await?;
    assert_eq!(collector.profile(), 1);
    let video = collector.track(MediaType::Video).assert_success();
    assert_eq!(video.representation_index, 1);

    collector.run().await?;
    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .collect();
    assert_eq!(
        bodies,
        vec!["v2000/init", "v2000/1", "v1000/init", "v1000/2", "v1000/3"]
    );
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        CollectorEvent::SupportedSpeedsChanged { speeds } if speeds.len() > 1
    )));

    server.verify().await;
    Ok(())
}
