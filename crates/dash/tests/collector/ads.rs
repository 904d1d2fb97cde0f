use iori_dash::{CollectorEvent, DashConfig, MediaType};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use super::{collector, drain, mount_fragment, setup_mock_server};
use crate::{init_tracing, AssertWrapper};

const BASE_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT12S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S" duration="PT6S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="p0/$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
  <Period id="p1" start="PT6S" duration="PT6S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="p1/$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

const AD_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="ad">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="ad-v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

const SHORT_AD_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT4S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="ad">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="ad-v1" bandwidth="1000000" codecs="avc1.64001f"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_ad_is_trimmed_to_its_break() -> anyhow::Result<()> {
    let (manifest_url, server) = setup_mock_server(BASE_MANIFEST).await;
    Mock::given(method("GET"))
        .and(path("/ad.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(AD_MANIFEST))
        .expect(1)
        .mount(&server)
        .await;

    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;

    let cdai = collector.cdai();
    // reserving the break never fetches anything
    cdai.set_alternate_contents("p1", "", "", 6000, 4000)
        .await
        .assert_error();
    let task = cdai
        .set_alternate_contents("p1", "ad1", &format!("{}/ad.mpd", server.uri()), 6000, 4000)
        .await
        .assert_success();
    task.await?;

    assert!(cdai.object().lock().await.has_ad_breaks());
    let resolved: Vec<CollectorEvent> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, CollectorEvent::AdResolved { .. }))
        .collect();
    assert_eq!(
        resolved,
        vec![CollectorEvent::AdResolved {
            ad_id: "ad1".to_string(),
            resolved: true,
            start_ms: 0,
            duration_ms: 4000,
        }]
    );

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_ad_without_break_is_rejected() -> anyhow::Result<()> {
    let (manifest_url, server) = setup_mock_server(BASE_MANIFEST).await;
    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;

    collector
        .cdai()
        .set_alternate_contents("p1", "ad1", &format!("{}/ad.mpd", server.uri()), 6000, 4000)
        .await
        .assert_error();

    assert!(drain(&mut events).contains(&CollectorEvent::AdResolved {
        ad_id: "ad1".to_string(),
        resolved: false,
        start_ms: 0,
        duration_ms: 0,
    }));
    Ok(())
}

#[tokio::test]
async fn test_collector_plays_ad_and_resumes_base() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(BASE_MANIFEST).await;
    Mock::given(method("GET"))
        .and(path("/ad.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SHORT_AD_MANIFEST))
        .expect(1)
        .mount(&server)
        .await;
    for number in 1..=3 {
        mount_fragment(&server, &format!("/p0/v1/{number}.m4s"), &format!("p0/{number}"), 1).await;
    }
    for number in 1..=2 {
        mount_fragment(&server, &format!("/ad-v1/{number}.m4s"), &format!("ad/{number}"), 1).await;
    }
    // the ad covers the first four seconds of p1
    mount_fragment(&server, "/p1/v1/1.m4s", "p1/1", 0).await;
    mount_fragment(&server, "/p1/v1/2.m4s", "p1/2", 0).await;
    mount_fragment(&server, "/p1/v1/3.m4s", "p1/3", 1).await;

    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;
    let cdai = collector.cdai().clone();
    cdai.set_alternate_contents("p1", "", "", 6000, 4000)
        .await
        .assert_error();
    cdai.set_alternate_contents("p1", "ad1", &format!("{}/ad.mpd", server.uri()), 6000, 4000)
        .await
        .assert_success()
        .await?;

    collector.run().await?;
    assert!(!collector.ad_state().is_in_adbreak());

    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .collect();
    assert_eq!(bodies, vec!["p0/1", "p0/2", "p0/3", "ad/1", "ad/2", "p1/3"]);

    let ad_events: Vec<CollectorEvent> = drain(&mut events)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                CollectorEvent::AdReservationStart { .. }
                    | CollectorEvent::AdPlacementStart { .. }
                    | CollectorEvent::AdPlacementEnd { .. }
                    | CollectorEvent::AdReservationEnd { .. }
            )
        })
        .collect();
    assert_eq!(
        ad_events,
        vec![
            CollectorEvent::AdReservationStart {
                break_id: "p1".to_string(),
                position_ms: 0,
            },
            CollectorEvent::AdPlacementStart {
                ad_id: "ad1".to_string(),
                position_ms: 0,
                duration_ms: 4000,
            },
            CollectorEvent::AdPlacementEnd {
                ad_id: "ad1".to_string(),
                position_ms: 0,
                duration_ms: 4000,
            },
            CollectorEvent::AdReservationEnd {
                break_id: "p1".to_string(),
                position_ms: 4000,
            },
        ]
    );

    server.verify().await;
    Ok(())
}
