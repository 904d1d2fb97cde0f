use iori_dash::{CollectorEvent, DashConfig, MediaType, TickOutcome};

use super::{collector, drain, mount_fragment, setup_mock_server};
use crate::{init_tracing, AssertWrapper};

const VOD_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="video/$RepresentationID$/init.mp4" media="video/$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
    </AdaptationSet>
    <AdaptationSet id="2" contentType="audio" mimeType="audio/mp4" lang="en">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="audio/$RepresentationID$/init.mp4" media="audio/$RepresentationID$/$Number$.m4s"/>
      <Representation id="a1" bandwidth="128000" codecs="mp4a.40.2"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_vod_delivers_every_fragment_in_order() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(VOD_MANIFEST).await;
    for track in ["video/v1", "audio/a1"] {
        mount_fragment(&server, &format!("/{track}/init.mp4"), &format!("{track}/init"), 1).await;
        for number in 1..=3 {
            let at = format!("/{track}/{number}.m4s");
            mount_fragment(&server, &at, &format!("{track}/{number}"), 1).await;
        }
    }

    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(0.).await?;
    assert!(!collector.is_live());
    assert_eq!(collector.tracks().len(), 2);
    collector.run().await?;

    let video: Vec<(String, f64, f64)> = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .map(|f| (String::from_utf8_lossy(&f.body).into_owned(), f.position, f.duration))
        .collect();
    assert_eq!(
        video,
        vec![
            ("video/v1/init".to_string(), 0., 0.),
            ("video/v1/1".to_string(), 0., 2.),
            ("video/v1/2".to_string(), 2., 2.),
            ("video/v1/3".to_string(), 4., 2.),
        ]
    );
    assert_eq!(sink.fragments_of(MediaType::Audio).len(), 4);
    assert!(sink.discontinuities().is_empty());

    let events = drain(&mut events);
    assert!(events.contains(&CollectorEvent::DurationChanged {
        duration: 6.,
        culled_seconds: 0.,
    }));
    assert!(events.contains(&CollectorEvent::TracksChanged {
        audio_languages: vec!["en".to_string()],
        text_languages: vec![],
    }));
    assert_eq!(events.last(), Some(&CollectorEvent::EndOfStream));

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_vod_seek_lands_on_containing_fragment() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(VOD_MANIFEST).await;
    for track in ["video/v1", "audio/a1"] {
        mount_fragment(&server, &format!("/{track}/init.mp4"), "init", 1).await;
        mount_fragment(&server, &format!("/{track}/1.m4s"), "skipped", 0).await;
        for number in 2..=3 {
            let at = format!("/{track}/{number}.m4s");
            mount_fragment(&server, &at, &format!("{track}/{number}"), 1).await;
        }
    }

    let (mut collector, _events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.init(3.).await?;

    assert_eq!(collector.tick().await?, TickOutcome::Progress);
    let first = sink
        .fragments_of(MediaType::Video)
        .into_iter()
        .find(|f| f.duration > 0.)
        .assert_success();
    assert_eq!(first.body.as_ref(), b"video/v1/2");
    assert_eq!(first.position, 2.);

    collector.run().await?;
    assert_eq!(sink.fragments_of(MediaType::Video).len(), 3);

    server.verify().await;
    Ok(())
}

#[tokio::test]
async fn test_vod_end_position() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(VOD_MANIFEST).await;
    for track in ["video/v1", "audio/a1"] {
        mount_fragment(&server, &format!("/{track}/init.mp4"), "init", 1).await;
        mount_fragment(&server, &format!("/{track}/1.m4s"), "1", 1).await;
        mount_fragment(&server, &format!("/{track}/2.m4s"), "2", 1).await;
    }

    let (mut collector, mut events, sink) = collector(&manifest_url, DashConfig::default())?;
    collector.set_end_position(Some(3.));
    collector.init(0.).await?;
    collector.run().await?;

    // the fragment crossing the end position is still delivered
    assert_eq!(sink.fragments_of(MediaType::Video).len(), 3);
    let events = drain(&mut events);
    assert_eq!(events.last(), Some(&CollectorEvent::EndTimeReached));
    Ok(())
}

#[tokio::test]
async fn test_seek_outside_presentation() -> anyhow::Result<()> {
    let (manifest_url, _server) = setup_mock_server(VOD_MANIFEST).await;
    let (mut collector, mut events, _sink) = collector(&manifest_url, DashConfig::default())?;

    collector.init(60.).await.assert_error();
    let error = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            CollectorEvent::Error { kind, .. } => Some(kind),
            _ => None,
        })
        .assert_success();
    assert_eq!(error, iori_dash::ErrorKind::SeekRange);
    Ok(())
}
