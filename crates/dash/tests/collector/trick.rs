use iori_dash::{DashConfig, MediaType};

use super::{collector, mount_fragment, setup_mock_server};
use crate::init_tracing;

const TRICK_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT20S" minBufferTime="PT2S" profiles="urn:mpeg:dash:profile:isoff-live:2011">
  <Period id="p0" start="PT0S">
    <AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="v1" bandwidth="1000000" width="1280" height="720" codecs="avc1.64001f"/>
    </AdaptationSet>
    <AdaptationSet id="2" contentType="video" mimeType="video/mp4">
      <EssentialProperty schemeIdUri="http://dashif.org/guidelines/trickmode" value="1"/>
      <SegmentTemplate timescale="1" duration="2" startNumber="1" initialization="$RepresentationID$/init.mp4" media="$RepresentationID$/$Number$.m4s"/>
      <Representation id="i1" bandwidth="200000" width="640" height="360" codecs="avc1.64001e"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

#[tokio::test]
async fn test_fast_forward_skips_between_iframes() -> anyhow::Result<()> {
    init_tracing();
    let (manifest_url, server) = setup_mock_server(TRICK_MANIFEST).await;
    mount_fragment(&server, "/i1/init.mp4", "i1/init", 1).await;
    // 16x at 4 iframes per second moves 4 s, two fragments, past every delivered iframe
    for number in 1..=10 {
        let times = if number % 3 == 1 { 1 } else { 0 };
        mount_fragment(&server, &format!("/i1/{number}.m4s"), &format!("i1/{number}"), times).await;
    }
    mount_fragment(&server, "/v1/init.mp4", "v1/init", 0).await;

    let config = DashConfig {
        trick_play_fps: 4,
        ..Default::default()
    };
    let (mut collector, _events, sink) = collector(&manifest_url, config)?;
    collector.set_rate(16.);
    collector.init(0.).await?;
    assert_eq!(collector.tracks().len(), 1);
    collector.run().await?;

    let bodies: Vec<String> = sink
        .fragments_of(MediaType::Iframe)
        .into_iter()
        .map(|f| String::from_utf8_lossy(&f.body).into_owned())
        .collect();
    assert_eq!(bodies, vec!["i1/init", "i1/1", "i1/4", "i1/7", "i1/10"]);
    assert!(sink.fragments_of(MediaType::Video).is_empty());

    server.verify().await;
    Ok(())
}
