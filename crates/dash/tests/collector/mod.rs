use iori_dash::{
    CollectorEvent, DashConfig, DashMpdParser, FragmentCollector, HttpFetcher, KeySystemDrm,
    MemoryCache, MemorySink,
};
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

mod ads;
mod events;
mod live;
mod periods;
mod rampdown;
mod trick;
mod vod;

pub type TestCollector =
    FragmentCollector<HttpFetcher, DashMpdParser, MemoryCache, KeySystemDrm, MemorySink>;

pub async fn setup_mock_server(body: &str) -> (String, MockServer) {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    (format!("{}/manifest.mpd", mock_server.uri()), mock_server)
}

/// Serve `body` at `at`, expecting exactly `times` requests.
pub async fn mount_fragment(server: &MockServer, at: &str, body: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(times)
        .mount(server)
        .await;
}

pub fn collector(
    manifest_url: &str,
    config: DashConfig,
) -> anyhow::Result<(TestCollector, UnboundedReceiver<CollectorEvent>, MemorySink)> {
    let sink = MemorySink::new();
    let (collector, events) = FragmentCollector::new(
        manifest_url.parse()?,
        config,
        HttpFetcher::default(),
        DashMpdParser,
        MemoryCache::default(),
        KeySystemDrm::default(),
        sink.clone(),
    );
    Ok((collector, events, sink))
}

pub fn drain(events: &mut UnboundedReceiver<CollectorEvent>) -> Vec<CollectorEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
