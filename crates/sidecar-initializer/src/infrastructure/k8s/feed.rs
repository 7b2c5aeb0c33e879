use std::time::Duration;

use async_stream::stream;
use error_stack::Report;
use error_stack::ResultExt;
use futures::stream::BoxStream;
use futures::Stream;
use futures::StreamExt;
use kube::core::params::ListParams;
use kube::core::params::WatchParams;
use kube::core::ObjectList;
use kube::core::Request;
use kube::core::WatchEvent;
use kube::Client;
use kube::Resource;
use tokio::select;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::Workload;

/// Delay before resuming after a list or watch error.
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Without it the API server hides objects whose initializers have not all run.
const INCLUDE_UNINITIALIZED: &str = "includeUninitialized=true";

/// Watch status for a resource version that is no longer available.
const GONE: u16 = 410;

type WatchEvents = BoxStream<'static, Result<WatchEvent<Workload>, kube::Error>>;

/// Delivers Deployments that still have pending initializers.
///
/// The feed lists all namespaces once, then watches from the listed resource
/// version. Every resync period it lists again and re-delivers everything
/// still pending, covering events the watch dropped. Delivery order is
/// whatever the API server sends; consumers must re-check each snapshot.
#[derive(Clone)]
pub struct WorkloadFeed {
    client: Client,
    request: Request,
    resync_period: Duration,
}

enum FeedStep {
    Stop,
    Resync,
    Watch(Option<Result<WatchEvent<Workload>, kube::Error>>),
}

impl WorkloadFeed {
    pub fn new(client: Client, resync_period: Duration) -> Self {
        Self {
            client,
            request: Request::new(Workload::url_path(&(), None)),
            resync_period,
        }
    }

    fn list_request(&self) -> Result<http::Request<Vec<u8>>, Report<KubernetesError>> {
        let request = self
            .request
            .list(&ListParams::default())
            .change_context_lazy(|| watch_failed("Failed to build deployment list request"))?;
        include_uninitialized(request)
    }

    fn watch_request(
        &self,
        resource_version: &str,
    ) -> Result<http::Request<Vec<u8>>, Report<KubernetesError>> {
        let request = self
            .request
            .watch(&WatchParams::default(), resource_version)
            .change_context_lazy(|| watch_failed("Failed to build deployment watch request"))?;
        include_uninitialized(request)
    }

    /// Full list of deployments, initialized or not.
    async fn list(&self) -> Result<ObjectList<Workload>, Report<KubernetesError>> {
        let request = self.list_request()?;
        self.client
            .request::<ObjectList<Workload>>(request)
            .await
            .change_context_lazy(|| watch_failed("Failed to list deployments"))
    }

    async fn watch(&self, resource_version: &str) -> Result<WatchEvents, Report<KubernetesError>> {
        let request = self.watch_request(resource_version)?;
        let events = self
            .client
            .request_events::<Workload>(request)
            .await
            .change_context_lazy(|| watch_failed("Failed to open deployment watch"))?;
        Ok(events.boxed())
    }

    /// Stream pending deployments until `cancellation_token` is cancelled.
    ///
    /// Once cancelled the stream ends and drops both the watch and the resync
    /// timer; no item is yielded afterwards.
    pub fn events(self, cancellation_token: CancellationToken) -> impl Stream<Item = Workload> + Send {
        stream! {
            info!(resync_period = ?self.resync_period, "Starting deployment feed");

            let mut resync = tokio::time::interval_at(
                Instant::now() + self.resync_period,
                self.resync_period,
            );
            resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

            // `None` forces a full list before the next watch.
            let mut resource_version: Option<String> = None;
            let mut watch: Option<WatchEvents> = None;

            while !cancellation_token.is_cancelled() {
                if resource_version.is_none() {
                    let listed = select! {
                        biased;
                        _ = cancellation_token.cancelled() => None,
                        listed = self.list() => Some(listed),
                    };
                    match listed {
                        None => break,
                        Some(Ok(list)) => {
                            resource_version =
                                Some(list.metadata.resource_version.clone().unwrap_or_default());
                            for workload in pending(list.items) {
                                if cancellation_token.is_cancelled() {
                                    break;
                                }
                                yield workload;
                            }
                        }
                        Some(Err(e)) => {
                            error!("Deployment list failed: {e:?}");
                            back_off(&cancellation_token).await;
                        }
                    }
                    continue;
                }

                if watch.is_none() {
                    let version = resource_version.clone().unwrap_or_default();
                    let opened = select! {
                        biased;
                        _ = cancellation_token.cancelled() => None,
                        opened = self.watch(&version) => Some(opened),
                    };
                    match opened {
                        None => break,
                        Some(Ok(events)) => {
                            debug!(resource_version = %version, "Watching deployments");
                            watch = Some(events);
                        }
                        Some(Err(e)) => {
                            error!("Deployment watch failed: {e:?}");
                            back_off(&cancellation_token).await;
                        }
                    }
                    continue;
                }

                let Some(events) = watch.as_mut() else {
                    continue;
                };
                let step = select! {
                    biased;
                    _ = cancellation_token.cancelled() => FeedStep::Stop,
                    _ = resync.tick() => FeedStep::Resync,
                    event = events.next() => FeedStep::Watch(event),
                };

                match step {
                    FeedStep::Stop => break,
                    FeedStep::Resync => match self.list().await {
                        Ok(list) => {
                            debug!(count = list.items.len(), "Resyncing pending deployments");
                            for workload in pending(list.items) {
                                if cancellation_token.is_cancelled() {
                                    break;
                                }
                                yield workload;
                            }
                        }
                        Err(e) => error!("Deployment resync failed: {e:?}"),
                    },
                    FeedStep::Watch(Some(Ok(
                        WatchEvent::Added(workload) | WatchEvent::Modified(workload),
                    ))) => {
                        remember_version(&mut resource_version, &workload);
                        if workload.has_pending_initializers() {
                            yield workload;
                        }
                    }
                    FeedStep::Watch(Some(Ok(WatchEvent::Deleted(workload)))) => {
                        remember_version(&mut resource_version, &workload);
                    }
                    FeedStep::Watch(Some(Ok(WatchEvent::Bookmark(bookmark)))) => {
                        resource_version = Some(bookmark.metadata.resource_version);
                    }
                    FeedStep::Watch(Some(Ok(WatchEvent::Error(e)))) if e.code == GONE => {
                        warn!("Deployment watch expired, relisting: {}", e.message);
                        resource_version = None;
                        watch = None;
                    }
                    FeedStep::Watch(Some(Ok(WatchEvent::Error(e)))) => {
                        error!(code = e.code, "Deployment watch error: {}", e.message);
                        watch = None;
                        back_off(&cancellation_token).await;
                    }
                    FeedStep::Watch(Some(Err(e))) => {
                        error!("Deployment watch failed: {e}");
                        watch = None;
                        back_off(&cancellation_token).await;
                    }
                    FeedStep::Watch(None) => {
                        debug!("Deployment watch closed, reopening");
                        watch = None;
                    }
                }
            }

            info!("Deployment feed stopped");
        }
    }
}

fn watch_failed(message: &str) -> KubernetesError {
    KubernetesError::WatchFailed {
        message: message.to_string(),
    }
}

/// Append [`INCLUDE_UNINITIALIZED`] to a list or watch request.
fn include_uninitialized(
    mut request: http::Request<Vec<u8>>,
) -> Result<http::Request<Vec<u8>>, Report<KubernetesError>> {
    let uri = request.uri().to_string();
    let uri = if uri.ends_with('?') {
        format!("{uri}{INCLUDE_UNINITIALIZED}")
    } else if uri.contains('?') {
        format!("{uri}&{INCLUDE_UNINITIALIZED}")
    } else {
        format!("{uri}?{INCLUDE_UNINITIALIZED}")
    };
    *request.uri_mut() = uri
        .parse::<http::Uri>()
        .change_context_lazy(|| watch_failed("Invalid deployment request URI"))?;
    Ok(request)
}

fn pending(items: Vec<Workload>) -> impl Iterator<Item = Workload> {
    items.into_iter().filter(Workload::has_pending_initializers)
}

fn remember_version(resource_version: &mut Option<String>, workload: &Workload) {
    if let Some(version) = &workload.metadata.object.resource_version {
        *resource_version = Some(version.clone());
    }
}

async fn back_off(cancellation_token: &CancellationToken) {
    select! {
        _ = cancellation_token.cancelled() => {}
        _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;

    use serde_json::json;
    use serde_json::Value;
    use similar_asserts::assert_eq;
    use test_log::test;
    use tokio::io::AsyncBufReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    use super::*;

    const OWNER: &str = "envoy.initializer.kubernetes.io";

    fn offline_client() -> Client {
        Client::try_from(kube::Config::new(
            "http://localhost:8080".parse().expect("valid url"),
        ))
        .expect("client")
    }

    /// API server stand-in answering list and watch requests with canned JSON.
    ///
    /// The first watch receives `watch_events` and ends; later watches send
    /// headers and then stay open without events.
    struct StubApiServer {
        address: SocketAddr,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubApiServer {
        async fn start(list: Value, watch_events: Vec<Value>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let address = listener.local_addr().expect("local address");
            let requests = Arc::new(Mutex::new(Vec::new()));

            let list_body = list.to_string();
            let watch_body: String = watch_events
                .iter()
                .map(|event| format!("{event}\n"))
                .collect();
            let watches = Arc::new(AtomicUsize::new(0));

            let recorded = requests.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let recorded = recorded.clone();
                    let list_body = list_body.clone();
                    let watch_body = watch_body.clone();
                    let watches = watches.clone();

                    tokio::spawn(async move {
                        let mut reader = BufReader::new(socket);
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).await.is_err() {
                            return;
                        }
                        loop {
                            let mut header = String::new();
                            match reader.read_line(&mut header).await {
                                Ok(0) | Err(_) => return,
                                Ok(_) if header == "\r\n" => break,
                                Ok(_) => {}
                            }
                        }
                        recorded
                            .lock()
                            .unwrap()
                            .push(request_line.trim_end().to_string());

                        let mut socket = reader.into_inner();
                        let body = if request_line.contains("watch=true") {
                            if watches.fetch_add(1, Ordering::SeqCst) > 0 {
                                let _ = socket
                                    .write_all(
                                        b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n",
                                    )
                                    .await;
                                futures::future::pending::<()>().await;
                            }
                            watch_body
                        } else {
                            list_body
                        };
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                            body.len()
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });

            Self { address, requests }
        }

        fn client(&self) -> Client {
            Client::try_from(kube::Config::new(
                format!("http://{}", self.address)
                    .parse()
                    .expect("valid url"),
            ))
            .expect("client")
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn deployment(name: &str, pending: &[&str]) -> Value {
        let mut metadata = json!({
            "name": name,
            "namespace": "shop",
            "resourceVersion": "11"
        });
        if !pending.is_empty() {
            let pending: Vec<_> = pending.iter().map(|name| json!({ "name": name })).collect();
            metadata["initializers"] = json!({ "pending": pending });
        }
        json!({ "apiVersion": "apps/v1", "kind": "Deployment", "metadata": metadata })
    }

    fn deployment_list(items: Vec<Value>) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "DeploymentList",
            "metadata": { "resourceVersion": "10" },
            "items": items
        })
    }

    async fn collect_keys(events: impl Stream<Item = Workload>, count: usize) -> Vec<String> {
        tokio::time::timeout(
            Duration::from_secs(10),
            events.take(count).map(|workload| workload.key()).collect(),
        )
        .await
        .expect("feed should deliver in time")
    }

    #[test(tokio::test)]
    async fn list_and_watch_requests_include_uninitialized() {
        let feed = WorkloadFeed::new(offline_client(), Duration::from_secs(30));

        let list = feed.list_request().expect("list request");
        assert_eq!(list.uri().path(), "/apis/apps/v1/deployments");
        let query = list.uri().query().unwrap_or_default();
        assert!(query.contains("includeUninitialized=true"), "{query}");
        assert!(!query.contains("watch=true"), "{query}");

        let watch = feed.watch_request("42").expect("watch request");
        assert_eq!(watch.uri().path(), "/apis/apps/v1/deployments");
        let query = watch.uri().query().unwrap_or_default();
        assert!(query.contains("includeUninitialized=true"), "{query}");
        assert!(query.contains("watch=true"), "{query}");
        assert!(query.contains("resourceVersion=42"), "{query}");
    }

    #[test(tokio::test)]
    async fn cancelled_feed_yields_nothing() {
        let feed = WorkloadFeed::new(offline_client(), Duration::from_secs(30));
        let token = CancellationToken::new();
        token.cancel();

        let events: Vec<_> = feed.events(token).collect().await;
        assert!(events.is_empty());
    }

    #[test(tokio::test)]
    async fn feed_stops_when_cancelled_while_waiting() {
        let feed = WorkloadFeed::new(offline_client(), Duration::from_secs(3600));
        let token = CancellationToken::new();

        let stopper = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel();
            })
        };

        let events = tokio::time::timeout(Duration::from_secs(10), feed.events(token).count())
            .await
            .expect("feed should stop after cancellation");
        assert_eq!(events, 0);
        stopper.await.expect("stopper task");
    }

    #[test(tokio::test)]
    async fn feed_lists_then_watches_pending_deployments() {
        let server = StubApiServer::start(
            deployment_list(vec![deployment("a", &[OWNER]), deployment("b", &[])]),
            vec![
                json!({ "type": "ADDED", "object": deployment("c", &[OWNER]) }),
                json!({ "type": "MODIFIED", "object": deployment("d", &[]) }),
                json!({ "type": "ADDED", "object": deployment("e", &["other.initializer"]) }),
            ],
        )
        .await;
        let feed = WorkloadFeed::new(server.client(), Duration::from_secs(3600));

        let keys = collect_keys(feed.events(CancellationToken::new()), 3).await;
        assert_eq!(keys, ["shop/a", "shop/c", "shop/e"].map(String::from).to_vec());

        let requests = server.requests();
        assert!(requests.len() >= 2, "{requests:?}");
        assert!(requests[0].contains("includeUninitialized=true"), "{}", requests[0]);
        assert!(!requests[0].contains("watch=true"), "{}", requests[0]);
        assert!(requests[1].contains("watch=true"), "{}", requests[1]);
        assert!(requests[1].contains("resourceVersion=10"), "{}", requests[1]);
        assert!(requests[1].contains("includeUninitialized=true"), "{}", requests[1]);
    }

    #[test(tokio::test)]
    async fn resync_redelivers_pending_deployments() {
        let server = StubApiServer::start(
            deployment_list(vec![deployment("a", &[OWNER]), deployment("b", &[])]),
            Vec::new(),
        )
        .await;
        let feed = WorkloadFeed::new(server.client(), Duration::from_millis(50));

        let keys = collect_keys(feed.events(CancellationToken::new()), 3).await;
        assert_eq!(keys, ["shop/a"; 3].map(String::from).to_vec());
    }

    #[test(tokio::test)]
    async fn cancellation_stops_partway_through_a_batch() {
        let server = StubApiServer::start(
            deployment_list(vec![
                deployment("a", &[OWNER]),
                deployment("b", &[OWNER]),
                deployment("c", &[OWNER]),
            ]),
            Vec::new(),
        )
        .await;
        let feed = WorkloadFeed::new(server.client(), Duration::from_secs(3600));
        let token = CancellationToken::new();

        let mut events = std::pin::pin!(feed.events(token.clone()));
        let first = tokio::time::timeout(Duration::from_secs(10), events.next())
            .await
            .expect("first delivery in time")
            .expect("one deployment");
        assert_eq!(first.key().as_str(), "shop/a");

        token.cancel();
        let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(10), events.collect())
            .await
            .expect("feed should stop after cancellation");
        assert!(rest.is_empty());
    }
}
