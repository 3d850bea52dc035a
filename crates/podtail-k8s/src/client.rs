//! Pod log streaming over the Kubernetes API

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use futures::{AsyncBufRead, AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::LogParams;
use kube::config::KubeConfigOptions;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use podtail_logs::{LineStream, LogSource, SourceError};
use podtail_types::{ContainerInfo, LogLine, LogRequest, ResourcePath};

type LineSender = mpsc::UnboundedSender<Result<LogLine, SourceError>>;

/// `LogSource` backed by a kube client
#[derive(Clone)]
pub struct KubeLogSource {
    client: kube::Client,
}

impl KubeLogSource {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig, optionally pinning a context
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(name) => kube::Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(name.to_string()),
                ..Default::default()
            })
            .await
            .context(format!("Failed to create config for context: {}", name))?,
            None => kube::Config::infer()
                .await
                .context("Failed to load Kubernetes config. Is kubectl configured?")?,
        };

        let client = kube::Client::try_from(config).context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl LogSource for KubeLogSource {
    fn open(&self, request: LogRequest) -> BoxFuture<'static, Result<LineStream, SourceError>> {
        let api = self.pods(&request.path.namespace);

        async move {
            let containers = match &request.container {
                Some(name) => vec![name.clone()],
                None => fetch_containers(&api, &request.path)
                    .await?
                    .into_iter()
                    .map(|c| c.name)
                    .collect(),
            };
            if containers.is_empty() {
                return Err(SourceError::NotFound(format!("containers of {}", request.path)));
            }

            // Tag lines with their origin when several containers are merged
            let tag = request.container.is_none();
            let (tx, rx) = mpsc::unbounded_channel();
            for container in containers {
                debug!(path = %request.path, %container, "opening container log stream");
                tokio::spawn(forward_container(
                    api.clone(),
                    request.clone(),
                    container,
                    tag,
                    tx.clone(),
                ));
            }

            let lines = futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            });
            Ok(lines.boxed())
        }
        .boxed()
    }

    fn containers(&self, path: &ResourcePath) -> BoxFuture<'static, Result<Vec<ContainerInfo>, SourceError>> {
        let api = self.pods(&path.namespace);
        let path = path.clone();
        async move { fetch_containers(&api, &path).await }.boxed()
    }
}

/// Stream one container's log into the shared channel until the receiver
/// goes away or the API closes the stream
async fn forward_container(
    api: Api<Pod>,
    request: LogRequest,
    container: String,
    tag: bool,
    tx: LineSender,
) {
    let params = log_params(&request, &container);
    let reader = match api.log_stream(&request.path.name, &params).await {
        Ok(reader) => reader,
        Err(err) => {
            warn!(path = %request.path, %container, %err, "failed to open log stream");
            let _ = tx.send(Err(map_kube_error(err, &request.path)));
            return;
        }
    };

    let tag = tag.then(|| (request.path.name.clone(), container.clone()));
    forward_lines(reader, &tx, tag).await;
    debug!(path = %request.path, %container, "container log stream closed");
}

/// Split a log reader into lines and send them until EOF, a read error or a
/// closed receiver. Lines are raw bytes; invalid UTF-8 is passed through.
async fn forward_lines<R>(mut reader: R, tx: &LineSender, tag: Option<(String, String)>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = tx.closed() => break,

            result = reader.read_until(b'\n', &mut buf) => {
                match result {
                    Ok(0) => {
                        // Stream ended (container terminated?)
                        break;
                    }
                    Ok(_) => {
                        let mut line = LogLine::parse(&buf);
                        buf.clear();
                        if let Some((pod, container)) = &tag {
                            line = line.with_source(pod.clone(), container.clone());
                        }
                        if tx.send(Ok(line)).is_err() {
                            // Session dropped the stream
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(SourceError::Stream(err.to_string())));
                        break;
                    }
                }
            }
        }
    }
}

async fn fetch_containers(api: &Api<Pod>, path: &ResourcePath) -> Result<Vec<ContainerInfo>, SourceError> {
    let pod = api
        .get(&path.name)
        .await
        .map_err(|err| map_kube_error(err, path))?;
    Ok(pod_containers(&pod))
}

/// Containers declared in the pod spec, enriched with their status
fn pod_containers(pod: &Pod) -> Vec<ContainerInfo> {
    let statuses = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref());

    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| {
                    let mut info = ContainerInfo::new(c.name.clone());
                    if let Some(cs) = statuses.and_then(|all| all.iter().find(|cs| cs.name == c.name)) {
                        info.ready = cs.ready;
                        info.restart_count = cs.restart_count;
                    }
                    info
                })
                .collect()
        })
        .unwrap_or_default()
}

fn log_params(request: &LogRequest, container: &str) -> LogParams {
    LogParams {
        follow: request.follow,
        container: Some(container.to_string()),
        // since_seconds wins over tail_lines when both are set
        tail_lines: if request.since_seconds.is_some() {
            None
        } else {
            request.tail_lines
        },
        since_seconds: request.since_seconds,
        previous: request.previous,
        timestamps: request.timestamps,
        ..Default::default()
    }
}

fn map_kube_error(err: kube::Error, path: &ResourcePath) -> SourceError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => SourceError::NotFound(format!("pod {}", path)),
        kube::Error::Api(resp) => SourceError::Stream(resp.message),
        other => SourceError::Connect(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerStatus, PodSpec, PodStatus};

    fn request(since_seconds: Option<i64>) -> LogRequest {
        LogRequest {
            path: ResourcePath::parse("ns/fred").unwrap(),
            container: None,
            tail_lines: Some(100),
            since_seconds,
            previous: false,
            timestamps: true,
            follow: true,
        }
    }

    #[test]
    fn test_log_params_tail_lines() {
        let params = log_params(&request(None), "blee");
        assert_eq!(params.container.as_deref(), Some("blee"));
        assert_eq!(params.tail_lines, Some(100));
        assert_eq!(params.since_seconds, None);
        assert!(params.follow);
        assert!(params.timestamps);
    }

    #[test]
    fn test_log_params_since_wins() {
        let params = log_params(&request(Some(300)), "blee");
        assert_eq!(params.tail_lines, None);
        assert_eq!(params.since_seconds, Some(300));
    }

    #[test]
    fn test_pod_containers_merges_status() {
        let pod = Pod {
            spec: Some(PodSpec {
                containers: vec![
                    Container {
                        name: "app".into(),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: "sidecar".into(),
                    ready: true,
                    restart_count: 3,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let containers = pod_containers(&pod);
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0], ContainerInfo::new("app".into()));
        assert!(containers[1].ready);
        assert_eq!(containers[1].restart_count, 3);
    }

    async fn collect(input: &'static [u8], tag: Option<(String, String)>) -> Vec<Result<LogLine, SourceError>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        forward_lines(futures::io::Cursor::new(input), &tx, tag).await;
        drop(tx);

        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[tokio::test]
    async fn test_binary_line_keeps_stream_alive() {
        let lines = collect(b"ok-1\n\xff\xfe binary\nok-2\n", None).await;
        let bytes: Vec<Vec<u8>> = lines
            .into_iter()
            .map(|l| l.unwrap().bytes().to_vec())
            .collect();
        assert_eq!(
            bytes,
            vec![b"ok-1".to_vec(), b"\xff\xfe binary".to_vec(), b"ok-2".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_forwarded_lines_parse_and_tag() {
        let tag = Some(("fred".to_string(), "blee".to_string()));
        let lines = collect(b"2024-01-15T10:30:00Z hello\r\nno newline at end", tag).await;
        assert_eq!(lines.len(), 2);

        let first = lines[0].as_ref().unwrap();
        assert!(first.timestamp().is_some());
        assert_eq!(first.render(false), b"fred blee hello".to_vec());

        let last = lines[1].as_ref().unwrap();
        assert_eq!(last.bytes(), b"no newline at end");
    }

    #[tokio::test]
    async fn test_closed_receiver_stops_forwarding() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        forward_lines(futures::io::Cursor::new(&b"a\nb\n"[..]), &tx, None).await;
        assert!(tx.is_closed());
    }

    #[test]
    fn test_pod_without_spec_has_no_containers() {
        assert!(pod_containers(&Pod::default()).is_empty());
    }
}
