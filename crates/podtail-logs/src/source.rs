use futures::future::BoxFuture;
use futures::stream::BoxStream;

use podtail_types::{ContainerInfo, LogLine, LogRequest, ResourcePath};

use crate::error::SourceError;

/// Line-granular log stream; `None` signals end of stream
pub type LineStream = BoxStream<'static, Result<LogLine, SourceError>>;

/// Cluster-side collaborator that delivers log lines.
///
/// Shared read-only between sessions.
pub trait LogSource: Send + Sync {
    /// Open a log stream for the request
    fn open(&self, request: LogRequest) -> BoxFuture<'static, Result<LineStream, SourceError>>;

    /// List the containers of the pod at `path`
    fn containers(&self, path: &ResourcePath) -> BoxFuture<'static, Result<Vec<ContainerInfo>, SourceError>>;
}
