use async_trait::async_trait;
use fileflow_core::protocol::{
    ClaimRequest, CompleteRequest, FinishedRequest, HelloRequest, LogRequest,
};
use fileflow_core::{
    ChannelError, ClaimTicket, FileUid, FileUpdate, Flow, FlowUid, Library, LibraryFile,
    LibraryUid, NodeUid, ProgressInfo, RunnerChannel, RunnerUid, WorkSource,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// JSON client for the host's HTTP api
#[derive(Clone)]
pub struct HostClient {
    client: reqwest::Client,
    base_url: String,
}

impl HostClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ChannelError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ChannelError::Transport(format!("invalid response: {}", e)))
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Self::read(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChannelError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Self::read(response).await
    }

    /// GET that maps a 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ChannelError> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(ChannelError::Rejected { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Runner channel that reports to a remote host
#[derive(Clone)]
pub struct HttpRunnerChannel {
    host: HostClient,
}

impl HttpRunnerChannel {
    pub fn new(host: HostClient) -> Self {
        Self { host }
    }
}

#[async_trait]
impl RunnerChannel for HttpRunnerChannel {
    async fn hello(&self, runner_uid: RunnerUid, info: ProgressInfo) -> Result<bool, ChannelError> {
        self.host
            .post("api/runner/hello", &HelloRequest { runner_uid, info })
            .await
    }

    async fn log_message(
        &self,
        runner_uid: RunnerUid,
        file_uid: FileUid,
        text: String,
    ) -> Result<(), ChannelError> {
        self.host
            .post::<_, serde_json::Value>(
                "api/runner/log",
                &LogRequest {
                    runner_uid,
                    file_uid,
                    text,
                },
            )
            .await
            .map(|_| ())
    }

    async fn finished(&self, runner_uid: RunnerUid) -> Result<(), ChannelError> {
        self.host
            .post::<_, serde_json::Value>("api/runner/finished", &FinishedRequest { runner_uid })
            .await
            .map(|_| ())
    }
}

/// Work source that claims from and completes to a remote host
#[derive(Clone)]
pub struct HttpWorkSource {
    host: HostClient,
}

impl HttpWorkSource {
    pub fn new(host: HostClient) -> Self {
        Self { host }
    }
}

#[async_trait]
impl WorkSource for HttpWorkSource {
    async fn claim_next(&self, node_uid: NodeUid) -> Result<Option<LibraryFile>, ChannelError> {
        self.host
            .post("api/work/claim", &ClaimRequest { node_uid })
            .await
    }

    async fn library(&self, uid: LibraryUid) -> Result<Option<Library>, ChannelError> {
        self.host.get_optional(&format!("api/libraries/{}", uid)).await
    }

    async fn flow(&self, uid: FlowUid) -> Result<Option<Flow>, ChannelError> {
        self.host.get_optional(&format!("api/flows/{}", uid)).await
    }

    async fn complete(
        &self,
        ticket: &ClaimTicket,
        update: FileUpdate,
    ) -> Result<bool, ChannelError> {
        let request = CompleteRequest {
            ticket: *ticket,
            update,
        };
        self.host
            .post::<_, Option<LibraryFile>>("api/work/complete", &request)
            .await
            .map(|written| written.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let host = HostClient::new("http://myserver:5151");
        assert_eq!(host.base_url(), "http://myserver:5151/");
        assert_eq!(host.url("/api/work/claim"), "http://myserver:5151/api/work/claim");
    }
}
