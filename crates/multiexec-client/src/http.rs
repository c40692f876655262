//! HTTP client for multiexec daemon

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use url::Url;
use uuid::Uuid;

use multiexec_api::requests::transfer_fields;
use multiexec_api::{HealthResponse, RunInfo};

use crate::error::{ClientError, Result};
use crate::sse::SseDecoder;

/// Login and hosts for an upload or script run
#[derive(Clone, Default)]
pub struct TransferTarget {
    pub ssh_user: String,
    pub ssh_pass: String,
    /// Explicit host list; takes precedence over `host_range`
    pub hosts: Vec<String>,
    pub host_range: String,
}

impl std::fmt::Debug for TransferTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferTarget")
            .field("ssh_user", &self.ssh_user)
            .field("hosts", &self.hosts)
            .field("host_range", &self.host_range)
            .finish_non_exhaustive()
    }
}

impl TransferTarget {
    fn form(&self) -> Result<Form> {
        Ok(Form::new()
            .text(transfer_fields::SSH_USER, self.ssh_user.clone())
            .text(transfer_fields::SSH_PASS, self.ssh_pass.clone())
            .text(transfer_fields::HOSTS, serde_json::to_string(&self.hosts)?)
            .text(transfer_fields::HOST_RANGE, self.host_range.clone()))
    }
}

/// Text lines streamed back by a transfer endpoint
pub struct SseLines {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    ready: std::collections::VecDeque<String>,
    ended: bool,
}

impl SseLines {
    fn new(response: Response) -> Self {
        Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            ready: std::collections::VecDeque::new(),
            ended: false,
        }
    }

    /// Next line, or `None` once the server has closed the stream
    ///
    /// # Errors
    /// Returns an error if reading the body fails.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }
            if self.ended {
                return Ok(None);
            }
            match self.body.next().await {
                Some(chunk) => self.ready.extend(self.decoder.push(&chunk?)),
                None => {
                    self.ended = true;
                    self.ready.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// HTTP client for communicating with multiexec daemon
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a new HTTP client
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    ///
    /// # Example
    /// ```no_run
    /// use multiexec_client::HttpClient;
    ///
    /// let client = HttpClient::new("http://localhost:8080")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(base_url: impl AsRef<str>) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    /// Create a new HTTP client with custom `reqwest::Client`
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn with_client(base_url: impl AsRef<str>, client: Client) -> Result<Self> {
        let base_url = Url::parse(base_url.as_ref())?;
        Ok(Self { client, base_url })
    }

    /// WebSocket dispatch URL on the same daemon
    ///
    /// # Errors
    /// Returns an error if the base URL cannot carry a WebSocket scheme.
    pub fn dispatch_url(&self) -> Result<Url> {
        let mut url = self.url("/ws")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::NoDispatchUrl(url.to_string()))?;
        Ok(url)
    }

    /// Build a full URL from a path
    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(ClientError::Url)
    }

    async fn check(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|value| value.get("message")?.as_str().map(str::to_string))
            .unwrap_or(body);
        Err(ClientError::Api { status, message })
    }

    /// Perform a GET request and deserialize the response
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = Self::check(self.client.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// Perform a POST request without a body
    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = Self::check(self.client.post(url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn post_form(&self, path: &str, form: Form) -> Result<SseLines> {
        let url = self.url(path)?;
        let response = Self::check(self.client.post(url).multipart(form).send().await?).await?;
        Ok(SseLines::new(response))
    }

    // System endpoints

    /// Get daemon health status
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    // Run endpoints

    /// List in-flight runs
    ///
    /// # Errors
    /// Returns an error if the request fails or the daemon returns an error.
    pub async fn list_runs(&self) -> Result<Vec<RunInfo>> {
        self.get("/runs").await
    }

    /// Get a single run
    ///
    /// # Errors
    /// Returns an error if the request fails or the run is unknown.
    pub async fn get_run(&self, id: Uuid) -> Result<RunInfo> {
        self.get(&format!("/runs/{id}")).await
    }

    /// Cancel a run
    ///
    /// # Errors
    /// Returns an error if the request fails or the run is unknown.
    pub async fn cancel_run(&self, id: Uuid) -> Result<RunInfo> {
        self.post(&format!("/runs/{id}/cancel")).await
    }

    // Transfer endpoints

    /// Upload a file to every target host
    ///
    /// # Errors
    /// Returns an error if the request is rejected.
    ///
    /// # Example
    /// ```no_run
    /// # use multiexec_client::{HttpClient, TransferTarget};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = HttpClient::new("http://localhost:8080")?;
    /// let target = TransferTarget {
    ///     ssh_user: "deploy".to_string(),
    ///     ssh_pass: "secret".to_string(),
    ///     host_range: "10.0.0.1-4".to_string(),
    ///     ..TransferTarget::default()
    /// };
    /// let mut lines = client
    ///     .upload_file(&target, "app.conf", b"key=value".to_vec(), Some("/etc/app"))
    ///     .await?;
    /// while let Some(line) = lines.next_line().await? {
    ///     println!("{line}");
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn upload_file(
        &self,
        target: &TransferTarget,
        file_name: &str,
        contents: Vec<u8>,
        remote_path: Option<&str>,
    ) -> Result<SseLines> {
        let mut form = target.form()?.part(
            transfer_fields::FILE,
            Part::bytes(contents).file_name(file_name.to_string()),
        );
        if let Some(path) = remote_path {
            form = form.text(transfer_fields::REMOTE_PATH, path.to_string());
        }
        self.post_form("/upload_file", form).await
    }

    /// Upload and run a script on every target host
    ///
    /// # Errors
    /// Returns an error if the request is rejected.
    pub async fn run_script(
        &self,
        target: &TransferTarget,
        file_name: &str,
        contents: Vec<u8>,
        sudo: bool,
    ) -> Result<SseLines> {
        let form = target
            .form()?
            .part(
                transfer_fields::SCRIPT,
                Part::bytes(contents).file_name(file_name.to_string()),
            )
            .text(transfer_fields::SUDO, sudo.to_string());
        self.post_form("/run_script", form).await
    }
}
