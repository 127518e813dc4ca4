//! Device-flow orchestration: acquire a code, prompt, poll, re-prompt on
//! expiry.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::FlowError;
use crate::exchange::{self, FormValues};

const DEFAULT_HOST: &str = "https://github.com";
const DEVICE_CODE_PATH: &str = "/login/device/code";
const ACCESS_TOKEN_PATH: &str = "/login/oauth/access_token";
const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const DEFAULT_EXPIRY: Duration = Duration::from_secs(15 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// What the user must be shown to approve the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Webpage where the user enters their code.
    pub verification_url: String,
    /// Code the user enters into that webpage.
    pub user_code: String,
}

/// Capability that presents a [`Prompt`] to a human.
///
/// May be invoked more than once per flow: when a device code expires before
/// the user acts, the flow requests a fresh code and prompts again. The token
/// passed in is a child of the caller's cancellation token and fires when the
/// current acquisition attempt ends, so implementations that hand the prompt
/// off to background work can observe it. Returning an error aborts the whole
/// flow.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(
        &self,
        prompt: Prompt,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// [`Prompter`] that writes the verification URL and user code to a sink,
/// such as stderr.
pub struct WriterPrompter<W> {
    out: Mutex<W>,
}

impl<W: io::Write + Send> WriterPrompter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait]
impl<W: io::Write + Send> Prompter for WriterPrompter<W> {
    async fn prompt(
        &self,
        prompt: Prompt,
        _cancel: CancellationToken,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut out = self.out.lock().map_err(|_| "prompter sink lock poisoned")?;
        writeln!(
            out,
            "Visit {} and enter the code {} to authorize this application.",
            prompt.verification_url, prompt.user_code
        )?;
        out.flush()?;
        Ok(())
    }
}

/// GitHub OAuth device-flow configuration and entry point.
///
/// Built once, then [`run`](Self::run) until the user approves the request,
/// the flow fails, or the caller's cancellation token fires. A `DeviceFlow`
/// holds no per-run state; one value may serve concurrent `run` calls.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
///
/// use ghdevice::{DeviceFlow, WriterPrompter};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), ghdevice::FlowError> {
/// let flow = DeviceFlow::new("Iv1.cafe1234")
///     .with_scopes(["repo", "user"])
///     .with_user_agent("my-app/1.0")
///     .with_prompter(Arc::new(WriterPrompter::new(std::io::stderr())));
/// let token = flow.run(CancellationToken::new()).await?;
/// # Ok(())
/// # }
/// ```
pub struct DeviceFlow {
    client: reqwest::Client,
    client_id: String,
    scopes: Vec<String>,
    host: Url,
    user_agent: String,
    prompter: Option<Arc<dyn Prompter>>,
}

impl DeviceFlow {
    /// Create a flow for the given OAuth application client ID.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.into(),
            scopes: Vec::new(),
            host: Url::parse(DEFAULT_HOST).expect("default host URL"),
            user_agent: String::new(),
            prompter: None,
        }
    }

    /// OAuth scopes to request for the token. Space-joined on the wire; an
    /// empty list requests public access only.
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// The capability that shows the URL and user code to a human. Required.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// HTTP client to issue requests through.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Base URL for the login endpoints. Defaults to the public GitHub host.
    pub fn with_host(mut self, host: Url) -> Self {
        self.host = host;
        self
    }

    /// `User-Agent` header value. Omitted from requests when empty.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Run the device flow until the user authorizes the application, the
    /// token fires, or an unrecoverable error occurs. On success returns the
    /// bearer access token.
    ///
    /// The prompter is invoked once per device code; if a code expires before
    /// the user acts, a fresh code is requested and the prompter is invoked
    /// again.
    pub async fn run(&self, cancel: CancellationToken) -> Result<String, FlowError> {
        if self.client_id.is_empty() {
            return Err(FlowError::MissingClientId);
        }
        let prompter = self.prompter.clone().ok_or(FlowError::MissingPrompter)?;

        loop {
            let code = self.request_device_code(&cancel).await?;
            tracing::debug!(
                user_code = %code.user_code,
                expires_in = ?code.expires_in,
                interval = ?code.interval,
                "device code issued"
            );

            let iteration = cancel.child_token();
            let outcome = self
                .acquire_with_code(&cancel, &iteration, prompter.as_ref(), code)
                .await;
            iteration.cancel();

            match outcome? {
                PollOutcome::Token(token) => return Ok(token),
                PollOutcome::Cancelled => return Err(FlowError::Cancelled),
                PollOutcome::Expired => {
                    // The device code died before the user acted. Unless the
                    // caller is done too, start over with a fresh code.
                    if cancel.is_cancelled() {
                        return Err(FlowError::Cancelled);
                    }
                    tracing::debug!("device code expired before authorization, re-prompting");
                }
            }
        }
    }

    async fn request_device_code(
        &self,
        cancel: &CancellationToken,
    ) -> Result<DeviceCodeResponse, FlowError> {
        let url = self.endpoint(DEVICE_CODE_PATH);
        let scope = self.scopes.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("scope", scope.as_str()),
        ];
        let values = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            result = exchange::post_form(&self.client, &self.user_agent, url, &params) => {
                result.map_err(FlowError::DeviceCode)?
            }
        };
        Ok(DeviceCodeResponse::from_values(values))
    }

    /// One outer-loop iteration: prompt the user, then poll with the device
    /// code until a terminal transition. Bounded by the caller's token and by
    /// the deadline derived from `expires_in`.
    async fn acquire_with_code(
        &self,
        cancel: &CancellationToken,
        iteration: &CancellationToken,
        prompter: &dyn Prompter,
        code: DeviceCodeResponse,
    ) -> Result<PollOutcome, FlowError> {
        let deadline = Instant::now() + code.expires_in;
        let prompt = Prompt {
            verification_url: code.verification_url.clone(),
            user_code: code.user_code.clone(),
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
            _ = time::sleep_until(deadline) => return Ok(PollOutcome::Expired),
            result = prompter.prompt(prompt, iteration.clone()) => {
                result.map_err(FlowError::Prompt)?;
            }
        }
        self.wait_for_access_token(cancel, deadline, &code.device_code, code.interval)
            .await
    }

    /// Inner poll loop. The period starts at the negotiated interval and is
    /// only ever replaced by a positive `slow_down` directive, never
    /// incremented speculatively.
    async fn wait_for_access_token(
        &self,
        cancel: &CancellationToken,
        deadline: Instant,
        device_code: &str,
        mut period: Duration,
    ) -> Result<PollOutcome, FlowError> {
        let url = self.endpoint(ACCESS_TOKEN_PATH);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("device_code", device_code),
            ("grant_type", DEVICE_GRANT_TYPE),
        ];
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                _ = time::sleep_until(deadline) => return Ok(PollOutcome::Expired),
                _ = time::sleep(period) => {}
            }
            // The deadline also bounds the in-flight exchange; a hung token
            // endpoint must not delay re-acquisition.
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PollOutcome::Cancelled),
                _ = time::sleep_until(deadline) => return Ok(PollOutcome::Expired),
                result = exchange::post_form(&self.client, &self.user_agent, url.clone(), &params) => result,
            };
            match result {
                Ok(values) => {
                    return match values.get("access_token").filter(|token| !token.is_empty()) {
                        Some(token) => Ok(PollOutcome::Token(token.clone())),
                        None => Err(FlowError::MissingAccessToken),
                    };
                }
                Err(err) => {
                    if let Some(oauth) = err.oauth() {
                        match oauth.code.as_str() {
                            "authorization_pending" => continue,
                            "slow_down" => {
                                if let Some(interval) = oauth.interval {
                                    tracing::debug!(?interval, "server requested slower polling");
                                    period = interval;
                                }
                                continue;
                            }
                            "expired_token" => return Ok(PollOutcome::Expired),
                            _ => {}
                        }
                    }
                    return Err(FlowError::AccessToken(err));
                }
            }
        }
    }

    fn endpoint(&self, path: &str) -> Url {
        let mut url = self.host.clone();
        let joined = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined);
        url
    }
}

/// Terminal transition of one inner poll loop.
enum PollOutcome {
    /// The user authorized the application.
    Token(String),
    /// The device code expired (server said so, or the local deadline hit)
    /// without the caller's token firing. Triggers re-acquisition.
    Expired,
    /// The caller's token fired.
    Cancelled,
}

/// Payload of `/login/device/code`, with degenerate numeric fields replaced
/// by protocol defaults.
#[derive(Debug, Clone)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    expires_in: Duration,
    interval: Duration,
}

impl DeviceCodeResponse {
    fn from_values(mut values: FormValues) -> Self {
        let expires_in = exchange::parse_seconds(values.get("expires_in").map(String::as_str))
            .unwrap_or(DEFAULT_EXPIRY);
        let interval = exchange::parse_seconds(values.get("interval").map(String::as_str))
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        Self {
            device_code: values.remove("device_code").unwrap_or_default(),
            user_code: values.remove("user_code").unwrap_or_default(),
            verification_url: values.remove("verification_uri").unwrap_or_default(),
            expires_in,
            interval,
        }
    }
}
