//! Loopback OAuth redirect SDK.
//!
//! Sends the user to the provider's login page with a `redirect_uri` on
//! 127.0.0.1 and waits for the browser to come back. The redirect carries
//! either a credential (`access_token` or `code`), an `error`, or nothing we
//! recognise. The same redirect can also be pasted by the user and forwarded
//! as a completion envelope; whichever arrives first settles the login.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use passport_types::{CredentialToken, PermissionScope, ProviderKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{IdentitySdk, LoginCallback, LoginResult, SdkError, SdkOutcome};
use crate::bridge::CompletionEnvelope;
use crate::config::ProviderConfig;
use crate::sdk::CredentialCache;

/// OAuth error code a provider returns when the user declines.
const ACCESS_DENIED: &str = "access_denied";
/// Facebook's `error_reason` for a declined dialog.
const USER_DENIED: &str = "user_denied";
const MAX_REQUEST_BYTES: u64 = 8192;
/// How long a browser connection may take to send its request head.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Called with the authorize URL whenever a login starts.
pub type PromptHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct LoopbackOptions {
    pub provider: ProviderKind,
    pub client_id: Option<String>,
    pub authorize_url: String,
    /// 0 lets the OS pick a free port
    pub callback_port: u16,
    pub callback_path: String,
    pub response_type: String,
    pub open_browser: bool,
    pub login_timeout: Option<Duration>,
    pub prompt: Option<PromptHook>,
}

impl LoopbackOptions {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            provider: config.kind,
            client_id: config.client_id.clone(),
            authorize_url: config.authorize_url.clone(),
            callback_port: config.callback_port,
            callback_path: config.callback_path.clone(),
            response_type: config.response_type.clone(),
            open_browser: config.open_browser,
            login_timeout: config.login_timeout(),
            prompt: None,
        }
    }

    /// Whether the provider's redirect carries the credential in the query,
    /// where the listener can read it. Fragment responses (`token`) never
    /// reach the server and only complete through a pasted redirect URL.
    pub fn redirect_reaches_listener(&self) -> bool {
        self.response_type == "code"
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.prompt = Some(Arc::new(prompt));
        self
    }
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self::from_config(&ProviderConfig::default())
    }
}

struct PendingLogin {
    state: String,
    scope: PermissionScope,
    callback: LoginCallback,
    listener: CancellationToken,
}

/// How a settled login should be reported back to the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    LoggedIn,
    Declined,
    Failed,
}

#[derive(Default)]
struct Shared {
    session: Mutex<Option<CredentialToken>>,
    pending: Mutex<Option<PendingLogin>>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<CredentialToken>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Option<PendingLogin>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settles the pending login from redirect parameters.
    ///
    /// Returns None when nothing is pending or the `state` does not match.
    fn settle(&self, params: &HashMap<String, String>) -> Option<Settled> {
        let (pending, outcome) = {
            let mut guard = self.pending();
            let current = guard.as_ref()?;
            if params.get("state").map(String::as_str) != Some(current.state.as_str()) {
                return None;
            }
            let outcome = outcome_from_params(params, &current.scope);
            (guard.take()?, outcome)
        };

        let settled = match &outcome {
            SdkOutcome::Success(_) => Settled::LoggedIn,
            SdkOutcome::Cancel => Settled::Declined,
            SdkOutcome::Error(_) => Settled::Failed,
        };
        self.finish(pending, outcome);
        Some(settled)
    }

    /// Fails the pending login regardless of state, if one is pending.
    fn fail(&self, error: SdkError) -> bool {
        let Some(pending) = self.pending().take() else {
            return false;
        };
        self.finish(pending, SdkOutcome::Error(error));
        true
    }

    fn finish(&self, pending: PendingLogin, outcome: SdkOutcome) {
        pending.listener.cancel();
        if let SdkOutcome::Success(login) = &outcome {
            *self.session() = Some(login.access_token.clone());
        }
        (pending.callback)(outcome);
    }
}

fn outcome_from_params(params: &HashMap<String, String>, scope: &PermissionScope) -> SdkOutcome {
    if let Some(error) = params.get("error") {
        let reason = params.get("error_reason").map(String::as_str);
        if error == ACCESS_DENIED || reason == Some(USER_DENIED) {
            return SdkOutcome::Cancel;
        }
        let message = params
            .get("error_description")
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(error);
        return SdkOutcome::Error(SdkError::new(message.clone()));
    }

    let token = params
        .get("access_token")
        .or_else(|| params.get("code"))
        .filter(|t| !t.trim().is_empty());
    let Some(token) = token else {
        return SdkOutcome::Error(SdkError::new("missing credential in callback"));
    };

    let granted_scope = params
        .get("granted_scopes")
        .map_or_else(|| scope.clone(), |g| g.split(',').collect());
    SdkOutcome::Success(LoginResult {
        access_token: CredentialToken::new(token.clone()),
        granted_scope,
    })
}

fn collect_pairs(params: &mut HashMap<String, String>, encoded: &str) {
    for (key, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
        params.insert(key.into_owned(), value.into_owned());
    }
}

/// Parameters of a redirect URL, including its fragment (implicit flow).
fn url_params(url: &Url) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = url.query() {
        collect_pairs(&mut params, query);
    }
    if let Some(fragment) = url.fragment() {
        collect_pairs(&mut params, fragment);
    }
    params
}

/// Parses a pasted envelope: a full redirect URL, a `/path?query`, a bare
/// query string, or `code#state`.
fn envelope_params(input: &str) -> Option<HashMap<String, String>> {
    let value = input.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(value) {
        return Some(url_params(&url));
    }

    if value.starts_with('/') {
        let url = Url::parse(&format!("http://localhost{value}")).ok()?;
        return Some(url_params(&url));
    }

    if value.contains('=') {
        let mut params = HashMap::new();
        collect_pairs(&mut params, value.trim_start_matches(['?', '#']));
        return Some(params);
    }

    let (code, state) = value.split_once('#')?;
    Some(HashMap::from([
        ("code".to_string(), code.to_string()),
        ("state".to_string(), state.to_string()),
    ]))
}

pub struct LoopbackSdk {
    options: LoopbackOptions,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl LoopbackSdk {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Shared::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Seeds the session from a credential cache.
    #[must_use]
    pub fn with_cache(self, cache: &CredentialCache) -> Self {
        let token = cache.valid_token(self.options.provider);
        if token.is_some() {
            tracing::debug!(provider = %self.options.provider, "seeded session from credential cache");
        }
        *self.shared.session() = token;
        self
    }

    /// Seeds the session with a token directly.
    #[must_use]
    pub fn with_session(self, token: CredentialToken) -> Self {
        *self.shared.session() = Some(token);
        self
    }

    pub fn options(&self) -> &LoopbackOptions {
        &self.options
    }

    pub fn is_login_pending(&self) -> bool {
        self.shared.pending().is_some()
    }

    fn build_authorize_url(
        &self,
        redirect_uri: &str,
        state: &str,
        scope: &PermissionScope,
    ) -> Result<Url, SdkError> {
        let mut url = Url::parse(&self.options.authorize_url).map_err(|e| {
            SdkError::new(format!(
                "invalid authorize url '{}': {e}",
                self.options.authorize_url
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(client_id) = &self.options.client_id {
                query.append_pair("client_id", client_id);
            }
            query
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("state", state)
                .append_pair("response_type", &self.options.response_type);
            if !scope.is_empty() {
                query.append_pair("scope", &scope.join(","));
            }
        }
        Ok(url)
    }

    fn start(&self, state: &str, scope: &PermissionScope, listener: CancellationToken) -> Result<(), SdkError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SdkError::new(format!("no async runtime for login listener: {e}")))?;

        let std_listener = std::net::TcpListener::bind(("127.0.0.1", self.options.callback_port))
            .map_err(|e| {
                SdkError::new(format!(
                    "failed to bind 127.0.0.1:{}: {e}",
                    self.options.callback_port
                ))
            })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| SdkError::new(format!("failed to configure listener: {e}")))?;
        let port = std_listener
            .local_addr()
            .map_err(|e| SdkError::new(format!("failed to read listener address: {e}")))?
            .port();

        let redirect_uri = format!("http://127.0.0.1:{port}{}", self.options.callback_path);
        let authorize_url = self.build_authorize_url(&redirect_uri, state, scope)?;

        let _enter = runtime.enter();
        let tcp = TcpListener::from_std(std_listener)
            .map_err(|e| SdkError::new(format!("failed to register listener: {e}")))?;
        runtime.spawn(serve_callbacks(
            tcp,
            Arc::clone(&self.shared),
            self.options.callback_path.clone(),
            self.options.login_timeout,
            listener,
        ));

        tracing::info!(provider = %self.options.provider, %redirect_uri, "waiting for provider login");
        if !self.options.redirect_reaches_listener() {
            tracing::warn!(
                response_type = %self.options.response_type,
                "redirect will not reach the listener; paste the redirect URL to finish"
            );
        }
        if let Some(prompt) = &self.options.prompt {
            prompt(authorize_url.as_str());
        }
        if self.options.open_browser
            && let Err(err) = open::that_detached(authorize_url.as_str())
        {
            tracing::warn!(error = %err, "failed to open browser");
        }
        Ok(())
    }
}

impl Drop for LoopbackSdk {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl IdentitySdk for LoopbackSdk {
    fn provider_kind(&self) -> ProviderKind {
        self.options.provider
    }

    fn current_access_token(&self) -> Option<CredentialToken> {
        self.shared.session().clone()
    }

    fn begin_login(&self, scope: &PermissionScope, callback: LoginCallback) {
        let state = uuid::Uuid::new_v4().to_string();
        let listener = self.shutdown.child_token();
        {
            let mut pending = self.shared.pending();
            if let Some(previous) = pending.take() {
                tracing::warn!("replacing a login that never completed");
                previous.listener.cancel();
            }
            *pending = Some(PendingLogin {
                state: state.clone(),
                scope: scope.clone(),
                callback,
                listener: listener.clone(),
            });
        }

        if let Err(err) = self.start(&state, scope, listener) {
            self.shared.fail(err);
        }
    }

    fn on_completion(&self, envelope: &CompletionEnvelope) -> bool {
        let Some(params) = envelope_params(envelope.as_str()) else {
            return false;
        };
        self.shared.settle(&params).is_some()
    }
}

async fn serve_callbacks(
    listener: TcpListener,
    shared: Arc<Shared>,
    callback_path: String,
    timeout: Option<Duration>,
    cancel: CancellationToken,
) {
    let deadline = async {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let callback_path: Arc<str> = callback_path.into();

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = &mut deadline => {
                shared.fail(SdkError::new("login timed out"));
                return;
            }
            accepted = listener.accept() => match accepted {
                // Each connection gets its own task so an idle one cannot hold up
                // the listener, the deadline or cancellation.
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(
                        stream,
                        Arc::clone(&shared),
                        Arc::clone(&callback_path),
                        cancel.clone(),
                    ));
                }
                Err(err) => {
                    shared.fail(SdkError::new(format!("login listener failed: {err}")));
                    return;
                }
            },
        }
    }
}

/// Reads the request line, then drains the headers so closing the socket
/// does not reset the response.
async fn read_request_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<String> {
    let mut limited = reader.take(MAX_REQUEST_BYTES);
    let mut request_line = String::new();
    limited.read_line(&mut request_line).await?;

    let mut header = String::new();
    loop {
        header.clear();
        let read = limited.read_line(&mut header).await?;
        if read == 0 || header.trim_end().is_empty() {
            break;
        }
    }
    Ok(request_line)
}

/// Answers one browser request, settling the login if it is the callback.
async fn handle_connection(
    stream: TcpStream,
    shared: Arc<Shared>,
    callback_path: Arc<str>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stream);
    let read = tokio::select! {
        () = cancel.cancelled() => return,
        read = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request_line(&mut reader)) => read,
    };
    let request_line = match read {
        Ok(Ok(line)) => line,
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "failed to read callback request");
            return;
        }
        Err(_) => {
            tracing::debug!("callback request timed out");
            return;
        }
    };

    let url = request_line
        .split_whitespace()
        .nth(1)
        .and_then(|path| Url::parse(&format!("http://localhost{path}")).ok());

    let response = match url {
        Some(url) if url.path() == &*callback_path => match shared.settle(&url_params(&url)) {
            Some(settled) => callback_response(settled),
            None => html_response("400 Bad Request", "Unknown login", "This login request is not pending. Return to the terminal."),
        },
        _ => html_response("404 Not Found", "Not found", ""),
    };

    let stream = reader.get_mut();
    if let Err(err) = stream.write_all(response.as_bytes()).await {
        tracing::debug!(error = %err, "failed to answer callback request");
    }
    let _ = stream.shutdown().await;
}

fn callback_response(settled: Settled) -> String {
    match settled {
        Settled::LoggedIn => html_response("200 OK", "Login complete", "You can close this window."),
        Settled::Declined => html_response("200 OK", "Login cancelled", "You can close this window."),
        Settled::Failed => html_response(
            "400 Bad Request",
            "Login failed",
            "Please return to the terminal.",
        ),
    }
}

fn html_response(status: &str, title: &str, body: &str) -> String {
    let body = format!("<html><body><h3>{title}</h3><p>{body}</p></body></html>");
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}
