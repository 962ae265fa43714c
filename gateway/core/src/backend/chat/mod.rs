//! Chat Web Session Backend
//!
//! A [`ChatAgent`] drives one logged-in chat web account. Messages are posted
//! over REST, but replies arrive asynchronously over a websocket side channel
//! (see [`stream`]) and are handed to the waiting request through a one-item
//! delivery slot (see [`delivery`]).
//!
//! # Session states
//!
//! ```text
//!                 refresh ok
//! Unauthenticated ──────────> Idle ──post──> AwaitingReply
//!        ^                     ^  <──reply/timeout──┘
//!        └──── 4xx rejection ──┘
//!
//! any ──close()──> Closed
//! ```
//!
//! All traffic through one agent is serialized by an exclusive lock, so at
//! most one exchange is outstanding per account.

pub mod conversation;
pub mod credentials;
pub mod delivery;
pub mod headers;
pub mod refresher;
pub mod stream;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::Url;
use uuid::Uuid;

use self::conversation::Conversation;
use self::credentials::{merge_cookies, AccessToken, CredentialStore, StoredCookie, CSRF_COOKIE};
use self::delivery::{DeliveryInbox, DeliverySender};
use self::headers::BrowserProfile;
use self::refresher::{RefreshedSession, SessionRefresher};
use self::stream::Delivery;
use super::retry::retry_with_reauth;
use super::traits::{Service, TranslationBackend};
use super::read_json;
use crate::codec;
use crate::config::{AccountConfig, ChatConfig, TranslationConfig};
use crate::error::AskError;

/// Where an agent is in its session lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No usable bearer token
    Unauthenticated,
    /// Authenticated, no exchange outstanding
    Idle,
    /// Authenticated, waiting for a reply on the side channel
    AwaitingReply,
    /// Shut down; no further exchanges
    Closed,
}

/// One chat web account
pub struct ChatAgent {
    account: AccountConfig,
    base_url: Url,
    model: String,
    timezone_offset_min: i32,
    reply_timeout: Duration,
    reconnect_backoff: Duration,
    heartbeat: Duration,
    delete_on_shutdown: bool,
    system_prompt: String,
    target_language: String,
    profile: BrowserProfile,
    http_client: reqwest::Client,
    jar: Arc<Jar>,
    store: CredentialStore,
    refresher: Arc<dyn SessionRefresher>,
    access_token: RwLock<Option<AccessToken>>,
    cookies: Mutex<Vec<StoredCookie>>,
    conversation: Mutex<Conversation>,
    state: Mutex<SessionState>,
    wss_url: Mutex<Option<String>>,
    websocket_request_id: String,
    /// Serializes exchanges through this agent
    exclusive: tokio::sync::Mutex<()>,
    /// Serializes session refreshes
    refreshing: tokio::sync::Mutex<()>,
    /// Bumped every time new credentials are installed
    generation: AtomicU64,
    delivery: DeliverySender,
    inbox: DeliveryInbox,
}

impl std::fmt::Debug for ChatAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAgent")
            .field("email", &self.account.email)
            .field("state", &self.state())
            .field("conversation_id", &self.conversation_id())
            .finish_non_exhaustive()
    }
}

impl ChatAgent {
    /// Create an agent and load its persisted credentials
    ///
    /// Missing, expired or unreadable credentials are logged and leave the
    /// agent unauthenticated; the first exchange then runs the refresher.
    ///
    /// # Errors
    ///
    /// Fails on an invalid base URL or proxy, or if the HTTP client cannot be
    /// built.
    pub async fn open(
        account: AccountConfig,
        chat: &ChatConfig,
        translation: &TranslationConfig,
        store: CredentialStore,
        refresher: Arc<dyn SessionRefresher>,
    ) -> anyhow::Result<Self> {
        let base_url = Url::parse(chat.base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid chat base_url {}", chat.base_url))?;

        let jar = Arc::new(Jar::default());
        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(chat.request_timeout());
        if let Some(proxy) = chat.proxy.as_deref() {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid chat proxy")?);
        }
        let http_client = builder.build().context("failed to build chat HTTP client")?;

        let (delivery, inbox) = delivery::slot(&account.email);
        let agent = Self {
            base_url,
            model: chat.model.clone(),
            timezone_offset_min: chat.timezone_offset_min,
            reply_timeout: chat.reply_timeout(),
            reconnect_backoff: chat.reconnect_backoff(),
            heartbeat: chat.heartbeat(),
            delete_on_shutdown: chat.delete_conversation_on_shutdown,
            system_prompt: translation.system_prompt.clone(),
            target_language: translation.target_language.clone(),
            profile: BrowserProfile {
                origin: chat.base_url.trim_end_matches('/').to_string(),
                user_agent: chat.user_agent.clone(),
                sec_ch_ua: chat.sec_ch_ua.clone(),
            },
            http_client,
            jar,
            store,
            refresher,
            access_token: RwLock::new(None),
            cookies: Mutex::new(Vec::new()),
            conversation: Mutex::new(Conversation::new()),
            state: Mutex::new(SessionState::Unauthenticated),
            wss_url: Mutex::new(None),
            websocket_request_id: Uuid::new_v4().to_string(),
            exclusive: tokio::sync::Mutex::new(()),
            refreshing: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            delivery,
            inbox,
            account,
        };
        agent.load_persisted().await;
        Ok(agent)
    }

    async fn load_persisted(&self) {
        let email = self.account.email.as_str();

        match self.store.load_cookies(email).await {
            Ok(cookies) if cookies.is_empty() => {
                tracing::warn!(service = "chat", source = %email, dir = %self.store.dir().display(), "No cookies");
            }
            Ok(cookies) => self.replace_cookies(cookies),
            Err(e) => tracing::warn!(service = "chat", source = %email, error = %e, "Ignoring persisted cookies"),
        }

        match self.store.load_token(email).await {
            Ok(Some(token)) if token.is_valid_at(Utc::now()) => {
                *self.access_token.write() = Some(token);
                self.set_state(SessionState::Idle);
            }
            Ok(Some(_)) => {
                tracing::warn!(service = "chat", source = %email, "Access token expired");
            }
            Ok(None) => {
                tracing::warn!(service = "chat", source = %email, dir = %self.store.dir().display(), "No access token");
            }
            Err(e) => tracing::warn!(service = "chat", source = %email, error = %e, "Ignoring persisted access token"),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Account email
    #[must_use]
    pub fn email(&self) -> &str {
        &self.account.email
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Remote conversation id, once the first exchange succeeded
    #[must_use]
    pub fn conversation_id(&self) -> Option<String> {
        self.conversation.lock().id().map(str::to_string)
    }

    /// Last registered websocket URL
    #[must_use]
    pub fn wss_url(&self) -> Option<String> {
        self.wss_url.lock().clone()
    }

    /// Snapshot of the cookie set that would be persisted
    #[must_use]
    pub fn cookies(&self) -> Vec<StoredCookie> {
        self.cookies.lock().clone()
    }

    pub(crate) fn reconnect_backoff(&self) -> Duration {
        self.reconnect_backoff
    }

    pub(crate) fn heartbeat(&self) -> Duration {
        self.heartbeat
    }

    pub(crate) fn websocket_headers(&self) -> HeaderMap {
        self.profile.websocket(self.conversation.lock().id())
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != SessionState::Closed {
            *current = state;
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    fn auth_error(&self, message: impl Into<String>) -> AskError {
        AskError::Authentication {
            source_id: self.account.email.clone(),
            message: message.into(),
        }
    }

    fn valid_token(&self) -> Option<String> {
        self.access_token
            .read()
            .as_ref()
            .filter(|t| t.is_valid_at(Utc::now()))
            .map(|t| t.access_token.clone())
    }

    fn bearer(&self) -> Result<String, AskError> {
        self.access_token
            .read()
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| self.auth_error("no access token"))
    }

    async fn ensure_authenticated(&self) -> Result<String, AskError> {
        if let Some(token) = self.valid_token() {
            return Ok(token);
        }
        {
            let _refreshing = self.refreshing.lock().await;
            // Another caller may have refreshed while this one waited
            if self.valid_token().is_none() {
                self.run_refresher().await?;
            }
        }
        self.valid_token()
            .ok_or_else(|| self.auth_error("refresher returned an expired token"))
    }

    /// Mint new credentials through the session refresher
    ///
    /// The refresher blocks, so it runs on the blocking pool while this call
    /// waits. New credentials are installed and persisted. Concurrent calls
    /// queue up behind each other.
    ///
    /// # Errors
    ///
    /// [`AskError::Authentication`] when the refresher fails.
    pub async fn refresh_session(&self) -> Result<(), AskError> {
        let _refreshing = self.refreshing.lock().await;
        self.run_refresher().await
    }

    /// Re-authentication hook for a rejected call
    ///
    /// Skips the refresher when credentials changed since `seen`, since the
    /// rejection then came from a token that is already replaced.
    async fn reauthenticate(&self, seen: u64) -> Result<(), AskError> {
        let _refreshing = self.refreshing.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            tracing::info!(service = "chat", source = %self.account.email, "Credentials already renewed");
            return Ok(());
        }
        self.run_refresher().await
    }

    async fn run_refresher(&self) -> Result<(), AskError> {
        self.set_state(SessionState::Unauthenticated);
        tracing::warn!(service = "chat", source = %self.account.email, "Will use session refresher to update credentials");

        let refresher = Arc::clone(&self.refresher);
        let account = self.account.clone();
        let refreshed = tokio::task::spawn_blocking(move || refresher.refresh(&account))
            .await
            .map_err(|e| self.auth_error(format!("refresher task failed: {e}")))?
            .map_err(|e| {
                tracing::error!(service = "chat", source = %self.account.email, error = %e, "Session refresh failed");
                self.auth_error(e.to_string())
            })?;

        self.install(refreshed).await;
        Ok(())
    }

    async fn install(&self, refreshed: RefreshedSession) {
        let email = self.account.email.as_str();
        *self.access_token.write() = Some(refreshed.access_token.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.replace_cookies(refreshed.cookies);
        self.set_state(SessionState::Idle);

        if let Err(e) = self.store.save_token(email, &refreshed.access_token).await {
            tracing::error!(service = "chat", source = %email, error = %e, "Saving access token failed");
        }
        self.persist_cookies().await;
    }

    async fn persist_cookies(&self) {
        let cookies = self.cookies();
        if let Err(e) = self.store.save_cookies(&self.account.email, &cookies).await {
            tracing::error!(service = "chat", source = %self.account.email, error = %e, "Saving cookies failed");
        }
    }

    /// Replace the cookie set and replay it into the HTTP session
    fn replace_cookies(&self, cookies: Vec<StoredCookie>) {
        for c in cookies.iter().filter(|c| c.name != CSRF_COOKIE) {
            let path = if c.path.is_empty() { "/" } else { c.path.as_str() };
            self.jar
                .add_cookie_str(&format!("{}={}; Path={}", c.name, c.value, path), &self.base_url);
        }
        *self.cookies.lock() = cookies;
    }

    /// Track cookies the backend set on a response
    fn absorb_cookies(&self, resp: &reqwest::Response) {
        let host = self.base_url.host_str().unwrap_or_default();
        let updates: Vec<StoredCookie> = resp
            .cookies()
            .map(|c| StoredCookie {
                name: c.name().to_string(),
                value: c.value().to_string(),
                domain: c.domain().unwrap_or(host).to_string(),
                path: c.path().unwrap_or("/").to_string(),
            })
            .collect();
        if !updates.is_empty() {
            merge_cookies(&mut self.cookies.lock(), updates);
        }
    }

    // =========================================================================
    // REST calls
    // =========================================================================

    /// Register the side channel and remember its URL
    ///
    /// # Errors
    ///
    /// Any [`AskError`] left after the re-authentication and server-error
    /// retries.
    pub async fn register_websocket(&self) -> Result<String, AskError> {
        self.ensure_authenticated().await?;
        let seen = self.generation.load(Ordering::Acquire);
        let url = retry_with_reauth(
            Service::ChatWeb,
            &self.account.email,
            move || self.register_once(),
            move || self.reauthenticate(seen),
        )
        .await?;
        *self.wss_url.lock() = Some(url.clone());
        Ok(url)
    }

    async fn register_once(&self) -> Result<String, AskError> {
        let token = self.bearer()?;
        let resp = self
            .http_client
            .post(self.endpoint("/backend-api/register-websocket"))
            .headers(self.profile.general(&token))
            .send()
            .await
            .map_err(|e| AskError::from_reqwest(&self.account.email, &e))?;
        self.absorb_cookies(&resp);

        let json = read_json(Service::ChatWeb, &self.account.email, resp).await?;
        tracing::debug!(service = "chat", source = %self.account.email, response = %json, "Response success");
        json["wss_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AskError::decode(&self.account.email, "missing wss_url"))
    }

    /// Post one prompt and wait for its reply
    async fn ask_web_chat(&self, prompt: &str) -> Result<String, AskError> {
        let _exclusive = self.exclusive.lock().await;
        if self.state() == SessionState::Closed {
            return Err(AskError::Transport {
                source_id: self.account.email.clone(),
                message: "agent is closed".to_string(),
            });
        }

        self.ensure_authenticated().await?;
        let seen = self.generation.load(Ordering::Acquire);
        retry_with_reauth(
            Service::ChatWeb,
            &self.account.email,
            move || self.complete_conversation(prompt),
            move || self.reauthenticate(seen),
        )
        .await
    }

    async fn complete_conversation(&self, prompt: &str) -> Result<String, AskError> {
        let email = self.account.email.as_str();
        self.inbox.discard_stale().await;

        let token = self.bearer()?;
        let (payload, conversation_id) = {
            let conversation = self.conversation.lock();
            (
                conversation.next_message(
                    prompt,
                    &self.model,
                    self.timezone_offset_min,
                    &self.websocket_request_id,
                ),
                conversation.id().map(str::to_string),
            )
        };

        let resp = self
            .http_client
            .post(self.endpoint("/backend-api/conversation"))
            .headers(self.profile.conversation(&token, conversation_id.as_deref()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AskError::from_reqwest(email, &e))?;
        self.absorb_cookies(&resp);

        let json = read_json(Service::ChatWeb, email, resp).await?;
        tracing::debug!(service = "chat", source = %email, response = %json, "Response success");

        if conversation_id.is_none() {
            let id = json["conversation_id"]
                .as_str()
                .ok_or_else(|| AskError::decode(email, "missing conversation_id"))?;
            if self.conversation.lock().bootstrap(id) {
                tracing::info!(service = "chat", source = %email, conversation_id = %id, "Conversation created");
            }
        }

        self.set_state(SessionState::AwaitingReply);
        let reply = self.inbox.wait(self.reply_timeout).await;
        self.set_state(SessionState::Idle);

        match reply {
            Some(text) => {
                tracing::info!(service = "chat", source = %email, text = %text, "Translated text");
                Ok(text)
            }
            None => {
                tracing::error!(service = "chat", source = %email, job = "delivery", "TimeOutError");
                Err(AskError::Timeout {
                    source_id: email.to_string(),
                    job: "delivery",
                })
            }
        }
    }

    async fn delete_once(&self, conversation_id: &str) -> Result<bool, AskError> {
        let token = self.bearer()?;
        let resp = self
            .http_client
            .patch(self.endpoint(&format!("/backend-api/conversation/{conversation_id}")))
            .headers(self.profile.delete_conversation(&token, conversation_id))
            .json(&serde_json::json!({"is_visible": false}))
            .send()
            .await
            .map_err(|e| AskError::from_reqwest(&self.account.email, &e))?;
        let json = read_json(Service::ChatWeb, &self.account.email, resp).await?;
        Ok(json["success"].as_bool().unwrap_or(false))
    }

    /// Hand a side-channel reply to the waiting request
    pub(crate) fn deliver(&self, delivery: Delivery) {
        self.conversation.lock().advance(&delivery.message_id);
        tracing::debug!(service = "chat", source = %self.account.email, message_id = %delivery.message_id, "Fetch success");
        self.delivery.offer(delivery.text);
    }

    /// Persist cookies and optionally hide the remote conversation
    ///
    /// Waits for any exchange in flight. Failures are logged; the agent ends
    /// up [`SessionState::Closed`] either way.
    pub async fn close(&self) {
        let _exclusive = self.exclusive.lock().await;
        let email = self.account.email.as_str();

        if let Some(id) = self.conversation_id() {
            self.persist_cookies().await;

            if self.delete_on_shutdown {
                let id = id.as_str();
                let seen = self.generation.load(Ordering::Acquire);
                match retry_with_reauth(
                    Service::ChatWeb,
                    email,
                    move || self.delete_once(id),
                    move || self.reauthenticate(seen),
                )
                .await
                {
                    Ok(true) => tracing::info!(service = "chat", source = %email, conversation_id = %id, "Deleted conversation"),
                    Ok(false) => tracing::warn!(service = "chat", source = %email, conversation_id = %id, "Backend refused to delete conversation"),
                    Err(e) => tracing::error!(service = "chat", source = %email, error = %e, "Deleting conversation failed"),
                }
            }
        }

        *self.state.lock() = SessionState::Closed;
    }
}

#[async_trait]
impl TranslationBackend for ChatAgent {
    fn service(&self) -> Service {
        Service::ChatWeb
    }

    fn source_id(&self) -> &str {
        &self.account.email
    }

    async fn ask(&self, paragraphs: &[String]) -> Result<Vec<String>, AskError> {
        let prompt = codec::chat_prompt(paragraphs, &self.system_prompt, &self.target_language);
        tracing::info!(service = "chat", source = %self.account.email, prompt = %prompt, "Prompt");

        let raw = self.ask_web_chat(&prompt).await?;
        let translated = codec::decode(&raw, paragraphs.len(), &self.account.email)?;
        tracing::debug!(service = "chat", source = %self.account.email, paragraphs = ?translated, "Translated text");
        Ok(translated)
    }
}

#[cfg(test)]
mod tests {
    use super::refresher::UnavailableRefresher;
    use super::*;
    use tempfile::TempDir;

    fn account() -> AccountConfig {
        AccountConfig {
            email: "a@example.com".into(),
            password: String::new(),
            enabled: true,
        }
    }

    async fn open(dir: &TempDir) -> ChatAgent {
        ChatAgent::open(
            account(),
            &ChatConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..ChatConfig::default()
            },
            &TranslationConfig::default(),
            CredentialStore::new(dir.path()),
            Arc::new(UnavailableRefresher),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_starts_unauthenticated_without_credentials() {
        let dir = TempDir::new().unwrap();
        let agent = open(&dir).await;
        assert_eq!(agent.state(), SessionState::Unauthenticated);
        assert_eq!(agent.conversation_id(), None);
        assert!(agent.cookies().is_empty());
    }

    #[tokio::test]
    async fn test_starts_idle_with_valid_token() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        store
            .save_token(
                "a@example.com",
                &AccessToken {
                    access_token: "tok".into(),
                    expires: Utc::now() + chrono::Duration::hours(1),
                },
            )
            .await
            .unwrap();

        let agent = open(&dir).await;
        assert_eq!(agent.state(), SessionState::Idle);
        assert_eq!(agent.valid_token().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_failed_refresh_is_authentication_error() {
        let dir = TempDir::new().unwrap();
        let agent = open(&dir).await;

        let err = agent.ask(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, AskError::Authentication { .. }));
        assert_eq!(agent.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_closed_agent_refuses_work() {
        let dir = TempDir::new().unwrap();
        let agent = open(&dir).await;
        agent.close().await;
        assert_eq!(agent.state(), SessionState::Closed);

        let err = agent.ask(&["hello".to_string()]).await.unwrap_err();
        assert!(matches!(err, AskError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_delivery_advances_chain_pointer() {
        let dir = TempDir::new().unwrap();
        let agent = open(&dir).await;
        agent.deliver(Delivery {
            message_id: "m-42".into(),
            text: "hallo".into(),
        });
        assert_eq!(agent.conversation.lock().current_node(), "m-42");
        assert_eq!(
            agent.inbox.wait(Duration::from_millis(10)).await.as_deref(),
            Some("hallo")
        );
    }
}
