//! Browser-like request headers for the chat web backend

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
    ORIGIN, PRAGMA, REFERER, USER_AGENT,
};

/// Subprotocol the side channel speaks
pub const WS_SUBPROTOCOL: &str = "json.reliable.webpubsub.azure.v1";

/// Identity presented to the backend
#[derive(Clone, Debug)]
pub struct BrowserProfile {
    /// Origin of the chat web application, without trailing slash
    pub origin: String,
    /// `User-Agent` value
    pub user_agent: String,
    /// `Sec-Ch-Ua` value
    pub sec_ch_ua: String,
}

impl BrowserProfile {
    fn referer(&self, conversation_id: Option<&str>) -> Option<String> {
        conversation_id.map(|id| format!("{}/c/{}", self.origin, id))
    }

    fn base(&self, access_token: &str, accept: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, ORIGIN, &self.origin);
        insert(&mut headers, CONTENT_TYPE, "application/json");
        insert(&mut headers, ACCEPT, accept);
        insert(&mut headers, AUTHORIZATION, &format!("Bearer {access_token}"));
        insert(&mut headers, USER_AGENT, &self.user_agent);
        insert(
            &mut headers,
            HeaderName::from_static("sec-ch-ua-platform"),
            "macOS",
        );
        insert(
            &mut headers,
            HeaderName::from_static("sec-ch-ua"),
            &self.sec_ch_ua,
        );
        headers
    }

    /// Headers for registration and other plain JSON calls
    #[must_use]
    pub fn general(&self, access_token: &str) -> HeaderMap {
        self.base(access_token, "*/*")
    }

    /// Headers for posting a message
    #[must_use]
    pub fn conversation(&self, access_token: &str, conversation_id: Option<&str>) -> HeaderMap {
        let mut headers = self.base(access_token, "text/event-stream");
        if let Some(referer) = self.referer(conversation_id) {
            insert(&mut headers, REFERER, &referer);
        }
        headers
    }

    /// Headers for hiding a conversation
    #[must_use]
    pub fn delete_conversation(&self, access_token: &str, conversation_id: &str) -> HeaderMap {
        let mut headers = self.base(access_token, "*/*");
        if let Some(referer) = self.referer(Some(conversation_id)) {
            insert(&mut headers, REFERER, &referer);
        }
        headers
    }

    /// Headers for the websocket handshake
    #[must_use]
    pub fn websocket(&self, conversation_id: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        insert(&mut headers, ORIGIN, &self.origin);
        insert(
            &mut headers,
            HeaderName::from_static("sec-websocket-protocol"),
            WS_SUBPROTOCOL,
        );
        insert(&mut headers, PRAGMA, "no-cache");
        insert(&mut headers, CACHE_CONTROL, "no-cache");
        insert(&mut headers, USER_AGENT, &self.user_agent);
        if let Some(referer) = self.referer(conversation_id) {
            insert(&mut headers, REFERER, &referer);
        }
        headers
    }
}

/// Insert a header, skipping values that are not valid header text
fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!(header = %name, "Skipping invalid header value"),
    }
}
