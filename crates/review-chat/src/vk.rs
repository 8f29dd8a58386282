//! VK (`vk.base_url`/`vk.token`, §6) chat adapter.
//!
//! No crate in the retrieved corpus wraps VK's Bots Long Poll API, so this
//! talks to it directly over `reqwest` — the same HTTP client
//! `dashflow-slack` and `dashflow-gitlab` already depend on — rather than
//! inventing a vendor crate. See DESIGN.md.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::{ChatClient, InboundMessage, LongPoller};

const API_VERSION: &str = "5.199";

pub struct VkChatClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    poll: Mutex<Option<PollSession>>,
}

struct PollSession {
    server: String,
    key: String,
    ts: String,
}

impl VkChatClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), token: token.into(), poll: Mutex::new(None) }
    }

    async fn call(&self, method: &str, params: &[(&str, String)]) -> Result<serde_json::Value> {
        let mut request = self
            .http
            .get(format!("{}/method/{method}", self.base_url.trim_end_matches('/')))
            .query(&[("access_token", self.token.as_str()), ("v", API_VERSION)]);
        for (key, value) in params {
            request = request.query(&[(*key, value.as_str())]);
        }
        let body: serde_json::Value = request.send().await?.json().await?;
        if let Some(error) = body.get("error") {
            return Err(Error::Api(error.to_string()));
        }
        body.get("response").cloned().ok_or_else(|| Error::Api("missing response field".into()))
    }

    async fn establish_long_poll(&self) -> Result<PollSession> {
        #[derive(Deserialize)]
        struct LongPollServer {
            key: String,
            server: String,
            ts: String,
        }
        let response = self.call("groups.getLongPollServer", &[]).await?;
        let server: LongPollServer = serde_json::from_value(response).map_err(|e| Error::Api(e.to_string()))?;
        Ok(PollSession { server: server.server, key: server.key, ts: server.ts })
    }

    async fn user_name(&self, user_id: i64) -> Result<(String, String)> {
        #[derive(Deserialize)]
        struct VkUser {
            first_name: String,
            last_name: String,
        }
        let response = self.call("users.get", &[("user_ids", user_id.to_string())]).await?;
        let users: Vec<VkUser> = serde_json::from_value(response).unwrap_or_default();
        Ok(users.into_iter().next().map_or_else(|| (String::new(), String::new()), |u| (u.first_name, u.last_name)))
    }
}

#[async_trait]
impl ChatClient for VkChatClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.call(
            "messages.send",
            &[("peer_id", chat_id.to_string()), ("message", text.to_string()), ("random_id", "0".to_string())],
        )
        .await?;
        Ok(())
    }

    async fn send_html(&self, chat_id: i64, html: &str) -> Result<()> {
        // VK has no rich-text message format; render tags down to VK's
        // plain-text convention before sending.
        let text = strip_tags(html);
        self.send_text(chat_id, &text).await
    }
}

#[async_trait]
impl LongPoller for VkChatClient {
    async fn poll_once(&self) -> Result<Vec<InboundMessage>> {
        let session = {
            let guard = self.poll.lock().expect("poll session mutex poisoned");
            guard.as_ref().map(|s| PollSession { server: s.server.clone(), key: s.key.clone(), ts: s.ts.clone() })
        };
        let session = match session {
            Some(session) => session,
            None => self.establish_long_poll().await?,
        };

        let response = self
            .http
            .get(&session.server)
            .query(&[("act", "a_check"), ("key", session.key.as_str()), ("ts", session.ts.as_str()), ("wait", "25")])
            .send()
            .await?
            .json::<serde_json::Value>()
            .await?;

        let failed = response.get("failed").and_then(serde_json::Value::as_i64);
        if let Some(code) = failed {
            // codes 2/3 mean the key/ts pair expired; codes 1 just advance ts.
            if code == 2 || code == 3 {
                *self.poll.lock().expect("poll session mutex poisoned") = None;
                return Err(Error::SessionExpired);
            }
        }

        let next_ts = response.get("ts").and_then(serde_json::Value::as_str).map(str::to_string).unwrap_or(session.ts.clone());
        *self.poll.lock().expect("poll session mutex poisoned") =
            Some(PollSession { server: session.server.clone(), key: session.key.clone(), ts: next_ts });

        let mut out = Vec::new();
        if let Some(updates) = response.get("updates").and_then(serde_json::Value::as_array) {
            for update in updates {
                if update.get("type").and_then(serde_json::Value::as_str) != Some("message_new") {
                    continue;
                }
                let Some(message) = update.get("object").and_then(|o| o.get("message")) else { continue };
                let message_id = message.get("id").and_then(serde_json::Value::as_i64).unwrap_or_default();
                let chat_id = message.get("peer_id").and_then(serde_json::Value::as_i64).unwrap_or_default();
                let sender_id = message.get("from_id").and_then(serde_json::Value::as_i64).unwrap_or_default();
                let text = message.get("text").and_then(serde_json::Value::as_str).unwrap_or_default().to_string();
                let timestamp = message
                    .get("date")
                    .and_then(serde_json::Value::as_i64)
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .unwrap_or_else(Utc::now);
                let (first, last) = self.user_name(sender_id).await.unwrap_or_default();
                out.push(InboundMessage {
                    message_id,
                    chat_id,
                    sender_id,
                    sender_first_name: first,
                    sender_last_name: last,
                    text,
                    timestamp,
                });
            }
        }
        Ok(out)
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn strip_tags_removes_simple_markup() {
        assert_eq!(strip_tags("<b>bold</b> and <i>italic</i>"), "bold and italic");
    }

    #[test]
    fn strip_tags_passes_through_plain_text() {
        assert_eq!(strip_tags("no markup here"), "no markup here");
    }

    #[tokio::test]
    async fn send_text_posts_to_messages_send() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/method/messages.send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": 1})))
            .mount(&server)
            .await;

        let client = VkChatClient::new(server.uri(), "test-token");
        client.send_text(42, "hello").await.unwrap();
    }

    #[tokio::test]
    async fn send_text_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/method/messages.send"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": {"error_code": 7, "error_msg": "permission denied"}})))
            .mount(&server)
            .await;

        let client = VkChatClient::new(server.uri(), "test-token");
        let err = client.send_text(42, "hello").await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));
    }

    #[tokio::test]
    async fn poll_once_parses_inbound_message_updates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/method/groups.getLongPollServer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"key": "k", "server": format!("{}/poll", server.uri()), "ts": "1"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/poll"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ts": "2",
                "updates": [{
                    "type": "message_new",
                    "object": {"message": {"id": 1, "peer_id": 100, "from_id": 7, "text": "hi", "date": 1_700_000_000}},
                }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/method/users.get"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": [{"first_name": "A", "last_name": "B"}]})))
            .mount(&server)
            .await;

        let client = VkChatClient::new(server.uri(), "test-token");
        let messages = client.poll_once().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].chat_id, 100);
        assert_eq!(messages[0].sender_id, 7);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(messages[0].sender_first_name, "A");
    }
}
