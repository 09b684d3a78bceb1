//! REST client for the chat backend.
//!
//! Every call is bearer-authenticated with the token passed in; the client
//! itself holds no identity. `401` maps to [`ApiError::Unauthorized`] so the
//! auth bridge can clear stale credentials.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use umrah_shared::models::{ChatMessage, ChatRoom, ContentType};
use umrah_shared::types::{ActorId, ConversationId, NotificationId};

use crate::error::ApiError;

/// Profile returned by `GET /user/profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: ActorId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Single role field; older endpoints call it `user_type` or `type`.
    #[serde(default, alias = "user_type", alias = "type")]
    pub role: Option<String>,
    /// Role list as emitted by permission packages (strings or `{name}`).
    #[serde(default, deserialize_with = "role_names")]
    pub roles: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoleEntry {
    Name(String),
    Object { name: String },
}

fn role_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let entries = Option::<Vec<RoleEntry>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(entries
        .into_iter()
        .map(|entry| match entry {
            RoleEntry::Name(name) | RoleEntry::Object { name } => name,
        })
        .collect())
}

/// The backend calls the chat core depends on.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// `POST /broadcasting/auth`; returns the channel signature.
    async fn authorize_channel(
        &self,
        token: &str,
        socket_id: &str,
        channel: &str,
    ) -> Result<String, ApiError>;

    /// `POST /user/online` or `POST /user/offline`.
    async fn set_presence(&self, token: &str, online: bool) -> Result<(), ApiError>;

    async fn unread_count(&self, token: &str) -> Result<u32, ApiError>;
    async fn mark_all_notifications_read(&self, token: &str) -> Result<bool, ApiError>;
    async fn mark_notification_read(&self, token: &str, id: &NotificationId)
        -> Result<bool, ApiError>;
    async fn delete_notification(&self, token: &str, id: &NotificationId)
        -> Result<bool, ApiError>;

    async fn list_chats(&self, token: &str) -> Result<Vec<ChatRoom>, ApiError>;
    async fn list_messages(
        &self,
        token: &str,
        conversation: ConversationId,
    ) -> Result<Vec<ChatMessage>, ApiError>;
    async fn send_message(
        &self,
        token: &str,
        conversation: ConversationId,
        body: &str,
        content_type: ContentType,
    ) -> Result<ChatMessage, ApiError>;
    async fn send_typing(
        &self,
        token: &str,
        conversation: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError>;
    async fn mark_chat_read(&self, token: &str, conversation: ConversationId)
        -> Result<(), ApiError>;

    /// `GET /user/profile`, used to validate a stored token.
    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError>;
}

/// Response bodies come bare or wrapped in one of a few envelope keys.
/// The bare shape is tried first.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Bare(T),
    Data { data: T },
    Message { message: T },
    User { user: T },
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Data { data } => data,
            Self::Message { message } => message,
            Self::User { user } => user,
            Self::Bare(inner) => inner,
        }
    }
}

#[derive(Deserialize)]
struct CountBody {
    #[serde(alias = "unread_count")]
    count: u32,
}

#[derive(Deserialize)]
struct SuccessBody {
    #[serde(default)]
    success: bool,
}

#[derive(Deserialize)]
struct AuthBody {
    auth: String,
}

/// [`ChatBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: &str, client: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, token: &str) -> Result<Response, ApiError> {
        let response = request
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            debug!(status = status.as_u16(), url = %response.url(), "Backend request failed");
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice::<Envelope<T>>(&bytes)
            .map(Envelope::into_inner)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, token: &str) -> Result<T, ApiError> {
        let response = self.send(self.client.get(self.url(path)), token).await?;
        Self::decode(response).await
    }

    async fn post_success(&self, path: &str, token: &str) -> Result<bool, ApiError> {
        let response = self.send(self.client.post(self.url(path)), token).await?;
        let body: SuccessBody = Self::decode(response).await?;
        Ok(body.success)
    }
}

#[async_trait]
impl ChatBackend for ApiClient {
    async fn authorize_channel(
        &self,
        token: &str,
        socket_id: &str,
        channel: &str,
    ) -> Result<String, ApiError> {
        let request = self
            .client
            .post(self.url("broadcasting/auth"))
            .json(&json!({ "socket_id": socket_id, "channel_name": channel }));
        let response = self.send(request, token).await?;
        let body: AuthBody = Self::decode(response).await?;
        Ok(body.auth)
    }

    async fn set_presence(&self, token: &str, online: bool) -> Result<(), ApiError> {
        let path = if online { "user/online" } else { "user/offline" };
        self.send(self.client.post(self.url(path)), token).await?;
        Ok(())
    }

    async fn unread_count(&self, token: &str) -> Result<u32, ApiError> {
        let body: CountBody = self.get("notifications/unread-count", token).await?;
        Ok(body.count)
    }

    async fn mark_all_notifications_read(&self, token: &str) -> Result<bool, ApiError> {
        self.post_success("notifications/mark-all-as-read", token).await
    }

    async fn mark_notification_read(
        &self,
        token: &str,
        id: &NotificationId,
    ) -> Result<bool, ApiError> {
        self.post_success(&format!("notifications/{id}/mark-as-read"), token)
            .await
    }

    async fn delete_notification(
        &self,
        token: &str,
        id: &NotificationId,
    ) -> Result<bool, ApiError> {
        let request = self.client.delete(self.url(&format!("notifications/{id}")));
        let response = self.send(request, token).await?;
        let body: SuccessBody = Self::decode(response).await?;
        Ok(body.success)
    }

    async fn list_chats(&self, token: &str) -> Result<Vec<ChatRoom>, ApiError> {
        self.get("chats", token).await
    }

    async fn list_messages(
        &self,
        token: &str,
        conversation: ConversationId,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        self.get(&format!("chats/{conversation}/messages"), token)
            .await
    }

    async fn send_message(
        &self,
        token: &str,
        conversation: ConversationId,
        body: &str,
        content_type: ContentType,
    ) -> Result<ChatMessage, ApiError> {
        let request = self
            .client
            .post(self.url(&format!("chats/{conversation}/messages")))
            .json(&json!({ "message": body, "type": content_type }));
        let response = self.send(request, token).await?;
        Self::decode(response).await
    }

    async fn send_typing(
        &self,
        token: &str,
        conversation: ConversationId,
        is_typing: bool,
    ) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url(&format!("chats/{conversation}/typing")))
            .json(&json!({ "is_typing": is_typing }));
        self.send(request, token).await?;
        Ok(())
    }

    async fn mark_chat_read(
        &self,
        token: &str,
        conversation: ConversationId,
    ) -> Result<(), ApiError> {
        let request = self
            .client
            .post(self.url(&format!("chats/{conversation}/read")));
        self.send(request, token).await?;
        Ok(())
    }

    async fn fetch_profile(&self, token: &str) -> Result<UserProfile, ApiError> {
        self.get("user/profile", token).await
    }
}
