//! Matrix client-server API implementation of [`Transport`]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deskrelay_shared::{
    event_type, EventId, MessageContent, Page, Profile, ReactionContent, RoomEvent, RoomId, UserId,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use super::{Transport, TransportError, TransportResult};

/// Timeout for homeserver requests (30 seconds)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for thread and timeline listings
const PAGE_SIZE: &str = "50";

/// Client for the Matrix client-server API
pub struct MatrixTransport {
    client: Client,
    base_url: Url,
    access_token: String,
    user_id: UserId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MatrixErrorBody {
    errcode: String,
    error: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    event_id: EventId,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    chunk: Vec<RoomEvent>,
    #[serde(default)]
    next_batch: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinedMembersResponse {
    #[serde(default)]
    joined: HashMap<UserId, Value>,
}

#[derive(Debug, Deserialize)]
struct DisplayNameResponse {
    #[serde(default)]
    displayname: Option<String>,
}

#[derive(Serialize)]
struct Empty {}

impl MatrixTransport {
    /// Create a new transport for the given homeserver
    pub fn new(
        homeserver_url: &str,
        access_token: impl Into<String>,
        user_id: UserId,
    ) -> TransportResult<Self> {
        let base_url = Url::parse(homeserver_url).map_err(|e| TransportError::Url(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(TransportError::Url(format!(
                "{homeserver_url} cannot be used as a base url"
            )));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            access_token: access_token.into(),
            user_id,
        })
    }

    /// Build an endpoint url, percent-encoding each path segment
    fn endpoint(&self, segments: &[&str]) -> TransportResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> TransportResult<T> {
        let response = request.bearer_auth(&self.access_token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: MatrixErrorBody = response.json().await.unwrap_or_default();
            return Err(TransportError::Api {
                status: status.as_u16(),
                errcode: body.errcode,
                message: body.error,
            });
        }
        Ok(response.json().await?)
    }

    async fn send_event<C: Serialize + Sync>(
        &self,
        room: &RoomId,
        kind: &str,
        content: &C,
    ) -> TransportResult<EventId> {
        let txn_id = Uuid::new_v4().to_string();
        let url = self.endpoint(&[
            "_matrix", "client", "v3", "rooms", room.as_str(), "send", kind, txn_id.as_str(),
        ])?;
        let response: SendResponse = self.execute(self.client.put(url).json(content)).await?;
        Ok(response.event_id)
    }

    async fn chunk(&self, mut url: Url, from: Option<&str>) -> TransportResult<ChunkResponse> {
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", PAGE_SIZE);
            if let Some(from) = from {
                query.append_pair("from", from);
            }
        }
        self.execute(self.client.get(url)).await
    }

    fn account_data_url(&self, name: &str) -> TransportResult<Url> {
        self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "user",
            self.user_id.as_str(),
            "account_data",
            name,
        ])
    }
}

#[async_trait]
impl Transport for MatrixTransport {
    fn user_id(&self) -> &UserId {
        &self.user_id
    }

    async fn join(&self, room: &RoomId) -> TransportResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "join", room.as_str()])?;
        let _: Value = self.execute(self.client.post(url).json(&Empty {})).await?;
        Ok(())
    }

    async fn leave(&self, room: &RoomId) -> TransportResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room.as_str(), "leave"])?;
        let _: Value = self.execute(self.client.post(url).json(&Empty {})).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        room: &RoomId,
        content: &MessageContent,
    ) -> TransportResult<EventId> {
        self.send_event(room, event_type::MESSAGE, content).await
    }

    async fn send_reaction(
        &self,
        room: &RoomId,
        target: &EventId,
        key: &str,
    ) -> TransportResult<EventId> {
        let content = ReactionContent::new(target, key);
        self.send_event(room, event_type::REACTION, &content).await
    }

    async fn get_event(&self, room: &RoomId, event: &EventId) -> TransportResult<RoomEvent> {
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room.as_str(),
            "event",
            event.as_str(),
        ])?;
        let mut event: RoomEvent = self.execute(self.client.get(url)).await?;
        if event.room_id.is_empty() {
            event.room_id = room.clone();
        }
        Ok(event)
    }

    async fn decrypt(&self, event: RoomEvent) -> TransportResult<RoomEvent> {
        if event.is_encrypted() {
            return Err(TransportError::Unsupported("end-to-end encrypted events"));
        }
        Ok(event)
    }

    async fn list_threads(
        &self,
        room: &RoomId,
        from: Option<&str>,
    ) -> TransportResult<Page<RoomEvent>> {
        let url = self.endpoint(&["_matrix", "client", "v1", "rooms", room.as_str(), "threads"])?;
        let response = self.chunk(url, from).await?;
        Ok(Page {
            chunk: response.chunk,
            next: response.next_batch,
        })
    }

    async fn thread_events(
        &self,
        room: &RoomId,
        root: &EventId,
        from: Option<&str>,
    ) -> TransportResult<Page<RoomEvent>> {
        let mut url = self.endpoint(&[
            "_matrix",
            "client",
            "v1",
            "rooms",
            room.as_str(),
            "relations",
            root.as_str(),
            "m.thread",
        ])?;
        url.query_pairs_mut().append_pair("dir", "b");
        let response = self.chunk(url, from).await?;
        Ok(Page {
            chunk: response.chunk,
            next: response.next_batch,
        })
    }

    async fn recent_messages(
        &self,
        room: &RoomId,
        from: Option<&str>,
    ) -> TransportResult<Page<RoomEvent>> {
        let mut url = self.endpoint(&["_matrix", "client", "v3", "rooms", room.as_str(), "messages"])?;
        url.query_pairs_mut().append_pair("dir", "b");
        let response = self.chunk(url, from).await?;
        // An empty chunk means the start of the timeline was reached
        let next = if response.chunk.is_empty() {
            None
        } else {
            response.end
        };
        Ok(Page {
            chunk: response.chunk,
            next,
        })
    }

    async fn joined_members(&self, room: &RoomId) -> TransportResult<Vec<UserId>> {
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "rooms",
            room.as_str(),
            "joined_members",
        ])?;
        let response: JoinedMembersResponse = self.execute(self.client.get(url)).await?;
        Ok(response.joined.into_keys().collect())
    }

    async fn display_name(&self, user: &UserId) -> TransportResult<Option<String>> {
        let url = self.endpoint(&[
            "_matrix",
            "client",
            "v3",
            "profile",
            user.as_str(),
            "displayname",
        ])?;
        match self.execute::<DisplayNameResponse>(self.client.get(url)).await {
            Ok(response) => Ok(response.displayname),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn profile(&self, user: &UserId) -> TransportResult<Profile> {
        let url = self.endpoint(&["_matrix", "client", "v3", "profile", user.as_str()])?;
        self.execute(self.client.get(url)).await
    }

    async fn download(&self, url: &str) -> TransportResult<Vec<u8>> {
        let (server, media_id) = url
            .strip_prefix("mxc://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| TransportError::Url(url.to_string()))?;
        let endpoint = self.endpoint(&["_matrix", "client", "v1", "media", "download", server, media_id])?;

        let response = self
            .client
            .get(endpoint)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Api {
                status: status.as_u16(),
                errcode: String::new(),
                message: "media download failed".to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn account_data(&self, name: &str) -> TransportResult<Option<HashMap<String, String>>> {
        let url = self.account_data_url(name)?;
        match self.execute::<HashMap<String, Value>>(self.client.get(url)).await {
            Ok(record) => Ok(Some(
                record
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect(),
            )),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_account_data(
        &self,
        name: &str,
        data: &HashMap<String, String>,
    ) -> TransportResult<()> {
        let url = self.account_data_url(name)?;
        let _: Value = self.execute(self.client.put(url).json(data)).await?;
        Ok(())
    }
}
