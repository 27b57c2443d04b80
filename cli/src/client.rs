//! HTTP and WebSocket client for the GRC workflow server

use anyhow::{anyhow, Result};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;
use uuid::Uuid;

use crate::messages::{
    Approval, Approver, AssignApprover, ContentItem, CreateItem, CreateOrganization,
    DecisionBody, ErrorBody, NextStep, Notification, Organization, ServerMessage,
};

const USER_HEADER: &str = "x-user-id";

/// Client acting on behalf of one user
pub struct GrcClient {
    client: Client,
    base_url: Url,
    user_id: Uuid,
}

impl GrcClient {
    pub fn new(base_url: &str, user_id: Uuid) -> Result<Self> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            user_id,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn get(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .client
            .get(self.url(path)?)
            .header(USER_HEADER, self.user_id.to_string()))
    }

    fn post(&self, path: &str) -> Result<RequestBuilder> {
        Ok(self
            .client
            .post(self.url(path)?)
            .header(USER_HEADER, self.user_id.to_string()))
    }

    pub async fn create_organization(&self, name: &str) -> Result<Organization> {
        let request = self.post("organizations")?.json(&CreateOrganization { name });
        send(request).await
    }

    pub async fn add_approver(
        &self,
        org_id: Uuid,
        kind: &str,
        user_id: Uuid,
        rank: i32,
    ) -> Result<Approver> {
        let request = self
            .post(&format!("organizations/{}/approvers", org_id))?
            .json(&AssignApprover {
                kind,
                user_id,
                rank,
            });
        send(request).await
    }

    pub async fn create_item(&self, org_id: Uuid, kind: &str, title: &str) -> Result<ContentItem> {
        let request = self
            .post(&format!("organizations/{}/items", org_id))?
            .json(&CreateItem { kind, title });
        send(request).await
    }

    pub async fn item(&self, org_id: Uuid, item_id: Uuid) -> Result<ContentItem> {
        send(self.get(&format!("organizations/{}/items/{}", org_id, item_id))?).await
    }

    /// Submit an item for approval
    pub async fn submit(&self, org_id: Uuid, item_id: Uuid) -> Result<Approval> {
        send(self.post(&format!(
            "organizations/{}/items/{}/approval",
            org_id, item_id
        ))?)
        .await
    }

    pub async fn decide(
        &self,
        org_id: Uuid,
        approval_id: Uuid,
        decision: &str,
        comments: &str,
    ) -> Result<NextStep> {
        let request = self
            .post(&format!(
                "organizations/{}/approvals/{}/decision",
                org_id, approval_id
            ))?
            .json(&DecisionBody { decision, comments });
        send(request).await
    }

    pub async fn reopen(&self, org_id: Uuid, item_id: Uuid) -> Result<ContentItem> {
        send(self.post(&format!(
            "organizations/{}/items/{}/reopen",
            org_id, item_id
        ))?)
        .await
    }

    pub async fn history(&self, org_id: Uuid, item_id: Uuid) -> Result<Vec<Approval>> {
        send(self.get(&format!(
            "organizations/{}/items/{}/approvals",
            org_id, item_id
        ))?)
        .await
    }

    /// Approvals waiting on this user
    pub async fn inbox(&self, org_id: Uuid) -> Result<Vec<Approval>> {
        send(self.get(&format!(
            "organizations/{}/users/{}/approvals",
            org_id, self.user_id
        ))?)
        .await
    }

    pub async fn notifications(&self, org_id: Uuid) -> Result<Vec<Notification>> {
        send(self.get(&format!(
            "organizations/{}/users/{}/notifications",
            org_id, self.user_id
        ))?)
        .await
    }

    /// Stream workflow events for an organization until `on_event` returns false
    pub async fn watch<F>(&self, org_id: Uuid, mut on_event: F) -> Result<()>
    where
        F: FnMut(ServerMessage) -> bool,
    {
        let mut ws_url = self.url(&format!("organizations/{}/events", org_id))?;
        let scheme = match ws_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        ws_url
            .set_scheme(scheme)
            .map_err(|_| anyhow!("Cannot use {} for WebSocket", ws_url))?;

        tracing::info!("Connecting to {}", ws_url);
        let mut request = ws_url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(USER_HEADER, self.user_id.to_string().parse()?);

        let (ws_stream, _) = connect_async(request).await?;
        let (_write, mut read) = ws_stream.split();

        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        if !on_event(msg) {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse message: {} - {}", e, text);
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => return Err(anyhow!("WebSocket error: {}", e)),
            }
        }

        Ok(())
    }
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    decode(response).await
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        return Err(anyhow!("Server error: {} - {}", status, message));
    }

    Ok(response.json().await?)
}
