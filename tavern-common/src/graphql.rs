//! GraphQL client for campaign and session records
//!
//! Talks to the AppSync endpoint with either a user's access token
//! (uploader) or an API key (server-side public reads).

use crate::models::{Campaign, NewSession, Session, SessionUpdate};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Error types AppSync reports when a `_version` check fails
const CONFLICT_ERROR_TYPES: &[&str] = &[
    "ConflictUnhandled",
    "DynamoDB:ConditionalCheckFailedException",
    "ConditionalCheckFailedException",
];

const SESSION_FIELDS: &str = "id name date duration audioFile transcriptionFile \
     transcriptionStatus campaignSessionsId _version";

const CAMPAIGN_FIELDS: &str = "id name description owner createdAt";

/// Source of the current access token
///
/// Implemented by the uploader's refreshing token handle so that every
/// request picks up the latest token without global state.
pub trait AccessToken: Send + Sync {
    fn current(&self) -> Option<String>;
}

impl AccessToken for String {
    fn current(&self) -> Option<String> {
        Some(self.clone())
    }
}

/// How requests authenticate against the endpoint
#[derive(Clone)]
pub enum GraphQlAuth {
    /// `x-api-key` header
    ApiKey(String),
    /// `Authorization` header carrying a Cognito JWT
    Token(Arc<dyn AccessToken>),
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlError {
    message: String,
    #[serde(default)]
    error_type: Option<String>,
}

impl GraphQlError {
    fn is_conflict(&self) -> bool {
        self.error_type
            .as_deref()
            .map(|t| CONFLICT_ERROR_TYPES.contains(&t))
            .unwrap_or(false)
    }

    fn is_unauthorized(&self) -> bool {
        matches!(
            self.error_type.as_deref(),
            Some("Unauthorized") | Some("UnauthorizedException")
        )
    }
}

/// Thin client over the GraphQL HTTP endpoint
#[derive(Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    auth: GraphQlAuth,
}

impl GraphQlClient {
    pub fn new(endpoint: impl Into<String>, auth: GraphQlAuth) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            auth,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Run a query or mutation and return its `data` object.
    ///
    /// `subject` names the record for conflict errors.
    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        subject: &str,
        expected_version: Option<i64>,
    ) -> Result<T> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }));

        request = match &self.auth {
            GraphQlAuth::ApiKey(key) => request.header("x-api-key", key),
            GraphQlAuth::Token(source) => {
                let token = source
                    .current()
                    .ok_or_else(|| Error::Unauthorized("No access token available".to_string()))?;
                request.header(reqwest::header::AUTHORIZATION, token)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!(
                "GraphQL endpoint returned {}",
                status
            )));
        }
        let response = response.error_for_status()?;
        let body: GraphQlResponse<T> = response.json().await?;

        if let Some(first) = body.errors.first() {
            if body.errors.iter().any(GraphQlError::is_conflict) {
                return Err(Error::Conflict {
                    id: subject.to_string(),
                    expected: expected_version.unwrap_or_default(),
                });
            }
            if body.errors.iter().any(GraphQlError::is_unauthorized) {
                return Err(Error::Unauthorized(first.message.clone()));
            }
            let messages: Vec<&str> = body.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(Error::GraphQl(messages.join("; ")));
        }

        body.data
            .ok_or_else(|| Error::GraphQl("Response contained no data".to_string()))
    }

    /// Create a session record with empty file fields and `NOTSTARTED` status
    pub async fn create_session(&self, session: NewSession) -> Result<Session> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            create_session: Session,
        }

        let query = format!(
            "mutation CreateSession($input: CreateSessionInput!) {{ createSession(input: $input) {{ {} }} }}",
            SESSION_FIELDS
        );
        let data: Data = self
            .execute(&query, json!({ "input": session.into_input() }), "new session", None)
            .await?;
        Ok(data.create_session)
    }

    /// Apply a check-and-set update; fails with [`Error::Conflict`] on a stale version
    pub async fn update_session(&self, update: &SessionUpdate) -> Result<Session> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            update_session: Session,
        }

        let query = format!(
            "mutation UpdateSession($input: UpdateSessionInput!) {{ updateSession(input: $input) {{ {} }} }}",
            SESSION_FIELDS
        );
        let data: Data = self
            .execute(
                &query,
                json!({ "input": update.into_input() }),
                &update.id,
                Some(update.expected_version),
            )
            .await?;
        Ok(data.update_session)
    }

    /// Fetch one session, `None` if it does not exist
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            get_session: Option<Session>,
        }

        let query = format!(
            "query GetSession($id: ID!) {{ getSession(id: $id) {{ {} }} }}",
            SESSION_FIELDS
        );
        let data: Data = self.execute(&query, json!({ "id": id }), id, None).await?;
        Ok(data.get_session)
    }

    /// List every campaign visible to the caller, following pagination tokens
    pub async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Page {
            items: Vec<Campaign>,
            next_token: Option<String>,
        }

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            list_campaigns: Page,
        }

        let query = format!(
            "query ListCampaigns($nextToken: String) {{ listCampaigns(nextToken: $nextToken) {{ items {{ {} }} nextToken }} }}",
            CAMPAIGN_FIELDS
        );

        let mut campaigns = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let data: Data = self
                .execute(&query, json!({ "nextToken": next_token }), "campaigns", None)
                .await?;
            campaigns.extend(data.list_campaigns.items);
            next_token = data.list_campaigns.next_token;
            if next_token.is_none() {
                break;
            }
        }

        Ok(campaigns)
    }
}
