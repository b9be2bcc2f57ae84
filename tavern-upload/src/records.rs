//! Session and campaign record access
//!
//! The orchestrator and the campaign directory talk to these traits; the
//! GraphQL client implements both.

use async_trait::async_trait;
use tavern_common::graphql::GraphQlClient;
use tavern_common::models::{Campaign, NewSession, Session, SessionUpdate};
use tavern_common::Result;

/// Create, update and fetch session records
#[async_trait]
pub trait SessionRecords: Send + Sync {
    async fn create_session(&self, session: NewSession) -> Result<Session>;

    /// Check-and-set update; [`tavern_common::Error::Conflict`] when the
    /// stored version differs from `update.expected_version`
    async fn update_session(&self, update: &SessionUpdate) -> Result<Session>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;
}

/// Campaigns visible to the signed-in user
#[async_trait]
pub trait CampaignSource: Send + Sync {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>>;
}

#[async_trait]
impl SessionRecords for GraphQlClient {
    async fn create_session(&self, session: NewSession) -> Result<Session> {
        GraphQlClient::create_session(self, session).await
    }

    async fn update_session(&self, update: &SessionUpdate) -> Result<Session> {
        GraphQlClient::update_session(self, update).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        GraphQlClient::get_session(self, id).await
    }
}

#[async_trait]
impl CampaignSource for GraphQlClient {
    async fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        GraphQlClient::list_campaigns(self).await
    }
}
