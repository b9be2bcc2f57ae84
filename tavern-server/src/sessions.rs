//! Read access to session records for the public share page

use async_trait::async_trait;
use tavern_common::graphql::GraphQlClient;
use tavern_common::models::Session;

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    async fn get_session(&self, id: &str) -> tavern_common::Result<Option<Session>>;
}

#[async_trait]
impl SessionDirectory for GraphQlClient {
    async fn get_session(&self, id: &str) -> tavern_common::Result<Option<Session>> {
        GraphQlClient::get_session(self, id).await
    }
}
