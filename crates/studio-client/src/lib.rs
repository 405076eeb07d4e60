//! # Studio Client
//!
//! [`ApiClient`] over HTTP.
//!
//! Entities go through the OData-style endpoints (`/odata/{set}`), folder
//! moves and name checks through the studio endpoints. Non-2xx answers are
//! decoded into [`ApiError`]: a JSON `{message, code}` body keeps its code,
//! anything else becomes a plain server error carrying the body text.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use studio_core::{
    ApiClient, ApiError, ApiResult, Entity, EntityId, ErrorBody, HierarchyMoveRequest,
    HierarchyMoveResponse, ValidateNameRequest,
};

/// Collection answer of the OData endpoints.
#[derive(Debug, Deserialize)]
struct ODataList {
    value: Vec<Entity>,
}

/// HTTP implementation of [`ApiClient`].
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    /// Server root including the app path, always ending with `/`
    base_url: String,
    client: Client,
}

impl HttpApiClient {
    /// Creates a client for the server at `base_url` (e.g. `http://localhost:5488/`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Creates a client reusing an existing connection pool.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url, client }
    }

    /// Returns the server root.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn entity_url(&self, entity_set: &str, id: &EntityId) -> String {
        self.url(&format!("odata/{}({})", entity_set, id))
    }
}

fn transport(error: reqwest::Error) -> ApiError {
    ApiError::Transport(error.to_string())
}

fn decode(error: reqwest::Error) -> ApiError {
    ApiError::Decode(error.to_string())
}

/// Passes successful responses through and turns the rest into errors.
async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.map_err(transport)?;
    let error = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ApiError::from_body(status.as_u16(), body),
        Err(_) => ApiError::Server {
            status: status.as_u16(),
            message: text,
        },
    };

    tracing::debug!("Request failed: {}", error);
    Err(error)
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn load(&self, entity_set: &str, id: &EntityId) -> ApiResult<Entity> {
        let filter = format!("_id eq '{}'", id);
        let response = self
            .client
            .get(self.url(&format!("odata/{}", entity_set)))
            .query(&[("$filter", filter.as_str())])
            .send()
            .await
            .map_err(transport)?;

        let list: ODataList = check(response).await?.json().await.map_err(decode)?;
        let mut entity = list.value.into_iter().next().ok_or_else(|| ApiError::Server {
            status: 404,
            message: format!("{} {} not found", entity_set, id),
        })?;

        if entity.entity_set.is_empty() {
            entity.entity_set = entity_set.to_string();
        }
        Ok(entity)
    }

    async fn save(&self, entity: &Entity) -> ApiResult<Entity> {
        let request = if entity.is_new {
            self.client
                .post(self.url(&format!("odata/{}", entity.entity_set)))
        } else {
            self.client
                .patch(self.entity_url(&entity.entity_set, &entity.id))
        };

        tracing::debug!("Saving {} {}", entity.entity_set, entity.id);
        let response = request
            .json(&entity.to_wire())
            .send()
            .await
            .map_err(transport)?;

        check(response).await?.json().await.map_err(decode)
    }

    async fn remove(&self, entity_set: &str, id: &EntityId) -> ApiResult<()> {
        let response = self
            .client
            .delete(self.entity_url(entity_set, id))
            .send()
            .await
            .map_err(transport)?;

        check(response).await?;
        Ok(())
    }

    async fn hierarchy_move(&self, request: &HierarchyMoveRequest) -> ApiResult<Vec<Entity>> {
        let response = self
            .client
            .post(self.url("studio/hierarchyMove"))
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let body: HierarchyMoveResponse = check(response).await?.json().await.map_err(decode)?;
        Ok(body.items)
    }

    async fn validate_entity_name(&self, name: &str) -> ApiResult<()> {
        let response = self
            .client
            .post(self.url("studio/validate-entity-name"))
            .json(&ValidateNameRequest {
                name: name.to_string(),
            })
            .send()
            .await
            .map_err(transport)?;

        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = HttpApiClient::new("http://localhost:5488/reports");
        assert_eq!(client.base_url(), "http://localhost:5488/reports/");
        assert_eq!(
            client.entity_url("templates", &EntityId::from("5")),
            "http://localhost:5488/reports/odata/templates(5)"
        );
    }
}
