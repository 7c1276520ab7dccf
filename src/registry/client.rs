//! Registry tags-list API client
//!
//! Docker Hub requires a short-lived bearer token scoped to the repository
//! before the tags endpoint can be called; every other registry exposes the
//! same `/v2/<repo>/tags/list` shape directly. No retries happen here; that
//! is the orchestrator's call to make.

#[cfg(test)]
use mockall::automock;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::image::ImageReference;
use crate::registry::error::RegistryError;

/// Hub tags/manifest API endpoint.
const DEFAULT_HUB_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Hub token exchange endpoint.
const DEFAULT_HUB_AUTH_URL: &str = "https://auth.docker.io";

/// How much of an error body is carried into [`RegistryError::Http`].
const BODY_SNIPPET_LEN: usize = 200;

/// Response from the tags-list endpoint.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[allow(dead_code)]
    name: Option<String>,
    /// Some registries return `null` instead of an empty array.
    tags: Option<Vec<String>>,
}

/// Response from the Docker Hub token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[allow(dead_code)]
    access_token: Option<String>,
    #[allow(dead_code)]
    expires_in: Option<u64>,
    #[allow(dead_code)]
    issued_at: Option<String>,
}

/// Trait for obtaining the available tags of an image from its registry.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait TagLister: Send + Sync {
    /// Fetches all tags for the image's repository.
    async fn list_tags(&self, image: &ImageReference) -> Result<Vec<String>, RegistryError>;
}

/// HTTP implementation of [`TagLister`] over the registry v2 API.
pub struct RegistryClient {
    client: reqwest::Client,
    hub_registry_url: String,
    hub_auth_url: String,
}

impl RegistryClient {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self::with_endpoints(timeout, DEFAULT_HUB_REGISTRY_URL, DEFAULT_HUB_AUTH_URL)
    }

    /// Overridable endpoints for tests against a local server.
    pub fn with_endpoints(
        timeout: std::time::Duration,
        hub_registry_url: &str,
        hub_auth_url: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("tagwatch")
                .timeout(timeout)
                .build()
                .expect("failed to create HTTP client"),
            hub_registry_url: hub_registry_url.trim_end_matches('/').to_string(),
            hub_auth_url: hub_auth_url.trim_end_matches('/').to_string(),
        }
    }

    /// Probe the Hub registry endpoint. An unauthenticated `/v2/` request
    /// answering 401 is the healthy case.
    pub async fn ping(&self) -> Result<(), RegistryError> {
        let url = format!("{}/v2/", self.hub_registry_url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status.is_success() {
            return Ok(());
        }
        Err(RegistryError::Http {
            status,
            body: body_snippet(response).await,
        })
    }

    async fn hub_token(&self, repository: &str) -> Result<String, RegistryError> {
        let url = format!(
            "{}/token?service=registry.docker.io&scope=repository:{repository}:pull",
            self.hub_auth_url
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::Auth(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = body_snippet(response).await;
            return Err(RegistryError::Auth(format!(
                "token endpoint returned status {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Auth(e.to_string()))?;
        Ok(token.token)
    }

    fn tags_url(&self, image: &ImageReference) -> String {
        if image.is_private_registry() {
            format!("https://{}/v2/{}/tags/list", image.registry, image.repository)
        } else {
            format!("{}/v2/{}/tags/list", self.hub_registry_url, image.repository)
        }
    }
}

#[async_trait::async_trait]
impl TagLister for RegistryClient {
    async fn list_tags(&self, image: &ImageReference) -> Result<Vec<String>, RegistryError> {
        let url = self.tags_url(image);

        let mut request = self.client.get(&url).header("Accept", "application/json");
        if !image.is_private_registry() {
            let token = self.hub_token(&image.repository).await?;
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(
                registry = %image.registry,
                repository = %image.repository,
                %status,
                "tags endpoint returned error status"
            );
            return Err(RegistryError::Http {
                status,
                body: body_snippet(response).await,
            });
        }

        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))?;
        let tags = body.tags.unwrap_or_default();

        debug!(
            registry = %image.registry,
            repository = %image.repository,
            count = tags.len(),
            "fetched tags"
        );
        Ok(tags)
    }
}

async fn body_snippet(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::time::Duration;

    fn test_client(server: &Server) -> RegistryClient {
        RegistryClient::with_endpoints(Duration::from_secs(5), &server.url(), &server.url())
    }

    fn hub_image(raw: &str) -> ImageReference {
        ImageReference::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn list_tags_exchanges_token_then_fetches_tags() {
        let mut server = Server::new_async().await;

        let token_mock = server
            .mock(
                "GET",
                "/token?service=registry.docker.io&scope=repository:library/nginx:pull",
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"token":"abc","access_token":"abc","expires_in":300,"issued_at":"2026-01-01T00:00:00Z"}"#)
            .create_async()
            .await;

        let tags_mock = server
            .mock("GET", "/v2/library/nginx/tags/list")
            .match_header("authorization", "Bearer abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"name":"library/nginx","tags":["1.25.0","1.25.1","latest"]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let tags = client.list_tags(&hub_image("nginx:1.25.0")).await.unwrap();

        token_mock.assert_async().await;
        tags_mock.assert_async().await;
        assert_eq!(tags, vec!["1.25.0", "1.25.1", "latest"]);
    }

    #[tokio::test]
    async fn list_tags_surfaces_auth_failure() {
        let mut server = Server::new_async().await;

        server
            .mock(
                "GET",
                "/token?service=registry.docker.io&scope=repository:library/nginx:pull",
            )
            .with_status(403)
            .with_body("denied")
            .create_async()
            .await;

        let client = test_client(&server);
        let result = client.list_tags(&hub_image("nginx")).await;

        assert!(matches!(result, Err(RegistryError::Auth(_))));
    }

    #[tokio::test]
    async fn list_tags_surfaces_http_error_with_body_snippet() {
        let mut server = Server::new_async().await;

        server
            .mock(
                "GET",
                "/token?service=registry.docker.io&scope=repository:library/nginx:pull",
            )
            .with_status(200)
            .with_body(r#"{"token":"abc"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v2/library/nginx/tags/list")
            .with_status(404)
            .with_body("repository not found")
            .create_async()
            .await;

        let client = test_client(&server);
        let result = client.list_tags(&hub_image("nginx")).await;

        match result {
            Err(RegistryError::Http { status, body }) => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(body, "repository not found");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_tags_tolerates_missing_tags_field() {
        let mut server = Server::new_async().await;

        server
            .mock(
                "GET",
                "/token?service=registry.docker.io&scope=repository:library/nginx:pull",
            )
            .with_status(200)
            .with_body(r#"{"token":"abc"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v2/library/nginx/tags/list")
            .with_status(200)
            .with_body(r#"{"name":"library/nginx","tags":null}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let tags = client.list_tags(&hub_image("nginx")).await.unwrap();
        assert!(tags.is_empty());
    }

    #[tokio::test]
    async fn ping_accepts_unauthorized_as_healthy() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/")
            .with_status(401)
            .create_async()
            .await;

        let client = test_client(&server);
        assert!(client.ping().await.is_ok());
    }

    #[test]
    fn private_registries_are_addressed_directly() {
        let client = RegistryClient::new(Duration::from_secs(5));
        let image = ImageReference::parse("registry.example.com:5000/team/app:1.0.0").unwrap();
        assert_eq!(
            client.tags_url(&image),
            "https://registry.example.com:5000/v2/team/app/tags/list"
        );
    }
}
