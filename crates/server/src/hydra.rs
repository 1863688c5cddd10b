//! ORY Hydra admin API client.

use crate::config::HydraConfig;
use crate::error::RemoteError;
use crate::reconcile::diff::Update;
use crate::reconcile::model::{CanonicalClient, CanonicalScope};
use crate::reconcile::ports::{AdminApi, Page};
use crate::reconcile::wire;
use async_trait::async_trait;
use reqwest::header::LINK;
use reqwest::{Method, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

const CLIENTS_PATH: &str = "/admin/clients";
const READY_PATH: &str = "/health/ready";
/// Error bodies are cut to this many characters in error messages.
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Clone, Debug)]
pub struct HydraAdminClient {
    http: reqwest::Client,
    base: Url,
    scopes_path: String,
    page_size: u32,
    timeout: Duration,
}

impl HydraAdminClient {
    pub fn new(config: &HydraConfig) -> Result<Self, RemoteError> {
        let base = Url::parse(&config.admin_url)
            .map_err(|e| RemoteError::Network(format!("invalid admin_url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base,
            scopes_path: config.scopes_path.clone(),
            page_size: config.page_size,
            timeout: config.timeout(),
        })
    }

    /// `path` segments appended to the base URL, with `extra` percent-encoded.
    fn url(&self, path: &str, extra: Option<&str>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| RemoteError::Network(format!("admin_url {} cannot be a base", self.base)))?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(extra) = extra {
                segments.push(extra);
            }
        }
        Ok(url)
    }

    fn map_error(&self, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if error.is_decode() {
            RemoteError::InvalidBody(error.to_string())
        } else {
            RemoteError::Network(error.to_string())
        }
    }

    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response, RemoteError> {
        let response = request.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        tracing::debug!(
            name = "hydra.request.rejected",
            target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
            status = status.as_u16(),
            context,
            body = %body,
            message = "Admin API rejected request"
        );
        Err(RemoteError::http(
            status,
            if body.is_empty() {
                context.to_string()
            } else {
                format!("{context}: {body}")
            },
        ))
    }

    async fn list(&self, path: &str, cursor: Option<&str>) -> Result<Page, RemoteError> {
        let mut url = self.url(path, None)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page_size", &self.page_size.to_string());
            if let Some(token) = cursor {
                query.append_pair("page_token", token);
            }
        }
        let context = format!("GET {path}");
        let response = self.send(self.http.get(url.clone()), &context).await?;
        let next_cursor = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find_map(|value| next_page_token(&url, value));
        let items: Vec<Value> = response.json().await.map_err(|e| self.map_error(e))?;
        Ok(Page { items, next_cursor })
    }

    async fn write(
        &self,
        method: Method,
        path: &str,
        identity: Option<&str>,
        body: Option<&Value>,
    ) -> Result<(), RemoteError> {
        let url = self.url(path, identity)?;
        let context = match identity {
            Some(id) => format!("{method} {path}/{id}"),
            None => format!("{method} {path}"),
        };
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request, &context).await?;
        Ok(())
    }
}

/// Page token of the `rel="next"` entry in an RFC 8288 `Link` header.
pub fn next_page_token(base: &Url, header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let is_next = parts.any(|param| {
            let param = param.trim();
            param
                .strip_prefix("rel=")
                .map(|rel| rel.trim_matches('"').split_whitespace().any(|r| r == "next"))
                .unwrap_or(false)
        });
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let url = base.join(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page_token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty())
    })
}

#[async_trait]
impl AdminApi for HydraAdminClient {
    #[tracing::instrument(skip(self))]
    async fn list_clients(&self, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.list(CLIENTS_PATH, cursor).await
    }

    #[tracing::instrument(skip(self, client), fields(client_id = %client.client_id))]
    async fn create_client(&self, client: &CanonicalClient) -> Result<(), RemoteError> {
        let body = wire::client_payload(client);
        self.write(Method::POST, CLIENTS_PATH, None, Some(&body)).await
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_client(
        &self,
        client_id: &str,
        update: &Update<CanonicalClient>,
    ) -> Result<(), RemoteError> {
        let body = wire::client_patch(update);
        self.write(Method::PATCH, CLIENTS_PATH, Some(client_id), Some(&body))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_client(&self, client_id: &str) -> Result<(), RemoteError> {
        self.write(Method::DELETE, CLIENTS_PATH, Some(client_id), None)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_scopes(&self, cursor: Option<&str>) -> Result<Page, RemoteError> {
        self.list(&self.scopes_path, cursor).await
    }

    #[tracing::instrument(skip(self, scope), fields(scope = %scope.name))]
    async fn create_scope(&self, scope: &CanonicalScope) -> Result<(), RemoteError> {
        let body = wire::scope_payload(scope);
        self.write(Method::POST, &self.scopes_path, None, Some(&body))
            .await
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_scope(
        &self,
        name: &str,
        update: &Update<CanonicalScope>,
    ) -> Result<(), RemoteError> {
        let body = wire::scope_patch(update);
        self.write(Method::PATCH, &self.scopes_path, Some(name), Some(&body))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_scope(&self, name: &str) -> Result<(), RemoteError> {
        self.write(Method::DELETE, &self.scopes_path, Some(name), None)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn health(&self) -> Result<(), RemoteError> {
        let url = self.url(READY_PATH, None)?;
        self.send(self.http.get(url), "GET /health/ready").await?;
        Ok(())
    }
}
