//! reqwest-backed implementation of the API traits

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::client::{ClientFactory, PlacementGroupApi, VpcApi};
use crate::error::CloudError;
use crate::filter::Filter;
use crate::types::{CreatePlacementGroupOptions, CreateVpcOptions, Page, PlacementGroup, Vpc};

/// Public v4 API endpoint
pub const DEFAULT_API_URL: &str = "https://api.linode.com/v4";

/// Per-request timeout; the reconcile-wide deadline sits on top of this
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page size the API accepts
const PAGE_SIZE: u32 = 500;

const PLACEMENT_GROUP: &str = "placement group";
const VPC: &str = "vpc";
const SUBNET: &str = "subnet";

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Deserialize)]
struct ErrorReason {
    reason: String,
    #[serde(default)]
    field: Option<String>,
}

/// HTTP client bound to one API token
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client for `base_url` authenticating with `token`
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, CloudError> {
        let http = build_http_client()?;
        Ok(Self::with_http(http, base_url, token))
    }

    fn with_http(http: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn list<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: &Filter,
    ) -> Result<Vec<T>, CloudError> {
        let header = filter.to_header();
        let mut items = Vec::new();
        let mut page = 1u32;

        loop {
            let mut req = self
                .request(Method::GET, path)
                .query(&[("page", page), ("page_size", PAGE_SIZE)]);
            if let Some(ref header) = header {
                req = req.header("X-Filter", header);
            }

            let resp = check(req.send().await?, path, "").await?;
            let body: Page<T> = decode(resp, path).await?;
            trace!(path, page = body.page, pages = body.pages, "fetched page");
            items.extend(body.data);

            if body.page >= body.pages {
                break;
            }
            page = body.page + 1;
        }

        Ok(items)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
        id: i64,
    ) -> Result<T, CloudError> {
        let resp = check(self.request(Method::GET, path).send().await?, resource, id).await?;
        decode(resp, resource).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        resource: &str,
        body: &B,
    ) -> Result<Option<T>, CloudError> {
        let resp = self.request(Method::POST, path).json(body).send().await?;
        let resp = check(resp, resource, "").await?;
        let text = resp.text().await?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CloudError::Decode {
                what: resource.to_string(),
                message: e.to_string(),
            })
    }

    async fn delete(&self, path: &str, resource: &str, id: i64) -> Result<(), CloudError> {
        check(self.request(Method::DELETE, path).send().await?, resource, id).await?;
        Ok(())
    }
}

fn build_http_client() -> Result<reqwest::Client, CloudError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("tessera/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CloudError::Configuration(e.to_string()))
}

async fn check(resp: Response, resource: &str, id: impl ToString) -> Result<Response, CloudError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CloudError::not_found(resource, id));
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .filter(|b| !b.errors.is_empty())
        .map(|b| {
            b.errors
                .iter()
                .map(|e| match &e.field {
                    Some(field) => format!("[{}] {}", field, e.reason),
                    None => e.reason.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or(text);

    Err(CloudError::api(status.as_u16(), message))
}

async fn decode<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T, CloudError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CloudError::Decode {
        what: what.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl PlacementGroupApi for HttpClient {
    async fn list_placement_groups(
        &self,
        filter: &Filter,
    ) -> Result<Vec<PlacementGroup>, CloudError> {
        self.list("/placement/groups", filter).await
    }

    async fn get_placement_group(&self, id: i64) -> Result<PlacementGroup, CloudError> {
        self.get(&format!("/placement/groups/{id}"), PLACEMENT_GROUP, id)
            .await
    }

    async fn create_placement_group(
        &self,
        opts: &CreatePlacementGroupOptions,
    ) -> Result<Option<PlacementGroup>, CloudError> {
        debug!(label = %opts.label, region = %opts.region, "creating placement group");
        self.post("/placement/groups", PLACEMENT_GROUP, opts).await
    }

    async fn delete_placement_group(&self, id: i64) -> Result<(), CloudError> {
        debug!(id, "deleting placement group");
        self.delete(&format!("/placement/groups/{id}"), PLACEMENT_GROUP, id)
            .await
    }
}

#[async_trait]
impl VpcApi for HttpClient {
    async fn list_vpcs(&self, filter: &Filter) -> Result<Vec<Vpc>, CloudError> {
        self.list("/vpcs", filter).await
    }

    async fn get_vpc(&self, id: i64) -> Result<Vpc, CloudError> {
        self.get(&format!("/vpcs/{id}"), VPC, id).await
    }

    async fn create_vpc(&self, opts: &CreateVpcOptions) -> Result<Option<Vpc>, CloudError> {
        debug!(label = %opts.label, region = %opts.region, subnets = opts.subnets.len(), "creating vpc");
        self.post("/vpcs", VPC, opts).await
    }

    async fn delete_vpc(&self, id: i64) -> Result<(), CloudError> {
        debug!(id, "deleting vpc");
        self.delete(&format!("/vpcs/{id}"), VPC, id).await
    }

    async fn delete_subnet(&self, vpc_id: i64, subnet_id: i64) -> Result<(), CloudError> {
        debug!(vpc_id, subnet_id, "deleting subnet");
        self.delete(
            &format!("/vpcs/{vpc_id}/subnets/{subnet_id}"),
            SUBNET,
            subnet_id,
        )
        .await
    }
}

/// [`ClientFactory`] producing [`HttpClient`]s that share one connection pool
pub struct HttpClientFactory {
    http: reqwest::Client,
    base_url: String,
    default_token: Option<String>,
}

impl HttpClientFactory {
    /// Create a factory for `base_url`
    ///
    /// `default_token` is used for objects without a credentials reference.
    pub fn new(
        base_url: impl Into<String>,
        default_token: Option<String>,
    ) -> Result<Self, CloudError> {
        Ok(Self {
            http: build_http_client()?,
            base_url: base_url.into(),
            default_token: default_token.filter(|t| !t.is_empty()),
        })
    }

    fn client(&self, token: Option<&str>) -> Result<HttpClient, CloudError> {
        let token = token
            .or(self.default_token.as_deref())
            .ok_or_else(|| {
                CloudError::Configuration(
                    "no API token: set a credentials reference or a default token".to_string(),
                )
            })?;
        Ok(HttpClient::with_http(
            self.http.clone(),
            self.base_url.clone(),
            token,
        ))
    }
}

impl ClientFactory for HttpClientFactory {
    fn placement_groups(
        &self,
        token: Option<&str>,
    ) -> Result<Arc<dyn PlacementGroupApi>, CloudError> {
        Ok(Arc::new(self.client(token)?))
    }

    fn vpcs(&self, token: Option<&str>) -> Result<Arc<dyn VpcApi>, CloudError> {
        Ok(Arc::new(self.client(token)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlacementPolicy, PlacementType};
    use wiremock::matchers::{bearer_token, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pg_json(id: i64, label: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "label": label,
            "region": "us-ord",
            "placement_group_type": "anti_affinity:local",
            "placement_group_policy": "strict",
            "is_compliant": true,
            "members": []
        })
    }

    #[tokio::test]
    async fn list_sends_filter_and_follows_pages() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/placement/groups"))
            .and(query_param("page", "1"))
            .and(header("X-Filter", r#"{"label":"workers"}"#))
            .and(bearer_token("secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [pg_json(1, "workers")],
                "page": 1,
                "pages": 2,
                "results": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/placement/groups"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [pg_json(2, "workers")],
                "page": 2,
                "pages": 2,
                "results": 2
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), "secret").unwrap();
        let groups = client
            .list_placement_groups(&Filter::new(None, "workers"))
            .await
            .unwrap();

        assert_eq!(groups.iter().map(|g| g.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn get_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/vpcs/9"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errors": [{"reason": "Not found"}]
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), "t").unwrap();
        let err = client.get_vpc(9).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn api_errors_carry_reasons() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/placement/groups"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": [{"reason": "Label must be unique", "field": "label"}]
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), "t").unwrap();
        let err = client
            .create_placement_group(&CreatePlacementGroupOptions {
                label: "workers".to_string(),
                region: "us-ord".to_string(),
                placement_group_type: PlacementType::AntiAffinityLocal,
                placement_group_policy: PlacementPolicy::Strict,
            })
            .await
            .unwrap_err();

        match err {
            CloudError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "[label] Label must be unique");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_with_empty_body_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vpcs"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), "t").unwrap();
        let created = client
            .create_vpc(&CreateVpcOptions {
                label: "net".to_string(),
                region: "us-ord".to_string(),
                description: None,
                subnets: vec![],
            })
            .await
            .unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn delete_subnet_hits_nested_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/vpcs/3/subnets/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(server.uri(), "t").unwrap();
        client.delete_subnet(3, 11).await.unwrap();
    }

    #[test]
    fn factory_requires_some_token() {
        let factory = HttpClientFactory::new(DEFAULT_API_URL, None).unwrap();
        assert!(factory.vpcs(None).is_err());
        assert!(factory.vpcs(Some("token")).is_ok());

        let factory = HttpClientFactory::new(DEFAULT_API_URL, Some("default".to_string())).unwrap();
        assert!(factory.placement_groups(None).is_ok());
    }
}
