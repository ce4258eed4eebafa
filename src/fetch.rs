use async_trait::async_trait;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::FetchError;

/// GraphQL error as returned by an upstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            locations: None,
            path: None,
            extensions: None,
        }
    }
}

/// Raw `data` of an upstream response (or its `_entities` list) and its errors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchResponse {
    pub data: Option<Bytes>,
    pub errors: Vec<GraphQLError>,
}

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self, input: &[u8]) -> Result<FetchResponse, FetchError>;
}

#[derive(Deserialize)]
struct FetchInput<'a> {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    header: HashMap<String, Vec<String>>,
    #[serde(borrow)]
    body: Option<&'a RawValue>,
    #[serde(default)]
    extract_entities: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new() -> Self {
        HttpSource {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpSource { client }
    }
}

impl Default for HttpSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn load(&self, input: &[u8]) -> Result<FetchResponse, FetchError> {
        let input: FetchInput<'_> = serde_json::from_slice(input).map_err(FetchError::InvalidInput)?;
        let method = Method::from_bytes(input.method.as_bytes())
            .map_err(|_| FetchError::InvalidRequestPart("method"))?;
        let headers = header_map(&input.header)?;

        let mut request = self
            .client
            .request(method, &input.url)
            .headers(headers)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "application/json");
        if let Some(body) = input.body {
            request = request.body(body.get().to_owned());
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(url = %input.url, %status, "upstream fetch finished");
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus(status));
        }

        let body = response.bytes().await?;
        extract_response(&body, input.extract_entities)
    }
}

type SharedLoad = Shared<BoxFuture<'static, Result<FetchResponse, Arc<FetchError>>>>;

/// Lets identical fetches that overlap in time share one upstream call.
/// Calls are keyed on the rendered input, so only byte-equal requests are merged.
#[derive(Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<Bytes, SharedLoad>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, source: &Arc<dyn DataSource>, input: Bytes) -> Result<FetchResponse, FetchError> {
        let call = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(&input) {
                Some(call) => {
                    debug!("joining in-flight upstream fetch");
                    call.clone()
                }
                None => {
                    let source = Arc::clone(source);
                    let key = input.clone();
                    let call = async move { source.load(&key).await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    inflight.insert(input.clone(), call.clone());
                    call
                }
            }
        };

        let result = call.clone().await;
        {
            let mut inflight = self.inflight.lock().await;
            if inflight.get(&input).is_some_and(|current| current.ptr_eq(&call)) {
                inflight.remove(&input);
            }
        }
        drop(call);
        result.map_err(|err| Arc::try_unwrap(err).unwrap_or_else(FetchError::Shared))
    }

    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}

fn header_map(header: &HashMap<String, Vec<String>>) -> Result<HeaderMap, FetchError> {
    let mut headers = HeaderMap::new();
    for (name, values) in header {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::InvalidRequestPart("header name"))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidRequestPart("header value"))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

#[derive(Deserialize)]
struct ResponseRef<'a> {
    #[serde(borrow, default)]
    data: Option<&'a RawValue>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct EntitiesRef<'a> {
    #[serde(borrow, default, rename = "_entities")]
    entities: Option<&'a RawValue>,
}

/// Splits a GraphQL response body into raw `data` and its errors.
/// With `extract_entities` the `data._entities` list becomes the data.
pub fn extract_response(body: &[u8], extract_entities: bool) -> Result<FetchResponse, FetchError> {
    let response: ResponseRef<'_> = serde_json::from_slice(body).map_err(FetchError::InvalidResponse)?;

    let mut data = response.data.filter(|raw| raw.get() != "null");
    if extract_entities {
        data = match data {
            Some(raw) => {
                let entities: EntitiesRef<'_> =
                    serde_json::from_str(raw.get()).map_err(FetchError::InvalidResponse)?;
                entities.entities
            }
            None => None,
        };
    }

    Ok(FetchResponse {
        data: data.map(|raw| Bytes::copy_from_slice(raw.get().as_bytes())),
        errors: response
            .errors
            .unwrap_or_default()
            .into_iter()
            .filter_map(graphql_error)
            .collect(),
    })
}

// errors without a message are dropped
fn graphql_error(value: Value) -> Option<GraphQLError> {
    let Value::Object(mut error) = value else {
        return None;
    };
    let message = match error.remove("message") {
        Some(Value::String(message)) => message,
        _ => return None,
    };
    Some(GraphQLError {
        message,
        locations: error.remove("locations"),
        path: error.remove("path"),
        extensions: error.remove("extensions"),
    })
}
