//! Blocking client for the ALM web services API (WSAPI v2.0).
//!
//! Every collection endpoint answers with the same envelope:
//!
//! ```text
//! { "QueryResult": { "Errors": [], "TotalResultCount": 312, "StartIndex": 1,
//!                    "PageSize": 200, "Results": [ ... ] } }
//! ```
//!
//! Paging is 1-based (`start=1`, `start=201`, ...). Nested collections
//! (`Attributes`, `AllowedValues`) come back as `{"_ref": ..., "Count": n}`
//! and are followed with the same paging logic.

use crate::record::RemoteRecord;
use crate::{element_name, AlmError, AlmSource, RecordRequest, RecordStream, Result};
use almsync_schema::{AttributeDef, AttributeType, EntityTypeDef, StateLabels};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

const API_KEY_HEADER: &str = "ZSESSIONID";
const SCHEMA_PAGE_SIZE: u32 = 200;

/// Connection settings for [`WsapiClient`].
#[derive(Debug, Clone)]
pub struct WsapiConfig {
    /// e.g. `https://rally1.rallydev.com/slm/webservice/v2.0`
    pub base_url: Url,
    pub api_key: Option<String>,
    /// Workspace ref, e.g. `/workspace/1234`.
    pub workspace: Option<String>,
    /// Project ref, e.g. `/project/5678`.
    pub project: Option<String>,
    pub project_scope_down: bool,
    pub timeout: Duration,
}

impl WsapiConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            api_key: None,
            workspace: None,
            project: None,
            project_scope_down: true,
            timeout: Duration::from_secs(120),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "QueryResult")]
    query_result: QueryResult,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(rename = "TotalResultCount", default)]
    total_result_count: u64,
    #[serde(rename = "Results", default)]
    results: Vec<Value>,
    #[serde(rename = "Errors", default)]
    errors: Vec<String>,
}

pub struct WsapiClient {
    http: Client,
    config: WsapiConfig,
}

impl WsapiClient {
    pub fn new(mut config: WsapiConfig) -> Result<Self> {
        // `Url::join` replaces the last segment unless the base ends with '/'.
        if !config.base_url.path().ends_with('/') {
            let path = format!("{}/", config.base_url.path());
            config.base_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| AlmError::Unavailable(format!("invalid API key: {e}")))?;
            headers.insert(API_KEY_HEADER, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|source| AlmError::Http {
                url: config.base_url.to_string(),
                source,
            })?;

        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.config.base_url.join(path)?)
    }

    fn scope_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(ws) = &self.config.workspace {
            params.push(("workspace".to_string(), ws.clone()));
        }
        if let Some(project) = &self.config.project {
            params.push(("project".to_string(), project.clone()));
            params.push((
                "projectScopeDown".to_string(),
                self.config.project_scope_down.to_string(),
            ));
        }
        params
    }

    fn get_page(&self, url: &Url, params: &[(String, String)]) -> Result<QueryResult> {
        let response = self
            .http
            .get(url.clone())
            .query(params)
            .send()
            .map_err(|source| AlmError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlmError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: Envelope = response.json().map_err(|e| AlmError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let result = envelope.query_result;
        if !result.errors.is_empty() {
            return Err(AlmError::Query {
                url: url.to_string(),
                errors: result.errors,
            });
        }
        Ok(result)
    }

    fn paged(&self, url: Url, params: Vec<(String, String)>, page_size: u32) -> PagedQuery<'_> {
        PagedQuery {
            client: self,
            url,
            params,
            page_size: page_size.max(1),
            next_start: 1,
            total: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    /// Follow a nested collection reference (`{"_ref": ..., "Count": n}`).
    fn collection(&self, value: &Value, fetch: &str) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items.clone()),
            Value::Object(obj) => {
                if obj.get("Count").and_then(Value::as_u64) == Some(0) {
                    return Ok(Vec::new());
                }
                let Some(href) = obj.get("_ref").and_then(Value::as_str) else {
                    return Ok(Vec::new());
                };
                let url = Url::parse(href)?;
                let params = vec![("fetch".to_string(), fetch.to_string())];
                self.paged(url, params, SCHEMA_PAGE_SIZE).collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    fn attribute_def(&self, value: &Value) -> Result<AttributeDef> {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let name = text("ElementName").ok_or_else(|| AlmError::Decode {
            url: self.config.base_url.to_string(),
            message: "attribute definition without ElementName".into(),
        })?;
        let attribute_type = AttributeType::from_tag(&text("AttributeType").unwrap_or_default());

        let allowed_values = match (&attribute_type, value.get("AllowedValues")) {
            (AttributeType::Rating | AttributeType::State, Some(values)) => self
                .collection(values, "StringValue")?
                .iter()
                .filter_map(|v| v.get("StringValue").and_then(Value::as_str))
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };

        Ok(AttributeDef {
            name,
            attribute_type,
            schema_type: text("SchemaType"),
            allowed_values,
        })
    }
}

impl AlmSource for WsapiClient {
    fn typedef(&self, entity: &str) -> Result<EntityTypeDef> {
        let element = element_name(entity);
        let url = self.endpoint("typedefinition")?;
        let mut params = self.scope_params();
        params.push(("query".into(), format!("(ElementName = \"{element}\")")));
        params.push(("fetch".into(), "ElementName,Attributes".into()));
        params.push(("pagesize".into(), "1".into()));

        let result = self.get_page(&url, &params)?;
        let typedef = result
            .results
            .into_iter()
            .next()
            .ok_or_else(|| AlmError::UnknownEntity(entity.to_string()))?;

        let attributes = match typedef.get("Attributes") {
            Some(attrs) => self
                .collection(attrs, "ElementName,AttributeType,SchemaType,AllowedValues")?
                .iter()
                .map(|a| self.attribute_def(a))
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        tracing::debug!(entity, attributes = attributes.len(), "fetched type definition");

        Ok(EntityTypeDef::new(element, attributes))
    }

    fn records<'a>(&'a self, entity: &str, request: &RecordRequest) -> Result<RecordStream<'a>> {
        let url = self.endpoint(&entity.to_ascii_lowercase())?;
        let mut params = self.scope_params();
        params.push(("fetch".into(), request.fetch.join(",")));
        params.push(("order".into(), request.order.clone()));
        if let Some(query) = &request.query {
            params.push(("query".into(), query.clone()));
        }
        let pages = self.paged(url, params, request.page_size);
        Ok(Box::new(pages.map(|item| item.and_then(RemoteRecord::from_json))))
    }

    fn workflow_states(&self, entity: &str) -> Result<StateLabels> {
        let url = self.endpoint("state")?;
        let mut params = self.scope_params();
        params.push(("fetch".into(), "TypeDef,Name,ObjectID".into()));
        params.push((
            "query".into(),
            format!("(TypeDef.Name = \"{}\")", element_name(entity)),
        ));
        params.push(("order".into(), "OrderIndex".into()));

        let mut states = Vec::new();
        for state in self.paged(url, params, SCHEMA_PAGE_SIZE) {
            let state = state?;
            let id = state.get("ObjectID").and_then(Value::as_i64);
            let name = state.get("Name").and_then(Value::as_str);
            if let (Some(id), Some(name)) = (id, name) {
                states.push((id, name.to_string()));
            }
        }
        Ok(StateLabels::new(states))
    }
}

/// Iterator over all results of a paged query.
pub struct PagedQuery<'a> {
    client: &'a WsapiClient,
    url: Url,
    params: Vec<(String, String)>,
    page_size: u32,
    next_start: u64,
    total: Option<u64>,
    buffer: VecDeque<Value>,
    done: bool,
}

impl PagedQuery<'_> {
    fn fetch_next_page(&mut self) -> Result<usize> {
        let mut params = self.params.clone();
        params.push(("start".into(), self.next_start.to_string()));
        params.push(("pagesize".into(), self.page_size.to_string()));

        let page = self.client.get_page(&self.url, &params)?;
        let fetched = page.results.len();
        tracing::trace!(
            url = %self.url,
            start = self.next_start,
            fetched,
            total = page.total_result_count,
            "fetched page"
        );
        self.total = Some(page.total_result_count);
        self.next_start += u64::from(self.page_size);
        self.buffer.extend(page.results);
        Ok(fetched)
    }
}

impl Iterator for PagedQuery<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            if matches!(self.total, Some(total) if self.next_start > total) {
                self.done = true;
                return None;
            }
            match self.fetch_next_page() {
                Ok(0) => self.done = true,
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
