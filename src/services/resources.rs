use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::constants::{fanout, graph};
use crate::errors::ApiError;
use crate::services::graph_client::{ApiRequest, ApiVersion, GraphClient};
use crate::services::logger::Logger;
use crate::services::paginator::Paginator;
use crate::services::projection::{project_all, FieldSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Case-insensitive substring match on `@odata.type`.
    TypeContains(&'static str),
}

impl RecordFilter {
    pub fn matches(&self, raw: &Value) -> bool {
        match self {
            RecordFilter::TypeContains(needle) => raw
                .get(graph::TYPE_FIELD)
                .and_then(Value::as_str)
                .map(|discriminator| {
                    discriminator
                        .to_lowercase()
                        .contains(&needle.to_lowercase())
                })
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CollectionSpec {
    pub version: ApiVersion,
    pub path: &'static [&'static str],
    pub query: &'static [(&'static str, &'static str)],
    pub filter: Option<RecordFilter>,
    pub fields: &'static [FieldSpec],
}

impl CollectionSpec {
    pub const fn new(version: ApiVersion, path: &'static [&'static str], fields: &'static [FieldSpec]) -> Self {
        Self {
            version,
            path,
            query: &[],
            filter: None,
            fields,
        }
    }

    pub const fn with_query(mut self, query: &'static [(&'static str, &'static str)]) -> Self {
        self.query = query;
        self
    }

    pub const fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub const fn with_fields(mut self, fields: &'static [FieldSpec]) -> Self {
        self.fields = fields;
        self
    }

    pub fn request(&self) -> ApiRequest {
        self.query
            .iter()
            .fold(ApiRequest::get(self.version, self.path.iter().copied()), |request, (key, value)| {
                request.with_query(key, value)
            })
    }

    pub fn shape(&self, raw: Vec<Value>) -> Vec<Value> {
        let kept: Vec<Value> = match self.filter {
            Some(filter) => raw.into_iter().filter(|record| filter.matches(record)).collect(),
            None => raw,
        };
        project_all(&kept, self.fields)
    }
}

pub fn resource_result(key: &str, items: Vec<Value>) -> Value {
    let count = items.len();
    let mut out = Map::new();
    out.insert(key.to_string(), Value::Array(items));
    out.insert("count".to_string(), json!(count));
    Value::Object(out)
}

pub fn error_result(err: &ApiError) -> Value {
    let message = err.body().map(str::to_string).unwrap_or_else(|| err.to_string());
    json!({
        "error": message,
        "status_code": err.status_code(),
        "kind": err.kind_name(),
    })
}

#[derive(Clone)]
pub struct ResourceService {
    paginator: Paginator,
    logger: Logger,
}

impl ResourceService {
    pub fn new(paginator: Paginator, logger: Logger) -> Self {
        Self {
            paginator,
            logger: logger.child("resources"),
        }
    }

    pub fn client(&self) -> &Arc<GraphClient> {
        self.paginator.client()
    }

    pub fn paginator(&self) -> &Paginator {
        &self.paginator
    }

    pub async fn fetch_raw(&self, spec: &CollectionSpec, cancel: &CancellationToken) -> Result<Vec<Value>, ApiError> {
        self.paginator.fetch_all(spec.request(), cancel).await
    }

    pub async fn list(&self, spec: &CollectionSpec, cancel: &CancellationToken) -> Result<Vec<Value>, ApiError> {
        let raw = self.fetch_raw(spec, cancel).await?;
        let fetched = raw.len();
        let shaped = spec.shape(raw);
        self.logger.debug(
            "Collection listed",
            Some(&json!({"path": spec.path.join("/"), "fetched": fetched, "kept": shaped.len()})),
        );
        Ok(shaped)
    }

    pub async fn list_request(
        &self,
        request: ApiRequest,
        fields: &[FieldSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<Value>, ApiError> {
        let raw = self.paginator.fetch_all(request, cancel).await?;
        Ok(project_all(&raw, fields))
    }

    /// Any failure fails the whole call.
    pub async fn list_many(
        &self,
        specs: &[CollectionSpec],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<Value>>, ApiError> {
        try_join_all(specs.iter().map(|spec| self.list(spec, cancel))).await
    }

    pub async fn fan_out<R, S>(
        &self,
        parents: Vec<Value>,
        cancel: &CancellationToken,
        request_for: R,
        shape: S,
    ) -> Result<Vec<Value>, ApiError>
    where
        R: Fn(&Value) -> Option<ApiRequest>,
        S: Fn(&Value, Vec<Value>) -> Vec<Value>,
    {
        let jobs: Vec<(Value, ApiRequest)> = parents
            .into_iter()
            .filter_map(|parent| request_for(&parent).map(|request| (parent, request)))
            .collect();
        let fetched: Vec<(Value, Vec<Value>)> = stream::iter(jobs)
            .map(|(parent, request)| async move {
                let raw = self.paginator.fetch_all(request, cancel).await?;
                Ok::<_, ApiError>((parent, raw))
            })
            .buffered(fanout::MAX_CONCURRENT_CHILD_FETCHES)
            .try_collect()
            .await?;
        Ok(fetched
            .into_iter()
            .flat_map(|(parent, raw)| shape(&parent, raw))
            .collect())
    }
}
