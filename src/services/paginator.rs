use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::constants::{graph, pagination};
use crate::errors::ApiError;
use crate::services::graph_client::{ApiRequest, ApiResponse, GraphClient};

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_link: Option<Url>,
}

impl Page {
    pub fn from_response(response: &ApiResponse) -> Result<Self, ApiError> {
        let mut envelope = response.json_object()?;
        let items = match envelope.remove("value") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(ApiError::Decode {
                    status: response.status,
                    message: "collection 'value' is not an array".to_string(),
                })
            }
        };
        let next_link = match envelope.remove(graph::NEXT_LINK_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(link)) => Some(Url::parse(&link).map_err(|err| ApiError::Decode {
                status: response.status,
                message: format!("invalid continuation link: {}", err),
            })?),
            Some(_) => {
                return Err(ApiError::Decode {
                    status: response.status,
                    message: "continuation link is not a string".to_string(),
                })
            }
        };
        Ok(Self { items, next_link })
    }
}

struct Cursor {
    request: ApiRequest,
    fetched: usize,
}

#[derive(Clone)]
pub struct Paginator {
    client: Arc<GraphClient>,
    max_pages: usize,
}

impl Paginator {
    pub fn new(client: Arc<GraphClient>) -> Self {
        Self {
            client,
            max_pages: pagination::MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn client(&self) -> &Arc<GraphClient> {
        &self.client
    }

    /// Lazy page stream. It ends after the first error.
    pub fn pages(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Page, ApiError>> {
        let client = self.client.clone();
        let max_pages = self.max_pages;
        stream::try_unfold(
            Some(Cursor { request, fetched: 0 }),
            move |cursor| {
                let client = client.clone();
                let cancel = cancel.clone();
                async move {
                    let Some(cursor) = cursor else {
                        return Ok(None);
                    };
                    if cursor.fetched >= max_pages {
                        return Err(ApiError::Decode {
                            status: 200,
                            message: format!("collection exceeded {} pages", max_pages),
                        });
                    }
                    let response = client.execute(&cursor.request, &cancel).await?;
                    let page = Page::from_response(&response)?;
                    let next = page.next_link.clone().map(|link| Cursor {
                        request: ApiRequest::follow(link),
                        fetched: cursor.fetched + 1,
                    });
                    Ok(Some((page, next)))
                }
            },
        )
        .boxed()
    }

    pub fn items(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Value, ApiError>> {
        self.pages(request, cancel)
            .map_ok(|page| stream::iter(page.items.into_iter().map(Ok::<Value, ApiError>)))
            .try_flatten()
            .boxed()
    }

    /// Every item of the collection, or the first error and nothing else.
    pub async fn fetch_all(&self, request: ApiRequest, cancel: &CancellationToken) -> Result<Vec<Value>, ApiError> {
        self.items(request, cancel.clone()).try_collect().await
    }
}
