use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::errors::ApiError;
use crate::services::graph_client::{ApiRequest, ApiVersion, GraphClient};
use crate::services::logger::Logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveKind {
    OneDrive,
    SharePoint,
}

impl DriveKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DriveKind::OneDrive => "onedrive",
            DriveKind::SharePoint => "sharepoint",
        }
    }

    fn owner_segment(self) -> &'static str {
        match self {
            DriveKind::OneDrive => "users",
            DriveKind::SharePoint => "sites",
        }
    }
}

impl fmt::Display for DriveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriveKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "onedrive" => Ok(DriveKind::OneDrive),
            "sharepoint" => Ok(DriveKind::SharePoint),
            other => Err(format!(
                "location_type must be 'onedrive' or 'sharepoint', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLocation {
    pub kind: DriveKind,
    pub id: String,
}

impl DriveLocation {
    pub fn new(kind: DriveKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn onedrive(user_id: impl Into<String>) -> Self {
        Self::new(DriveKind::OneDrive, user_id)
    }

    pub fn sharepoint(site_id: impl Into<String>) -> Self {
        Self::new(DriveKind::SharePoint, site_id)
    }

    fn drive_segments(&self) -> Vec<String> {
        vec![
            self.kind.owner_segment().to_string(),
            self.id.clone(),
            "drive".to_string(),
        ]
    }

    fn item_segments(&self, item_id: &str, tail: &[&str]) -> Vec<String> {
        let mut segments = self.drive_segments();
        segments.push("items".to_string());
        segments.push(item_id.to_string());
        segments.extend(tail.iter().map(|s| s.to_string()));
        segments
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrivePath {
    pub folder: Option<String>,
    pub file_name: String,
}

impl DrivePath {
    pub fn new(folder: Option<&str>, file_name: impl Into<String>) -> Self {
        let folder = folder
            .map(|raw| raw.trim().trim_matches('/').to_string())
            .filter(|raw| !raw.is_empty());
        Self {
            folder,
            file_name: file_name.into(),
        }
    }

    // root:/folder/.../<name>:/content, one encoded segment each.
    fn upload_segments(&self) -> Vec<String> {
        let mut segments = vec!["root:".to_string()];
        if let Some(folder) = &self.folder {
            segments.extend(
                folder
                    .split('/')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string),
            );
        }
        segments.push(format!("{}:", self.file_name));
        segments.push("content".to_string());
        segments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadedItem {
    pub id: Value,
    pub name: Value,
    pub size: Value,
    #[serde(rename = "webUrl")]
    pub web_url: Value,
    #[serde(rename = "createdDateTime")]
    pub created_at: Value,
    #[serde(rename = "lastModifiedDateTime", skip_serializing_if = "Value::is_null")]
    pub modified_at: Value,
}

impl UploadedItem {
    pub fn from_raw(raw: &Value) -> Self {
        let field = |key: &str| raw.get(key).cloned().unwrap_or(Value::Null);
        Self {
            id: field("id"),
            name: field("name"),
            size: field("size"),
            web_url: field("webUrl"),
            created_at: field("createdDateTime"),
            modified_at: field("lastModifiedDateTime"),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "size": self.size,
            "webUrl": self.web_url,
            "createdDateTime": self.created_at,
        })
    }

    pub fn to_value_with_modified(&self) -> Value {
        let mut out = self.to_value();
        if let Value::Object(map) = &mut out {
            map.insert("lastModifiedDateTime".to_string(), self.modified_at.clone());
        }
        out
    }
}

#[derive(Clone)]
pub struct DriveService {
    client: Arc<GraphClient>,
    logger: Logger,
}

impl DriveService {
    pub fn new(client: Arc<GraphClient>, logger: Logger) -> Self {
        Self {
            client,
            logger: logger.child("drive"),
        }
    }

    pub async fn upload_content(
        &self,
        location: &DriveLocation,
        path: &DrivePath,
        content: Bytes,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadedItem, ApiError> {
        if path.file_name.trim().is_empty() {
            return Err(ApiError::invalid_request("file name must not be empty"));
        }
        let mut segments = location.drive_segments();
        segments.extend(path.upload_segments());
        let size = content.len();
        let request = ApiRequest::put_bytes(ApiVersion::V1, segments, content, content_type);
        let raw = self.client.get_object(&request, cancel).await?;
        self.logger.info(
            "Uploaded drive item",
            Some(&json!({
                "location": location.kind.as_str(),
                "file_name": path.file_name,
                "bytes": size,
            })),
        );
        Ok(UploadedItem::from_raw(&raw))
    }

    pub async fn item_metadata(
        &self,
        location: &DriveLocation,
        item_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest::get(ApiVersion::V1, location.item_segments(item_id, &[]));
        self.client.get_object(&request, cancel).await
    }

    pub async fn download_content(
        &self,
        location: &DriveLocation,
        item_id: &str,
        format: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ApiError> {
        let mut request = ApiRequest::get(ApiVersion::V1, location.item_segments(item_id, &["content"]));
        if let Some(format) = format {
            request = request.with_query("format", format);
        }
        let response = self.client.execute(&request, cancel).await?;
        Ok(response.body)
    }

    pub async fn download_thumbnail(
        &self,
        location: &DriveLocation,
        item_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes, ApiError> {
        let request = ApiRequest::get(
            ApiVersion::V1,
            location.item_segments(item_id, &["thumbnails", "0", "large", "content"]),
        );
        let response = self.client.execute(&request, cancel).await?;
        Ok(response.body)
    }
}
