use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, ToolError};
use crate::managers::tables::SHAREPOINT_SITES;
use crate::services::drive::{DriveLocation, DrivePath, DriveService, UploadedItem};
use crate::services::logger::Logger;
use crate::services::resources::{resource_result, ResourceService};
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::services::validation::Validation;
use crate::utils::csv;
use crate::utils::text::file_stem;
use crate::utils::tool_errors::unknown_tool_error;

pub const FILE_TOOLS: &[&str] = &[
    "list_sharepoint_sites",
    "create_file_in_onedrive",
    "create_file_in_sharepoint",
    "create_csv_file",
    "read_csv_file",
    "convert_file_to_pdf",
    "export_powerpoint_slide_as_image",
];

const TEXT_CONTENT_TYPE: &str = "text/plain";
const CSV_CONTENT_TYPE: &str = "text/csv";
const PDF_CONTENT_TYPE: &str = "application/pdf";
const DEFAULT_IMAGE_FORMAT: &str = "png";

pub fn image_content_type(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        _ => "image/png",
    }
}

/// Name of an exported slide: `deck.pptx`, slide 3, png -> `deck_slide3.png`.
pub fn slide_image_name(source_name: &str, slide_index: u64, format: &str) -> String {
    format!("{}_slide{}.{}", file_stem(source_name), slide_index, format)
}

// The step label is the `error` field; the remote detail moves to `details`.
fn step_failure(step: &str, err: ApiError) -> Result<ToolOutput, ToolError> {
    if err.is_cancelled() {
        return Err(ToolError::cancelled("Tool call was cancelled"));
    }
    let details = err.body().map(str::to_string).unwrap_or_else(|| err.to_string());
    let mut output = ToolOutput::failure(json!({
        "error": step,
        "status_code": err.status_code(),
        "kind": err.kind_name(),
        "details": details,
    }));
    output.retryable = err.is_retryable();
    Ok(output)
}

fn with_fields(mut value: Value, extra: Value) -> Value {
    if let (Value::Object(map), Value::Object(extra)) = (&mut value, extra) {
        map.extend(extra);
    }
    value
}

#[derive(Clone)]
pub struct FilesManager {
    logger: Logger,
    validation: Validation,
    resources: ResourceService,
    drive: DriveService,
}

impl FilesManager {
    pub fn new(logger: Logger, validation: Validation, resources: ResourceService, drive: DriveService) -> Self {
        Self {
            logger: logger.child("files"),
            validation,
            resources,
            drive,
        }
    }

    async fn list_sites(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let result = self
            .resources
            .list(&SHAREPOINT_SITES, cancel)
            .await
            .map(|sites| resource_result("sites", sites));
        ToolOutput::from_api(result)
    }

    async fn create_text_file(
        &self,
        location: DriveLocation,
        args: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let file_name = self.validation.required_string(args, "file_name")?;
        let content = self.validation.required_text(args, "content")?;
        let folder = self.validation.optional_string(args, "folder_path")?;
        let path = DrivePath::new(folder.as_deref(), file_name);
        let result = self
            .drive
            .upload_content(&location, &path, Bytes::from(content), TEXT_CONTENT_TYPE, cancel)
            .await
            .map(|item| item.to_value_with_modified());
        ToolOutput::from_api(result)
    }

    async fn create_csv_file(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let location = self.validation.drive_location(args)?;
        let file_name = self.validation.required_string(args, "file_name")?;
        let rows = self.validation.rows(args, "data")?;
        let folder = self.validation.optional_string(args, "folder_path")?;
        let path = DrivePath::new(folder.as_deref(), file_name);
        let text = csv::write_rows(&rows);
        let result = self
            .drive
            .upload_content(&location, &path, Bytes::from(text), CSV_CONTENT_TYPE, cancel)
            .await
            .map(|item| item.to_value());
        ToolOutput::from_api(result)
    }

    async fn read_csv_file(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let location = self.validation.drive_location(args)?;
        let file_id = self.validation.required_identifier(args, "file_id")?;
        let result = self
            .drive
            .download_content(&location, &file_id, None, cancel)
            .await
            .map(|body| {
                let rows = csv::read_rows(&String::from_utf8_lossy(&body));
                let columns = rows.first().map(Vec::len).unwrap_or(0);
                json!({
                    "data": rows,
                    "rows": rows.len(),
                    "columns": columns,
                })
            });
        ToolOutput::from_api(result)
    }

    async fn convert_file_to_pdf(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let location = self.validation.drive_location(args)?;
        let file_id = self.validation.required_identifier(args, "file_id")?;
        let output_folder = self.validation.optional_string(args, "output_folder")?;

        let info = match self.drive.item_metadata(&location, &file_id, cancel).await {
            Ok(info) => info,
            Err(err) => return step_failure("Failed to get file info", err),
        };
        let original_name = info.get("name").and_then(Value::as_str).unwrap_or(file_id.as_str()).to_string();
        let pdf_name = format!("{}.pdf", file_stem(&original_name));

        let pdf = match self.drive.download_content(&location, &file_id, Some("pdf"), cancel).await {
            Ok(pdf) => pdf,
            Err(err) => return step_failure("Failed to convert file", err),
        };
        let path = DrivePath::new(output_folder.as_deref(), pdf_name);
        let uploaded: UploadedItem = match self
            .drive
            .upload_content(&location, &path, pdf, PDF_CONTENT_TYPE, cancel)
            .await
        {
            Ok(item) => item,
            Err(err) => return step_failure("Failed to upload PDF", err),
        };
        self.logger.info(
            "Converted file to PDF",
            Some(&json!({"file_id": file_id, "original": original_name})),
        );
        Ok(ToolOutput::ok(with_fields(
            uploaded.to_value(),
            json!({"originalFile": original_name}),
        )))
    }

    async fn export_slide(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let location = self.validation.drive_location(args)?;
        let file_id = self.validation.required_identifier(args, "file_id")?;
        let slide_index = self.validation.positive_integer(args, "slide_index")?;
        let format = self
            .validation
            .optional_string(args, "image_format")?
            .map(|format| format.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_IMAGE_FORMAT.to_string());
        let output_folder = self.validation.optional_string(args, "output_folder")?;

        let info = match self.drive.item_metadata(&location, &file_id, cancel).await {
            Ok(info) => info,
            Err(err) => return step_failure("Failed to get file info", err),
        };
        let source_name = info.get("name").and_then(Value::as_str).unwrap_or(file_id.as_str()).to_string();

        let image = match self.drive.download_thumbnail(&location, &file_id, cancel).await {
            Ok(image) => image,
            Err(err) => return step_failure("Failed to get slide image", err),
        };
        let path = DrivePath::new(
            output_folder.as_deref(),
            slide_image_name(&source_name, slide_index, &format),
        );
        let uploaded = match self
            .drive
            .upload_content(&location, &path, image, image_content_type(&format), cancel)
            .await
        {
            Ok(item) => item,
            Err(err) => return step_failure("Failed to upload image", err),
        };
        Ok(ToolOutput::ok(json!({
            "id": uploaded.id,
            "name": uploaded.name,
            "size": uploaded.size,
            "webUrl": uploaded.web_url,
            "slideIndex": slide_index,
            "format": format,
        })))
    }
}

#[async_trait]
impl ToolHandler for FilesManager {
    async fn handle(&self, tool: &str, args: Value, cancel: CancellationToken) -> Result<ToolOutput, ToolError> {
        match tool {
            "list_sharepoint_sites" => self.list_sites(&cancel).await,
            "create_file_in_onedrive" => {
                let user_id = self.validation.required_identifier(&args, "user_id")?;
                self.create_text_file(DriveLocation::onedrive(user_id), &args, &cancel)
                    .await
            }
            "create_file_in_sharepoint" => {
                let site_id = self.validation.required_identifier(&args, "site_id")?;
                self.create_text_file(DriveLocation::sharepoint(site_id), &args, &cancel)
                    .await
            }
            "create_csv_file" => self.create_csv_file(&args, &cancel).await,
            "read_csv_file" => self.read_csv_file(&args, &cancel).await,
            "convert_file_to_pdf" => self.convert_file_to_pdf(&args, &cancel).await,
            "export_powerpoint_slide_as_image" => self.export_slide(&args, &cancel).await,
            _ => Err(unknown_tool_error(
                tool,
                &FILE_TOOLS.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )),
        }
    }
}
