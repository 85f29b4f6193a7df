use crate::errors::{ErrorCode, McpError};
use crate::utils::suggest::suggest;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

fn string_prop(description: &str) -> Value {
    json!({"type": "string", "minLength": 1, "description": description})
}

fn tool(name: &str, description: &str, properties: &[(&str, Value)], required: &[&str]) -> ToolDef {
    let mut props = Map::new();
    for (key, schema) in properties {
        props.insert((*key).to_string(), schema.clone());
    }
    let mut input_schema = json!({
        "type": "object",
        "properties": props,
        "additionalProperties": false,
    });
    if !required.is_empty() {
        input_schema["required"] = json!(required);
    }
    ToolDef {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn listing(name: &str, description: &str) -> ToolDef {
    tool(name, description, &[], &[])
}

fn location_props() -> Vec<(&'static str, Value)> {
    vec![
        (
            "location_type",
            json!({
                "type": "string",
                "enum": ["onedrive", "sharepoint"],
                "description": "Drive owner kind",
            }),
        ),
        (
            "location_id",
            string_prop("User ID for OneDrive or site ID for SharePoint"),
        ),
    ]
}

fn with_location(extra: Vec<(&'static str, Value)>) -> Vec<(&'static str, Value)> {
    let mut props = location_props();
    props.extend(extra);
    props
}

fn build_catalog() -> Vec<ToolDef> {
    let text_file_props = |owner: (&'static str, Value)| {
        vec![
            owner,
            ("file_name", string_prop("Name of the file to create")),
            (
                "content",
                json!({"type": "string", "description": "Text content of the file"}),
            ),
            (
                "folder_path",
                json!({"type": "string", "description": "Folder path relative to the drive root"}),
            ),
        ]
    };

    vec![
        tool(
            "create_user",
            "Create a user account with a generated temporary password.",
            &[
                ("display_name", string_prop("Display name")),
                ("mail_nickname", string_prop("Mail alias")),
                ("user_principal_name", string_prop("Sign-in name, e.g. alex@contoso.com")),
            ],
            &["display_name", "mail_nickname", "user_principal_name"],
        ),
        tool(
            "get_user_info",
            "Get details for one user.",
            &[("user_id", string_prop("User ID or user principal name"))],
            &["user_id"],
        ),
        listing("list_users", "List users in the directory."),
        listing("list_groups", "List groups in the directory."),
        tool(
            "get_group_members",
            "List the members of a group.",
            &[("group_id", string_prop("Group ID"))],
            &["group_id"],
        ),
        listing("list_intune_devices", "List Intune managed devices."),
        listing("list_intune_compliance_policies", "List device compliance policies."),
        listing("list_intune_configuration_policies", "List device configuration profiles."),
        listing("list_intune_filters", "List assignment filters."),
        listing("list_intune_scripts", "List PowerShell and shell scripts."),
        listing("list_intune_applications", "List mobile apps."),
        listing("list_autopilot_profiles", "List Windows Autopilot deployment profiles."),
        listing("list_autopilot_devices", "List Windows Autopilot device identities."),
        listing(
            "list_enrollment_status_page_profiles",
            "List Enrollment Status Page configurations.",
        ),
        listing(
            "list_android_management_profiles",
            "List Android configuration, enrollment and compliance profiles.",
        ),
        listing(
            "list_ios_management_profiles",
            "List iOS configuration, enrollment and compliance profiles.",
        ),
        listing("list_app_protection_policies", "List app protection policies."),
        listing("list_microsoft_tunnel_sites", "List Microsoft Tunnel sites."),
        listing(
            "list_microsoft_tunnel_servers",
            "List Microsoft Tunnel servers across all sites.",
        ),
        listing("list_intune_ad_connectors", "List Active Directory connectors."),
        listing("list_intune_certificate_connectors", "List certificate connectors."),
        listing("list_sharepoint_sites", "List SharePoint sites."),
        tool(
            "create_file_in_onedrive",
            "Create a text file in a user's OneDrive.",
            &text_file_props(("user_id", string_prop("Owner user ID"))),
            &["user_id", "file_name", "content"],
        ),
        tool(
            "create_file_in_sharepoint",
            "Create a text file in a SharePoint site's default library.",
            &text_file_props(("site_id", string_prop("Site ID"))),
            &["site_id", "file_name", "content"],
        ),
        tool(
            "create_csv_file",
            "Write rows to a CSV file in OneDrive or SharePoint.",
            &with_location(vec![
                ("file_name", string_prop("Name of the CSV file")),
                (
                    "data",
                    json!({
                        "type": "array",
                        "description": "Rows; each row is an array of cell values",
                        "items": {
                            "type": "array",
                            "items": {"type": ["string", "number", "boolean", "null"]},
                        },
                    }),
                ),
                (
                    "folder_path",
                    json!({"type": "string", "description": "Folder path relative to the drive root"}),
                ),
            ]),
            &["location_type", "location_id", "file_name", "data"],
        ),
        tool(
            "read_csv_file",
            "Read a CSV file from OneDrive or SharePoint.",
            &with_location(vec![("file_id", string_prop("Drive item ID"))]),
            &["location_type", "location_id", "file_id"],
        ),
        tool(
            "convert_file_to_pdf",
            "Convert a document to PDF and save it next to the source drive.",
            &with_location(vec![
                ("file_id", string_prop("Drive item ID of the source document")),
                (
                    "output_folder",
                    json!({"type": "string", "description": "Destination folder; drive root when omitted"}),
                ),
            ]),
            &["location_type", "location_id", "file_id"],
        ),
        tool(
            "export_powerpoint_slide_as_image",
            "Export a presentation slide as an image file.",
            &with_location(vec![
                ("file_id", string_prop("Drive item ID of the presentation")),
                (
                    "slide_index",
                    json!({"type": "integer", "minimum": 1, "description": "1-based slide number"}),
                ),
                (
                    "image_format",
                    json!({
                        "type": "string",
                        "enum": ["png", "jpg", "jpeg", "gif", "bmp", "tiff"],
                        "description": "Image format; png when omitted",
                    }),
                ),
                (
                    "output_folder",
                    json!({"type": "string", "description": "Destination folder; drive root when omitted"}),
                ),
            ]),
            &["location_type", "location_id", "file_id", "slide_index"],
        ),
    ]
}

static TOOL_CATALOG: Lazy<Vec<ToolDef>> = Lazy::new(build_catalog);

static TOOL_MAP: Lazy<HashMap<String, ToolDef>> = Lazy::new(|| {
    TOOL_CATALOG
        .iter()
        .cloned()
        .map(|tool| (tool.name.clone(), tool))
        .collect()
});

static TOOL_VALIDATORS: Lazy<HashMap<String, JSONSchema>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for tool in TOOL_CATALOG.iter() {
        if let Ok(schema) = JSONSchema::compile(&tool.input_schema) {
            map.insert(tool.name.clone(), schema);
        }
    }
    map
});

pub fn tool_catalog() -> &'static Vec<ToolDef> {
    &TOOL_CATALOG
}

pub fn tool_by_name(name: &str) -> Option<&'static ToolDef> {
    TOOL_MAP.get(name)
}

pub fn validate_tool_args(tool_name: &str, args: &Value) -> Result<(), McpError> {
    let Some(tool) = tool_by_name(tool_name) else {
        return Ok(());
    };
    let Some(schema) = TOOL_VALIDATORS.get(tool_name) else {
        return Ok(());
    };
    if let Err(errors) = schema.validate(args) {
        let message = format_schema_errors(tool_name, args, errors, &tool.input_schema);
        return Err(McpError::new(ErrorCode::InvalidParams, message));
    }
    Ok(())
}

fn format_schema_errors(
    tool_name: &str,
    args: &Value,
    errors: jsonschema::ErrorIterator,
    schema: &Value,
) -> String {
    let mut rendered = Vec::new();
    let mut did_you_means = Vec::new();
    let known_fields: Vec<String> = schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default();

    for err in errors.take(10) {
        let instance_path = if err.instance_path.to_string().is_empty() {
            "(root)".to_string()
        } else {
            err.instance_path.to_string()
        };
        match &err.kind {
            jsonschema::error::ValidationErrorKind::AdditionalProperties { unexpected } => {
                for unknown in unexpected {
                    rendered.push(format!("{}: unknown field '{}'", instance_path, unknown));
                    let suggestions = suggest(unknown, &known_fields, 3);
                    if !suggestions.is_empty() {
                        did_you_means.push(format!("field '{}': {}", unknown, suggestions.join(", ")));
                    }
                }
            }
            jsonschema::error::ValidationErrorKind::Enum { options } => {
                let allowed: Vec<String> = options
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();
                rendered.push(format!("{}: expected one of {}", instance_path, allowed.join(", ")));
                let received = value_at(args, &err.instance_path.to_string());
                let suggestions = suggest(received.as_str().unwrap_or(""), &allowed, 3);
                if !suggestions.is_empty() {
                    did_you_means.push(format!("{}: {}", instance_path, suggestions.join(", ")));
                }
            }
            jsonschema::error::ValidationErrorKind::Required { property } => {
                let prop = property
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| property.to_string());
                rendered.push(format!("{}: missing required field '{}'", instance_path, prop));
            }
            jsonschema::error::ValidationErrorKind::Type { kind } => {
                rendered.push(format!("{}: expected {}", instance_path, format_type_kind(kind)));
            }
            _ => rendered.push(format!("{}: {}", instance_path, err)),
        }
    }

    let mut lines = vec![format!("Invalid arguments for {}", tool_name)];
    lines.extend(rendered.iter().map(|line| format!("- {}", line)));
    if !did_you_means.is_empty() {
        lines.push(format!(
            "Did you mean: {}",
            did_you_means.iter().take(3).cloned().collect::<Vec<_>>().join(" | ")
        ));
    }
    lines.push(format!("Hint: tools/list has the input schema for '{}'", tool_name));
    lines.join("\n")
}

fn format_type_kind(kind: &jsonschema::error::TypeKind) -> String {
    match kind {
        jsonschema::error::TypeKind::Single(primitive) => primitive.to_string(),
        jsonschema::error::TypeKind::Multiple(types) => {
            let list: Vec<String> = (*types).into_iter().map(|t| t.to_string()).collect();
            if list.is_empty() {
                "unknown".to_string()
            } else {
                list.join(" | ")
            }
        }
    }
}

fn value_at(root: &Value, instance_path: &str) -> Value {
    let mut current = root;
    for segment in instance_path.trim_start_matches('/').split('/') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment).unwrap_or(&Value::Null),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|idx| items.get(idx))
                .unwrap_or(&Value::Null),
            _ => &Value::Null,
        };
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique_and_schemas_compile() {
        let mut names: Vec<&str> = tool_catalog().iter().map(|t| t.name.as_str()).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(TOOL_VALIDATORS.len(), total);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let err = validate_tool_args("get_user_info", &json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert!(err.message.contains("missing required field 'user_id'"));
    }

    #[test]
    fn unknown_field_gets_a_suggestion() {
        let err = validate_tool_args("get_group_members", &json!({"group_id": "g", "groupid": "g"}))
            .unwrap_err();
        assert!(err.message.contains("unknown field 'groupid'"));
        assert!(err.message.contains("group_id"));
    }

    #[test]
    fn location_type_is_an_enum() {
        let err = validate_tool_args(
            "read_csv_file",
            &json!({"location_type": "onedriv", "location_id": "u", "file_id": "f"}),
        )
        .unwrap_err();
        assert!(err.message.contains("expected one of onedrive, sharepoint"));
        assert!(err.message.contains("Did you mean"));
    }

    #[test]
    fn valid_arguments_pass() {
        validate_tool_args(
            "create_csv_file",
            &json!({
                "location_type": "sharepoint",
                "location_id": "site",
                "file_name": "out.csv",
                "data": [["a", 1, true, null]],
            }),
        )
        .expect("valid");
        validate_tool_args("list_users", &json!({})).expect("valid");
    }
}
