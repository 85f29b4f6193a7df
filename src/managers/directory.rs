use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::errors::{ApiError, ToolError};
use crate::managers::tables::{CREATED_USER_FIELDS, GROUPS, GROUP_MEMBER_FIELDS, USERS, USER_DETAIL_FIELDS};
use crate::services::graph_client::{ApiRequest, ApiVersion};
use crate::services::logger::Logger;
use crate::services::projection::project;
use crate::services::resources::{resource_result, CollectionSpec, ResourceService};
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_tool_error;

pub const DIRECTORY_TOOLS: &[&str] = &[
    "create_user",
    "get_user_info",
    "list_users",
    "list_groups",
    "get_group_members",
];

const PASSWORD_LENGTH: usize = 16;
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+?";

pub fn generate_temporary_password() -> String {
    let mut rng = rand::thread_rng();
    let classes = [UPPER, LOWER, DIGITS, SYMBOLS];
    let mut chars: Vec<u8> = classes
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    let all: Vec<u8> = classes.concat();
    while chars.len() < PASSWORD_LENGTH {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);
    chars.into_iter().map(char::from).collect()
}

#[derive(Clone)]
pub struct DirectoryManager {
    logger: Logger,
    validation: Validation,
    resources: ResourceService,
}

impl DirectoryManager {
    pub fn new(logger: Logger, validation: Validation, resources: ResourceService) -> Self {
        Self {
            logger: logger.child("directory"),
            validation,
            resources,
        }
    }

    async fn create_user(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let display_name = self.validation.required_string(args, "display_name")?;
        let mail_nickname = self.validation.required_string(args, "mail_nickname")?;
        let user_principal_name = self.validation.required_string(args, "user_principal_name")?;
        let password = generate_temporary_password();

        let body = json!({
            "accountEnabled": true,
            "displayName": display_name,
            "mailNickname": mail_nickname,
            "userPrincipalName": user_principal_name,
            "passwordProfile": {
                "forceChangePasswordNextSignIn": true,
                "password": password,
            },
        });
        let request = ApiRequest::post_json(ApiVersion::V1, ["users"], body);
        let result = self
            .resources
            .client()
            .get_object(&request, cancel)
            .await
            .map(|created| {
                let mut out = project(&created, CREATED_USER_FIELDS);
                if let Value::Object(map) = &mut out {
                    map.insert("temporaryPassword".to_string(), Value::String(password));
                }
                out
            });
        if result.is_ok() {
            self.logger.info(
                "User created",
                Some(&json!({"userPrincipalName": user_principal_name})),
            );
        }
        ToolOutput::from_api(result)
    }

    async fn get_user_info(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let user_id = self.validation.required_identifier(args, "user_id")?;
        let request = ApiRequest::get(ApiVersion::V1, ["users".to_string(), user_id]);
        let result = self
            .resources
            .client()
            .get_object(&request, cancel)
            .await
            .map(|user| project(&user, USER_DETAIL_FIELDS));
        ToolOutput::from_api(result)
    }

    async fn get_group_members(&self, args: &Value, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let group_id = self.validation.required_identifier(args, "group_id")?;
        let request = ApiRequest::get(
            ApiVersion::V1,
            ["groups".to_string(), group_id.clone(), "members".to_string()],
        );
        let result = self
            .resources
            .list_request(request, GROUP_MEMBER_FIELDS, cancel)
            .await
            .map(|members| {
                let mut out = resource_result("members", members);
                if let Value::Object(map) = &mut out {
                    map.insert("groupId".to_string(), Value::String(group_id));
                }
                out
            });
        ToolOutput::from_api(result)
    }

    async fn list(
        &self,
        key: &str,
        spec: &CollectionSpec,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let result: Result<Value, ApiError> = self
            .resources
            .list(spec, cancel)
            .await
            .map(|items| resource_result(key, items));
        ToolOutput::from_api(result)
    }
}

#[async_trait]
impl ToolHandler for DirectoryManager {
    async fn handle(&self, tool: &str, args: Value, cancel: CancellationToken) -> Result<ToolOutput, ToolError> {
        match tool {
            "create_user" => self.create_user(&args, &cancel).await,
            "get_user_info" => self.get_user_info(&args, &cancel).await,
            "list_users" => self.list("users", &USERS, &cancel).await,
            "list_groups" => self.list("groups", &GROUPS, &cancel).await,
            "get_group_members" => self.get_group_members(&args, &cancel).await,
            _ => Err(unknown_tool_error(
                tool,
                &DIRECTORY_TOOLS.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            )),
        }
    }
}
