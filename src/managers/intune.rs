use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::constants::graph;
use crate::errors::{ApiError, ToolError};
use crate::managers::tables::{
    PlatformSections, AD_CONNECTORS, ANDROID_SECTIONS, APP_PROTECTION_POLICIES, ASSIGNMENT_FILTERS,
    AUTOPILOT_DEVICES, AUTOPILOT_PROFILES, CERTIFICATE_CONNECTORS, COMPLIANCE_POLICIES,
    CONFIGURATION_POLICIES, ENROLLMENT_STATUS_PAGES, IOS_SECTIONS, MANAGED_DEVICES, MOBILE_APPS,
    POWERSHELL_SCRIPTS, SHELL_SCRIPTS, TUNNEL_SERVER_FIELDS, TUNNEL_SITES,
};
use crate::services::graph_client::{ApiRequest, ApiVersion};
use crate::services::logger::Logger;
use crate::services::projection::project_all;
use crate::services::resources::{resource_result, CollectionSpec, ResourceService};
use crate::services::tool_executor::{ToolHandler, ToolOutput};
use crate::utils::tool_errors::unknown_tool_error;

pub const INTUNE_TOOLS: &[&str] = &[
    "list_intune_devices",
    "list_intune_compliance_policies",
    "list_intune_configuration_policies",
    "list_intune_filters",
    "list_intune_scripts",
    "list_intune_applications",
    "list_autopilot_profiles",
    "list_autopilot_devices",
    "list_enrollment_status_page_profiles",
    "list_android_management_profiles",
    "list_ios_management_profiles",
    "list_app_protection_policies",
    "list_microsoft_tunnel_sites",
    "list_microsoft_tunnel_servers",
    "list_intune_ad_connectors",
    "list_intune_certificate_connectors",
];

fn simple_listing(tool: &str) -> Option<(&'static str, &'static CollectionSpec)> {
    let listing: (&'static str, &'static CollectionSpec) = match tool {
        "list_intune_devices" => ("devices", &MANAGED_DEVICES),
        "list_intune_compliance_policies" => ("policies", &COMPLIANCE_POLICIES),
        "list_intune_configuration_policies" => ("policies", &CONFIGURATION_POLICIES),
        "list_intune_filters" => ("filters", &ASSIGNMENT_FILTERS),
        "list_intune_applications" => ("applications", &MOBILE_APPS),
        "list_autopilot_profiles" => ("profiles", &AUTOPILOT_PROFILES),
        "list_autopilot_devices" => ("devices", &AUTOPILOT_DEVICES),
        "list_enrollment_status_page_profiles" => ("esp_profiles", &ENROLLMENT_STATUS_PAGES),
        "list_app_protection_policies" => ("app_protection_policies", &APP_PROTECTION_POLICIES),
        "list_microsoft_tunnel_sites" => ("tunnel_sites", &TUNNEL_SITES),
        "list_intune_ad_connectors" => ("ad_connectors", &AD_CONNECTORS),
        "list_intune_certificate_connectors" => ("certificate_connectors", &CERTIFICATE_CONNECTORS),
        _ => return None,
    };
    Some(listing)
}

/// `{device_configurations, enrollment_configurations, compliance_policies,
/// total_count}` from three filtered listings.
pub fn platform_result(sections: [Vec<Value>; 3]) -> Value {
    let [device_configurations, enrollment_configurations, compliance_policies] = sections;
    let total = device_configurations.len() + enrollment_configurations.len() + compliance_policies.len();
    json!({
        "device_configurations": device_configurations,
        "enrollment_configurations": enrollment_configurations,
        "compliance_policies": compliance_policies,
        "total_count": total,
    })
}

fn site_servers(site: &Value, raw: Vec<Value>) -> Vec<Value> {
    let site_name = site.get("displayName").cloned().unwrap_or(Value::Null);
    let site_id = site.get("id").cloned().unwrap_or(Value::Null);
    project_all(&raw, TUNNEL_SERVER_FIELDS)
        .into_iter()
        .map(|mut server| {
            if let Value::Object(map) = &mut server {
                map.insert("siteName".to_string(), site_name.clone());
                map.insert("siteId".to_string(), site_id.clone());
            }
            server
        })
        .collect()
}

fn site_servers_request(site: &Value) -> Option<ApiRequest> {
    let id = site.get(graph::ID_FIELD).and_then(Value::as_str)?;
    Some(ApiRequest::get(
        ApiVersion::Beta,
        ["deviceManagement", "microsoftTunnelSites", id, "microsoftTunnelServers"],
    ))
}

#[derive(Clone)]
pub struct IntuneManager {
    logger: Logger,
    resources: ResourceService,
}

impl IntuneManager {
    pub fn new(logger: Logger, resources: ResourceService) -> Self {
        Self {
            logger: logger.child("intune"),
            resources,
        }
    }

    async fn list_scripts(&self, cancel: &CancellationToken) -> Result<Value, ApiError> {
        let lists = self
            .resources
            .list_many(&[POWERSHELL_SCRIPTS, SHELL_SCRIPTS], cancel)
            .await?;
        let scripts: Vec<Value> = lists.into_iter().flatten().collect();
        Ok(resource_result("scripts", scripts))
    }

    async fn list_platform(&self, sections: &PlatformSections, cancel: &CancellationToken) -> Result<Value, ApiError> {
        let lists = self.resources.list_many(&sections.specs(), cancel).await?;
        let sections: [Vec<Value>; 3] = lists
            .try_into()
            .map_err(|_| ApiError::invalid_request("platform view expects three sections"))?;
        Ok(platform_result(sections))
    }

    async fn list_tunnel_servers(&self, cancel: &CancellationToken) -> Result<Value, ApiError> {
        let sites = self.resources.fetch_raw(&TUNNEL_SITES, cancel).await?;
        let site_count = sites.len();
        let servers = self
            .resources
            .fan_out(sites, cancel, site_servers_request, site_servers)
            .await?;
        self.logger.debug(
            "Tunnel servers collected",
            Some(&json!({"sites": site_count, "servers": servers.len()})),
        );
        Ok(resource_result("tunnel_servers", servers))
    }
}

#[async_trait]
impl ToolHandler for IntuneManager {
    async fn handle(&self, tool: &str, _args: Value, cancel: CancellationToken) -> Result<ToolOutput, ToolError> {
        if let Some((key, spec)) = simple_listing(tool) {
            let result = self
                .resources
                .list(spec, &cancel)
                .await
                .map(|items| resource_result(key, items));
            return ToolOutput::from_api(result);
        }
        let result = match tool {
            "list_intune_scripts" => self.list_scripts(&cancel).await,
            "list_android_management_profiles" => self.list_platform(&ANDROID_SECTIONS, &cancel).await,
            "list_ios_management_profiles" => self.list_platform(&IOS_SECTIONS, &cancel).await,
            "list_microsoft_tunnel_servers" => self.list_tunnel_servers(&cancel).await,
            _ => {
                return Err(unknown_tool_error(
                    tool,
                    &INTUNE_TOOLS.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                ))
            }
        };
        ToolOutput::from_api(result)
    }
}
