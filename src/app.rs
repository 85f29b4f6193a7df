use crate::config::AppConfig;
use crate::errors::ToolError;
use crate::managers::directory::{DirectoryManager, DIRECTORY_TOOLS};
use crate::managers::files::{FilesManager, FILE_TOOLS};
use crate::managers::intune::{IntuneManager, INTUNE_TOOLS};
use crate::mcp::catalog::tool_catalog;
use crate::mcp::server::McpServer;
use crate::services::credential::{resolve_credential, AmbientEnvironment, Credential};
use crate::services::drive::DriveService;
use crate::services::graph_client::GraphClient;
use crate::services::logger::Logger;
use crate::services::paginator::Paginator;
use crate::services::resources::ResourceService;
use crate::services::token_cache::TokenCache;
use crate::services::tool_executor::{ToolExecutor, ToolHandler};
use crate::services::transport::{HttpTransport, ReqwestTransport};
use crate::services::validation::Validation;
use std::collections::HashMap;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub config: AppConfig,
    pub client: Arc<GraphClient>,
    pub tool_executor: Arc<ToolExecutor>,
}

impl App {
    fn validate_tool_wiring(handlers: &HashMap<String, Arc<dyn ToolHandler>>) -> Result<(), ToolError> {
        let mut missing: Vec<String> = tool_catalog()
            .iter()
            .filter(|tool| !handlers.contains_key(&tool.name))
            .map(|tool| tool.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        Err(ToolError::internal("Tool wiring is incomplete")
            .with_hint("Every catalog tool must have a registered handler.")
            .with_details(serde_json::json!({ "missing_tools": missing })))
    }

    pub fn initialize(config: AppConfig, logger: Logger) -> Result<Self, ToolError> {
        let transport: Arc<dyn HttpTransport> = Arc::new(
            ReqwestTransport::new().map_err(|err| ToolError::internal(err.to_string()))?,
        );
        let ambient = AmbientEnvironment::detect(&config);
        let credential = resolve_credential(&config, transport.clone(), &ambient, &logger)?;
        Self::with_parts(config, logger, transport, credential)
    }

    pub fn with_parts(
        config: AppConfig,
        logger: Logger,
        transport: Arc<dyn HttpTransport>,
        credential: Arc<dyn Credential>,
    ) -> Result<Self, ToolError> {
        let validation = Validation::new();
        let tokens = Arc::new(TokenCache::new(credential, config.token_skew, logger.clone()));
        let client = Arc::new(GraphClient::from_config(&config, transport, tokens, logger.clone()));
        let paginator = Paginator::new(client.clone());
        let resources = ResourceService::new(paginator, logger.clone());
        let drive = DriveService::new(client.clone(), logger.clone());

        let directory: Arc<dyn ToolHandler> = Arc::new(DirectoryManager::new(
            logger.clone(),
            validation.clone(),
            resources.clone(),
        ));
        let intune: Arc<dyn ToolHandler> = Arc::new(IntuneManager::new(logger.clone(), resources.clone()));
        let files: Arc<dyn ToolHandler> = Arc::new(FilesManager::new(
            logger.clone(),
            validation,
            resources,
            drive,
        ));

        let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
        for (tools, handler) in [
            (DIRECTORY_TOOLS, &directory),
            (INTUNE_TOOLS, &intune),
            (FILE_TOOLS, &files),
        ] {
            for tool in tools {
                handlers.insert((*tool).to_string(), Arc::clone(handler));
            }
        }
        Self::validate_tool_wiring(&handlers)?;

        let tool_executor = Arc::new(ToolExecutor::new(logger.clone(), handlers));
        Ok(Self {
            logger,
            config,
            client,
            tool_executor,
        })
    }

    pub fn server(&self) -> McpServer {
        McpServer::new(
            self.logger.clone(),
            self.tool_executor.clone(),
            self.config.tool_call_timeout,
        )
    }
}
