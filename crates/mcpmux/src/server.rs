use mcpmux_core::{
    BackendConfig, BackendConnection, BackendRegistry, BackendSession, Dispatcher, MuxError,
    RetryConfig,
};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData, Implementation, JsonObject,
    ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
    ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::{RoleServer, ServerHandler};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

const CONNECT_SERVER: &str = "connect-server";
const DISCONNECT_SERVER: &str = "disconnect-server";
const LIST_SERVERS: &str = "list-servers";
const LIST_TOOLS: &str = "list-tools";

/// Session settings applied to every backend connected through the endpoint.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            retry: RetryConfig::default(),
        }
    }
}

/// The aggregated MCP endpoint.
///
/// Serves the management tools (`connect-server`, `disconnect-server`,
/// `list-servers`, `list-tools`) next to every connected backend's tools
/// under the `backend:tool` namespacing convention, and routes everything
/// else through the [`Dispatcher`]. The registry and dispatcher are created
/// once and live for the server's lifetime, so backends connected through
/// one tool call stay connected for the next.
#[derive(Clone)]
pub struct MuxServer {
    registry: Arc<BackendRegistry>,
    dispatcher: Arc<Dispatcher>,
    defaults: SessionDefaults,
}

#[derive(Debug, Deserialize)]
struct ConnectArgs {
    name: String,
    command: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisconnectArgs {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListToolsArgs {
    #[serde(default)]
    server: Option<String>,
}

impl MuxServer {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self::with_defaults(registry, SessionDefaults::default())
    }

    pub fn with_defaults(registry: Arc<BackendRegistry>, defaults: SessionDefaults) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry.clone())),
            registry,
            defaults,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    async fn handle_connect(&self, args: ConnectArgs) -> Result<CallToolResult, ErrorData> {
        let Some((program, rest)) = args.command.split_first() else {
            return Err(ErrorData::invalid_params("command must not be empty", None));
        };

        let mut builder = BackendConfig::builder();
        builder
            .name(args.name.clone())
            .command(program.clone())
            .args(rest.iter())
            .request_timeout_ms(self.defaults.request_timeout_ms)
            .retry(self.defaults.retry.clone());
        if let Some(cwd) = args.cwd {
            builder.working_directory(cwd);
        }
        let config = builder.build().map_err(|e| {
            ErrorData::invalid_params(format!("invalid backend configuration: {e}"), None)
        })?;

        // check before paying for a spawn; register still guards the race
        if self.registry.get(&args.name).await.is_some() {
            return Ok(error_result(&MuxError::DuplicateBackend(args.name)));
        }

        let session: Arc<BackendSession> = match BackendSession::connect(config).await {
            Ok(session) => Arc::new(session),
            Err(error) => return Ok(error_result(&error)),
        };

        match self.registry.register(args.name.clone(), session.clone()).await {
            Ok(()) => Ok(CallToolResult::success(vec![Content::text(format!(
                "Backend '{}' connected successfully",
                args.name
            ))])),
            Err(error) => {
                // lost a registration race; tear down the session we spawned
                if let Err(close_error) = session.close().await {
                    warn!(backend = %args.name, error = %close_error, "failed to close orphaned session");
                }
                Ok(error_result(&error))
            }
        }
    }

    async fn handle_disconnect(&self, args: DisconnectArgs) -> CallToolResult {
        self.registry.unregister(&args.name).await;
        CallToolResult::success(vec![Content::text(format!(
            "Backend '{}' disconnected successfully",
            args.name
        ))])
    }

    async fn handle_list_servers(&self) -> CallToolResult {
        let names = self.registry.list().await;
        let text = if names.is_empty() {
            "No servers connected".to_string()
        } else {
            names.join("\n")
        };
        CallToolResult::success(vec![Content::text(text)])
    }

    async fn handle_list_tools(&self, args: ListToolsArgs) -> CallToolResult {
        match self.dispatcher.list_tools(args.server.as_deref()).await {
            Ok(tools) => {
                let listing: Vec<Value> = tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                        })
                    })
                    .collect();
                match serde_json::to_string_pretty(&listing) {
                    Ok(text) => CallToolResult::success(vec![Content::text(text)]),
                    Err(e) => error_result(&MuxError::Other(anyhow::anyhow!(
                        "failed to render tool listing: {e}"
                    ))),
                }
            }
            Err(error) => error_result(&error),
        }
    }

    async fn dispatch(&self, identifier: &str, arguments: Option<JsonObject>) -> CallToolResult {
        match self.dispatcher.call_tool(identifier, arguments).await {
            Ok(result) => result,
            Err(error) => {
                info!(%identifier, %error, "tool dispatch failed");
                error_result(&error)
            }
        }
    }
}

impl ServerHandler for MuxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Aggregates multiple backend MCP servers behind one endpoint. \
                 Connect a backend with connect-server, then address its tools as \
                 '<backend>:<tool>'. A bare tool name is offered to each connected \
                 backend in connection order until one accepts it."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let mut tools = management_tools();
        match self.dispatcher.list_tools(None).await {
            Ok(backend_tools) => tools.extend(backend_tools),
            Err(error) => warn!(%error, "failed to aggregate backend tools"),
        }
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        match request.name.as_ref() {
            CONNECT_SERVER => self.handle_connect(parse_args(request.arguments)?).await,
            DISCONNECT_SERVER => Ok(self.handle_disconnect(parse_args(request.arguments)?).await),
            LIST_SERVERS => Ok(self.handle_list_servers().await),
            LIST_TOOLS => Ok(self.handle_list_tools(parse_args(request.arguments)?).await),
            identifier => {
                let identifier = identifier.to_string();
                Ok(self.dispatch(&identifier, request.arguments).await)
            }
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult::default())
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        Ok(ListPromptsResult::default())
    }
}

/// Render a routing failure as an in-band error result. Backend failures
/// surface on the tool-result error channel, never as a fault of the
/// serving loop.
fn error_result(error: &MuxError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(error.to_string())])
}

fn parse_args<T: DeserializeOwned>(arguments: Option<JsonObject>) -> Result<T, ErrorData> {
    serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| ErrorData::invalid_params(format!("invalid arguments: {e}"), None))
}

fn schema(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

/// The endpoint's own registry-management tools.
fn management_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            CONNECT_SERVER,
            "Spawn a backend MCP server and connect to it over stdio. \
             Its tools become available as '<name>:<tool>'.",
            Arc::new(schema(json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Logical backend name; becomes the tool prefix"
                    },
                    "command": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Argument vector; the first element is the executable"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory for the spawned process"
                    }
                },
                "required": ["name", "command"]
            }))),
        ),
        Tool::new(
            DISCONNECT_SERVER,
            "Disconnect a backend and terminate its process. \
             Disconnecting an unknown backend is a no-op.",
            Arc::new(schema(json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Backend to disconnect"}
                },
                "required": ["name"]
            }))),
        ),
        Tool::new(
            LIST_SERVERS,
            "List the names of all connected backends.",
            Arc::new(schema(json!({
                "type": "object",
                "properties": {}
            }))),
        ),
        Tool::new(
            LIST_TOOLS,
            "List tools from one backend, or from all backends, \
             with names in the '<backend>:<tool>' form.",
            Arc::new(schema(json!({
                "type": "object",
                "properties": {
                    "server": {
                        "type": "string",
                        "description": "Restrict the listing to this backend"
                    }
                }
            }))),
        ),
    ]
}
