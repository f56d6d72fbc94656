//! End-to-end routing behavior over the public API, driven by scripted
//! in-memory backends; the last test exercises a real spawned backend and is
//! ignored by default because it builds the `echo-server` fixture via cargo.

use async_trait::async_trait;
use mcpmux::{
    BackendConfig, BackendConnection, BackendRegistry, BackendSession, Dispatcher, MuxError,
    RetryConfig,
};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use std::sync::Arc;
use std::sync::Mutex;

struct ScriptedBackend {
    name: String,
    tools: Vec<&'static str>,
    dead: bool,
    seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(name: &str, tools: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: tools.to_vec(),
            dead: false,
            seen: Mutex::new(vec![]),
        })
    }

    fn dead(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            tools: vec![],
            dead: true,
            seen: Mutex::new(vec![]),
        })
    }
}

#[async_trait]
impl BackendConnection for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, MuxError> {
        if self.dead {
            return Err(MuxError::BackendUnavailable {
                name: self.name.clone(),
                reason: "process exited".to_string(),
            });
        }
        Ok(self
            .tools
            .iter()
            .map(|tool| {
                Tool::new(
                    tool.to_string(),
                    format!("{tool} tool"),
                    Arc::new(JsonObject::new()),
                )
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool: &str,
        _arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, MuxError> {
        if self.dead {
            return Err(MuxError::BackendUnavailable {
                name: self.name.clone(),
                reason: "process exited".to_string(),
            });
        }
        self.seen.lock().unwrap().push(tool.to_string());
        if self.tools.contains(&tool) {
            Ok(CallToolResult::success(vec![Content::text(format!(
                "{}/{}",
                self.name, tool
            ))]))
        } else {
            Err(MuxError::ToolInvocation {
                backend: self.name.clone(),
                tool: tool.to_string(),
                message: format!("Unknown tool: {tool}"),
            })
        }
    }

    async fn close(&self) -> Result<(), MuxError> {
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.dead
    }
}

fn text_of(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|t| t.text.clone()))
        .collect()
}

#[tokio::test]
async fn test_connected_backend_appears_in_listing_until_disconnected() {
    let registry = BackendRegistry::new();
    registry
        .register("math", ScriptedBackend::new("math", &["add"]))
        .await
        .unwrap();
    assert!(registry.list().await.contains(&"math".to_string()));

    registry.unregister("math").await;
    assert!(!registry.list().await.contains(&"math".to_string()));

    // disconnecting again never raises
    registry.unregister("math").await;
}

#[tokio::test]
async fn test_prefixed_call_forwards_stripped_name_and_returns_result_verbatim() {
    let registry = Arc::new(BackendRegistry::new());
    let math = ScriptedBackend::new("math", &["add"]);
    registry.register("math", math.clone()).await.unwrap();
    let dispatcher = Dispatcher::new(registry);

    let result = dispatcher.call_tool("math:add", None).await.unwrap();
    assert_eq!(text_of(&result), "math/add");
    assert_eq!(*math.seen.lock().unwrap(), vec!["add"]);
}

#[tokio::test]
async fn test_prefixed_call_to_unregistered_backend_forwards_nothing() {
    let registry = Arc::new(BackendRegistry::new());
    let math = ScriptedBackend::new("math", &["add"]);
    registry.register("math", math.clone()).await.unwrap();
    let dispatcher = Dispatcher::new(registry);

    let outcome = dispatcher.call_tool("ghost:add", None).await;
    assert!(matches!(outcome, Err(MuxError::BackendNotFound(_))));
    assert!(math.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_bare_call_resolves_to_the_backend_that_accepts_it() {
    let registry = Arc::new(BackendRegistry::new());
    registry
        .register("a", ScriptedBackend::new("a", &["x"]))
        .await
        .unwrap();
    registry
        .register("b", ScriptedBackend::new("b", &["tool"]))
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(registry);

    let result = dispatcher.call_tool("tool", None).await.unwrap();
    assert_eq!(text_of(&result), "b/tool");

    let outcome = dispatcher.call_tool("nowhere", None).await;
    assert!(matches!(outcome, Err(MuxError::ToolNotFound(_))));
}

#[tokio::test]
async fn test_aggregated_listing_is_prefixed_and_order_independent_in_content() {
    let ab = Arc::new(BackendRegistry::new());
    ab.register("A", ScriptedBackend::new("A", &["x"])).await.unwrap();
    ab.register("B", ScriptedBackend::new("B", &["y"])).await.unwrap();

    let ba = Arc::new(BackendRegistry::new());
    ba.register("B", ScriptedBackend::new("B", &["y"])).await.unwrap();
    ba.register("A", ScriptedBackend::new("A", &["x"])).await.unwrap();

    let mut names_ab: Vec<String> = Dispatcher::new(ab)
        .list_tools(None)
        .await
        .unwrap()
        .iter()
        .map(|tool| tool.name.to_string())
        .collect();
    let mut names_ba: Vec<String> = Dispatcher::new(ba)
        .list_tools(None)
        .await
        .unwrap()
        .iter()
        .map(|tool| tool.name.to_string())
        .collect();

    names_ab.sort();
    names_ba.sort();
    assert_eq!(names_ab, vec!["A:x", "B:y"]);
    assert_eq!(names_ab, names_ba);
}

#[tokio::test]
async fn test_dead_backend_failure_does_not_poison_healthy_backends() {
    let registry = Arc::new(BackendRegistry::new());
    registry.register("math", ScriptedBackend::dead("math")).await.unwrap();
    registry
        .register("notes", ScriptedBackend::new("notes", &["list-notes"]))
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(registry);

    let outcome = dispatcher.call_tool("math:add", None).await;
    assert!(matches!(outcome, Err(MuxError::BackendUnavailable { .. })));

    let result = dispatcher.call_tool("notes:list-notes", None).await.unwrap();
    assert_eq!(text_of(&result), "notes/list-notes");
}

#[tokio::test]
#[ignore = "spawns the echo-server fixture via cargo; run with --ignored"]
async fn test_round_trip_against_spawned_echo_server() {
    let config = BackendConfig::builder()
        .name("echo")
        .command("cargo")
        .args(["run", "--quiet", "-p", "echo-server"])
        .retry(RetryConfig::no_retry())
        .build()
        .unwrap();

    let session = Arc::new(BackendSession::connect(config).await.unwrap());
    let registry = Arc::new(BackendRegistry::new());
    registry.register("echo", session).await.unwrap();
    let dispatcher = Dispatcher::new(registry.clone());

    let tools = dispatcher.list_tools(Some("echo")).await.unwrap();
    assert!(!tools.is_empty());
    assert!(tools.iter().all(|tool| tool.name.starts_with("echo:")));

    let mut arguments = JsonObject::new();
    arguments.insert(
        "message".to_string(),
        serde_json::Value::String("ping".to_string()),
    );
    let result = dispatcher
        .call_tool("echo:echo", Some(arguments))
        .await
        .unwrap();
    assert_eq!(text_of(&result), "ping");

    registry.close_all().await;
}
