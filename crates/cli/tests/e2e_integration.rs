//! End-to-end integration tests for the catalog copilot.
//!
//! These tests drive the assistant facade with a scripted provider and the
//! built-in catalog tools, from a user ask to the settled conversation.

use std::sync::{Arc, Mutex};

use copilot_agent::{Action, Assistant, Event, Settings};
use copilot_config::CatalogConfig;
use copilot_core::content::{ContentBlock, DocumentFormat, PromptContent, ToolResultBlock, ToolUse};
use copilot_core::context::{ContextAggregator, Contribution, PartialContext};
use copilot_core::provider::Prompt;
use copilot_core::tool::{ResultStatus, ToolError, ToolResult, tool_fn};
use copilot_providers::ScriptedProvider;
use copilot_tools::{NavigableRoute, NavigationError, Navigator, catalog_tools, default_routes};

// ── Harness ──────────────────────────────────────────────────────────────

/// Records every navigation and raises the destination's markers.
struct RecordingNavigator {
    visits: Mutex<Vec<String>>,
    page: Contribution,
}

impl RecordingNavigator {
    fn new(context: &ContextAggregator) -> Self {
        Self {
            visits: Mutex::new(Vec::new()),
            page: context.push(PartialContext::new()),
        }
    }

    fn visits(&self) -> Vec<String> {
        self.visits.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &NavigableRoute, location: &str) -> Result<(), NavigationError> {
        self.visits.lock().unwrap().push(location.to_string());
        let markers = default_routes()
            .into_iter()
            .find(|r| r.name == route.name)
            .map(|r| r.wait_for_markers)
            .unwrap_or_default();
        let mut page = PartialContext::new().with_message(format!("Viewing {location}"));
        for marker in markers {
            page = page.with_marker(marker, true);
        }
        self.page.update(page);
        Ok(())
    }
}

struct Harness {
    _catalog: tempfile::TempDir,
    provider: Arc<ScriptedProvider>,
    navigator: Arc<RecordingNavigator>,
    context: ContextAggregator,
    assistant: Assistant,
}

fn harness(provider: ScriptedProvider) -> Harness {
    let catalog = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(catalog.path().join("cells/raw")).unwrap();
    std::fs::write(catalog.path().join("cells/raw/counts.csv"), "gene,count\nTP53,12\n").unwrap();

    let provider = Arc::new(provider);
    let context = ContextAggregator::new();
    let navigator = Arc::new(RecordingNavigator::new(&context));
    let tools = catalog_tools(
        &CatalogConfig {
            root: catalog.path().to_path_buf(),
            ..CatalogConfig::default()
        },
        default_routes(),
        navigator.clone(),
        context.clone(),
    );
    let assistant = Assistant::new(provider.clone(), context.clone(), &Settings::default())
        .with_tools(tools);

    Harness {
        _catalog: catalog,
        provider,
        navigator,
        context,
        assistant,
    }
}

fn call(id: &str, name: &str, input: serde_json::Value) -> ToolUse {
    ToolUse {
        tool_use_id: id.into(),
        name: name.into(),
        input,
    }
}

fn tool_results(prompt: &Prompt) -> Vec<ToolResultBlock> {
    prompt
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            PromptContent::ToolResult(r) => Some(r.clone()),
            _ => None,
        })
        .collect()
}

fn first_text(result: &ToolResultBlock) -> &str {
    result.content[0].as_text().unwrap()
}

// ── E2E: get_object ──────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_get_object_attaches_document() {
    let h = harness(
        ScriptedProvider::new()
            .with_tool_uses(vec![call(
                "toolu_1",
                "get_object",
                serde_json::json!({"bucket": "cells", "key": "raw/counts.csv"}),
            )])
            .with_text("TP53 has 12 counts."),
    );

    h.assistant.assist(Some("What's in counts.csv?".into()));
    let idle = h.assistant.settled().await;
    assert!(idle.error().is_none());
    assert_eq!(h.provider.call_count(), 2);

    let prompts = h.provider.prompts();
    let results = tool_results(&prompts[1]);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Success);
    assert!(first_text(&results[0]).contains("<object-metadata>"));
    assert!(first_text(&results[0]).contains("\"key\": \"raw/counts.csv\""));
    match &results[0].content[1] {
        ContentBlock::Document { format, data, .. } => {
            assert_eq!(*format, DocumentFormat::Csv);
            assert_eq!(data, b"gene,count\nTP53,12\n");
        }
        other => panic!("expected a document, got {other:?}"),
    }

    let last = idle.events().last().unwrap();
    assert!(matches!(last, Event::Message(m) if m.content.as_text() == Some("TP53 has 12 counts.")));
}

#[tokio::test]
async fn e2e_get_object_refuses_path_traversal() {
    let h = harness(
        ScriptedProvider::new()
            .with_tool_uses(vec![call(
                "toolu_1",
                "get_object",
                serde_json::json!({"bucket": "cells", "key": "../../etc/passwd"}),
            )])
            .with_text("I can't read that."),
    );

    h.assistant.assist(Some("show me /etc/passwd".into()));
    h.assistant.settled().await;

    let prompts = h.provider.prompts();
    let results = tool_results(&prompts[1]);
    assert_eq!(results[0].status, ResultStatus::Error);
    assert!(first_text(&results[0]).contains("invalid key"));
}

// ── E2E: navigate ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_navigate_waits_for_page_markers() {
    let h = harness(
        ScriptedProvider::new()
            .with_tool_uses(vec![call(
                "toolu_nav",
                "navigate",
                serde_json::json!({"route": {"name": "search", "params": {"q": "TP53"}}}),
            )])
            .with_text("Here are the search results."),
    );

    h.assistant.assist(Some("search for TP53".into()));
    let idle = h.assistant.settled().await;
    assert!(idle.error().is_none());
    assert_eq!(h.navigator.visits(), vec!["/search?q=TP53"]);
    assert_eq!(h.context.markers().get("searchResultsReady"), Some(&true));

    let prompts = h.provider.prompts();
    let results = tool_results(&prompts[1]);
    assert_eq!(first_text(&results[0]), "Navigating to the 'search' route.");
    // The follow-up request sees the page the tool navigated to.
    let head = prompts[1].messages.first().content.clone();
    assert!(matches!(
        head,
        PromptContent::Content(ContentBlock::Text { text }) if text.contains("Viewing /search?q=TP53")
    ));
}

#[tokio::test]
async fn e2e_navigate_rejects_unknown_route() {
    let h = harness(
        ScriptedProvider::new()
            .with_tool_uses(vec![call(
                "toolu_nav",
                "navigate",
                serde_json::json!({"route": {"name": "admin"}}),
            )])
            .with_text("That page does not exist."),
    );

    h.assistant.assist(Some("open the admin page".into()));
    h.assistant.settled().await;

    assert!(h.navigator.visits().is_empty());
    let prompts = h.provider.prompts();
    let results = tool_results(&prompts[1]);
    assert_eq!(results[0].status, ResultStatus::Error);
    assert!(first_text(&results[0]).starts_with("Invalid input for tool \"navigate\""));
}

// ── E2E: conversation management ─────────────────────────────────────────

#[tokio::test]
async fn e2e_discarded_messages_leave_the_prompt() {
    let h = harness(
        ScriptedProvider::new()
            .with_text("First answer.")
            .with_text("Second answer."),
    );

    h.assistant.assist(Some("secret question".into()));
    let idle = h.assistant.settled().await;
    let question = idle.events()[0].id().to_string();

    h.assistant.dispatch(Action::discard(question));
    h.assistant.assist(Some("another question".into()));
    let idle = h.assistant.settled().await;
    assert_eq!(idle.events().len(), 4);
    assert!(idle.events()[0].is_discarded());

    let prompts = h.provider.prompts();
    let texts: Vec<&str> = prompts[1]
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            PromptContent::Content(block) => block.as_text(),
            _ => None,
        })
        .collect();
    assert!(!texts.contains(&"secret question"));
    assert!(texts.contains(&"First answer."));
    assert!(texts.contains(&"another question"));
}

#[tokio::test]
async fn e2e_page_tools_follow_mount_and_unmount() {
    let h = harness(ScriptedProvider::new().with_text("one").with_text("two"));
    let page_tool = tool_fn(Some("Rows in the open table"), serde_json::json!({}), |_| async {
        Ok::<_, ToolError>(Some(ToolResult::succeed(Vec::<ContentBlock>::new())))
    });
    let page = h
        .context
        .push(PartialContext::new().with_tool("table_rows", page_tool));

    h.assistant.assist(Some("first".into()));
    h.assistant.settled().await;
    page.unsubscribe();
    h.assistant.assist(Some("second".into()));
    h.assistant.settled().await;

    let prompts = h.provider.prompts();
    assert_eq!(
        prompts[0].tool_config.tools.names(),
        vec!["get_object", "navigate", "table_rows"]
    );
    assert_eq!(prompts[1].tool_config.tools.names(), vec!["get_object", "navigate"]);
}

#[tokio::test]
async fn e2e_clear_starts_over() {
    let h = harness(ScriptedProvider::new().with_text("hello").with_text("hello again"));

    h.assistant.assist(Some("hi".into()));
    h.assistant.settled().await;
    h.assistant.dispatch(Action::Clear);
    h.assistant.assist(Some("hi again".into()));
    let idle = h.assistant.settled().await;

    assert_eq!(idle.events().len(), 2);
    let prompts = h.provider.prompts();
    // head, the new ask, and the closing task block
    assert_eq!(prompts[1].messages.len(), 3);
}

#[tokio::test]
async fn e2e_route_params_are_forwarded() {
    let h = harness(
        ScriptedProvider::new()
            .with_tool_uses(vec![call(
                "toolu_nav",
                "navigate",
                serde_json::json!({"route": {"name": "bucket.overview", "params": {"bucket": "cells"}}}),
            )])
            .with_text("Opened."),
    );

    h.assistant.assist(Some("open the cells bucket".into()));
    h.assistant.settled().await;
    assert_eq!(h.navigator.visits(), vec!["/b/cells"]);
}
