//! `copilot chat`: Interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use copilot_agent::{Action, Assistant, ConversationState, Event, Settings};
use copilot_config::AppConfig;
use copilot_core::content::ContentBlock;
use copilot_core::context::ContextAggregator;
use copilot_core::provider::Role;
use copilot_tools::{ContextFileLoader, ContextFiles, catalog_tools, default_routes};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::viewport::Viewport;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Fail early with setup instructions when no key is set
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    COPILOT_API_KEY=sk-ant-...     (generic)");
        eprintln!("    ANTHROPIC_API_KEY=sk-ant-...   (Anthropic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = copilot_providers::build_from_config(&config)?;
    let context = ContextAggregator::new();
    let routes = default_routes();
    let files = ContextFiles::new(&context, ContextFileLoader::new(&config.catalog.root));
    let viewport = Arc::new(Viewport::new(&context, &routes).with_context_files(files));
    let tools = catalog_tools(&config.catalog, routes, viewport.clone(), context.clone());
    let settings = Settings::from(&config.assistant);
    let assistant = Assistant::new(provider, context, &settings).with_tools(tools);
    let mut printed = 0;

    if let Some(msg) = message {
        assistant.assist(Some(msg));
        let state = settle(&assistant).await;
        // Skip echoing the user's own message.
        print_new_events(&state, 1);
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║       Catalog Copilot — Interactive Mode     ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Assistant: {}", settings.name);
    println!("  Provider:  {}", config.provider);
    println!("  Model:     {}", config.model_for(&config.provider));
    println!("  Catalog:   {}", config.catalog.root.display());
    println!();
    println!("  Type your message and press Enter. Ctrl+C cancels a running request.");
    println!("  Commands: /history, /discard <id>, /clear, /exit");
    println!();
    assistant.show();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Command::Exit => break,
            Command::Clear => {
                assistant.dispatch(Action::Clear);
                assistant.settled().await;
                printed = 0;
                println!("  (conversation cleared)\n");
            }
            Command::History => {
                for event in assistant.state().events() {
                    println!("  {}", describe_event(event));
                }
                println!();
            }
            Command::Discard(id) => {
                assistant.dispatch(Action::discard(id.clone()));
                let state = assistant.settled().await;
                let found = state.events().iter().any(|e| e.id() == id && e.is_discarded());
                if found {
                    println!("  (discarded {id})\n");
                } else {
                    println!("  (no event {id})\n");
                }
            }
            Command::Unknown(cmd) => println!("  Unknown command: {cmd}\n"),
            Command::Ask(text) => {
                assistant.dispatch(Action::ask(text));
                let state = settle(&assistant).await;
                printed = print_new_events(&state, printed + 1);
            }
        }
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

/// Wait for the conversation to settle; Ctrl+C aborts the running round.
async fn settle(assistant: &Assistant) -> ConversationState {
    eprint!("  ...");
    let state = tokio::select! {
        state = assistant.settled() => state,
        _ = tokio::signal::ctrl_c() => {
            assistant.dispatch(Action::Abort);
            eprint!(" (cancelled)");
            assistant.settled().await
        }
    };
    eprint!("\r                \r");
    state
}

/// Print events from `from` on; returns the new printed count.
fn print_new_events(state: &ConversationState, from: usize) -> usize {
    let events = state.events();
    println!();
    for event in events.iter().skip(from) {
        for line in render_event(event) {
            println!("  {line}");
        }
    }
    if let Some(error) = state.error() {
        eprintln!("  [Error] {}", error.message);
        eprintln!("          {}", error.details);
    }
    println!();
    events.len()
}

#[derive(Debug, PartialEq)]
enum Command {
    Ask(String),
    Clear,
    History,
    Discard(String),
    Exit,
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        if !line.starts_with('/') {
            return Self::Ask(line.to_string());
        }
        let mut parts = line.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();
        match (cmd, arg) {
            ("/exit" | "/quit", _) => Self::Exit,
            ("/clear", _) => Self::Clear,
            ("/history", _) => Self::History,
            ("/discard", id) if !id.is_empty() => Self::Discard(id.to_string()),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn render_block(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::Image { format, data } => {
            format!("[image: {}, {} bytes]", format.media_type(), data.len())
        }
        ContentBlock::Document { name, data, .. } => {
            format!("[document: {name}, {} bytes]", data.len())
        }
    }
}

/// Lines to show for a freshly settled event.
fn render_event(event: &Event) -> Vec<String> {
    match event {
        Event::Message(m) => {
            let prefix = match m.role {
                Role::User => "You >",
                Role::Assistant => "Assistant >",
            };
            render_block(&m.content)
                .lines()
                .map(|line| format!("{prefix} {line}"))
                .collect()
        }
        Event::ToolUse(t) => {
            let status = if t.result.is_success() { "ok" } else { "error" };
            vec![format!("[tool] {} ({status})", t.name)]
        }
    }
}

/// One-line summary for `/history`.
fn describe_event(event: &Event) -> String {
    let flag = if event.is_discarded() { " (discarded)" } else { "" };
    let summary = match event {
        Event::Message(m) => {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let text = render_block(&m.content);
            let first = text.lines().next().unwrap_or_default();
            format!("{role}: {}", truncate(first, 60))
        }
        Event::ToolUse(t) => format!("tool: {} {}", t.name, t.input),
    };
    format!("{} {summary}{flag}", event.id())
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use copilot_core::content::{self, ImageFormat};
    use copilot_core::tool::ToolResult;

    #[test]
    fn parses_commands() {
        assert_eq!(Command::parse("hello"), Command::Ask("hello".into()));
        assert_eq!(Command::parse("/exit"), Command::Exit);
        assert_eq!(Command::parse("/clear"), Command::Clear);
        assert_eq!(Command::parse("/history"), Command::History);
        assert_eq!(Command::parse("/discard  abc-123 "), Command::Discard("abc-123".into()));
        assert_eq!(Command::parse("/discard"), Command::Unknown("/discard".into()));
        assert_eq!(Command::parse("/nope"), Command::Unknown("/nope".into()));
    }

    #[test]
    fn renders_assistant_lines() {
        let event = Event::message(Role::Assistant, content::text(["one\ntwo"]), Utc::now());
        assert_eq!(render_event(&event), vec!["Assistant > one", "Assistant > two"]);
    }

    #[test]
    fn renders_binary_blocks_as_placeholders() {
        let block = ContentBlock::Image {
            format: ImageFormat::Png,
            data: vec![0; 4],
        };
        assert_eq!(render_block(&block), "[image: image/png, 4 bytes]");
    }

    #[test]
    fn history_marks_discarded_tool_uses() {
        let event = Event::tool_use(
            "toolu_1",
            1,
            "navigate",
            serde_json::json!({"route": {"name": "home"}}),
            ToolResult::succeed([content::text(["Navigating to the 'home' route."])]),
            Utc::now(),
        )
        .discarded();
        let line = describe_event(&event);
        assert!(line.starts_with(event.id()));
        assert!(line.contains("tool: navigate"));
        assert!(line.ends_with("(discarded)"));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
        assert_eq!(truncate("short", 10), "short");
    }
}
