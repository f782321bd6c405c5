//! Interactive chat with a hosted Azure AI Foundry agent.
//!
//! # Usage
//!
//! ```bash
//! export AZURE_AI_FOUNDRY_ENDPOINT=https://<resource>.services.ai.azure.com/api/projects/<project>
//! export AZURE_AI_FOUNDRY_API_KEY=...
//! export AZURE_AI_FOUNDRY_AGENT_ID=asst_...
//!
//! # Stream replies as they are generated
//! foundry-chat
//!
//! # Wait for complete replies instead
//! foundry-chat --poll --timeout 120
//!
//! # Layer a YAML file over the environment and log relay events
//! foundry-chat --config foundry.yaml --log-file relay.jsonl
//! ```
//!
//! # Commands
//!
//! - `/help` - Show available commands
//! - `/new` - Start a new conversation
//! - `/thread` - Show the current thread id
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use foundry_chat::commands::{ChatCommand, help_text, parse_command};
use foundry_chat::{
    ChatArgs, ChatService, ConfigLayer, FoundryAgent, JsonLinesLogger, PlainTextRenderer,
    RelayConfig, SessionId,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, free) = ChatArgs::from_command_line_relaxed("foundry-chat [OPTIONS]");
    let mut renderer = PlainTextRenderer::with_color(!args.no_color);
    if !free.is_empty() {
        renderer.print_error(&format!("unexpected arguments: {}", free.join(" ")));
        std::process::exit(2);
    }

    let config = match args.resolve(ConfigLayer::from_env()) {
        Ok(config) => config,
        Err(err) => {
            renderer.print_error(&err.to_string());
            std::process::exit(2);
        }
    };

    let agent = Arc::new(FoundryAgent::from_config(&config)?);
    let mut service = ChatService::new(agent).with_turn_timeout(config.turn_timeout);
    if let Some(path) = &args.log_file {
        service = service.with_logger(Arc::new(JsonLinesLogger::create(path)?));
    }
    let service = Arc::new(service);

    // Ctrl-C cancels the reply in flight; at the prompt rustyline sees it.
    let interrupter = Arc::clone(&service);
    ctrlc::set_handler(move || {
        interrupter.interrupt_all();
    })?;

    let mut rl = DefaultEditor::new()?;
    let mut session_id = service.start_session();
    renderer.print_welcome(&config.agent_id, config.endpoint.as_str());

    loop {
        let line = match rl.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        if let Some(cmd) = parse_command(line) {
            match cmd {
                ChatCommand::Quit => {
                    println!("Goodbye!");
                    break;
                }
                ChatCommand::New => {
                    service.end_session(&session_id);
                    session_id = service.start_session();
                    renderer.print_info("Started a new conversation.");
                }
                ChatCommand::Thread => match service.session(&session_id) {
                    Some(session) => match session.thread_id {
                        Some(thread_id) => renderer.print_info(&format!("Thread: {thread_id}")),
                        None => renderer
                            .print_info("No thread yet; one is created with your first message."),
                    },
                    None => renderer.print_error("session is not active"),
                },
                ChatCommand::Stats => print_stats(&service, &session_id),
                ChatCommand::ShowConfig => print_config(&config),
                ChatCommand::Help => {
                    for line in help_text().lines() {
                        println!("    {line}");
                    }
                }
                ChatCommand::Invalid(message) => renderer.print_error(&message),
            }
            continue;
        }

        renderer.start_response();
        service.handle_message(&session_id, line, &mut renderer).await;
    }

    service.end_session(&session_id);
    Ok(())
}

fn print_stats(service: &ChatService<FoundryAgent>, session_id: &SessionId) {
    let Some(session) = service.session(session_id) else {
        println!("    No active session.");
        return;
    };
    println!("    Session Statistics:");
    println!("      Session: {}", session.session_id);
    match session.thread_id {
        Some(thread_id) => println!("      Thread: {thread_id}"),
        None => println!("      Thread: (not created yet)"),
    }
    println!("      Started: {}", session.created_at);
    println!("      Turns completed: {}", session.turns_completed);
    println!("      Turns failed: {}", session.turns_failed);
    println!("      Active sessions: {}", service.sessions().len());
}

fn print_config(config: &RelayConfig) {
    println!("    Current Configuration:");
    println!("      Endpoint: {}", config.endpoint);
    println!("      Agent: {}", config.agent_id);
    println!("      API version: {}", config.api_version);
    println!("      Response mode: {}", config.mode);
    println!(
        "      Turn timeout: {}s",
        config.turn_timeout.as_secs_f64()
    );
    println!(
        "      Poll interval: {}s",
        config.poll_interval.as_secs_f64()
    );
}
