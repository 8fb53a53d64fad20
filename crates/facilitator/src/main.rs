//! Console front end for the discussion facilitator.
//!
//! The engine is platform-agnostic behind [`facilitator::platform::ChatSink`];
//! this binary wires it to stdin/stdout so sessions can be exercised
//! locally. Each stdin line becomes one inbound message; `name: text`
//! attributes the message, a bare line speaks as the operator.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use facilitator::commands::{Gateway, GatewayEvent};
use facilitator::config::{check_endpoint, FacilitatorConfig};
use facilitator::deepseek::DeepSeekClient;
use facilitator::engine::EngineDeps;
use facilitator::ledger::{ExperienceLedger, SharedLedger};
use facilitator::lessons::LessonProvider;
use facilitator::platform::{ChatSink, InboundMessage, OutboundMessage, PlatformError};
use facilitator::registry::SessionRegistry;

const CONSOLE_CHANNEL: &str = "console";

/// Renders outbound messages to stdout.
struct ConsoleSink;

fn render(message: &OutboundMessage) -> String {
    let mut out = String::new();
    if let Some(title) = &message.title {
        out.push_str(&format!("== {title} ==\n"));
    }
    out.push_str(&message.body);
    for field in &message.fields {
        out.push_str(&format!("\n[{}]\n{}", field.name, field.value));
    }
    out
}

#[async_trait]
impl ChatSink for ConsoleSink {
    async fn send_channel(
        &self,
        channel_id: &str,
        message: OutboundMessage,
    ) -> Result<(), PlatformError> {
        println!("#{channel_id}\n{}\n", render(&message));
        Ok(())
    }

    async fn send_direct(&self, user_id: &str, message: OutboundMessage) -> Result<(), PlatformError> {
        println!("@{user_id} (direct)\n{}\n", render(&message));
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = FacilitatorConfig::default();
    if config.operator_id.is_empty() {
        config.operator_id = "operator".into();
    }
    info!(
        endpoint = %config.reasoning.url,
        model = %config.reasoning.model,
        operator = %config.operator_id,
        "Facilitator starting"
    );

    if check_endpoint(&config.reasoning.url).await {
        info!("Reasoning endpoint reachable");
    } else {
        warn!(
            endpoint = %config.reasoning.url,
            "Reasoning endpoint not reachable; replies will fall back to canned text"
        );
    }

    let lessons = Arc::new(LessonProvider::load(&config.lesson_path));
    info!(count = lessons.all().len(), "Lessons ready");

    let mut ledger = ExperienceLedger::load(&config.ledger_path);
    ledger.start_writer();
    let ledger = SharedLedger::new(ledger);

    let client = Arc::new(DeepSeekClient::new(&config.reasoning)?);
    let sink: Arc<dyn ChatSink> = Arc::new(ConsoleSink);

    let deps = EngineDeps {
        oracle: client.clone(),
        generator: client,
        sink: sink.clone(),
        ledger: ledger.clone(),
        report_recipient: config.report_recipient.clone(),
        timings: config.timings.clone(),
        awards: config.awards.clone(),
    };

    let (gateway, inbound_tx) = Gateway::new(
        SessionRegistry::new(deps),
        lessons,
        ledger,
        sink,
        config.operator_id.clone(),
        config.timings.reset_confirm_window,
    );

    let operator_id = config.operator_id.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            // "name: text" speaks as a student, a bare line as the operator.
            let (author, text) = match line.split_once(": ") {
                Some((name, text)) if !name.contains(' ') => (name.to_string(), text.to_string()),
                _ => (operator_id.clone(), line),
            };
            let msg = InboundMessage::new(CONSOLE_CHANNEL, &author, &author, text);
            if inbound_tx.send(GatewayEvent::Inbound(msg)).is_err() {
                break;
            }
        }
        // Stdin closed; the gateway keeps serving timers until shutdown.
    });

    info!("Facilitator ready, type !help to begin");
    gateway.run().await;

    Ok(())
}
