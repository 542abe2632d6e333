//! Send one turn of a conversation.

use std::io::{self, Write};

use futures::StreamExt;
use tracing::debug;

use chatgate_providers::{SseLineParser, StreamEvent};
use chatgate_session::{AnswerOptions, TurnOutcome};

use crate::{AppContext, AskArgs};

pub async fn run(args: AskArgs, ctx: &AppContext) -> anyhow::Result<()> {
    let session_id = args
        .session
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let model = args
        .model
        .clone()
        .unwrap_or_else(|| ctx.manager.default_model().to_string());

    let mut options = AnswerOptions::new();
    options.max_tokens = args.max_tokens;
    options.temperature = args.temperature;
    options.api_key = args.api_key.clone();

    debug!(session_id = %session_id, model = %model, stream = args.stream, "Sending turn");

    if args.stream {
        stream_reply(&session_id, &args.prompt, &model, options, ctx).await?;
    } else {
        let record = ctx
            .manager
            .answer(&session_id, &args.prompt, &model, options)
            .await?;
        if let Some(reply) = record.messages.last() {
            println!("{}", reply.content);
        }
    }

    if args.session.is_none() {
        eprintln!("session: {}", session_id);
    }
    Ok(())
}

async fn stream_reply(
    session_id: &str,
    prompt: &str,
    model: &str,
    options: AnswerOptions,
    ctx: &AppContext,
) -> anyhow::Result<()> {
    let mut reply = ctx
        .manager
        .answer_stream(session_id, prompt, model, options, None)
        .await?;
    let completion = reply.completion();

    // The stream carries raw provider bytes; decode them for display
    let mut parser = SseLineParser::new();
    let mut stdout = io::stdout();

    while let Some(chunk) = reply.next().await {
        let chunk = chunk?;
        for event in parser.feed(&chunk) {
            if let StreamEvent::Delta(text) = event {
                print!("{}", text);
                stdout.flush()?;
            }
        }
    }
    for event in parser.finish() {
        if let StreamEvent::Delta(text) = event {
            print!("{}", text);
        }
    }
    println!();
    drop(reply);

    match completion.wait().await {
        TurnOutcome::Persisted(record) => {
            debug!(total_tokens = record.total_tokens, "Streamed turn stored");
            Ok(())
        }
        TurnOutcome::Abandoned => anyhow::bail!("The reply ended before any content arrived"),
        TurnOutcome::Failed(message) => anyhow::bail!("Failed to store the reply: {}", message),
        TurnOutcome::Pending => Ok(()),
    }
}
