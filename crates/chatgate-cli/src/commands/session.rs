//! Session management commands.

use chrono::{DateTime, Local, Utc};

use chatgate_core::ConversationRecord;

use crate::{AppContext, SessionAction};

/// Format a datetime for display.
fn format_time(dt: &DateTime<Utc>) -> String {
    let local: DateTime<Local> = dt.with_timezone(&Local);
    local.format("%Y-%m-%d %H:%M").to_string()
}

pub async fn handle(action: SessionAction, ctx: &AppContext) -> anyhow::Result<()> {
    match action {
        SessionAction::Show { id, json } => {
            show_session(ctx, &id, json).await?;
        }
        SessionAction::Delete { id } => {
            delete_session(ctx, &id).await?;
        }
    }

    Ok(())
}

async fn show_session(ctx: &AppContext, id: &str, json: bool) -> anyhow::Result<()> {
    let Some(record) = ctx.manager.history(id).await? else {
        println!("Session not found: {}", id);
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    print_record(&record);
    Ok(())
}

fn print_record(record: &ConversationRecord) {
    println!("Session: {}", record.session_id);
    println!("================================================================================");
    println!();
    println!("Created:     {}", format_time(&record.created));
    if let Some(ref updated) = record.last_update {
        println!("Updated:     {}", format_time(updated));
    }
    println!("Turns:       {}", record.turn_count());
    println!("Tokens:      {}", record.total_tokens);
    println!();

    for message in &record.messages {
        let tokens = message
            .token
            .map(|t| format!(" ({} tokens)", t))
            .unwrap_or_default();
        println!("[{}]{}", message.role, tokens);
        println!("{}", message.content);
        println!();
    }
}

async fn delete_session(ctx: &AppContext, id: &str) -> anyhow::Result<()> {
    if ctx.manager.history(id).await?.is_none() {
        println!("Session not found: {}", id);
        return Ok(());
    }

    ctx.manager.delete(id).await?;
    println!("Deleted session: {}", id);
    Ok(())
}
