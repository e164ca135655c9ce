//! Chat log command handlers

use anyhow::{bail, Result};

use chatsync_core::sync::DeliveryOutcome;
use chatsync_core::{Message, Role};

use super::Engine;
use crate::output::{Output, OutputFormat};

/// Print a project's visible history
pub async fn history(
    engine: &mut Engine,
    project_id: String,
    rewind_to: Option<String>,
    output: &Output,
) -> Result<()> {
    let opened = engine
        .open(&project_id, rewind_to.as_deref(), output)
        .await?;
    output.print_chat(&opened);
    Ok(())
}

/// Append a message and try to deliver it
pub async fn send(
    engine: &mut Engine,
    project_id: String,
    role: Role,
    text: String,
    output: &Output,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Message text is empty");
    }

    // Loading first restores messages left pending by earlier runs
    engine.open(&project_id, None, output).await?;

    let message = Message::new(role, text);
    let id = message.id.clone();
    let outcome = engine.sync.append(&project_id, vec![message]).await?;
    engine.report_events(output);

    if output.format == OutputFormat::Quiet {
        println!("{}", id);
        return Ok(());
    }

    match outcome.delivery {
        DeliveryOutcome::Delivered { .. } => output.success(&format!("Sent {}", id)),
        DeliveryOutcome::Skipped => {
            output.success(&format!("Saved {} locally (remote sync is off)", id))
        }
        DeliveryOutcome::Failed { error, pending } => {
            output.success(&format!("Saved {} locally", id));
            output.warning(&format!(
                "Delivery failed, {} message(s) pending: {}",
                pending, error
            ));
        }
        DeliveryOutcome::Nothing => output.message("Nothing to send"),
    }
    Ok(())
}

/// Deliver pending messages now
pub async fn sync(engine: &mut Engine, project_id: String, output: &Output) -> Result<()> {
    let opened = engine.open(&project_id, None, output).await?;
    if opened.status.pending_count == 0 {
        output.success("Already up to date");
        return Ok(());
    }

    output.message(&format!(
        "Delivering {} pending message(s)...",
        opened.status.pending_count
    ));

    match engine.sync.sync_pending(&project_id).await? {
        DeliveryOutcome::Delivered { count } => {
            output.success(&format!("Delivered {} message(s)", count));
        }
        DeliveryOutcome::Nothing => output.success("Already up to date"),
        DeliveryOutcome::Skipped => bail!(
            "Remote sync is not enabled. Enable it with:\n  \
             chatsync config set sync_enabled true\n  \
             chatsync config set remote_url https://your-server/api"
        ),
        DeliveryOutcome::Failed { error, pending } => {
            bail!("Sync failed, {} message(s) still pending: {}", pending, error)
        }
    }
    Ok(())
}

/// Remove a project's messages and snapshot from both stores
pub async fn clear(engine: &mut Engine, project_id: String, yes: bool, output: &Output) -> Result<()> {
    if !yes && output.should_prompt() {
        use std::io::{self, Write};

        print!("Delete all messages of '{}'? [y/N] ", project_id);
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            output.message("Cancelled.");
            return Ok(());
        }
    }

    engine.sync.clear(&project_id).await?;
    engine.report_events(output);
    output.success(&format!("Cleared {}", project_id));
    Ok(())
}
