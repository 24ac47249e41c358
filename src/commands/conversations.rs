use crate::cli::Commands;
use crate::config::Config;
use crate::error::{ConvsyncError, Result};
use crate::storage::{ConversationRecord, ConversationStore, Message, MessageRole, SqliteStore};
use crate::sync::{CallerContext, ConversationService, WriteOptions, WriteReceipt};
use colored::Colorize;
use prettytable::{format, Table};
use std::path::Path;
use std::sync::Arc;

/// Open the SQLite store named by the configuration
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    match &config.store.path {
        Some(path) => SqliteStore::new_with_path(path.clone()),
        None => SqliteStore::new(),
    }
}

/// Handle a conversation command for `owner`
pub async fn handle_command(config: &Config, owner: &str, command: Commands) -> Result<()> {
    let store: Arc<dyn ConversationStore> = Arc::new(open_store(config)?);
    let service = ConversationService::new(store, config);

    match command {
        Commands::List => {
            let ctx = CallerContext::read_only(owner);
            print_list(&service.list(&ctx).await?);
        }
        Commands::Show { id } => {
            let ctx = CallerContext::read_only(owner);
            print_record(&service.load(&ctx, &id).await?);
        }
        Commands::Create { id, title, message } => {
            let ctx = CallerContext::new(owner);
            let receipt = service
                .create(&ctx, &id, &title, message.map(Message::user))
                .await?;
            print_receipt("Created", &receipt);
        }
        Commands::Send { id, message, role } => {
            let ctx = CallerContext::new(owner);
            let receipt = service
                .append_message(&ctx, &id, Message::new(role, message))
                .await?;
            print_receipt("Updated", &receipt);
        }
        Commands::Pin { id, off } => {
            let ctx = CallerContext::new(owner);
            let receipt = service.set_pinned(&ctx, &id, !off).await?;
            print_receipt(if off { "Unpinned" } else { "Pinned" }, &receipt);
        }
        Commands::Rename { id, title } => {
            let ctx = CallerContext::new(owner);
            let receipt = service.rename(&ctx, &id, &title).await?;
            print_receipt("Renamed", &receipt);
        }
        Commands::Delete { id } => {
            let ctx = CallerContext::new(owner);
            service.delete(&ctx, &id).await?;
            println!("{}", format!("Deleted conversation {}", id).green());
        }
        Commands::Import { file, force } => {
            let record = read_record(&file)?;
            let ctx = CallerContext::new(owner).with_force_overwrite(force);
            let options = WriteOptions {
                force_overwrite: force,
            };
            let receipt = service.save(&ctx, record, options).await?;
            print_receipt("Imported", &receipt);
        }
    }

    Ok(())
}

fn read_record(path: &Path) -> Result<ConversationRecord> {
    let contents = std::fs::read_to_string(path).map_err(ConvsyncError::Io)?;
    let record = serde_json::from_str(&contents).map_err(ConvsyncError::Serialization)?;
    Ok(record)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn print_receipt(action: &str, receipt: &WriteReceipt) {
    println!(
        "{}",
        format!(
            "{} conversation {} (version {})",
            action, receipt.record.id, receipt.version
        )
        .green()
    );
    if receipt.conflict_resolved {
        println!(
            "{}",
            "A newer stored version was overwritten.".yellow()
        );
    }
}

fn print_list(records: &[ConversationRecord]) {
    if records.is_empty() {
        println!("{}", "No conversations found.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "ID".bold(),
        "Title".bold(),
        "Pinned".bold(),
        "Version".bold(),
        "Messages".bold(),
        "Last Modified".bold()
    ]);

    for summary in records.iter().map(ConversationRecord::summary) {
        let pinned = if summary.is_pinned { "*" } else { "" };
        let updated = summary.last_modified.format("%Y-%m-%d %H:%M").to_string();

        table.add_row(prettytable::row![
            summary.id.cyan(),
            truncate(&summary.title, 40),
            pinned,
            summary.version,
            summary.message_count,
            updated
        ]);
    }

    println!("\nConversations:");
    table.printstd();
    println!();
}

fn print_record(record: &ConversationRecord) {
    println!("{} {}", "Conversation:".bold(), record.id.cyan());
    println!("{} {}", "Title:".bold(), record.title);
    println!("{} {}", "Version:".bold(), record.version);
    println!("{} {}", "Pinned:".bold(), record.is_pinned);
    println!(
        "{} {}",
        "Last modified:".bold(),
        record.last_modified.format("%Y-%m-%d %H:%M:%S")
    );
    if !record.context.is_empty() {
        println!(
            "{} {}",
            "Context:".bold(),
            serde_json::Value::Object(record.context.clone())
        );
    }
    println!();

    for message in &record.messages {
        let role = match message.role {
            MessageRole::User => message.role.as_str().blue(),
            MessageRole::Assistant => message.role.as_str().green(),
            MessageRole::System => message.role.as_str().magenta(),
        };
        println!("[{}] {}", role, message.text);
        for image in &message.images {
            println!("    {} {}", "image:".dimmed(), image);
        }
    }

    for insight in &record.insights {
        println!("{} ({}) {}", "insight".yellow(), insight.kind, insight.content);
    }
}
