use std::path::PathBuf;

use clap::Subcommand;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use ticket_chat_core::{ChatConfig, ChatMessage, ContentOrigin, ContentType, OcrDispatch};
use uuid::Uuid;

use super::{format_time, print_json, truncate, AppContext, SessionKeyArgs};

#[derive(Subcommand)]
pub enum MessagesCommand {
    #[command(about = "Send a text message")]
    Send {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Sender user ID (UUID)")]
        sender: Uuid,

        #[arg(long, help = "Message text")]
        text: String,
    },

    #[command(about = "Send a file message and request OCR for it")]
    SendFile {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Sender user ID (UUID)")]
        sender: Uuid,

        #[arg(long, help = "Storage bucket holding the file")]
        bucket: String,

        #[arg(long, help = "File name within the bucket")]
        file_name: String,

        #[arg(long, help = "Download url of the file")]
        url: String,
    },

    #[command(about = "List the messages of a session, oldest first")]
    List {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Correct the text of a message")]
    Edit {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Message ID (UUID)")]
        message: Uuid,

        #[arg(long, help = "New text")]
        text: String,
    },

    #[command(about = "Point a file message at a new url")]
    SetUrl {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Message ID (UUID)")]
        message: Uuid,

        #[arg(long, help = "New url")]
        url: String,
    },

    #[command(about = "Delete a message")]
    Delete {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Message ID (UUID)")]
        message: Uuid,
    },

    #[command(about = "Export a session with its full message history as JSON")]
    Export {
        #[command(flatten)]
        key: SessionKeyArgs,

        #[arg(short, long, help = "Write to this file instead of stdout")]
        output: Option<PathBuf>,
    },
}

pub async fn handle_messages_command(
    cmd: MessagesCommand,
    config: &ChatConfig,
) -> anyhow::Result<()> {
    let ctx = AppContext::connect(config).await?;
    let result = run(&ctx, cmd).await;
    ctx.close().await;
    result
}

async fn run(ctx: &AppContext, cmd: MessagesCommand) -> anyhow::Result<()> {
    match cmd {
        MessagesCommand::Send {
            session,
            sender,
            text,
        } => {
            let message = ctx
                .messages
                .send_message(session, sender, ContentType::Text, &text)
                .await?;
            println!(
                "{} Sent message {}",
                "✓".green().bold(),
                message.message_id.to_string().cyan()
            );
        }
        MessagesCommand::SendFile {
            session,
            sender,
            bucket,
            file_name,
            url,
        } => {
            let receipt = ctx
                .messages
                .send_file_message(session, sender, &bucket, &file_name, &url)
                .await?;
            println!(
                "{} Sent file message {}",
                "✓".green().bold(),
                receipt.message.message_id.to_string().cyan()
            );
            match receipt.ocr {
                OcrDispatch::Published => println!("  {} OCR requested", "→".blue()),
                OcrDispatch::Disabled => println!("  {} OCR is disabled", "→".dimmed()),
                OcrDispatch::Failed(reason) => println!(
                    "  {} OCR request failed: {}\n    Re-trigger with 'ticket-chat ocr retrigger'",
                    "!".yellow().bold(),
                    reason
                ),
            }
        }
        MessagesCommand::List { session, format } => {
            let messages = ctx.messages.find_messages(session).await?;
            if format == "json" {
                return print_json(&messages);
            }
            print_message_table(&messages);
        }
        MessagesCommand::Edit {
            session,
            message,
            text,
        } => {
            let update = ctx
                .messages
                .update_text_chat_message(session, message, &text, ContentOrigin::Sender)
                .await?;
            if update.changed {
                println!("{} Message updated", "✓".green().bold());
            } else {
                println!("{}", "Message already has this text.".dimmed());
            }
        }
        MessagesCommand::SetUrl {
            session,
            message,
            url,
        } => {
            let updated = ctx.messages.update_file_url(session, message, &url).await?;
            println!(
                "{} File url is now {}",
                "✓".green().bold(),
                updated.url.unwrap_or_default()
            );
        }
        MessagesCommand::Delete { session, message } => {
            if ctx.messages.delete_chat_message(session, message).await? {
                println!("{} Deleted message {}", "✓".green().bold(), message);
            } else {
                println!("{}", "Message not found, nothing deleted.".yellow());
            }
        }
        MessagesCommand::Export { key, output } => {
            let json = ctx
                .messages
                .export_chat_logs_as_json_string(&key.key())
                .await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!(
                        "{} Exported session {} to {}",
                        "✓".green().bold(),
                        key.session,
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}

fn print_message_table(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("{}", "No messages in this session.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Sent").fg(Color::White),
            Cell::new("Message ID").fg(Color::White),
            Cell::new("Sender").fg(Color::White),
            Cell::new("Type").fg(Color::White),
            Cell::new("Content").fg(Color::White),
        ]);

    for message in messages {
        let (type_color, body) = match message.content_type {
            ContentType::Text => (Color::Green, message.content.clone().unwrap_or_default()),
            ContentType::File => {
                let url = message.url.as_deref().unwrap_or("-");
                let body = match &message.content {
                    Some(text) => format!("{} [{}]", url, text),
                    None => url.to_string(),
                };
                (Color::Cyan, body)
            }
        };

        table.add_row(vec![
            Cell::new(format_time(&message.created_at)),
            Cell::new(message.message_id),
            Cell::new(message.sender_id),
            Cell::new(message.content_type.as_str()).fg(type_color),
            Cell::new(truncate(&body, 60)),
        ]);
    }

    println!("{table}");
    println!();
    println!("{} {} message(s)", "Total:".dimmed(), messages.len());
}
