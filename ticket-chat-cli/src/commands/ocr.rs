use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use clap::Subcommand;
use colored::Colorize;
use ticket_chat_core::{
    ApplyOutcome, BrokerSubscription, ChatConfig, ConsumerStats, EventEnvelope, OcrResultConsumer,
    OcrResultEvent,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::warn;
use uuid::Uuid;

use super::AppContext;

#[derive(Subcommand)]
pub enum OcrCommand {
    #[command(about = "Publish a fresh OCR request for a file message")]
    Retrigger {
        #[arg(long, help = "Session ID (UUID)")]
        session: Uuid,

        #[arg(long, help = "Message ID (UUID)")]
        message: Uuid,

        #[arg(long, help = "Storage bucket holding the file")]
        bucket: String,

        #[arg(long, help = "File name within the bucket")]
        file_name: String,
    },

    #[command(about = "Apply OCR results read as JSON lines, or from the broker with --follow")]
    Consume {
        #[arg(short, long, help = "Read results from this file instead of stdin")]
        input: Option<PathBuf>,

        #[arg(
            long,
            conflicts_with = "input",
            help = "Join the consumer group on the broker and apply results until Ctrl+C"
        )]
        follow: bool,
    },
}

pub async fn handle_ocr_command(cmd: OcrCommand, config: &ChatConfig) -> anyhow::Result<()> {
    match cmd {
        OcrCommand::Retrigger {
            session,
            message,
            bucket,
            file_name,
        } => {
            if !config.ocr.enabled || !config.ocr.uses_external_broker() {
                anyhow::bail!("Re-triggering OCR needs ocr.enabled and an ocr.broker_url");
            }

            let ctx = AppContext::connect(config).await?;
            let result = ctx
                .messages
                .retrigger_ocr(session, message, &bucket, &file_name)
                .await;
            ctx.close().await;
            let event = result?;

            println!(
                "{} OCR requested for message {} on '{}'",
                "✓".green().bold(),
                event.message_id.to_string().cyan(),
                config.ocr.request_topic
            );
            Ok(())
        }
        OcrCommand::Consume { follow: true, .. } => {
            if !config.ocr.uses_external_broker() {
                anyhow::bail!("--follow needs ocr.broker_url to point at the broker's REST proxy");
            }

            let ctx = AppContext::connect(config).await?;
            let consumer = OcrResultConsumer::new(ctx.messages.clone(), &config.ocr.result_topic);
            let subscription = match BrokerSubscription::open(
                &config.ocr.broker_url,
                &config.ocr.consumer_group,
                &config.ocr.result_topic,
                Duration::from_secs(config.ocr.publish_timeout_secs),
            )
            .await
            {
                Ok(subscription) => subscription,
                Err(e) => {
                    ctx.close().await;
                    return Err(e.into());
                }
            };

            println!(
                "{} Following '{}' as group '{}'. Press Ctrl+C to stop.",
                "→".blue(),
                config.ocr.result_topic,
                config.ocr.consumer_group
            );
            let result = follow(
                &consumer,
                &subscription,
                Duration::from_millis(config.ocr.poll_interval_ms),
                shutdown_signal(),
            )
            .await;

            if let Err(e) = subscription.close().await {
                warn!(error = %e, "Could not leave the consumer group cleanly");
            }
            ctx.close().await;

            print_stats(&result?);
            Ok(())
        }
        OcrCommand::Consume { input, .. } => {
            let ctx = AppContext::connect(config).await?;
            let consumer = OcrResultConsumer::new(ctx.messages.clone(), &config.ocr.result_topic);

            let result = match input {
                Some(path) => {
                    let file = tokio::fs::File::open(&path).await?;
                    apply_lines(&consumer, BufReader::new(file)).await
                }
                None => apply_lines(&consumer, BufReader::new(tokio::io::stdin())).await,
            };
            ctx.close().await;
            let stats = result?;

            print_stats(&stats);
            if stats.failed > 0 {
                anyhow::bail!("{} OCR result(s) could not be applied", stats.failed);
            }
            Ok(())
        }
    }
}

/// Applies one `OcrResultEvent` per non-empty line. Lines that fail to parse
/// or apply are counted and skipped.
async fn apply_lines<R>(consumer: &OcrResultConsumer, reader: R) -> anyhow::Result<ConsumerStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = ConsumerStats::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<OcrResultEvent>(&line) {
            Ok(event) => EventEnvelope::for_result(consumer.topic(), &event),
            Err(e) => {
                stats.failed += 1;
                warn!(line = line_no, error = %e, "Skipping malformed OCR result");
                continue;
            }
        };

        let applied = match outcome {
            Ok(envelope) => consumer.handle_envelope(&envelope).await,
            Err(e) => Err(e),
        };

        match applied {
            Ok(Some(ApplyOutcome::Applied)) => stats.applied += 1,
            Ok(Some(ApplyOutcome::Unchanged)) => stats.unchanged += 1,
            Ok(Some(ApplyOutcome::MessageMissing)) => stats.missing += 1,
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                stats.failed += 1;
                warn!(line = line_no, error = %e, "Failed to apply OCR result");
            }
        }
    }

    Ok(stats)
}

/// Applies broker batches until `shutdown` resolves. Broker and store outages
/// are logged and retried after `idle`; an interrupted batch stays uncommitted.
async fn follow<F>(
    consumer: &OcrResultConsumer,
    subscription: &BrokerSubscription,
    idle: Duration,
    shutdown: F,
) -> anyhow::Result<ConsumerStats>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut total = ConsumerStats::default();

    loop {
        let batch = tokio::select! {
            _ = &mut shutdown => break,
            batch = consumer.apply_batch(subscription) => batch,
        };

        let wait = match batch {
            Ok(stats) => {
                let empty = stats == ConsumerStats::default();
                total.merge(&stats);
                empty
            }
            Err(e) if e.is_transient() => {
                e.log();
                true
            }
            Err(e) => return Err(e.into()),
        };

        if wait {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(idle) => {}
            }
        }
    }

    Ok(total)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable, stop the process to end --follow");
        std::future::pending::<()>().await;
    }
}

fn print_stats(stats: &ConsumerStats) {
    println!("{}", "OCR Results".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<12} {}", "Applied:".bold(), stats.applied.to_string().green());
    println!("  {:<12} {}", "Unchanged:".bold(), stats.unchanged);
    println!("  {:<12} {}", "Missing:".bold(), stats.missing);
    if stats.failed > 0 {
        println!("  {:<12} {}", "Failed:".bold(), stats.failed.to_string().red());
    }
}
