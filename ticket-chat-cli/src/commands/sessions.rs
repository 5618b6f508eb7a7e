use clap::Subcommand;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use ticket_chat_core::{
    ChatConfig, ChatSession, IssueParticipant, IssueParticipantKey, ParticipantMap,
    ParticipantRole, RepairReport,
};
use uuid::Uuid;

use super::{format_time, print_json, AppContext, SessionKeyArgs};

#[derive(Subcommand)]
pub enum SessionsCommand {
    #[command(about = "Create a chat session on an issue")]
    Create {
        #[arg(long, help = "Project ID (UUID)")]
        project: Uuid,

        #[arg(long, help = "Issue ID (UUID)")]
        issue: Uuid,

        #[arg(
            short,
            long = "participant",
            required = true,
            value_parser = parse_participant,
            help = "Participant as USER_ID=ROLE (repeatable)"
        )]
        participants: Vec<(Uuid, String)>,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Show a session and its participants")]
    Show {
        #[command(flatten)]
        key: SessionKeyArgs,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "List the sessions of an issue")]
    List {
        #[arg(long, help = "Project ID (UUID)")]
        project: Uuid,

        #[arg(long, help = "Issue ID (UUID)")]
        issue: Uuid,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "List the sessions a user takes part in")]
    ForUser {
        #[arg(long, help = "User ID (UUID)")]
        user: Uuid,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },

    #[command(about = "Add a participant to a session")]
    AddMember {
        #[command(flatten)]
        key: SessionKeyArgs,

        #[arg(long, help = "User ID (UUID)")]
        user: Uuid,

        #[arg(long, help = "Role (INITIATOR, HANDLER, OBSERVER, VIEWER, EDITOR, OWNER, SUPPORT)")]
        role: String,
    },

    #[command(about = "Remove a participant from a session")]
    RemoveMember {
        #[command(flatten)]
        key: SessionKeyArgs,

        #[arg(long, help = "User ID (UUID)")]
        user: Uuid,
    },

    #[command(about = "Change the role of a participant")]
    ChangeRole {
        #[command(flatten)]
        key: SessionKeyArgs,

        #[arg(long, help = "User ID (UUID)")]
        user: Uuid,

        #[arg(long, help = "New role")]
        role: String,
    },

    #[command(about = "Delete a session and its participant index rows")]
    Delete {
        #[command(flatten)]
        key: SessionKeyArgs,
    },

    #[command(about = "Remove or fix participant index rows that disagree with their session")]
    Repair {
        #[arg(long, help = "Repair every index row of this user")]
        user: Option<Uuid>,

        #[arg(
            long = "row",
            value_parser = parse_index_key,
            help = "Repair one row given as USER_ID:ISSUE_ID:SESSION_ID (repeatable)"
        )]
        rows: Vec<IssueParticipantKey>,

        #[arg(short, long, default_value = "text", help = "Output format (text, json)")]
        format: String,
    },
}

pub async fn handle_sessions_command(
    cmd: SessionsCommand,
    config: &ChatConfig,
) -> anyhow::Result<()> {
    match cmd {
        SessionsCommand::Create {
            project,
            issue,
            participants,
            format,
        } => {
            let map = ParticipantMap::try_from_roles(
                participants
                    .iter()
                    .map(|(user, role)| (*user, role.as_str())),
            )?;
            map.validate_for_creation()?;
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.create_chat_session(project, issue, map).await;
            ctx.close().await;
            let session = result?;

            if format == "json" {
                return print_json(&session);
            }
            println!(
                "{} Created session {}",
                "✓".green().bold(),
                session.session_id.to_string().cyan()
            );
            print_session(&session);
            Ok(())
        }
        SessionsCommand::Show { key, format } => {
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.find_chat_session(&key.key()).await;
            ctx.close().await;

            match result? {
                Some(session) if format == "json" => print_json(&session),
                Some(session) => {
                    print_session(&session);
                    Ok(())
                }
                None => {
                    println!("{}", "Session not found.".yellow());
                    Ok(())
                }
            }
        }
        SessionsCommand::List {
            project,
            issue,
            format,
        } => {
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.find_sessions_by_issue(project, issue).await;
            ctx.close().await;
            let sessions = result?;

            if format == "json" {
                return print_json(&sessions);
            }
            print_session_table(&sessions);
            Ok(())
        }
        SessionsCommand::ForUser { user, format } => {
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.find_issues_for_user(user).await;
            ctx.close().await;
            let rows = result?;

            if format == "json" {
                return print_json(&rows);
            }
            print_participation_table(&rows);
            Ok(())
        }
        SessionsCommand::AddMember { key, user, role } => {
            let role: ParticipantRole = role.parse()?;
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.add_participant(&key.key(), user, role).await;
            ctx.close().await;
            let session = result?;

            println!(
                "{} Added {} as {} ({} participants)",
                "✓".green().bold(),
                user,
                role.to_string().cyan(),
                session.participants.len()
            );
            Ok(())
        }
        SessionsCommand::RemoveMember { key, user } => {
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.delete_member(&key.key(), user).await;
            ctx.close().await;
            let session = result?;

            println!(
                "{} Removed {} ({} participants left)",
                "✓".green().bold(),
                user,
                session.participants.len()
            );
            Ok(())
        }
        SessionsCommand::ChangeRole { key, user, role } => {
            let role: ParticipantRole = role.parse()?;
            let ctx = AppContext::connect(config).await?;
            let result = ctx
                .sessions
                .change_participant_role(&key.key(), user, role)
                .await;
            ctx.close().await;
            result?;

            println!(
                "{} {} is now {}",
                "✓".green().bold(),
                user,
                role.to_string().cyan()
            );
            Ok(())
        }
        SessionsCommand::Delete { key } => {
            let ctx = AppContext::connect(config).await?;
            let result = ctx.sessions.delete_chat_session(&key.key()).await;
            ctx.close().await;

            if result? {
                println!("{} Deleted session {}", "✓".green().bold(), key.session);
            } else {
                println!("{}", "Session not found, nothing deleted.".yellow());
            }
            Ok(())
        }
        SessionsCommand::Repair { user, rows, format } => {
            if user.is_none() && rows.is_empty() {
                anyhow::bail!("Pass --user or at least one --row to repair");
            }

            let ctx = AppContext::connect(config).await?;
            let result = repair(&ctx, user, &rows).await;
            ctx.close().await;
            let report = result?;

            if format == "json" {
                return print_json(&report);
            }
            print_repair_report(&report);
            Ok(())
        }
    }
}

async fn repair(
    ctx: &AppContext,
    user: Option<Uuid>,
    rows: &[IssueParticipantKey],
) -> anyhow::Result<RepairReport> {
    let mut report = RepairReport::default();

    if let Some(user) = user {
        report = ctx.sessions.repair_participant_index(user).await?;
    }

    if !rows.is_empty() {
        let orphans = ctx.sessions.repair_orphans(rows).await?;
        report.scanned += orphans.scanned;
        report.removed.extend(orphans.removed);
        report.updated.extend(orphans.updated);
        report.failed.extend(orphans.failed);
    }

    Ok(report)
}

fn parse_participant(s: &str) -> Result<(Uuid, String), String> {
    let (user, role) = s
        .split_once('=')
        .ok_or_else(|| format!("expected USER_ID=ROLE, got '{}'", s))?;
    let user = user
        .trim()
        .parse::<Uuid>()
        .map_err(|e| format!("invalid user id '{}': {}", user, e))?;
    Ok((user, role.trim().to_string()))
}

fn parse_index_key(s: &str) -> Result<IssueParticipantKey, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [user, issue, session] = parts.as_slice() else {
        return Err(format!("expected USER_ID:ISSUE_ID:SESSION_ID, got '{}'", s));
    };
    let parse = |value: &str| {
        value
            .trim()
            .parse::<Uuid>()
            .map_err(|e| format!("invalid id '{}': {}", value, e))
    };
    Ok(IssueParticipantKey {
        user_id: parse(user)?,
        issue_id: parse(issue)?,
        session_id: parse(session)?,
    })
}

fn role_cell(role: ParticipantRole) -> Cell {
    let color = match role {
        ParticipantRole::Initiator => Color::Cyan,
        ParticipantRole::Handler | ParticipantRole::Owner => Color::Green,
        ParticipantRole::Support | ParticipantRole::Editor => Color::Yellow,
        ParticipantRole::Observer | ParticipantRole::Viewer => Color::DarkGrey,
    };
    Cell::new(role.as_str()).fg(color)
}

fn print_session(session: &ChatSession) {
    println!();
    println!("  {:<12} {}", "Session:".bold(), session.session_id);
    println!("  {:<12} {}", "Project:".bold(), session.project_id);
    println!("  {:<12} {}", "Issue:".bold(), session.issue_id);
    println!("  {:<12} {}", "Created:".bold(), format_time(&session.created_at));
    println!("  {:<12} {}", "Modified:".bold(), format_time(&session.modified_at));
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Participant").fg(Color::White),
            Cell::new("Role").fg(Color::White),
        ]);

    for (user_id, role) in session.participants.iter() {
        table.add_row(vec![Cell::new(user_id), role_cell(*role)]);
    }

    println!("{table}");
}

fn print_session_table(sessions: &[ChatSession]) {
    if sessions.is_empty() {
        println!("{}", "No sessions found for this issue.".yellow());
        return;
    }

    println!("{}", "Sessions".cyan().bold());
    println!();

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Session ID").fg(Color::White),
            Cell::new("Participants").fg(Color::White),
            Cell::new("Initiator").fg(Color::White),
            Cell::new("Created").fg(Color::White),
            Cell::new("Modified").fg(Color::White),
        ]);

    for session in sessions {
        let initiator = session
            .participants
            .initiator()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(session.session_id),
            Cell::new(session.participants.len()),
            Cell::new(initiator),
            Cell::new(format_time(&session.created_at)),
            Cell::new(format_time(&session.modified_at)),
        ]);
    }

    println!("{table}");
    println!();
    println!("{} {} session(s)", "Total:".dimmed(), sessions.len());
}

fn print_participation_table(rows: &[IssueParticipant]) {
    if rows.is_empty() {
        println!("{}", "User takes part in no sessions.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Project").fg(Color::White),
            Cell::new("Issue").fg(Color::White),
            Cell::new("Session").fg(Color::White),
            Cell::new("Role").fg(Color::White),
        ]);

    for row in rows {
        table.add_row(vec![
            Cell::new(row.project_id),
            Cell::new(row.issue_id),
            Cell::new(row.session_id),
            role_cell(row.role),
        ]);
    }

    println!("{table}");
}

fn print_repair_report(report: &RepairReport) {
    println!("{}", "Participant Index Repair".cyan().bold());
    println!("{}", "═".repeat(40).dimmed());
    println!("  {:<10} {}", "Scanned:".bold(), report.scanned);
    println!("  {:<10} {}", "Removed:".bold(), report.removed.len());
    println!("  {:<10} {}", "Updated:".bold(), report.updated.len());

    if report.is_clean() {
        println!();
        println!("{} {}", "✓".green().bold(), "Index is consistent.".green());
        return;
    }

    println!(
        "  {:<10} {}",
        "Failed:".bold(),
        report.failed.len().to_string().red()
    );
    for key in &report.failed {
        println!("    {} {}", "✗".red(), key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_participant() {
        let user = Uuid::new_v4();
        let (parsed, role) = parse_participant(&format!("{user}=handler")).unwrap();
        assert_eq!(parsed, user);
        assert_eq!(role, "handler");

        assert!(parse_participant("no-separator").is_err());
        assert!(parse_participant("not-a-uuid=HANDLER").is_err());
    }

    #[test]
    fn test_parse_index_key() {
        let (u, i, s) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let key = parse_index_key(&format!("{u}:{i}:{s}")).unwrap();
        assert_eq!(key.user_id, u);
        assert_eq!(key.issue_id, i);
        assert_eq!(key.session_id, s);

        assert!(parse_index_key(&format!("{u}:{i}")).is_err());
    }
}
