use std::process::{Command, Output};
use std::sync::Arc;

use ticket_chat_core::{
    ContentOrigin, ContentType, EventEnvelope, EventPublisher, InMemoryEventBus, InMemoryStore,
    MessageLog, OcrDispatch, OcrRequestEvent, OcrRequestProducer, OcrResultConsumer,
    OcrResultEvent, ParticipantMap, ParticipantRole, SessionKey, SessionStore,
};
use uuid::Uuid;

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_ticket-chat"))
        .args(args)
        .env("DATABASE_URL", "postgres://localhost:1/ticket_chat_unused")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute ticket-chat command")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

mod issue_chat_flow {
    use super::*;

    #[tokio::test]
    async fn test_session_lifecycle_with_messages_and_ocr() {
        let memory = InMemoryStore::new();
        let bus = Arc::new(InMemoryEventBus::new(64));
        let mut requests = bus.subscribe("ocr-requests");

        let store = SessionStore::new(memory.sessions.clone(), memory.index.clone());
        let log = Arc::new(
            MessageLog::new(memory.sessions.clone(), memory.messages.clone())
                .with_ocr(OcrRequestProducer::new(bus.clone(), "ocr-requests")),
        );
        let worker = Arc::new(OcrResultConsumer::new(log.clone(), "ocr-results"))
            .spawn(bus.subscribe("ocr-results"));

        let (project, issue) = (Uuid::new_v4(), Uuid::new_v4());
        let (tenant, technician, manager) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        // tenant opens the chat, a technician handles it
        let participants =
            ParticipantMap::try_from_roles([(tenant, "INITIATOR"), (technician, "HANDLER")])
                .unwrap();
        let session = store
            .create_chat_session(project, issue, participants)
            .await
            .unwrap();
        let key = SessionKey::new(project, issue, session.session_id);

        assert_eq!(
            store.find_participant_role(&key, tenant).await.unwrap(),
            Some(ParticipantRole::Initiator)
        );
        assert_eq!(store.find_issues_for_user(technician).await.unwrap().len(), 1);

        // a manager is looped in, then promoted
        store
            .add_participant(&key, manager, ParticipantRole::Observer)
            .await
            .unwrap();
        store
            .change_participant_role(&key, manager, ParticipantRole::Owner)
            .await
            .unwrap();
        let index_rows = store.find_issues_for_user(manager).await.unwrap();
        assert_eq!(index_rows.len(), 1);
        assert_eq!(index_rows[0].role, ParticipantRole::Owner);

        // conversation
        log.send_message(session.session_id, tenant, ContentType::Text, "The boiler leaks")
            .await
            .unwrap();
        let photo = log
            .send_file_message(
                session.session_id,
                tenant,
                "uploads",
                "boiler.jpg",
                "s3://uploads/boiler.jpg",
            )
            .await
            .unwrap();
        assert_eq!(photo.ocr, OcrDispatch::Published);
        let reply = log
            .send_message(session.session_id, technician, ContentType::Text, "On my wey")
            .await
            .unwrap();
        log.update_text_chat_message(
            session.session_id,
            reply.message_id,
            "On my way",
            ContentOrigin::Sender,
        )
        .await
        .unwrap();

        // OCR service answers the request it received
        let request: OcrRequestEvent = requests.recv().await.unwrap().decode().unwrap();
        assert_eq!(request.message_id, photo.message.message_id);
        let result = OcrResultEvent {
            session_id: request.session_id,
            message_id: request.message_id,
            extracted_text: "Model XR-200 serial 4471".to_string(),
        };
        bus.publish(&EventEnvelope::for_result("ocr-results", &result).unwrap())
            .await
            .unwrap();
        bus.close_topic("ocr-results");
        assert_eq!(worker.await.unwrap().applied, 1);

        // tenant leaves; their index row goes with them
        store.delete_member(&key, tenant).await.unwrap();
        assert_eq!(store.find_participant_role(&key, tenant).await.unwrap(), None);
        assert!(store.find_issues_for_user(tenant).await.unwrap().is_empty());

        let export = log.export_chat_logs(&key).await.unwrap();
        assert_eq!(export.message_count, 3);
        assert_eq!(export.participants.len(), 2);
        assert!(!export.participants.contains(&tenant));
        assert_eq!(export.messages[1].content_type, ContentType::File);
        assert_eq!(
            export.messages[1].content.as_deref(),
            Some("Model XR-200 serial 4471")
        );
        assert_eq!(export.messages[2].content.as_deref(), Some("On my way"));

        // closing the issue chat removes everything the index knows about it
        assert!(store.delete_chat_session(&key).await.unwrap());
        assert!(store.find_issues_for_user(technician).await.unwrap().is_empty());
        assert!(store.find_issues_for_user(manager).await.unwrap().is_empty());
        assert!(store.find_chat_session(&key).await.unwrap().is_none());
    }
}

mod cli_commands {
    use super::*;

    #[test]
    fn test_version_command() {
        let output = run_cli(&["version"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success(), "version command should succeed");
        assert!(stdout.contains("ticket-chat"));
        assert!(stdout.contains("0.1.0"));
    }

    #[test]
    fn test_version_detailed_masks_password() {
        let output = Command::new(env!("CARGO_BIN_EXE_ticket-chat"))
            .args(["version", "--detailed"])
            .env("DATABASE_URL", "postgres://chat:hunter2@db:5432/chat")
            .output()
            .expect("Failed to execute ticket-chat command");
        let stdout = stdout_of(&output);

        assert!(output.status.success());
        assert!(stdout.contains("chat:****@db"));
        assert!(!stdout.contains("hunter2"));
    }

    #[test]
    fn test_help_lists_command_groups() {
        let output = run_cli(&["--help"]);
        let stdout = stdout_of(&output);

        assert!(output.status.success());
        for group in ["sessions", "messages", "ocr", "init"] {
            assert!(stdout.contains(group), "help should mention '{group}'");
        }
    }

    #[test]
    fn test_invalid_role_fails_before_connecting() {
        let (project, issue, user) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let output = run_cli(&[
            "sessions",
            "create",
            "--project",
            &project.to_string(),
            "--issue",
            &issue.to_string(),
            "--participant",
            &format!("{user}=CAPTAIN"),
        ]);

        assert!(!output.status.success());
        let stderr = stderr_of(&output);
        assert!(stderr.contains("E1001"), "stderr was: {stderr}");
        assert!(stderr.contains("CAPTAIN"));
    }

    #[test]
    fn test_malformed_uuid_is_rejected_by_parser() {
        let output = run_cli(&[
            "messages",
            "list",
            "--session",
            "not-a-uuid",
        ]);

        assert!(!output.status.success());
        assert!(stderr_of(&output).contains("--session"));
    }

    #[test]
    fn test_repair_requires_a_target() {
        let output = run_cli(&["sessions", "repair"]);

        assert!(!output.status.success());
        assert!(stderr_of(&output).contains("--user"));
    }
}
