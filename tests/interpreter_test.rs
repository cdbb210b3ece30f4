mod support;

use std::{io::Cursor, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use code_opus::{
    errors::TurnError,
    execution::{artifacts::ResultExtractor, ErrorInfo, ExecutionOutcome, Logs, ResultItem},
    handlers::interpreter::{InteractionLoop, NO_EXECUTION, PROMPT},
};
use tokio::sync::watch;
use support::{text_response, tool_response, Behaviour, FakeSessions, MemoryFs, ScriptedConversation};

fn plot_outcome() -> ExecutionOutcome {
    ExecutionOutcome {
        results: vec![ResultItem {
            text: Some("<Figure size 640x480 with 1 Axes>".into()),
            png: Some(STANDARD.encode(b"\x89PNG-bytes")),
            ..Default::default()
        }],
        logs: Logs { stdout: vec!["plotted".into()], stderr: vec![] },
        error: None,
    }
}

#[tokio::test]
async fn quit_in_any_case_stops_without_opening_a_session() {
    for sentinel in ["quit\n", "QUIT\n", "  Quit  \n"] {
        let conversation = ScriptedConversation::default();
        let sessions = FakeSessions::new(Behaviour::Outcome(ExecutionOutcome::default()));
        let fs = MemoryFs::default();
        let dir = tempfile::tempdir().unwrap();
        let interaction = InteractionLoop::new(
            &conversation,
            &sessions,
            ResultExtractor::new(&fs, "/home/user", dir.path()),
        );

        let mut out = Vec::new();
        interaction
            .run(Cursor::new(format!("{}never sent\n", sentinel)), &mut out)
            .await
            .unwrap();

        assert_eq!(sessions.opened(), 0);
        assert!(conversation.sent.lock().unwrap().is_empty());
        assert_eq!(String::from_utf8(out).unwrap(), PROMPT);
    }
}

#[tokio::test]
async fn end_turn_response_yields_no_execution_placeholder() {
    let conversation = ScriptedConversation::new([text_response("2 + 2 is 4.")]);
    let sessions = FakeSessions::new(Behaviour::Outcome(plot_outcome()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    let turn = interaction.run_turn("what is 2 + 2?", &mut out).await.unwrap();

    assert_eq!(turn.rendered, NO_EXECUTION);
    assert!(turn.saved_files.is_empty());
    assert!(turn.outcome.is_none());
    assert!(sessions.counters.submitted.lock().unwrap().is_empty());
    assert_eq!((sessions.opened(), sessions.closed()), (1, 1));
    assert!(String::from_utf8(out).unwrap().contains("2 + 2 is 4."));
}

#[tokio::test]
async fn tool_call_executes_code_and_saves_artifacts() {
    let code = "import matplotlib.pyplot as plt\nplt.plot([1, 2, 3])\nprint('plotted')";
    let conversation = ScriptedConversation::new([tool_response("execute_python", code)]);
    let sessions = FakeSessions::new(Behaviour::Outcome(plot_outcome()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    interaction
        .run(Cursor::new("plot a line\nquit\n"), &mut out)
        .await
        .unwrap();
    let printed = String::from_utf8(out).unwrap();

    assert_eq!(*conversation.sent.lock().unwrap(), vec!["plot a line".to_string()]);
    assert_eq!(*sessions.counters.submitted.lock().unwrap(), vec![code.to_string()]);
    assert_eq!((sessions.opened(), sessions.closed()), (1, 1));

    assert!(printed.contains("Using Tool: execute_python"));
    assert!(printed.contains("> Executing AI-generated code:\nimport matplotlib"));
    assert!(printed.contains("Result 1:\n[Display Data]: <Figure size 640x480 with 1 Axes>"));
    assert!(printed.contains("Stdout: plotted"));
    assert!(printed.contains("Saved: output_file_1.png"));
    assert!(printed.contains("Saved Files:\n- output_file_1.png"));
    assert_eq!(std::fs::read(dir.path().join("output_file_1.png")).unwrap(), b"\x89PNG-bytes");
}

#[tokio::test]
async fn execution_error_is_output_not_failure() {
    let conversation = ScriptedConversation::new([tool_response("execute_python", "1 / 0")]);
    let outcome = ExecutionOutcome::failed(
        ErrorInfo {
            name: "ZeroDivisionError".into(),
            value: "division by zero".into(),
            traceback: "----> 1 1 / 0".into(),
        },
        Logs::default(),
    );
    let sessions = FakeSessions::new(Behaviour::Outcome(outcome));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    let turn = interaction.run_turn("divide by zero", &mut out).await.unwrap();

    assert!(turn.rendered.contains("ZeroDivisionError"));
    assert!(turn.rendered.contains("----> 1 1 / 0"));
    assert!(turn.saved_files.is_empty());
    assert!(String::from_utf8(out).unwrap().contains("[Code Interpreter Error]"));
    assert_eq!(sessions.closed(), 1);
}

#[tokio::test]
async fn per_turn_errors_are_reported_and_the_loop_continues() {
    // First turn: unknown tool. Second: service failure (queue exhausted).
    let conversation = ScriptedConversation::new([tool_response("delete_files", "rm -rf /")]);
    let sessions = FakeSessions::new(Behaviour::Outcome(ExecutionOutcome::default()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    interaction
        .run(Cursor::new("clean up\n\nsummarise\n"), &mut out)
        .await
        .unwrap();
    let printed = String::from_utf8(out).unwrap();

    assert!(printed.contains("Error processing message: Unknown tool requested: delete_files"));
    assert!(printed.contains("Error processing message: Inference service error: 529 overloaded"));
    assert_eq!(conversation.sent.lock().unwrap().len(), 2);
    assert_eq!((sessions.opened(), sessions.closed()), (2, 2));
    assert!(sessions.counters.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sandbox_failure_aborts_turn_but_closes_session() {
    let conversation = ScriptedConversation::new([tool_response("execute_python", "x = 1")]);
    let sessions = FakeSessions::new(Behaviour::Fail("kernel unreachable".into()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    let err = interaction.run_turn("set x", &mut out).await.unwrap_err();
    assert!(matches!(err, TurnError::Sandbox(_)));
    assert_eq!((sessions.opened(), sessions.closed()), (1, 1));
}

#[tokio::test]
async fn panicking_session_is_still_closed_once() {
    let conversation = ScriptedConversation::new([tool_response("execute_python", "x = 1")]);
    let sessions = FakeSessions::new(Behaviour::Panic);
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let result = {
        use futures::FutureExt;
        let mut out = Vec::new();
        std::panic::AssertUnwindSafe(interaction.run_turn("set x", &mut out))
            .catch_unwind()
            .await
    };
    assert!(result.is_err());
    assert_eq!((sessions.opened(), sessions.closed()), (1, 1));
}

#[tokio::test]
async fn end_of_input_ends_the_loop() {
    let conversation = ScriptedConversation::new([text_response("hi")]);
    let sessions = FakeSessions::new(Behaviour::Outcome(ExecutionOutcome::default()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    interaction.run(Cursor::new("hello"), &mut out).await.unwrap();
    let printed = String::from_utf8(out).unwrap();

    assert!(printed.contains(NO_EXECUTION));
    assert_eq!(printed.matches(PROMPT).count(), 2);
    assert_eq!(sessions.closed(), 1);
}

#[tokio::test]
async fn invalid_utf8_line_is_decoded_lossily_and_the_loop_continues() {
    let conversation = ScriptedConversation::new([text_response("ok"), text_response("hi")]);
    let sessions = FakeSessions::new(Behaviour::Outcome(ExecutionOutcome::default()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    );

    let mut out = Vec::new();
    interaction
        .run(Cursor::new(b"caf\xe9\nhello\n".to_vec()), &mut out)
        .await
        .unwrap();

    assert_eq!(
        *conversation.sent.lock().unwrap(),
        vec!["caf\u{FFFD}".to_string(), "hello".to_string()]
    );
    assert_eq!((sessions.opened(), sessions.closed()), (2, 2));
}

#[tokio::test]
async fn interrupt_before_input_stops_without_opening_a_session() {
    let conversation = ScriptedConversation::new([text_response("hi")]);
    let sessions = FakeSessions::new(Behaviour::Outcome(ExecutionOutcome::default()));
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let (_tx, rx) = watch::channel(true);
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    )
    .with_interrupt(rx);

    let mut out = Vec::new();
    interaction.run(Cursor::new("hello\n"), &mut out).await.unwrap();

    assert_eq!(sessions.opened(), 0);
    assert!(conversation.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn interrupt_during_a_hung_cell_closes_the_session_and_ends_the_loop() {
    let conversation = ScriptedConversation::new([tool_response("execute_python", "while True: pass")]);
    let sessions = FakeSessions::new(Behaviour::Hang);
    let fs = MemoryFs::default();
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = watch::channel(false);
    let interaction = InteractionLoop::new(
        &conversation,
        &sessions,
        ResultExtractor::new(&fs, "/home/user", dir.path()),
    )
    .with_interrupt(rx);

    let mut out = Vec::new();
    let (result, _) = tokio::join!(
        interaction.run(Cursor::new("spin\nnever read\n"), &mut out),
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        }
    );

    result.unwrap();
    assert_eq!(*conversation.sent.lock().unwrap(), vec!["spin".to_string()]);
    assert_eq!(
        *sessions.counters.submitted.lock().unwrap(),
        vec!["while True: pass".to_string()]
    );
    assert_eq!((sessions.opened(), sessions.closed()), (1, 1));
    assert!(!String::from_utf8(out).unwrap().contains("Error processing message"));
}
