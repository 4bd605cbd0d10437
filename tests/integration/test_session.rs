//! Integration tests for the session controller talking to a live server.
//!
//! A controller backed by `HttpSource` drives full turns against the router
//! on a real TCP port: section extraction, history carry-over, aborts and
//! error reporting.

use std::sync::Arc;
use std::time::Duration;

use focal_session::{
    HttpSource, SessionController, SessionPhase, SessionUpdate, Submission, TurnStatus,
};
use focal_tutor::testing::ScriptedModel;
use focal_tutor::{
    create_router, AppState, Category, Config, GenerationGateway, ImagePayload, LlmErrorKind,
    ResponseOptions, Role, SectionKind, SectionSet, Sliders, IMAGE_ONLY_TEXT,
};
use tokio::time::timeout;

async fn spawn_server(model: &ScriptedModel) -> String {
    let state = AppState::new(
        Config::default(),
        GenerationGateway::single(Arc::new(model.clone())),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, create_router(state))
            .await
            .expect("Server failed");
    });
    format!("http://{addr}")
}

async fn controller_for(model: &ScriptedModel) -> SessionController {
    let base = spawn_server(model).await;
    SessionController::new(Arc::new(HttpSource::new(base)))
}

async fn finish(controller: &mut SessionController) -> Vec<SessionUpdate> {
    timeout(Duration::from_secs(10), controller.run_to_completion())
        .await
        .expect("Turn did not finish")
}

#[tokio::test]
async fn test_japanese_math_question_over_http() {
    let model = ScriptedModel::new().classify_as("math").with_chunks([
        "### summary\n一次方程式",
        "です。\n### answer\n",
        "x = 2",
    ]);
    let mut controller = controller_for(&model).await;
    let options = ResponseOptions::new(
        SectionSet::of(&[SectionKind::Summary, SectionKind::Answer]),
        Sliders {
            understanding: 0.2,
            politeness: 0.9,
        },
    );

    let turn_id = controller
        .submit(Submission::text("2x+3=7を解いて", options))
        .expect("Submission rejected");
    let updates = finish(&mut controller).await;

    assert_eq!(
        updates.first(),
        Some(&SessionUpdate::Started {
            turn_id,
            category: Category::Math
        })
    );
    assert_eq!(updates.last(), Some(&SessionUpdate::Completed { turn_id }));

    let turn = controller.session().last_turn().expect("No turn");
    let sections = turn.sections();
    assert_eq!(
        sections.get(SectionKind::Summary).map(|s| s.text.as_str()),
        Some("一次方程式です。")
    );
    assert_eq!(
        sections.get(SectionKind::Answer).map(|s| s.text.as_str()),
        Some("x = 2")
    );

    let prompt = &model.requests()[0].prompt;
    assert!(prompt.contains("shallow understanding"));
    assert!(prompt.contains("maximally thorough"));
    assert_eq!(controller.session().history().len(), 2);
}

#[tokio::test]
async fn test_history_carries_into_next_turn() {
    let model = ScriptedModel::new().with_chunks(["noted"]);
    let mut controller = controller_for(&model).await;

    controller
        .submit(Submission::text("My name is Aiko.", ResponseOptions::default()))
        .expect("Submission rejected");
    finish(&mut controller).await;
    controller
        .submit(Submission::text("What is my name?", ResponseOptions::default()))
        .expect("Submission rejected");
    finish(&mut controller).await;

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let history = &requests[1].history;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "My name is Aiko.");
    assert_eq!(history[1].role, Role::Model);
    assert_eq!(history[1].content, "noted");
}

#[tokio::test]
async fn test_image_only_question_over_http() {
    let model = ScriptedModel::new().classify_as("math").with_chunks(["a right triangle"]);
    let mut controller = controller_for(&model).await;

    let png = ImagePayload::from_bytes(vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    controller
        .submit(Submission {
            text: String::new(),
            images: vec![png],
            options: ResponseOptions::default(),
        })
        .expect("Submission rejected");
    finish(&mut controller).await;

    let turn = controller.session().last_turn().expect("No turn");
    assert_eq!(turn.category, Some(Category::Other));
    assert_eq!(controller.session().history()[0].content, IMAGE_ONLY_TEXT);

    let sent = &model.requests()[0];
    assert_eq!(sent.images.len(), 1);
    assert_eq!(sent.images[0].mime_type, "image/png");
    assert!(model.completions().is_empty());
}

#[tokio::test]
async fn test_abort_mid_stream_keeps_partial_text() {
    let model = ScriptedModel::new()
        .with_chunks((0..100).map(|i| format!("w{i} ")))
        .with_delay(Duration::from_millis(20));
    let mut controller = controller_for(&model).await;

    let turn_id = controller
        .submit(Submission::text("Tell me a story", ResponseOptions::default()))
        .expect("Submission rejected");

    let mut shown = String::new();
    while shown.len() < "w0 w1 w2 ".len() {
        let update = timeout(Duration::from_secs(5), controller.next_event())
            .await
            .expect("Timeout waiting for update")
            .expect("Generation ended early");
        if let SessionUpdate::Chunk { text, .. } = update {
            shown.push_str(&text);
        }
    }

    assert_eq!(controller.abort().expect("Abort failed"), turn_id);
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(controller.next_event().await.is_none());

    let turn = controller.session().last_turn().expect("No turn");
    assert_eq!(turn.status, TurnStatus::Aborted);
    assert_eq!(turn.model_text, shown);
    assert!(controller.session().history().is_empty());

    let mut dropped = false;
    for _ in 0..100 {
        if model.streams_dropped() == 1 {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped, "server kept generating after the abort");
}

#[tokio::test]
async fn test_new_turn_after_abort_is_not_polluted() {
    let model = ScriptedModel::new()
        .with_chunks((0..100).map(|i| format!("old{i} ")))
        .then_chunks(["new0 ", "new1 ", "new2"])
        .with_delay(Duration::from_millis(10));
    let mut controller = controller_for(&model).await;

    controller
        .submit(Submission::text("first", ResponseOptions::default()))
        .expect("Submission rejected");
    loop {
        let update = timeout(Duration::from_secs(5), controller.next_event())
            .await
            .expect("Timeout waiting for update")
            .expect("Generation ended early");
        if matches!(update, SessionUpdate::Chunk { .. }) {
            break;
        }
    }
    controller.abort().expect("Abort failed");

    // The first reader may still be delivering while the second turn streams.
    let turn_id = controller
        .submit(Submission::text("second", ResponseOptions::default()))
        .expect("Submission rejected");
    let updates = finish(&mut controller).await;
    assert_eq!(updates.last(), Some(&SessionUpdate::Completed { turn_id }));
    assert!(updates.iter().all(|update| !matches!(
        update,
        SessionUpdate::Chunk { turn_id: id, .. } if *id != turn_id
    )));

    let turns = controller.session().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].status, TurnStatus::Aborted);
    assert!(turns[0].model_text.starts_with("old0 "));
    assert_eq!(turns[1].status, TurnStatus::Completed);
    assert_eq!(turns[1].model_text, "new0 new1 new2");
    assert!(!turns[1].model_text.contains("old"));

    let history = controller.session().history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "second");
    assert_eq!(history[1].content, "new0 new1 new2");
    assert_eq!(controller.generation(), 2);
}

#[tokio::test]
async fn test_server_failure_is_reported_on_the_turn() {
    let model = ScriptedModel::new()
        .classify_as("chemistry")
        .with_chunks(["never"])
        .fail_after(0, LlmErrorKind::RateLimit, "429 from upstream");
    let mut controller = controller_for(&model).await;

    let turn_id = controller
        .submit(Submission::text("What is a mole?", ResponseOptions::default()))
        .expect("Submission rejected");
    let updates = finish(&mut controller).await;

    match updates.as_slice() {
        [SessionUpdate::Failed { turn_id: id, message }] => {
            assert_eq!(*id, turn_id);
            assert!(message.contains("rate_limit"));
        }
        other => panic!("unexpected updates: {other:?}"),
    }

    let turn = controller.session().last_turn().expect("No turn");
    assert_eq!(turn.category, Some(Category::Chemistry));
    assert!(matches!(turn.status, TurnStatus::Failed { .. }));
    assert!(controller.session().history().is_empty());
}

#[tokio::test]
async fn test_failure_mid_stream_keeps_partial_text_and_category() {
    let model = ScriptedModel::new()
        .classify_as("math")
        .with_chunks(["part1 ", "part2 ", "never"])
        .fail_after(2, LlmErrorKind::Server, "boom");
    let mut controller = controller_for(&model).await;

    let turn_id = controller
        .submit(Submission::text("2x+3=7を解いて", ResponseOptions::default()))
        .expect("Submission rejected");
    let updates = finish(&mut controller).await;

    assert_eq!(
        updates.first(),
        Some(&SessionUpdate::Started {
            turn_id,
            category: Category::Math
        })
    );
    match updates.last() {
        Some(SessionUpdate::Failed { turn_id: id, message }) => {
            assert_eq!(*id, turn_id);
            assert!(message.contains("server"));
            assert!(!message.contains("network"));
        }
        other => panic!("unexpected final update: {other:?}"),
    }

    let turn = controller.session().last_turn().expect("No turn");
    assert!(matches!(turn.status, TurnStatus::Failed { .. }));
    assert_eq!(turn.category, Some(Category::Math));
    assert_eq!(turn.model_text, "part1 part2 ");
    assert!(controller.session().history().is_empty());
}
