//! Submission flow: provisional entries, reconciliation, cache invalidation,
//! voice-mode auto-play and history management.

mod common;

use common::{BackendCall, FakeBackend, FakeSpeech, settle};
use std::sync::Arc;
use std::time::Duration;
use support_chat::audio::HeadlessOutput;
use support_chat::audio_source::AudioSource;
use support_chat::cache::CacheRevisions;
use support_chat::config::Timings;
use support_chat::error::ChatError;
use support_chat::playback::PlaybackState;
use support_chat::submit::{ChatServices, SubmissionOrchestrator, UserSession};
use support_chat::types::{InputMode, Role, Voice};

struct Harness {
    backend: Arc<FakeBackend>,
    cache: Arc<CacheRevisions>,
    speech: Arc<FakeSpeech>,
    chat: Arc<SubmissionOrchestrator>,
}

fn harness_with(backend: FakeBackend) -> Harness {
    let backend = Arc::new(backend);
    let cache = Arc::new(CacheRevisions::new());
    let speech = Arc::new(FakeSpeech::default());
    let chat = Arc::new(SubmissionOrchestrator::new(
        ChatServices {
            backend: backend.clone(),
            cache: cache.clone(),
            speech: speech.clone(),
            output: Arc::new(HeadlessOutput::new()),
        },
        &Timings::default(),
    ));
    chat.sign_in(UserSession {
        user_id: "customer-1".into(),
    });
    Harness {
        backend,
        cache,
        speech,
        chat,
    }
}

fn harness() -> Harness {
    harness_with(FakeBackend::default())
}

fn notification_texts(h: &Harness) -> Vec<String> {
    h.chat
        .notifications()
        .list()
        .into_iter()
        .map(|n| n.text)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn first_submit_shows_provisional_then_one_confirmed_pair() {
    let h = harness_with(FakeBackend::slow(Duration::from_secs(1)));
    h.chat.set_input("hello");

    let pending = {
        let chat = h.chat.clone();
        tokio::spawn(async move { chat.submit("hello", InputMode::Text).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let during = h.chat.messages().snapshot();
    assert_eq!(during.len(), 1);
    assert_eq!(during[0].role, Role::User);
    assert_eq!(during[0].content, "hello");
    assert!(during[0].is_provisional());
    assert!(h.chat.is_loading());

    let reply_id = pending.await.unwrap().expect("submit should succeed");

    let after = h.chat.messages().snapshot();
    let roles: Vec<_> = after.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert!(after.iter().all(|m| !m.is_provisional()));
    assert_eq!(after[1].id, reply_id);
    assert_eq!(after[1].content, "echo: hello");
    assert_eq!(after[1].audio, None);
    assert!(after[0].id.as_str().starts_with("user-101-"));
    assert!(after[1].id.as_str().starts_with("ai-101-"));

    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Create {
            first_message: "hello".into(),
            voice: None,
        }]
    );
    assert_eq!(h.chat.chat_id(), Some(101));
    assert_eq!(h.cache.list_revision(), 1);
    assert_eq!(h.cache.conversation_revision(101), 1);

    let composer = h.chat.composer_state();
    assert!(!composer.is_loading);
    assert!(composer.input.is_empty());
}

#[tokio::test(start_paused = true)]
async fn follow_up_appends_to_the_open_conversation() {
    let h = harness();
    h.chat.submit("first", InputMode::Text).await.unwrap();
    h.chat.submit("second", InputMode::Text).await.unwrap();

    assert_eq!(
        h.backend.calls()[1],
        BackendCall::Append {
            chat_id: 101,
            content: "second".into(),
            voice: None,
        }
    );
    let contents: Vec<_> = h
        .chat
        .messages()
        .snapshot()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first", "echo: first", "second", "echo: second"]);
    assert_eq!(h.chat.messages().user_message_count(), 2);
    assert_eq!(h.cache.list_revision(), 2);
}

#[tokio::test(start_paused = true)]
async fn text_mode_keeps_the_backend_audio_url() {
    let h = harness();
    h.backend.audio_url("https://cdn.example/reply.mp3");
    let reply_id = h.chat.submit("hi", InputMode::Text).await.unwrap();

    let reply = h.chat.messages().get(&reply_id).unwrap();
    assert_eq!(
        reply.audio,
        Some(AudioSource::DirectUrl("https://cdn.example/reply.mp3".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn voice_submit_auto_plays_the_reply() {
    let h = harness();
    h.backend.reply_with("**Hello**<br>World");
    h.chat.set_voice(Voice::Ameha);

    let reply_id = h.chat.submit("selam", InputMode::Voice).await.unwrap();

    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Create {
            first_message: "selam".into(),
            voice: Some(Voice::Ameha),
        }]
    );
    let reply = h.chat.messages().get(&reply_id).unwrap();
    assert_eq!(reply.audio, Some(AudioSource::OnDemand));
    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);

    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = h.chat.playback().snapshot();
    assert_eq!(snapshot.state, PlaybackState::Playing(reply_id));
    assert!(snapshot.shows_stop_overlay());
    let requests = h.speech.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "Hello\nWorld");
    assert_eq!(requests[0].voice, Voice::Ameha);
}

#[tokio::test(start_paused = true)]
async fn closing_the_view_cancels_a_pending_auto_play() {
    let h = harness();
    h.chat.submit("selam", InputMode::Voice).await.unwrap();
    h.chat.teardown_view();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);
    assert!(h.speech.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_orchestrator_cancels_a_pending_auto_play() {
    let h = harness();
    h.chat.submit("selam", InputMode::Voice).await.unwrap();
    let playback = h.chat.playback().clone();
    let speech = h.speech.clone();
    drop(h);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(playback.snapshot().state, PlaybackState::Idle);
    assert!(speech.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn starting_a_new_conversation_cancels_a_pending_auto_play() {
    let h = harness();
    h.chat.submit("selam", InputMode::Voice).await.unwrap();
    h.chat.start_new_conversation();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);
    assert!(h.speech.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_landing_after_a_conversation_switch_is_not_shown() {
    let h = harness_with(FakeBackend::slow(Duration::from_secs(1)));
    h.backend
        .store_conversation(7, &[(Role::User, "question", 0), (Role::Assistant, "answer", 1)]);

    let loading = {
        let chat = h.chat.clone();
        tokio::spawn(async move { chat.load_conversation(7).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sending = {
        let chat = h.chat.clone();
        tokio::spawn(async move { chat.submit("hello", InputMode::Voice).await })
    };

    loading.await.unwrap().unwrap();
    assert!(sending.await.unwrap().is_ok());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let ids: Vec<_> = h
        .chat
        .messages()
        .snapshot()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(ids, vec!["user-7-0", "ai-7-1000"]);
    assert_eq!(h.chat.chat_id(), Some(7));
    assert!(!h.chat.is_loading());
    assert_eq!(h.cache.conversation_revision(101), 1);
    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);
    assert!(h.speech.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn voice_reply_without_speakable_text_is_not_played() {
    let h = harness();
    h.backend.reply_with("<br><br>");
    h.chat.submit("selam", InputMode::Voice).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);
    assert!(h.speech.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn blank_or_signed_out_submit_is_refused() {
    let h = harness();
    assert_eq!(
        h.chat.submit("   ", InputMode::Text).await,
        Err(ChatError::EmptyInput)
    );

    h.chat.sign_out();
    assert_eq!(
        h.chat.submit("hi", InputMode::Text).await,
        Err(ChatError::AuthRequired)
    );

    assert_eq!(
        notification_texts(&h),
        vec![
            "Please sign in or enter a message.",
            "Please sign in or enter a message."
        ]
    );
    assert!(h.backend.calls().is_empty());
    assert!(h.chat.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backend_failure_keeps_the_sent_input_once() {
    let h = harness();
    h.chat.set_input("hi");
    h.backend
        .fail_next(ChatError::BackendFailure("RAG service unavailable".into()));

    let result = h.chat.submit("hi", InputMode::Text).await;

    assert_eq!(
        result,
        Err(ChatError::BackendFailure("RAG service unavailable".into()))
    );
    assert_eq!(notification_texts(&h), vec!["Error: RAG service unavailable"]);
    let messages = h.chat.messages().snapshot();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hi");
    assert!(!h.chat.is_loading());
    assert!(h.chat.composer_state().input.is_empty());
    assert_eq!(h.chat.chat_id(), None);
    assert_eq!(h.cache.list_revision(), 0);
}

#[tokio::test(start_paused = true)]
async fn transcripts_submit_in_voice_mode() {
    let h = harness();
    assert_eq!(h.chat.submit_transcript("  ").await, Ok(None));
    assert!(h.backend.calls().is_empty());

    let reply = h.chat.submit_transcript("selam").await.unwrap();
    assert!(reply.is_some());
    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Create {
            first_message: "selam".into(),
            voice: Some(Voice::Mekdes),
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn loading_a_conversation_normalizes_ids() {
    let h = harness();
    h.backend
        .store_conversation(7, &[(Role::User, "question", 0), (Role::Assistant, "answer", 5)]);

    h.chat.load_conversation(7).await.unwrap();

    let ids: Vec<_> = h
        .chat
        .messages()
        .snapshot()
        .into_iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(ids, vec!["user-7-0", "ai-7-5000"]);
    assert_eq!(h.chat.chat_id(), Some(7));

    h.chat.submit("more", InputMode::Text).await.unwrap();
    assert_eq!(
        h.backend.calls().last(),
        Some(&BackendCall::Append {
            chat_id: 7,
            content: "more".into(),
            voice: None,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn failed_load_is_reported() {
    let h = harness();
    let result = h.chat.load_conversation(99).await;

    assert!(matches!(result, Err(ChatError::NotFound(_))));
    assert_eq!(notification_texts(&h), vec!["Failed to load chat."]);
}

#[tokio::test(start_paused = true)]
async fn agent_transfer_posts_two_notices() {
    let h = harness();
    h.chat.request_agent_transfer();
    assert_eq!(notification_texts(&h), vec!["Transferring to a human agent..."]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(
        notification_texts(&h),
        vec!["Transferring to a human agent...", "Connected to a human agent."]
    );

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(notification_texts(&h).is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleting_the_open_conversation_clears_the_view() {
    let h = harness();
    h.chat.submit("selam", InputMode::Voice).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(matches!(
        h.chat.playback().snapshot().state,
        PlaybackState::Playing(_)
    ));

    h.chat.delete_conversation(101).await.unwrap();

    assert!(h.chat.messages().is_empty());
    assert_eq!(h.chat.chat_id(), None);
    assert_eq!(h.chat.playback().snapshot().state, PlaybackState::Idle);
    assert_eq!(h.backend.calls().last(), Some(&BackendCall::Delete(101)));
    assert_eq!(h.cache.conversation_revision(101), 2);
}

#[tokio::test(start_paused = true)]
async fn deleting_another_conversation_keeps_the_view() {
    let h = harness();
    h.chat.submit("hi", InputMode::Text).await.unwrap();

    h.chat.delete_conversation(55).await.unwrap();

    assert_eq!(h.chat.messages().len(), 2);
    assert_eq!(h.chat.chat_id(), Some(101));
}

#[tokio::test(start_paused = true)]
async fn rename_validates_and_invalidates() {
    let h = harness();
    assert_eq!(
        h.chat.rename_conversation(5, "  ").await,
        Err(ChatError::EmptyInput)
    );

    assert_eq!(notification_texts(&h), vec!["Conversation name cannot be empty."]);
    assert!(h.backend.calls().is_empty());

    h.chat.rename_conversation(5, " Loan question ").await.unwrap();

    assert_eq!(
        h.backend.calls(),
        vec![BackendCall::Rename(5, "Loan question".into())]
    );
    assert_eq!(h.cache.conversation_revision(5), 1);
    assert_eq!(h.cache.list_revision(), 1);
}

#[tokio::test(start_paused = true)]
async fn history_listing_reports_failures() {
    let h = harness();
    h.backend.store_conversation(3, &[(Role::User, "hi", 0)]);
    let list = h.chat.list_conversations().await.unwrap();
    assert_eq!(list.len(), 1);

    h.backend.fail_next(ChatError::AuthRequired);
    assert_eq!(
        h.chat.list_conversations().await,
        Err(ChatError::AuthRequired)
    );
    assert_eq!(notification_texts(&h).len(), 1);
}
