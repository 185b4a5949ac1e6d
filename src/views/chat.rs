use crate::markup::render_html;
use crate::notifications::Notification;
use crate::playback::PlaybackSnapshot;
use crate::submit::ComposerState;
use crate::types::{ChatMessage, InputMode, Role, Voice};
use crate::ui::ChatContext;
use dioxus::events::Key;
use dioxus::prelude::*;
use time::{OffsetDateTime, UtcOffset, format_description::FormatItem, macros::format_description};
use tracing::debug;

const MESSAGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:zero]:[minute padding:zero] [period case:upper]");

fn format_message_timestamp(timestamp: OffsetDateTime) -> Option<String> {
    let mut datetime = timestamp;
    if let Ok(offset) = UtcOffset::current_local_offset() {
        datetime = datetime.to_offset(offset);
    }
    datetime.format(MESSAGE_TIME_FORMAT).ok()
}

fn role_class(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Mirrors the core's watch channels into signals.
fn use_core_state(
    context: &ChatContext,
) -> (
    Signal<Vec<ChatMessage>>,
    Signal<PlaybackSnapshot>,
    Signal<ComposerState>,
    Signal<Vec<Notification>>,
) {
    let mut messages = use_signal(|| context.chat.messages().display_order());
    let mut playback = use_signal(|| context.chat.playback().snapshot());
    let mut composer = use_signal(|| context.chat.composer_state());
    let mut notifications = use_signal(|| context.chat.notifications().list());

    let chat = context.chat.clone();
    use_future(move || {
        let chat = chat.clone();
        async move {
            let mut rx = chat.messages().subscribe();
            while rx.changed().await.is_ok() {
                messages.set(chat.messages().display_order());
            }
        }
    });
    let chat = context.chat.clone();
    use_future(move || {
        let chat = chat.clone();
        async move {
            let mut rx = chat.playback().subscribe();
            while rx.changed().await.is_ok() {
                let snapshot = rx.borrow_and_update().clone();
                playback.set(snapshot);
            }
        }
    });
    let chat = context.chat.clone();
    use_future(move || {
        let chat = chat.clone();
        async move {
            let mut rx = chat.subscribe_composer();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                composer.set(state);
            }
        }
    });
    let chat = context.chat.clone();
    use_future(move || {
        let chat = chat.clone();
        async move {
            let mut rx = chat.notifications().subscribe();
            while rx.changed().await.is_ok() {
                notifications.set(chat.notifications().list());
            }
        }
    });

    (messages, playback, composer, notifications)
}

#[component]
pub fn ChatView() -> Element {
    let context = use_context::<ChatContext>();
    let (messages, playback, composer, notifications) = use_core_state(&context);
    let mut input_mode = use_signal(InputMode::default);
    let mut show_transfer = use_signal(|| false);

    let teardown = context.chat.clone();
    use_drop(move || teardown.teardown_view());

    let send = {
        let chat = context.chat.clone();
        move |text: String| {
            let chat = chat.clone();
            let mode = input_mode();
            spawn(async move {
                let result = match mode {
                    InputMode::Voice => chat.submit_transcript(&text).await.map(|_| ()),
                    InputMode::Text => chat.submit(&text, mode).await.map(|_| ()),
                };
                if let Err(err) = result {
                    debug!(%err, "submit returned an error");
                }
            });
        }
    };
    let send_on_enter = send.clone();
    let send_on_click = send;

    let set_input = context.chat.clone();
    let stop_overlay = context.chat.clone();
    let transfer = context.chat.clone();
    let voice_select = context.chat.clone();
    let state = composer();
    let snapshot = playback();
    let mode = input_mode();
    let mode_class = match mode {
        InputMode::Voice => "btn mode-toggle active",
        InputMode::Text => "btn mode-toggle",
    };

    rsx! {
        div { class: "main-container",
            NotificationStack { notifications: notifications() }
            if snapshot.shows_stop_overlay() {
                button {
                    class: "stop-overlay btn",
                    title: "Stop audio",
                    onclick: move |_| stop_overlay.playback().stop(),
                    "Stop"
                }
            }
            div { class: "chat-wrap",
                div { id: "chat-list", class: "chat-list",
                    for msg in messages() {
                        MessageRow {
                            key: "{msg.id}",
                            message: msg.clone(),
                            playback: snapshot.clone(),
                            mode,
                            voice: state.voice,
                        }
                    }
                }
            }

            form { class: "composer no-divider",
                div { class: "composer-inner",
                    div { class: "hstack", style: "gap: 0.5rem; width: 100%; align-items: flex-end;",
                        select {
                            class: "voice-select",
                            value: "{state.voice}",
                            onchange: move |ev| {
                                if let Ok(voice) = ev.value().parse::<Voice>() {
                                    voice_select.set_voice(voice);
                                }
                            },
                            for voice in Voice::ALL {
                                option { value: "{voice}", "{voice.label()}" }
                            }
                        }
                        button {
                            class: mode_class,
                            r#type: "button",
                            title: "Voice replies",
                            onclick: move |_| {
                                let next = match input_mode() {
                                    InputMode::Text => InputMode::Voice,
                                    InputMode::Voice => InputMode::Text,
                                };
                                input_mode.set(next);
                            },
                            if mode == InputMode::Voice { "Voice" } else { "Text" }
                        }
                        textarea {
                            rows: "1",
                            placeholder: "How can we help?",
                            value: "{state.input}",
                            oninput: move |ev| set_input.set_input(ev.value()),
                            onkeydown: move |ev| {
                                if ev.key() == Key::Enter && !ev.modifiers().shift() {
                                    ev.prevent_default();
                                    send_on_enter(composer().input);
                                }
                            },
                            disabled: state.is_loading,
                            autofocus: true,
                        }
                        button {
                            class: "btn btn-primary",
                            r#type: "button",
                            disabled: state.is_loading || state.input.trim().is_empty(),
                            onclick: move |_| send_on_click(composer().input),
                            if state.is_loading { "Sending…" } else { "Send" }
                        }
                        button {
                            class: "btn",
                            r#type: "button",
                            onclick: move |_| show_transfer.set(true),
                            "Talk to an agent"
                        }
                    }
                }
            }
            if show_transfer() {
                TransferDialog {
                    on_close: move |_| show_transfer.set(false),
                    on_transfer: move |_| {
                        transfer.request_agent_transfer();
                        show_transfer.set(false);
                    },
                }
            }
        }
    }
}

#[component]
fn MessageRow(message: ChatMessage, playback: PlaybackSnapshot, mode: InputMode, voice: Voice) -> Element {
    let context = use_context::<ChatContext>();
    let content_html = render_html(&message.content);
    let role = role_class(message.role);
    let timestamp = format_message_timestamp(message.created_at);
    let show_audio = message.role == Role::Assistant && message.has_audio(mode);
    let is_playing = playback.is_playing(&message.id);
    let is_paused = playback.is_paused(&message.id);
    let is_loading = playback.is_loading(&message.id);

    let play = {
        let chat = context.chat.clone();
        let message = message.clone();
        move |replay: bool| {
            let chat = chat.clone();
            let id = message.id.clone();
            let source = if replay {
                message.playable_source().replay()
            } else {
                message.playable_source()
            };
            spawn(async move {
                if let Err(err) = chat.playback().play(&id, source, voice, false).await {
                    debug!(%err, message = %id, "play request refused");
                }
            });
        }
    };
    let on_play = play.clone();
    let on_replay = play;
    let play_label = if is_paused { "Resume" } else { "Play" };
    let pause = context.chat.clone();
    let pause_id = message.id.clone();

    rsx! {
        div { class: format_args!("message-row {}", role),
            if message.role == Role::Assistant { div { class: "avatar assistant", "S" } }
            div { class: "message-stack",
                div { class: format_args!("bubble {}", role),
                    if message.role == Role::Assistant {
                        div { class: "md", dangerous_inner_html: "{content_html}" }
                    } else {
                        "{message.content}"
                    }
                }
                div { class: format_args!(
                        "message-meta {}",
                        if message.role == Role::User { "align-end" } else { "align-start" }
                    ),
                    if let Some(ts) = timestamp {
                        span { class: "message-timestamp", "{ts}" }
                    }
                    if message.is_provisional() {
                        span { class: "message-status", "Sending…" }
                    }
                    if show_audio {
                        div { class: "actions",
                            if is_loading {
                                span { class: "shimmer-text", "Loading audio…" }
                            } else if is_playing {
                                button {
                                    class: "action-btn",
                                    title: "Pause",
                                    onclick: move |_| { pause.playback().pause(&pause_id); },
                                    "Pause"
                                }
                            } else {
                                button {
                                    class: "action-btn",
                                    title: play_label,
                                    onclick: move |_| on_play(false),
                                    "{play_label}"
                                }
                            }
                            button {
                                class: "action-btn",
                                title: "Replay",
                                disabled: is_loading,
                                onclick: move |_| on_replay(true),
                                "Replay"
                            }
                        }
                    }
                }
            }
        }
    }
}

#[component]
fn NotificationStack(notifications: Vec<Notification>) -> Element {
    let context = use_context::<ChatContext>();
    rsx! {
        div { class: "notifications",
            for notification in notifications {
                NotificationToast { key: "{notification.id}", notification, chat: context.clone() }
            }
        }
    }
}

#[component]
fn NotificationToast(notification: Notification, chat: ChatContext) -> Element {
    let id = notification.id;
    let class = if notification.is_error {
        "toast error"
    } else {
        "toast"
    };
    rsx! {
        div { class: class, role: "status",
            span { "{notification.text}" }
            button {
                class: "action-btn",
                title: "Dismiss",
                onclick: move |_| chat.chat.notifications().dismiss(id),
                "×"
            }
        }
    }
}

#[component]
fn TransferDialog(on_close: EventHandler<()>, on_transfer: EventHandler<()>) -> Element {
    rsx! {
        div { class: "modal-backdrop",
            div { class: "modal",
                h2 { "Transfer to a human agent?" }
                p { "A support agent will continue this conversation." }
                div { class: "hstack", style: "gap: 0.5rem; justify-content: flex-end;",
                    button { class: "btn", r#type: "button", onclick: move |_| on_close.call(()), "Cancel" }
                    button { class: "btn btn-primary", r#type: "button", onclick: move |_| on_transfer.call(()), "Transfer" }
                }
            }
        }
    }
}
