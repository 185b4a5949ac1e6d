use crate::backend::ConversationSummary;
use crate::types::ChatId;
use crate::ui::{AppTab, ChatContext};
use dioxus::prelude::*;
use time::{UtcOffset, format_description::FormatItem, macros::format_description};
use tracing::debug;

const UPDATED_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:short] [day padding:none], [hour repr:12 padding:zero]:[minute] [period case:upper]");

fn format_updated(summary: &ConversationSummary) -> String {
    let mut updated = summary.updated_at;
    if let Ok(offset) = UtcOffset::current_local_offset() {
        updated = updated.to_offset(offset);
    }
    updated.format(UPDATED_FORMAT).unwrap_or_default()
}

/// Past conversations, refetched whenever a write invalidates the list.
#[component]
pub fn HistoryView(active_tab: Signal<AppTab>) -> Element {
    let context = use_context::<ChatContext>();
    let mut list_revision = use_signal(|| context.cache.list_revision());

    let cache = context.cache.clone();
    use_future(move || {
        let cache = cache.clone();
        async move {
            let mut rx = cache.subscribe_list();
            while rx.changed().await.is_ok() {
                let revision = *rx.borrow_and_update();
                list_revision.set(revision);
            }
        }
    });

    let chat = context.chat.clone();
    let conversations = use_resource(move || {
        let chat = chat.clone();
        let _revision = list_revision();
        async move { chat.list_conversations().await.unwrap_or_default() }
    });

    let new_chat = context.chat.clone();
    let mut active_tab = active_tab;

    rsx! {
        div { class: "history",
            div { class: "history-toolbar",
                button {
                    class: "btn btn-primary",
                    onclick: move |_| {
                        new_chat.start_new_conversation();
                        active_tab.set(AppTab::Chat);
                    },
                    "New chat"
                }
            }
            match &*conversations.read() {
                Some(list) if list.is_empty() => rsx! { p { class: "muted", "No conversations yet." } },
                Some(list) => rsx! {
                    ul { class: "history-list",
                        for summary in list.iter().cloned() {
                            HistoryEntry { key: "{summary.id}", summary, active_tab }
                        }
                    }
                },
                None => rsx! { p { class: "shimmer-text", "Loading…" } },
            }
        }
    }
}

#[component]
fn HistoryEntry(summary: ConversationSummary, active_tab: Signal<AppTab>) -> Element {
    let context = use_context::<ChatContext>();
    let mut renaming = use_signal(|| false);
    let mut draft = use_signal(|| summary.name.clone());
    let chat_id: ChatId = summary.id;
    let preview = summary
        .last_message()
        .map(|message| message.content.chars().take(80).collect::<String>())
        .unwrap_or_default();
    let updated = format_updated(&summary);

    let open = context.chat.clone();
    let rename = context.chat.clone();
    let delete = context.chat.clone();
    let mut active_tab = active_tab;

    rsx! {
        li { class: "history-entry",
            if renaming() {
                form {
                    onsubmit: move |ev| {
                        ev.prevent_default();
                        let chat = rename.clone();
                        let name = draft();
                        renaming.set(false);
                        spawn(async move {
                            if let Err(err) = chat.rename_conversation(chat_id, &name).await {
                                debug!(chat_id, %err, "rename failed");
                            }
                        });
                    },
                    input {
                        value: "{draft}",
                        oninput: move |ev| draft.set(ev.value()),
                        autofocus: true,
                    }
                    button { class: "action-btn", r#type: "submit", "Save" }
                }
            } else {
                div {
                    class: "history-open",
                    onclick: move |_| {
                        let chat = open.clone();
                        active_tab.set(AppTab::Chat);
                        spawn(async move {
                            if let Err(err) = chat.load_conversation(chat_id).await {
                                debug!(chat_id, %err, "open failed");
                            }
                        });
                    },
                    div { class: "history-name", "{summary.name}" }
                    div { class: "history-preview muted", "{preview}" }
                    div { class: "history-updated muted", "{updated}" }
                }
            }
            div { class: "actions",
                button { class: "action-btn", onclick: move |_| renaming.set(true), "Rename" }
                button {
                    class: "action-btn",
                    onclick: move |_| {
                        let chat = delete.clone();
                        spawn(async move {
                            if let Err(err) = chat.delete_conversation(chat_id).await {
                                debug!(chat_id, %err, "delete failed");
                            }
                        });
                    },
                    "Delete"
                }
            }
        }
    }
}
