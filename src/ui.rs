use crate::audio::{AudioOutput, HeadlessOutput};
use crate::cache::CacheRevisions;
use crate::config::ClientConfig;
use crate::submit::SubmissionOrchestrator;
use crate::views::{ChatView, HistoryView};
use dioxus::prelude::*;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{error, warn};

/// Shared by every view of the window.
#[derive(Clone)]
pub struct ChatContext {
    pub chat: Arc<SubmissionOrchestrator>,
    pub cache: Arc<CacheRevisions>,
}

impl PartialEq for ChatContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.chat, &other.chat)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppTab {
    Chat,
    History,
}

fn audio_output() -> Arc<dyn AudioOutput> {
    #[cfg(feature = "native-audio")]
    {
        match crate::audio::RodioOutput::open_default() {
            Ok(output) => return Arc::new(output),
            Err(err) => warn!(%err, "no audio device, replies will not be audible"),
        }
    }
    #[cfg(not(feature = "native-audio"))]
    warn!("built without native-audio, replies will not be audible");
    Arc::new(HeadlessOutput::new())
}

static CONFIG: OnceCell<ClientConfig> = OnceCell::new();

/// Starts the window with an already validated configuration.
pub fn launch(config: ClientConfig) {
    if CONFIG.set(config).is_err() {
        warn!("client config was already installed, keeping the first one");
    }
    dioxus::launch(App);
}

fn build_context() -> Result<ChatContext, String> {
    let config = match CONFIG.get() {
        Some(config) => config.clone(),
        None => ClientConfig::from_env().map_err(|err| {
            error!(%err, "invalid configuration");
            err.to_string()
        })?,
    };
    let cache = Arc::new(CacheRevisions::new());
    let chat = SubmissionOrchestrator::from_config(&config, audio_output(), cache.clone());
    Ok(ChatContext {
        chat: Arc::new(chat),
        cache,
    })
}

#[component]
pub fn App() -> Element {
    let context = use_hook(build_context);
    let active_tab = use_signal(|| AppTab::Chat);

    match context {
        Ok(context) => rsx! {
            ChatShell { context, active_tab }
        },
        Err(message) => rsx! {
            div { class: "config-error",
                h1 { "Configuration error" }
                p { "{message}" }
            }
        },
    }
}

#[component]
fn ChatShell(context: ChatContext, active_tab: Signal<AppTab>) -> Element {
    use_context_provider(|| context.clone());
    rsx! {
        div { class: "header no-divider",
            div { class: "header-content",
                h1 { class: "wordmark", "Support" }
                TabNavigation { active_tab }
            }
        }
        div { class: "tab-panels",
            TabPanel {
                active_tab,
                tab: AppTab::Chat,
                children: rsx!( ChatView {} ),
            }
            TabPanel {
                active_tab,
                tab: AppTab::History,
                children: rsx!( HistoryView { active_tab } ),
            }
        }
    }
}

#[component]
fn TabPanel(active_tab: Signal<AppTab>, tab: AppTab, children: Element) -> Element {
    let is_active = active_tab() == tab;
    let class_suffix = if is_active { "active" } else { "" };
    rsx! {
        div {
            class: format_args!("tab-panel {}", class_suffix),
            aria_hidden: (!is_active).to_string(),
            {children}
        }
    }
}

#[component]
fn TabNavigation(active_tab: Signal<AppTab>) -> Element {
    rsx! {
        div { class: "tabs",
            TabButton { active_tab, tab: AppTab::Chat, label: "Chat" }
            TabButton { active_tab, tab: AppTab::History, label: "History" }
        }
    }
}

#[component]
fn TabButton(active_tab: Signal<AppTab>, tab: AppTab, label: &'static str) -> Element {
    let mut active_tab = active_tab;
    let class = if active_tab() == tab {
        "tab active"
    } else {
        "tab"
    };
    rsx! {
        h1 {
            class: class,
            onclick: move |_| active_tab.set(tab),
            "{label}"
        }
    }
}
