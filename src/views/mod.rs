pub mod chat;
pub mod history;

pub use chat::ChatView;
pub use history::HistoryView;
