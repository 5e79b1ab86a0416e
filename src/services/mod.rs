pub mod cache;
pub mod database;
pub mod document;
pub mod history;
pub mod rehydrate;
pub mod settings;
pub mod turn;

pub use database::Database;
pub use history::HistoryManager;
pub use settings::SettingsService;
