use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use convsync::config::Config;
use convsync::storage::{ConversationStore, SqliteStore};
use convsync::sync::ConversationService;

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("conversations.db");
    let store = SqliteStore::new_with_path(db_path).expect("failed to create sqlite store");
    (store, tmp)
}

#[allow(dead_code)]
pub fn service_over(store: Arc<dyn ConversationStore>) -> ConversationService {
    ConversationService::new(store, &Config::default())
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
