//! Wiring of the engine against Supabase and the command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use armin::{ChatEngine, EngineConfig};
use chat_cache::{keys, ConversationSnapshotStore};
use chat_config_and_utils::{init_logging, Config, LogConfig, LogFormat, Paths};
use chat_core::{MessageId, MessageKind, ProfileId, UploadedFile};
use chat_storage::{PersistentStorage, SqliteStorage};
use serde::Serialize;
use serde_json::json;
use toshinori::{SupabaseChatStore, SupabaseClient};
use tracing::{debug, info};

pub fn init(config: &Config, paths: &Paths, level: Option<&str>) -> anyhow::Result<()> {
    init_logging(&log_config(config, paths, level))?;
    Ok(())
}

fn log_config(config: &Config, paths: &Paths, level: Option<&str>) -> LogConfig {
    let format = if config.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    LogConfig {
        default_level: level.unwrap_or(config.log_level.as_str()).to_string(),
        format,
        log_path: Some(paths.log_file()),
    }
}

pub async fn start_engine(
    config: &Config,
    paths: &Paths,
    access_token: String,
) -> anyhow::Result<ChatEngine> {
    let url = config.supabase_url()?;
    let client = SupabaseClient::new(
        url.as_str(),
        config.supabase_publishable_key.clone(),
        config.remote_timeout(),
    )?;
    let store = Arc::new(SupabaseChatStore::new(client, access_token));
    let storage = Arc::new(
        SqliteStorage::open(paths.cache_database_file())
            .context("failed to open the local cache")?,
    );

    // One-shot commands fetch what they need themselves.
    let engine_config = EngineConfig {
        prefetch_directory: false,
        ..EngineConfig::from(config)
    };

    let engine = ChatEngine::builder(store.clone(), store.clone())
        .blob_storage(store)
        .storage(storage)
        .config(engine_config)
        .start()
        .await?;
    info!(profile_id = %engine.identity().profile_id, "signed in");
    Ok(engine)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn list_conversations(engine: &ChatEngine) -> anyhow::Result<()> {
    let conversations = engine.fetch_conversations().await?;
    print_json(&conversations)
}

pub async fn show_messages(engine: &ChatEngine, peer: &str, more: usize) -> anyhow::Result<()> {
    let peer = ProfileId::from_string(peer);
    engine.set_current_conversation(&peer).await?;
    for _ in 0..more {
        if engine.load_more_messages().await? == 0 {
            break;
        }
    }
    print_json(&engine.state().current_conversation)
}

async fn upload_path(engine: &ChatEngine, path: &Path) -> anyhow::Result<UploadedFile> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .context("attachment path has no file name")?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    debug!(name, size = bytes.len(), "uploading attachment");
    Ok(engine
        .upload_file(name, bytes, content_type_for(name))
        .await?)
}

pub async fn upload(engine: &ChatEngine, path: &Path) -> anyhow::Result<()> {
    let file = upload_path(engine, path).await?;
    print_json(&file)
}

pub async fn send(
    engine: &ChatEngine,
    peer: &str,
    body: &str,
    file: Option<&Path>,
) -> anyhow::Result<()> {
    let peer = ProfileId::from_string(peer);
    let attachment = match file {
        Some(path) => Some(upload_path(engine, path).await?),
        None => None,
    };
    let kind = if attachment.is_some() {
        MessageKind::File
    } else {
        MessageKind::Text
    };

    let message = engine.send_message(&peer, body, kind, attachment).await?;
    print_json(&message)
}

pub async fn mark_read(engine: &ChatEngine, peer: &str) -> anyhow::Result<()> {
    let updated = engine.mark_read(&ProfileId::from_string(peer)).await?;
    print_json(&json!({ "updated": updated }))
}

pub async fn delete(engine: &ChatEngine, peer: &str, message_id: &str) -> anyhow::Result<()> {
    engine
        .set_current_conversation(&ProfileId::from_string(peer))
        .await?;
    let deleted = engine
        .delete_message(&MessageId::from_string(message_id))
        .await?;
    print_json(&json!({ "deleted": deleted }))
}

/// Print every persisted open conversation in the local cache.
pub fn print_snapshot(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let storage: Arc<dyn PersistentStorage> = Arc::new(
        SqliteStorage::open(paths.cache_database_file())
            .context("failed to open the local cache")?,
    );
    let snapshots = ConversationSnapshotStore::new(storage.clone(), config.snapshot_ttl());

    let prefix = keys::current_conversation(&ProfileId::from_string(""));
    let mut restored = Vec::new();
    for key in storage.list_keys_with_prefix(&prefix)? {
        let me = ProfileId::from_string(key.trim_start_matches(&prefix));
        if let Some(state) = snapshots.restore(&me) {
            restored.push(json!({ "profile_id": me, "conversation": state }));
        }
    }
    print_json(&restored)
}

/// Content type sent with an upload, guessed from the file extension.
fn content_type_for(name: &str) -> Option<&'static str> {
    let extension = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => return None,
    };
    Some(content_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn content_type_from_extension() {
        assert_eq!(content_type_for("scheda.PDF"), Some("application/pdf"));
        assert_eq!(content_type_for("foto.jpeg"), Some("image/jpeg"));
        assert_eq!(content_type_for("archivio.zip"), None);
        assert_eq!(content_type_for("senza-estensione"), None);
    }

    #[test]
    fn command_line_level_overrides_config() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = Config::default();
        config.log_level = "warn".to_string();

        assert_eq!(log_config(&config, &paths, None).default_level, "warn");
        assert_eq!(
            log_config(&config, &paths, Some("trace")).default_level,
            "trace"
        );
        assert_eq!(log_config(&config, &paths, None).format, LogFormat::Compact);
    }

    #[test]
    fn json_logs_go_to_log_file() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        let mut config = Config::default();
        config.json_logs = true;

        let log_config = log_config(&config, &paths, None);
        assert_eq!(log_config.format, LogFormat::Json);
        assert_eq!(log_config.log_path, Some(paths.log_file()));
    }

    #[test]
    fn snapshot_of_empty_cache_succeeds() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();

        print_snapshot(&Config::default(), &paths).unwrap();
    }
}
