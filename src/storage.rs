use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::i18n::DEFAULT_LOCALE;

const LANGUAGES_FILE: &str = "languages.json";

/// Who a language preference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageScope {
    User,
    Guild,
}

impl fmt::Display for LanguageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LanguageScope::User => write!(f, "user"),
            LanguageScope::Guild => write!(f, "guild"),
        }
    }
}

/// On-disk layout of `languages.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LanguageFile {
    #[serde(default)]
    users: BTreeMap<u64, String>,
    #[serde(default)]
    guilds: BTreeMap<u64, String>,
}

/// Language preferences for users and guilds, cached in memory and written
/// back to a JSON file on every change.
pub struct LanguageStore {
    path: PathBuf,
    users: DashMap<u64, String>,
    guilds: DashMap<u64, String>,
    write_lock: Mutex<()>,
}

impl LanguageStore {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;
        let path = data_dir.join(LANGUAGES_FILE);

        let file = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<LanguageFile>(&content) {
                Ok(file) => file,
                Err(e) => {
                    warn!("⚠️ Ignoring unreadable {}: {}", path.display(), e);
                    LanguageFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LanguageFile::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "📁 Language store at {} ({} users, {} guilds)",
            path.display(),
            file.users.len(),
            file.guilds.len()
        );

        Ok(Self {
            path,
            users: file.users.into_iter().collect(),
            guilds: file.guilds.into_iter().collect(),
            write_lock: Mutex::new(()),
        })
    }

    fn map(&self, scope: LanguageScope) -> &DashMap<u64, String> {
        match scope {
            LanguageScope::User => &self.users,
            LanguageScope::Guild => &self.guilds,
        }
    }

    /// Stores `language` for `id`, replacing any earlier value.
    pub async fn set_language(&self, scope: LanguageScope, id: u64, language: &str) -> Result<()> {
        self.map(scope).insert(id, language.to_string());
        self.save().await?;
        info!("💾 Language for {} {} set to {}", scope, id, language);
        Ok(())
    }

    pub fn get_language(&self, scope: LanguageScope, id: u64) -> Option<String> {
        self.map(scope).get(&id).map(|entry| entry.value().clone())
    }

    /// Returns whether a preference existed.
    #[allow(dead_code)]
    pub async fn remove_language(&self, scope: LanguageScope, id: u64) -> Result<bool> {
        if self.map(scope).remove(&id).is_none() {
            return Ok(false);
        }
        self.save().await?;
        debug!("Language for {} {} removed", scope, id);
        Ok(true)
    }

    /// The user's language, else the guild's, else the default locale.
    pub fn effective_language(&self, user_id: u64, guild_id: Option<u64>) -> String {
        self.get_language(LanguageScope::User, user_id)
            .or_else(|| guild_id.and_then(|id| self.get_language(LanguageScope::Guild, id)))
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
    }

    async fn save(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let file = LanguageFile {
            users: collect(&self.users),
            guilds: collect(&self.guilds),
        };
        let content = serde_json::to_string_pretty(&file)?;

        // write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn collect(map: &DashMap<u64, String>) -> BTreeMap<u64, String> {
    map.iter()
        .map(|entry| (*entry.key(), entry.value().clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn defaults_to_english() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(store.get_language(LanguageScope::User, 1), None);
        assert_eq!(store.effective_language(1, Some(2)), "en");
        assert_eq!(store.effective_language(1, None), "en");
    }

    #[tokio::test]
    async fn user_preference_beats_guild_preference() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();

        store.set_language(LanguageScope::Guild, 2, "de").await.unwrap();
        assert_eq!(store.effective_language(1, Some(2)), "de");

        store.set_language(LanguageScope::User, 1, "es").await.unwrap();
        assert_eq!(store.effective_language(1, Some(2)), "es");
        assert_eq!(store.effective_language(3, Some(2)), "de");
        assert_eq!(store.effective_language(1, None), "es");
    }

    #[tokio::test]
    async fn scopes_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();

        store.set_language(LanguageScope::User, 7, "es").await.unwrap();
        assert_eq!(store.get_language(LanguageScope::Guild, 7), None);
    }

    #[tokio::test]
    async fn remove_reports_whether_something_was_there() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();

        store.set_language(LanguageScope::User, 1, "es").await.unwrap();
        assert!(store.remove_language(LanguageScope::User, 1).await.unwrap());
        assert!(!store.remove_language(LanguageScope::User, 1).await.unwrap());
        assert_eq!(store.effective_language(1, None), "en");
    }

    #[tokio::test]
    async fn preferences_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();
            store.set_language(LanguageScope::User, 1, "es").await.unwrap();
            store.set_language(LanguageScope::Guild, 2, "de").await.unwrap();
            store.set_language(LanguageScope::Guild, 2, "en").await.unwrap();
        }

        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.get_language(LanguageScope::User, 1).as_deref(), Some("es"));
        assert_eq!(store.get_language(LanguageScope::Guild, 2).as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(LANGUAGES_FILE), "{not json").unwrap();

        let store = LanguageStore::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(store.effective_language(1, None), "en");
    }
}
