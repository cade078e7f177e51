use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ImportPaths {
    pub home: PathBuf,
    pub store_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    pub messages_db: PathBuf,
    pub contacts_db: PathBuf,
    pub logs_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub home_is_explicit: bool,
}

impl ImportPaths {
    /// Lay out every path under `home` with no environment overrides.
    pub fn rooted_at(home: PathBuf) -> Self {
        let store_dir = home.join("store");
        Self {
            checkpoint_file: store_dir.join("import-progress.json"),
            messages_db: store_dir.join("messages.db"),
            contacts_db: store_dir.join("whatsapp.db"),
            logs_dir: store_dir.join("logs"),
            prompts_dir: home.join("prompts"),
            store_dir,
            home,
            home_is_explicit: true,
        }
    }

    pub fn lock_file(&self) -> PathBuf {
        self.store_dir.join("import.lock")
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

fn home_from_inputs(cwd: PathBuf, home_env: Option<&str>) -> (PathBuf, bool) {
    match home_env {
        Some(v) if !v.trim().is_empty() => (PathBuf::from(v.trim()), true),
        _ => (cwd, false),
    }
}

pub fn resolve_paths() -> Result<ImportPaths> {
    let cwd = env::current_dir().context("failed to resolve current working directory")?;
    let home_env = env::var("WA_IMPORT_HOME").ok();
    let (home, is_explicit) = home_from_inputs(cwd, home_env.as_deref());

    let store_dir = env_or_default_path("WA_IMPORT_STORE_DIR", home.join("store"));
    let checkpoint_file = env_or_default_path(
        "WA_IMPORT_CHECKPOINT_FILE",
        store_dir.join("import-progress.json"),
    );
    let messages_db = env_or_default_path("WA_IMPORT_MESSAGES_DB", store_dir.join("messages.db"));
    let contacts_db = env_or_default_path("WA_IMPORT_CONTACTS_DB", store_dir.join("whatsapp.db"));
    let logs_dir = env_or_default_path("WA_IMPORT_LOGS_DIR", store_dir.join("logs"));
    let prompts_dir = env_or_default_path("WA_IMPORT_PROMPTS_DIR", home.join("prompts"));

    Ok(ImportPaths {
        home,
        store_dir,
        checkpoint_file,
        messages_db,
        contacts_db,
        logs_dir,
        prompts_dir,
        home_is_explicit: is_explicit,
    })
}

#[cfg(test)]
mod tests {
    use super::{ImportPaths, home_from_inputs};
    use std::path::PathBuf;

    #[test]
    fn default_home_is_working_directory() {
        let cwd = PathBuf::from("/srv/bridge");
        let (home, is_explicit) = home_from_inputs(cwd.clone(), None);
        assert_eq!(home, cwd);
        assert!(!is_explicit);
    }

    #[test]
    fn blank_home_falls_back_to_working_directory() {
        let cwd = PathBuf::from("/srv/bridge");
        let (home, is_explicit) = home_from_inputs(cwd.clone(), Some("  "));
        assert_eq!(home, cwd);
        assert!(!is_explicit);
    }

    #[test]
    fn rooted_layout_keeps_checkpoint_in_store() {
        let paths = ImportPaths::rooted_at(PathBuf::from("/data"));
        assert_eq!(
            paths.checkpoint_file,
            PathBuf::from("/data/store/import-progress.json")
        );
        assert_eq!(paths.lock_file(), PathBuf::from("/data/store/import.lock"));
        assert_eq!(paths.prompts_dir, PathBuf::from("/data/prompts"));
    }
}
