//! Per-project autonomy level tracking.
//!
//! New module. L5 ("YOLO") is deliberately never persisted — it lives
//! only in an in-memory set for the lifetime of the process, so a crash
//! or restart always comes back up at the last persisted level (L1..L4).
//! Rule lists persist regardless of level.

use crate::types::{AutonomyLevel, AutonomySettings};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Storage seam for the persisted half of autonomy state — settings and
/// rule lists. Implemented by `storage::AutonomyStore` against SQLite;
/// a test double can swap in an in-memory map.
#[async_trait::async_trait]
pub trait AutonomyPersistence: Send + Sync {
    async fn load(&self, project_path: &str) -> Result<Option<AutonomySettings>, String>;
    async fn save(&self, settings: &AutonomySettings) -> Result<(), String>;
}

type LevelChangeObserver = Arc<dyn Fn(&str, AutonomyLevel) + Send + Sync>;

pub struct AutonomyService {
    persistence: Arc<dyn AutonomyPersistence>,
    /// Projects currently running at L5. Never written to `persistence`.
    yolo_projects: Mutex<HashSet<String>>,
    cache: Mutex<HashMap<String, AutonomySettings>>,
    observers: Mutex<Vec<LevelChangeObserver>>,
}

impl AutonomyService {
    pub fn new(persistence: Arc<dyn AutonomyPersistence>) -> Self {
        Self {
            persistence,
            yolo_projects: Mutex::new(HashSet::new()),
            cache: Mutex::new(HashMap::new()),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn on_level_change(&self, observer: LevelChangeObserver) {
        self.observers.lock().unwrap().push(observer);
    }

    fn notify(&self, project_path: &str, level: AutonomyLevel) {
        for observer in self.observers.lock().unwrap().iter() {
            observer(project_path, level);
        }
    }

    /// Current effective settings for a project: L5 if the in-memory
    /// bypass is active, otherwise whatever is persisted (defaulting to
    /// the struct's `Default`, i.e. L2, on first use).
    pub async fn get_settings(&self, project_path: &str) -> Result<AutonomySettings, String> {
        let mut settings = if let Some(cached) = self.cache.lock().unwrap().get(project_path).cloned() {
            cached
        } else {
            let loaded = self.persistence.load(project_path).await?.unwrap_or_else(|| AutonomySettings {
                project_path: project_path.to_string(),
                ..AutonomySettings::default()
            });
            self.cache.lock().unwrap().insert(project_path.to_string(), loaded.clone());
            loaded
        };

        if self.is_yolo_active(project_path) {
            settings.level = AutonomyLevel::L5;
        }
        Ok(settings)
    }

    pub fn is_yolo_active(&self, project_path: &str) -> bool {
        self.yolo_projects.lock().unwrap().contains(project_path)
    }

    /// Sets a project's level. L5 only ever touches the in-memory set;
    /// any other level removes the project from that set and persists
    /// the new level.
    pub async fn set_level(&self, project_path: &str, level: AutonomyLevel) -> Result<(), String> {
        if level == AutonomyLevel::L5 {
            self.yolo_projects.lock().unwrap().insert(project_path.to_string());
            self.notify(project_path, level);
            return Ok(());
        }

        self.yolo_projects.lock().unwrap().remove(project_path);

        let mut settings = self.get_settings_persisted(project_path).await?;
        settings.level = level;
        self.persistence.save(&settings).await?;
        self.cache.lock().unwrap().insert(project_path.to_string(), settings);
        self.notify(project_path, level);
        Ok(())
    }

    async fn get_settings_persisted(&self, project_path: &str) -> Result<AutonomySettings, String> {
        Ok(self.persistence.load(project_path).await?.unwrap_or_else(|| AutonomySettings {
            project_path: project_path.to_string(),
            ..AutonomySettings::default()
        }))
    }

    pub async fn add_to_allowlist(&self, project_path: &str, pattern: impl Into<String>) -> Result<(), String> {
        let mut settings = self.get_settings_persisted(project_path).await?;
        settings.allowlist.push(pattern.into());
        self.persistence.save(&settings).await?;
        self.cache.lock().unwrap().remove(project_path);
        Ok(())
    }

    pub async fn add_to_blocklist(&self, project_path: &str, pattern: impl Into<String>) -> Result<(), String> {
        let mut settings = self.get_settings_persisted(project_path).await?;
        settings.blocklist.push(pattern.into());
        self.persistence.save(&settings).await?;
        self.cache.lock().unwrap().remove(project_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct InMemoryPersistence {
        data: StdMutex<HashMap<String, AutonomySettings>>,
    }

    #[async_trait::async_trait]
    impl AutonomyPersistence for InMemoryPersistence {
        async fn load(&self, project_path: &str) -> Result<Option<AutonomySettings>, String> {
            Ok(self.data.lock().unwrap().get(project_path).cloned())
        }
        async fn save(&self, settings: &AutonomySettings) -> Result<(), String> {
            self.data.lock().unwrap().insert(settings.project_path.clone(), settings.clone());
            Ok(())
        }
    }

    fn service() -> AutonomyService {
        AutonomyService::new(Arc::new(InMemoryPersistence { data: StdMutex::new(HashMap::new()) }))
    }

    #[tokio::test]
    async fn l5_is_never_persisted() {
        let svc = service();
        svc.set_level("/proj", AutonomyLevel::L5).await.unwrap();
        assert!(svc.is_yolo_active("/proj"));
        let persisted = svc.persistence.load("/proj").await.unwrap();
        assert!(persisted.is_none());
    }

    #[tokio::test]
    async fn dropping_out_of_yolo_persists_the_new_level() {
        let svc = service();
        svc.set_level("/proj", AutonomyLevel::L5).await.unwrap();
        svc.set_level("/proj", AutonomyLevel::L3).await.unwrap();
        assert!(!svc.is_yolo_active("/proj"));
        let settings = svc.get_settings("/proj").await.unwrap();
        assert_eq!(settings.level, AutonomyLevel::L3);
    }

    #[tokio::test]
    async fn default_level_is_l2_on_first_use() {
        let svc = service();
        let settings = svc.get_settings("/new-project").await.unwrap();
        assert_eq!(settings.level, AutonomyLevel::L2);
    }
}
