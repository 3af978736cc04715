//! Plan persistence
//!
//! 플랜마다 `<plan_id>.json` 하나, 활성 플랜 포인터는 `active_plan.json`.

use crate::error::{Result, TaskError};
use crate::plan::TaskPlan;
use pocket_foundation::JsonStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ACTIVE_PLAN_FILE: &str = "active_plan.json";

/// 플랜 저장소
pub trait PlanStore: Send + Sync {
    fn save(&self, plan: &TaskPlan) -> Result<()>;
    fn load(&self, plan_id: &str) -> Result<TaskPlan>;
    /// `None` 이면 포인터 제거
    fn set_active(&self, plan_id: Option<&str>) -> Result<()>;
    fn active(&self) -> Result<Option<String>>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivePointer {
    plan_id: String,
}

/// JSON 파일 저장소 (`<data_dir>/tasks`)
#[derive(Debug, Clone)]
pub struct JsonPlanStore {
    store: JsonStore,
}

impl JsonPlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    /// 데이터 디렉토리 아래 `tasks/`
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("tasks"))
    }

    pub fn dir(&self) -> &Path {
        self.store.base_dir()
    }

    fn file_name(plan_id: &str) -> Result<String> {
        if plan_id.is_empty()
            || plan_id.contains(['/', '\\'])
            || plan_id.starts_with('.')
        {
            return Err(TaskError::Validation(format!("invalid plan id: {}", plan_id)));
        }
        Ok(format!("{}.json", plan_id))
    }
}

impl PlanStore for JsonPlanStore {
    fn save(&self, plan: &TaskPlan) -> Result<()> {
        let name = Self::file_name(&plan.id)?;
        self.store
            .save(&name, plan)
            .map_err(|e| TaskError::Persistence(e.to_string()))
    }

    fn load(&self, plan_id: &str) -> Result<TaskPlan> {
        let name = Self::file_name(plan_id)?;
        if !self.store.exists(&name) {
            return Err(TaskError::NotFound(plan_id.to_string()));
        }
        self.store
            .load(&name)
            .map_err(|e| TaskError::Persistence(e.to_string()))
    }

    fn set_active(&self, plan_id: Option<&str>) -> Result<()> {
        let result = match plan_id {
            Some(id) => self.store.save(
                ACTIVE_PLAN_FILE,
                &ActivePointer {
                    plan_id: id.to_string(),
                },
            ),
            None => self.store.remove(ACTIVE_PLAN_FILE),
        };
        result.map_err(|e| TaskError::Persistence(e.to_string()))
    }

    fn active(&self) -> Result<Option<String>> {
        self.store
            .load_optional::<ActivePointer>(ACTIVE_PLAN_FILE)
            .map(|p| p.map(|p| p.plan_id))
            .map_err(|e| TaskError::Persistence(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    #[test]
    fn test_save_load_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlanStore::in_data_dir(dir.path());
        let plan = TaskPlan::new("deploy", vec![Step::new("build", vec![])]);

        store.save(&plan).unwrap();
        assert!(dir.path().join("tasks").join(format!("{}.json", plan.id)).exists());
        assert_eq!(store.load(&plan.id).unwrap(), plan);

        assert_eq!(store.active().unwrap(), None);
        store.set_active(Some(&plan.id)).unwrap();
        assert_eq!(store.active().unwrap(), Some(plan.id.clone()));
        store.set_active(None).unwrap();
        assert_eq!(store.active().unwrap(), None);
    }

    #[test]
    fn test_missing_and_invalid_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonPlanStore::new(dir.path());
        assert!(matches!(store.load("plan_missing"), Err(TaskError::NotFound(_))));
        assert!(matches!(store.load("../etc"), Err(TaskError::Validation(_))));
    }
}
