//! Tasks scheduled against an instance, such as periodic backups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::modeled_types::ResourceName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: ResourceName,
    pub description: String,
    pub tenant_id: String,
    pub instance_id: String,
    /// What the task does, e.g. `backup`.
    #[serde(rename = "type")]
    pub task_type: String,
    pub enabled: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

record_impls_for!(ScheduledTask, "scheduled_tasks", soft_delete);

#[cfg(test)]
mod test {
    use super::*;
    use catalog::{Record, SoftDelete};
    use serde_json::json;

    #[test]
    fn serializes_type_field() {
        let now = Utc::now();
        let mut task = ScheduledTask {
            id: "s1".into(),
            name: ResourceName::try_from("nightly").unwrap(),
            description: "nightly backup".into(),
            tenant_id: "t1".into(),
            instance_id: "i1".into(),
            task_type: "backup".into(),
            enabled: true,
            created: now,
            updated: now,
            deleted: false,
            deleted_at: None,
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], json!("backup"));
        assert_eq!(value["name"], json!("nightly"));
        assert_eq!(ScheduledTask::TABLE, "scheduled_tasks");

        task.mark_deleted(now);
        assert!(task.is_deleted());
        assert_eq!(task.deleted_at, Some(now));
    }
}
