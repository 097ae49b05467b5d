use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

use super::{ids::new_bean_id, Status};

/// Bean type of a job that fans its atoms out into an active queue
pub const TASK_BEAN_TYPE: &str = "task";

/// Fields shared by every work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeanInfo {
    pub unique_id: String,
    pub name: String,
    /// Stable type identifier used to pick a processor
    pub bean_type: String,
    pub status: Status,
    /// Status before the last change; what a resumed bean returns to
    pub previous_status: Status,
    pub host_name: Option<String>,
    pub user_name: Option<String>,
    pub beamline: Option<String>,
    pub message: Option<String>,
    pub percent_complete: f64,
    pub submission_time: Option<DateTime<Utc>>,
}

impl BeanInfo {
    pub fn new(bean_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            unique_id: new_bean_id(),
            name: name.into(),
            bean_type: bean_type.into(),
            status: Status::None,
            previous_status: Status::None,
            host_name: None,
            user_name: None,
            beamline: None,
            message: None,
            percent_complete: 0.0,
            submission_time: None,
        }
    }
}

/// Capability set of anything that can travel through a queue
pub trait Queueable:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Kind label, used in logs and routing errors
    const KIND: &'static str;

    fn info(&self) -> &BeanInfo;

    fn info_mut(&mut self) -> &mut BeanInfo;

    fn unique_id(&self) -> &str {
        &self.info().unique_id
    }

    fn name(&self) -> &str {
        &self.info().name
    }

    fn bean_type(&self) -> &str {
        &self.info().bean_type
    }

    fn status(&self) -> Status {
        self.info().status
    }

    fn previous_status(&self) -> Status {
        self.info().previous_status
    }

    /// Set the status, remembering the one it replaces
    fn set_status(&mut self, status: Status) {
        let info = self.info_mut();
        if info.status != status {
            info.previous_status = info.status;
            info.status = status;
        }
    }

    fn host_name(&self) -> Option<&str> {
        self.info().host_name.as_deref()
    }

    fn set_host_name(&mut self, host_name: impl Into<String>) {
        self.info_mut().host_name = Some(host_name.into());
    }

    fn message(&self) -> Option<&str> {
        self.info().message.as_deref()
    }

    fn set_message(&mut self, message: impl Into<String>) {
        self.info_mut().message = Some(message.into());
    }

    fn percent_complete(&self) -> f64 {
        self.info().percent_complete
    }

    fn set_percent_complete(&mut self, percent: f64) {
        self.info_mut().percent_complete = percent.clamp(0.0, 100.0);
    }
}

/// Top-level work item; only ever submitted to the job queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBean {
    #[serde(flatten)]
    pub info: BeanInfo,
    /// Sub-tasks run in an active queue by the task processor
    #[serde(default)]
    pub atoms: Vec<QueueAtom>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QueueBean {
    pub fn new(bean_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: BeanInfo::new(bean_type, name),
            atoms: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }

    /// A job whose atoms are run, in order, in a dedicated active queue
    pub fn task(name: impl Into<String>, atoms: Vec<QueueAtom>) -> Self {
        Self {
            atoms,
            ..Self::new(TASK_BEAN_TYPE, name)
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_beamline(mut self, beamline: impl Into<String>) -> Self {
        self.info.beamline = Some(beamline.into());
        self
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.info.user_name = Some(user_name.into());
        self
    }
}

impl Queueable for QueueBean {
    const KIND: &'static str = "QueueBean";

    fn info(&self) -> &BeanInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut BeanInfo {
        &mut self.info
    }
}

/// Sub-task of a job; only ever submitted to an active queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueAtom {
    #[serde(flatten)]
    pub info: BeanInfo,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl QueueAtom {
    pub fn new(bean_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: BeanInfo::new(bean_type, name),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Copy the submitting context of the parent job onto this atom
    pub fn inherit_from(&mut self, parent: &BeanInfo) {
        if parent.host_name.is_some() {
            self.info.host_name = parent.host_name.clone();
        }
        if parent.beamline.is_some() {
            self.info.beamline = parent.beamline.clone();
        }
        if parent.user_name.is_some() {
            self.info.user_name = parent.user_name.clone();
        }
    }
}

impl Queueable for QueueAtom {
    const KIND: &'static str = "QueueAtom";

    fn info(&self) -> &BeanInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut BeanInfo {
        &mut self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_status_remembers_previous() {
        let mut atom = QueueAtom::new("move", "move x");
        atom.set_status(Status::Running);
        atom.set_status(Status::Paused);
        assert_eq!(atom.status(), Status::Paused);
        assert_eq!(atom.previous_status(), Status::Running);

        // Same status again keeps history intact
        atom.set_status(Status::Paused);
        assert_eq!(atom.previous_status(), Status::Running);
    }

    #[test]
    fn bean_json_is_flat() {
        let bean = QueueBean::task("grid", vec![QueueAtom::new("move", "m1")]);
        let json = serde_json::to_value(&bean).unwrap();
        assert_eq!(json["beanType"], "task");
        assert_eq!(json["atoms"][0]["name"], "m1");

        let back: QueueBean = serde_json::from_value(json).unwrap();
        assert_eq!(back, bean);
    }

    #[test]
    fn atoms_inherit_parent_context() {
        let parent = QueueBean::new("task", "job")
            .with_beamline("i15")
            .with_user_name("operator");
        let mut atom = QueueAtom::new("move", "m1");
        atom.info.host_name = Some("ws001".to_string());

        atom.inherit_from(&parent.info);
        assert_eq!(atom.info.beamline.as_deref(), Some("i15"));
        assert_eq!(atom.info.user_name.as_deref(), Some("operator"));
        // Parent had no host, so the atom keeps its own
        assert_eq!(atom.host_name(), Some("ws001"));
    }

    #[test]
    fn percent_complete_is_clamped() {
        let mut bean = QueueBean::new("task", "job");
        bean.set_percent_complete(140.0);
        assert_eq!(bean.percent_complete(), 100.0);
    }
}
