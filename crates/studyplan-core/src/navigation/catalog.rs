use std::collections::{HashMap, HashSet};

use super::SnapshotRejection;
use crate::models::NavigationState;

/// Static classification of the app's routes.
///
/// Top-level routes are checked against one global allowlist. Routes nested
/// inside a container route are checked against that container's own list.
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    top_level: HashSet<String>,
    nested: HashMap<String, HashSet<String>>,
    auth_required: HashSet<String>,
    ephemeral: HashSet<String>,
}

fn to_set<I, S>(names: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl RouteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_level<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.top_level.extend(to_set(names));
        self
    }

    pub fn with_children<I, S>(mut self, parent: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nested.entry(parent.into()).or_default().extend(to_set(names));
        self
    }

    pub fn with_auth_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_required.extend(to_set(names));
        self
    }

    /// Routes that are never restored across cold starts (modals, transient flows).
    pub fn with_ephemeral<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ephemeral.extend(to_set(names));
        self
    }

    /// Route table of the student planner app.
    pub fn student_planner() -> Self {
        Self::new()
            .with_top_level([
                "Welcome",
                "Login",
                "SignUp",
                "ForgotPassword",
                "Onboarding",
                "Main",
                "CourseDetail",
                "AssignmentDetail",
                "LectureDetail",
                "StudySession",
                "Settings",
                "Paywall",
                "AddCourse",
                "AddAssignment",
                "AddLecture",
                "AddReminder",
                "Search",
            ])
            .with_children("Main", ["Home", "Courses", "Assignments", "Calendar", "Reminders"])
            .with_children(
                "Settings",
                ["SettingsHome", "Profile", "NotificationSettings", "SrsSettings", "Subscription"],
            )
            .with_auth_required([
                "Main",
                "CourseDetail",
                "AssignmentDetail",
                "LectureDetail",
                "StudySession",
                "Settings",
                "Paywall",
                "AddCourse",
                "AddAssignment",
                "AddLecture",
                "AddReminder",
                "Search",
            ])
            .with_ephemeral([
                "Paywall",
                "AddCourse",
                "AddAssignment",
                "AddLecture",
                "AddReminder",
                "StudySession",
                "ForgotPassword",
            ])
    }

    /// Whether `name` may appear directly under `parent` (`None` = top level).
    /// A parent without its own allowlist admits no children.
    pub fn is_allowed(&self, parent: Option<&str>, name: &str) -> bool {
        match parent {
            None => self.top_level.contains(name),
            Some(parent) => self
                .nested
                .get(parent)
                .is_some_and(|children| children.contains(name)),
        }
    }

    pub fn requires_auth(&self, name: &str) -> bool {
        self.auth_required.contains(name)
    }

    pub fn is_ephemeral(&self, name: &str) -> bool {
        self.ephemeral.contains(name)
    }

    /// Walk the whole tree; the first unknown route rejects it.
    pub fn validate(&self, state: &NavigationState) -> Result<(), SnapshotRejection> {
        self.validate_level(state, None)
    }

    fn validate_level(&self, state: &NavigationState, parent: Option<&str>) -> Result<(), SnapshotRejection> {
        for route in &state.routes {
            if !self.is_allowed(parent, &route.name) {
                return Err(SnapshotRejection::UnknownRoute {
                    parent: parent.map(str::to_string),
                    name: route.name.clone(),
                });
            }
            if let Some(ref nested) = route.state {
                self.validate_level(nested, Some(&route.name))?;
            }
        }
        Ok(())
    }
}
