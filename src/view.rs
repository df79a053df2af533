/*!
The places a caller can be sent after an action, successful or not.

A `View` serializes as instructions the client can follow directly: the
endpoint to POST to (or GET, for the front page), the `x-gradebook-action`
to send there, and the target id the action's body needs.

```json
{ "view": "manage-grades", "endpoint": "/teacher", "action": "manage-grades", "subject_id": 7 }
```
*/
use serde::{Serialize, Serializer};

use crate::user::Role;

/// Login and sign-up forms; the only GET route.
pub const FRONT_PAGE: &str = "/";
pub const LOGIN: &str = "/login";
pub const SIGN_UP: &str = "/signup";
/// Actions open to either role.
pub const API: &str = "/api";
pub const TEACHER: &str = "/teacher";
pub const STUDENT: &str = "/student";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    Login,
    SignUp,
    Home,
    StudentDashboard,
    TeacherDashboard,
    CreateSubject,
    AddGrade(i64),
    ManageGrades(i64),
    EditGrade(i64),
}

impl View {
    /// Where a caller with `role` lands by default.
    pub fn dashboard_for(role: Role) -> View {
        match role {
            Role::Student => View::StudentDashboard,
            Role::Teacher => View::TeacherDashboard,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            View::Login => "login",
            View::SignUp => "sign-up",
            View::Home => "home",
            View::StudentDashboard => "student-dashboard",
            View::TeacherDashboard => "teacher-dashboard",
            View::CreateSubject => "create-subject",
            View::AddGrade(_) => "add-grade",
            View::ManageGrades(_) => "manage-grades",
            View::EditGrade(_) => "edit-grade",
        }
    }

    /// The endpoint serving this view, and the action to request there.
    ///
    /// The subject form has no data of its own; it lives on the teacher
    /// dashboard.
    pub fn endpoint(&self) -> (&'static str, Option<&'static str>) {
        match self {
            View::Login | View::SignUp => (FRONT_PAGE, None),
            View::Home => (API, Some("home")),
            View::StudentDashboard => (STUDENT, Some("student-dashboard")),
            View::TeacherDashboard | View::CreateSubject => (TEACHER, Some("teacher-dashboard")),
            View::AddGrade(_) => (TEACHER, Some("add-grade-page")),
            View::ManageGrades(_) => (TEACHER, Some("manage-grades")),
            View::EditGrade(_) => (TEACHER, Some("edit-grade-page")),
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            View::AddGrade(id) | View::ManageGrades(id) | View::EditGrade(id) => {
                write!(f, "{}/{}", self.name(), id)
            },
            _ => write!(f, "{}", self.name()),
        }
    }
}

#[derive(Serialize)]
struct Directions {
    view: &'static str,
    endpoint: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grade_id: Option<i64>,
}

impl Serialize for View {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (endpoint, action) = self.endpoint();
        let (subject_id, grade_id) = match self {
            View::AddGrade(id) | View::ManageGrades(id) => (Some(*id), None),
            View::EditGrade(id) => (None, Some(*id)),
            _ => (None, None),
        };

        Directions { view: self.name(), endpoint, action, subject_id, grade_id }
            .serialize(serializer)
    }
}
