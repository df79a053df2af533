/*!
Errors surfaced at the action boundary.

Every variant knows where the caller should be sent next, and its
`Display` text is safe to show the user. Storage failures in particular
render as a generic message; the underlying `DbError` is only logged.
*/
use crate::{perm::Denial, store::DbError, valid::Rejection, view::View};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("{rejection}")]
    Validation { rejection: Rejection, redirect: View },
    #[error("{0}")]
    Authorization(Denial),
    #[error("{what} {id} not found.")]
    NotFound { what: &'static str, id: i64, redirect: View },
    #[error("{message}")]
    Conflict { message: &'static str, redirect: View },
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("An internal error occurred; please try again later.")]
    Store(#[source] DbError),
}

impl ActionError {
    /// Where the caller should land after this error.
    pub fn redirect(&self) -> View {
        match self {
            ActionError::Validation { redirect, .. } => *redirect,
            ActionError::Authorization(d) => d.redirect,
            ActionError::NotFound { redirect, .. } => *redirect,
            ActionError::Conflict { redirect, .. } => *redirect,
            ActionError::Unauthenticated(_) => View::Login,
            ActionError::Store(_) => View::Home,
        }
    }

    pub fn validation(rejection: Rejection, redirect: View) -> Self {
        ActionError::Validation { rejection, redirect }
    }
}

impl From<Denial> for ActionError {
    fn from(d: Denial) -> Self { ActionError::Authorization(d) }
}

impl From<DbError> for ActionError {
    fn from(e: DbError) -> Self {
        log::error!("Store error at action boundary: {}", &e);
        ActionError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_details_stay_hidden() {
        let e = ActionError::from(DbError::Other(
            "Data DB: connection refused; host=localhost password=secret".to_owned()
        ));
        let msg = e.to_string();
        assert!(!msg.contains("secret"));
        assert!(!msg.contains("Data DB"));
        assert_eq!(e.redirect(), View::Home);
    }

    #[test]
    fn messages() {
        let e = ActionError::NotFound { what: "Grade", id: 4, redirect: View::TeacherDashboard };
        assert_eq!(e.to_string(), "Grade 4 not found.");
        assert_eq!(e.redirect(), View::TeacherDashboard);

        let e = ActionError::validation(
            Rejection::single("note", "Invalid content detected"),
            View::Home
        );
        assert_eq!(e.to_string(), "Invalid content detected.");
    }
}
