/*!
Entity storage.

The `Store` trait covers every query and mutation the application makes
against its four tables:

```sql
users    (id, email UNIQUE, first_name, role, salt, password_hash)
subjects (id, name, code UNIQUE, teacher_id -> users)
grades   (id, value, max_value, created, student_id -> users,
          subject_id -> subjects, teacher_id -> users)
notes    (id, data, created, user_id -> users)
```

Two implementations exist: `pg::PgStore`, backed by Postgres, and
`mem::MemStore`, an in-process store. Both enforce email and subject code
uniqueness and reject rows that reference missing users or subjects, so a
check-then-insert race in the caller ends in `DbError::Conflict` rather than
a duplicate row.

All mutations touch exactly one row.
*/
use async_trait::async_trait;

use crate::{
    note::{NewNote, Note},
    subject::{Grade, NewGrade, NewSubject, Subject},
    user::{NewUser, Role, User},
};

pub mod mem;
pub mod pg;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DbError {
    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The row to change, or a row referenced by a new one, doesn't exist.
    #[error("missing: {0}")]
    Missing(String),
    #[error("{0}")]
    Other(String),
}

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    pub fn annotate(self, annotation: &str) -> Self {
        match self {
            DbError::Conflict(s) => DbError::Conflict(format!("{}: {}", annotation, &s)),
            DbError::Missing(s) => DbError::Missing(format!("{}: {}", annotation, &s)),
            DbError::Other(s) => DbError::Other(format!("{}: {}", annotation, &s)),
        }
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError::Other(s) }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Create any tables that don't exist yet.
    async fn ensure_db_schema(&self) -> Result<(), DbError>;

    async fn insert_user(&self, new: &NewUser) -> Result<User, DbError>;
    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;
    async fn get_users_by_role(&self, role: Role) -> Result<Vec<User>, DbError>;
    async fn set_user_role(&self, id: i64, role: Role) -> Result<(), DbError>;

    async fn insert_subject(&self, new: &NewSubject) -> Result<Subject, DbError>;
    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DbError>;
    async fn get_subject_by_code(&self, code: &str) -> Result<Option<Subject>, DbError>;
    async fn get_subjects_by_teacher(&self, teacher_id: i64) -> Result<Vec<Subject>, DbError>;

    async fn insert_grade(&self, new: &NewGrade) -> Result<Grade, DbError>;
    async fn get_grade(&self, id: i64) -> Result<Option<Grade>, DbError>;
    async fn get_grades_by_student(&self, student_id: i64) -> Result<Vec<Grade>, DbError>;
    async fn get_grades_by_teacher(&self, teacher_id: i64) -> Result<Vec<Grade>, DbError>;
    async fn get_grades_by_subject(&self, subject_id: i64) -> Result<Vec<Grade>, DbError>;
    async fn update_grade(&self, id: i64, value: f64, max_value: f64) -> Result<Grade, DbError>;
    async fn delete_grade(&self, id: i64) -> Result<(), DbError>;

    async fn insert_note(&self, new: &NewNote) -> Result<Note, DbError>;
    async fn get_note(&self, id: i64) -> Result<Option<Note>, DbError>;
    async fn get_notes_by_user(&self, user_id: i64) -> Result<Vec<Note>, DbError>;
    async fn delete_note(&self, id: i64) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_keeps_kind() {
        let e = DbError::Conflict("users_email_key".to_owned()).annotate("Inserting user");
        assert_eq!(e, DbError::Conflict("Inserting user: users_email_key".to_owned()));
        let e = DbError::from("boom".to_owned()).annotate("Connecting");
        assert_eq!(e.to_string(), "Connecting: boom");
    }
}
