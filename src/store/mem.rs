/*!
In-process `Store`.

Holds everything in ordered maps behind a single `RwLock`, so each
uniqueness check and its insert happen under the same write guard. Used by
the test suite and by the `memory` backend setting.
*/
use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::{DbError, Store};
use crate::{
    note::{NewNote, Note},
    subject::{Grade, NewGrade, NewSubject, Subject},
    user::{NewUser, Role, User},
};

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    users: BTreeMap<i64, User>,
    subjects: BTreeMap<i64, Subject>,
    grades: BTreeMap<i64, Grade>,
    notes: BTreeMap<i64, Note>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn require_user(&self, id: i64) -> Result<(), DbError> {
        if self.users.contains_key(&id) {
            Ok(())
        } else {
            Err(DbError::Missing(format!("There is no user with id {}.", &id)))
        }
    }
}

#[derive(Debug, Default)]
pub struct MemStore {
    tables: RwLock<Tables>,
}

impl MemStore {
    pub fn new() -> Self {
        log::trace!("MemStore::new() called.");
        Self::default()
    }
}

fn select<T: Clone, F: Fn(&T) -> bool>(map: &BTreeMap<i64, T>, f: F) -> Vec<T> {
    map.values().filter(|x| f(x)).cloned().collect()
}

#[async_trait]
impl Store for MemStore {
    async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("MemStore::ensure_db_schema() called; nothing to do.");
        Ok(())
    }

    async fn insert_user(&self, new: &NewUser) -> Result<User, DbError> {
        log::trace!("MemStore::insert_user( {:?}, {} ) called.", &new.email, &new.role);

        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == new.email) {
            return Err(DbError::Conflict(format!("email {:?}", &new.email)));
        }

        let u = User {
            id: t.next_id(),
            email: new.email.clone(),
            first_name: new.first_name.clone(),
            role: new.role,
            salt: new.salt.clone(),
            password_hash: new.password_hash.clone(),
        };
        t.users.insert(u.id, u.clone());
        Ok(u)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_users_by_role(&self, role: Role) -> Result<Vec<User>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.users, |u| u.role == role))
    }

    async fn set_user_role(&self, id: i64, role: Role) -> Result<(), DbError> {
        log::trace!("MemStore::set_user_role( {}, {} ) called.", &id, &role);

        match self.tables.write().await.users.get_mut(&id) {
            Some(u) => {
                u.role = role;
                Ok(())
            },
            None => Err(DbError::Missing(format!("There is no user with id {}.", &id))),
        }
    }

    async fn insert_subject(&self, new: &NewSubject) -> Result<Subject, DbError> {
        log::trace!("MemStore::insert_subject( {:?}, {:?} ) called.", &new.name, &new.code);

        let mut t = self.tables.write().await;
        t.require_user(new.teacher_id)?;
        if t.subjects.values().any(|s| s.code == new.code) {
            return Err(DbError::Conflict(format!("subject code {:?}", &new.code)));
        }

        let s = Subject {
            id: t.next_id(),
            name: new.name.clone(),
            code: new.code.clone(),
            teacher_id: new.teacher_id,
        };
        t.subjects.insert(s.id, s.clone());
        Ok(s)
    }

    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DbError> {
        Ok(self.tables.read().await.subjects.get(&id).cloned())
    }

    async fn get_subject_by_code(&self, code: &str) -> Result<Option<Subject>, DbError> {
        let t = self.tables.read().await;
        Ok(t.subjects.values().find(|s| s.code == code).cloned())
    }

    async fn get_subjects_by_teacher(&self, teacher_id: i64) -> Result<Vec<Subject>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.subjects, |s| s.teacher_id == teacher_id))
    }

    async fn insert_grade(&self, new: &NewGrade) -> Result<Grade, DbError> {
        log::trace!("MemStore::insert_grade( {:?} ) called.", new);

        let mut t = self.tables.write().await;
        t.require_user(new.student_id)?;
        t.require_user(new.teacher_id)?;
        if !t.subjects.contains_key(&new.subject_id) {
            return Err(DbError::Missing(format!(
                "There is no subject with id {}.", &new.subject_id
            )));
        }

        let g = Grade {
            id: t.next_id(),
            value: new.value,
            max_value: new.max_value,
            date: OffsetDateTime::now_utc(),
            student_id: new.student_id,
            subject_id: new.subject_id,
            teacher_id: new.teacher_id,
        };
        t.grades.insert(g.id, g.clone());
        Ok(g)
    }

    async fn get_grade(&self, id: i64) -> Result<Option<Grade>, DbError> {
        Ok(self.tables.read().await.grades.get(&id).cloned())
    }

    async fn get_grades_by_student(&self, student_id: i64) -> Result<Vec<Grade>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.grades, |g| g.student_id == student_id))
    }

    async fn get_grades_by_teacher(&self, teacher_id: i64) -> Result<Vec<Grade>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.grades, |g| g.teacher_id == teacher_id))
    }

    async fn get_grades_by_subject(&self, subject_id: i64) -> Result<Vec<Grade>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.grades, |g| g.subject_id == subject_id))
    }

    async fn update_grade(&self, id: i64, value: f64, max_value: f64) -> Result<Grade, DbError> {
        log::trace!("MemStore::update_grade( {}, {}, {} ) called.", &id, &value, &max_value);

        match self.tables.write().await.grades.get_mut(&id) {
            Some(g) => {
                g.value = value;
                g.max_value = max_value;
                Ok(g.clone())
            },
            None => Err(DbError::Missing(format!("There is no grade with id {}.", &id))),
        }
    }

    async fn delete_grade(&self, id: i64) -> Result<(), DbError> {
        log::trace!("MemStore::delete_grade( {} ) called.", &id);

        match self.tables.write().await.grades.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DbError::Missing(format!("There is no grade with id {}.", &id))),
        }
    }

    async fn insert_note(&self, new: &NewNote) -> Result<Note, DbError> {
        log::trace!("MemStore::insert_note( ..., {} ) called.", &new.user_id);

        let mut t = self.tables.write().await;
        t.require_user(new.user_id)?;

        let n = Note {
            id: t.next_id(),
            data: new.data.clone(),
            date: OffsetDateTime::now_utc(),
            user_id: new.user_id,
        };
        t.notes.insert(n.id, n.clone());
        Ok(n)
    }

    async fn get_note(&self, id: i64) -> Result<Option<Note>, DbError> {
        Ok(self.tables.read().await.notes.get(&id).cloned())
    }

    async fn get_notes_by_user(&self, user_id: i64) -> Result<Vec<Note>, DbError> {
        let t = self.tables.read().await;
        Ok(select(&t.notes, |n| n.user_id == user_id))
    }

    async fn delete_note(&self, id: i64) -> Result<(), DbError> {
        log::trace!("MemStore::delete_note( {} ) called.", &id);

        match self.tables.write().await.notes.remove(&id) {
            Some(_) => Ok(()),
            None => Err(DbError::Missing(format!("There is no note with id {}.", &id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_owned(),
            first_name: "Test".to_owned(),
            role,
            salt: "abcd".to_owned(),
            password_hash: "0123".to_owned(),
        }
    }

    #[tokio::test]
    async fn unique_emails_and_codes() {
        ensure_logging();
        let db = MemStore::new();

        let t = db.insert_user(&new_user("t@school.edu", Role::Teacher)).await.unwrap();
        assert!(matches!(
            db.insert_user(&new_user("t@school.edu", Role::Student)).await,
            Err(DbError::Conflict(_))
        ));
        assert_eq!(db.get_users_by_role(Role::Student).await.unwrap().len(), 0);

        let subj = NewSubject {
            name: "Math".to_owned(),
            code: "MATH-101".to_owned(),
            teacher_id: t.id,
        };
        db.insert_subject(&subj).await.unwrap();
        assert!(matches!(db.insert_subject(&subj).await, Err(DbError::Conflict(_))));
        assert_eq!(db.get_subjects_by_teacher(t.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn references_must_exist() {
        ensure_logging();
        let db = MemStore::new();

        let t = db.insert_user(&new_user("t@school.edu", Role::Teacher)).await.unwrap();
        let s = db.insert_user(&new_user("s@school.edu", Role::Student)).await.unwrap();
        let subj = db.insert_subject(&NewSubject {
            name: "Math".to_owned(),
            code: "MATH-101".to_owned(),
            teacher_id: t.id,
        }).await.unwrap();

        let mut g = NewGrade {
            value: 85.0,
            max_value: 100.0,
            student_id: s.id,
            subject_id: subj.id + 100,
            teacher_id: t.id,
        };
        assert!(matches!(db.insert_grade(&g).await, Err(DbError::Missing(_))));
        g.subject_id = subj.id;
        g.student_id = 999;
        assert!(matches!(db.insert_grade(&g).await, Err(DbError::Missing(_))));
        g.student_id = s.id;
        let grade = db.insert_grade(&g).await.unwrap();
        assert_eq!(db.get_grades_by_student(s.id).await.unwrap(), vec![grade.clone()]);
        assert_eq!(db.get_grades_by_subject(subj.id).await.unwrap(), vec![grade.clone()]);
        assert_eq!(db.get_grades_by_teacher(t.id).await.unwrap(), vec![grade.clone()]);
        assert!(db.get_grades_by_teacher(s.id).await.unwrap().is_empty());

        assert!(matches!(
            db.insert_note(&NewNote { data: "x".to_owned(), user_id: 999 }).await,
            Err(DbError::Missing(_))
        ));
    }

    #[tokio::test]
    async fn deletes_report_missing_rows() {
        ensure_logging();
        let db = MemStore::new();

        let u = db.insert_user(&new_user("u@school.edu", Role::Student)).await.unwrap();
        let n = db.insert_note(&NewNote { data: "hello".to_owned(), user_id: u.id }).await.unwrap();
        assert_eq!(db.get_notes_by_user(u.id).await.unwrap(), vec![n.clone()]);

        db.delete_note(n.id).await.unwrap();
        assert!(matches!(db.delete_note(n.id).await, Err(DbError::Missing(_))));
        assert!(matches!(db.delete_grade(12345).await, Err(DbError::Missing(_))));
        assert!(matches!(db.update_grade(12345, 1.0, 2.0).await, Err(DbError::Missing(_))));
        assert!(matches!(db.set_user_role(12345, Role::Teacher).await, Err(DbError::Missing(_))));
    }
}
