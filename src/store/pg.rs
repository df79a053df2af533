/*!
Postgres-backed `Store`.

```sql
CREATE TABLE users (
    id            BIGSERIAL PRIMARY KEY,
    email         TEXT UNIQUE NOT NULL,
    first_name    TEXT NOT NULL,
    role          TEXT NOT NULL,   /* one of { 'student', 'teacher' } */
    salt          TEXT NOT NULL,
    password_hash TEXT NOT NULL
);

CREATE TABLE subjects (
    id         BIGSERIAL PRIMARY KEY,
    name       TEXT NOT NULL,
    code       TEXT UNIQUE NOT NULL,
    teacher_id BIGINT NOT NULL REFERENCES users(id)
);

CREATE TABLE grades (
    id         BIGSERIAL PRIMARY KEY,
    value      DOUBLE PRECISION NOT NULL,
    max_value  DOUBLE PRECISION NOT NULL DEFAULT 20.0,
    created    TIMESTAMPTZ NOT NULL DEFAULT now(),
    student_id BIGINT NOT NULL REFERENCES users(id),
    subject_id BIGINT NOT NULL REFERENCES subjects(id),
    teacher_id BIGINT NOT NULL REFERENCES users(id)
);

CREATE TABLE notes (
    id      BIGSERIAL PRIMARY KEY,
    data    TEXT NOT NULL,
    created TIMESTAMPTZ NOT NULL DEFAULT now(),
    user_id BIGINT NOT NULL REFERENCES users(id)
);
```
*/
use std::fmt::Write;

use async_trait::async_trait;
use tokio_postgres::{error::SqlState, Client, NoTls, Row};

use super::{DbError, Store};
use crate::{
    note::{NewNote, Note},
    subject::{Grade, NewGrade, NewSubject, Subject},
    user::{NewUser, Role, User},
};

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'users'",
        "CREATE TABLE users (
            id            BIGSERIAL PRIMARY KEY,
            email         TEXT UNIQUE NOT NULL,
            first_name    TEXT NOT NULL,
            role          TEXT NOT NULL,
            salt          TEXT NOT NULL,
            password_hash TEXT NOT NULL
        )",
        "DROP TABLE users",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'subjects'",
        "CREATE TABLE subjects (
            id         BIGSERIAL PRIMARY KEY,
            name       TEXT NOT NULL,
            code       TEXT UNIQUE NOT NULL,
            teacher_id BIGINT NOT NULL REFERENCES users(id)
        )",
        "DROP TABLE subjects",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'grades'",
        "CREATE TABLE grades (
            id         BIGSERIAL PRIMARY KEY,
            value      DOUBLE PRECISION NOT NULL,
            max_value  DOUBLE PRECISION NOT NULL DEFAULT 20.0,
            created    TIMESTAMPTZ NOT NULL DEFAULT now(),
            student_id BIGINT NOT NULL REFERENCES users(id),
            subject_id BIGINT NOT NULL REFERENCES subjects(id),
            teacher_id BIGINT NOT NULL REFERENCES users(id)
        )",
        "DROP TABLE grades",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'notes'",
        "CREATE TABLE notes (
            id      BIGSERIAL PRIMARY KEY,
            data    TEXT NOT NULL,
            created TIMESTAMPTZ NOT NULL DEFAULT now(),
            user_id BIGINT NOT NULL REFERENCES users(id)
        )",
        "DROP TABLE notes",
    ),
];

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            // Writing to a String can't fail.
            let _ = write!(&mut s, "; {}", dbe);
        }

        match e.code() {
            Some(code) if code == &SqlState::UNIQUE_VIOLATION => DbError::Conflict(s),
            Some(code) if code == &SqlState::FOREIGN_KEY_VIOLATION => DbError::Missing(s),
            _ => DbError::Other(s),
        }
    }
}

fn user_from_row(row: &Row) -> Result<User, DbError> {
    let role_str: &str = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        role: role_str.parse()?,
        salt: row.try_get("salt")?,
        password_hash: row.try_get("password_hash")?,
    })
}

fn subject_from_row(row: &Row) -> Result<Subject, DbError> {
    Ok(Subject {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        teacher_id: row.try_get("teacher_id")?,
    })
}

fn grade_from_row(row: &Row) -> Result<Grade, DbError> {
    Ok(Grade {
        id: row.try_get("id")?,
        value: row.try_get("value")?,
        max_value: row.try_get("max_value")?,
        date: row.try_get("created")?,
        student_id: row.try_get("student_id")?,
        subject_id: row.try_get("subject_id")?,
        teacher_id: row.try_get("teacher_id")?,
    })
}

fn note_from_row(row: &Row) -> Result<Note, DbError> {
    Ok(Note {
        id: row.try_get("id")?,
        data: row.try_get("data")?,
        date: row.try_get("created")?,
        user_id: row.try_get("user_id")?,
    })
}

fn rows_into<T>(
    rows: &[Row],
    f: fn(&Row) -> Result<T, DbError>
) -> Result<Vec<T>, DbError> {
    rows.iter().map(f).collect()
}

pub struct PgStore {
    connection_string: String,
}

impl PgStore {
    pub fn new(connection_string: String) -> Self {
        log::trace!("PgStore::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "PgStore::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("PgStore::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err);
            }
        }

        log::trace!("    ....nuking complete.");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("PgStore::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    async fn insert_user(&self, new: &NewUser) -> Result<User, DbError> {
        log::trace!(
            "PgStore::insert_user( {:?}, {} ) called.",
            &new.email, &new.role
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO users (email, first_name, role, salt, password_hash)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *",
            &[
                &new.email,
                &new.first_name,
                &new.role.to_string(),
                &new.salt,
                &new.password_hash,
            ]
        ).await.map_err(|e| DbError::from(e).annotate("Error inserting user"))?;

        user_from_row(&row)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DbError> {
        log::trace!("PgStore::get_user( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM users WHERE id = $1", &[&id]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(user_from_row(&row)?)),
        }
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        log::trace!("PgStore::get_user_by_email( {:?} ) called.", email);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM users WHERE email = $1", &[&email]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(user_from_row(&row)?)),
        }
    }

    async fn get_users_by_role(&self, role: Role) -> Result<Vec<User>, DbError> {
        log::trace!("PgStore::get_users_by_role( {} ) called.", &role);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM users WHERE role = $1 ORDER BY id",
            &[&role.to_string()]
        ).await?;
        rows_into(&rows, user_from_row)
    }

    async fn set_user_role(&self, id: i64, role: Role) -> Result<(), DbError> {
        log::trace!("PgStore::set_user_role( {}, {} ) called.", &id, &role);

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE users SET role = $1 WHERE id = $2",
            &[&role.to_string(), &id]
        ).await?;

        match n {
            0 => Err(DbError::Missing(format!("There is no user with id {}.", &id))),
            _ => Ok(()),
        }
    }

    async fn insert_subject(&self, new: &NewSubject) -> Result<Subject, DbError> {
        log::trace!(
            "PgStore::insert_subject( {:?}, {:?}, {} ) called.",
            &new.name, &new.code, &new.teacher_id
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO subjects (name, code, teacher_id)
                VALUES ($1, $2, $3)
                RETURNING *",
            &[&new.name, &new.code, &new.teacher_id]
        ).await.map_err(|e| DbError::from(e).annotate("Error inserting subject"))?;

        subject_from_row(&row)
    }

    async fn get_subject(&self, id: i64) -> Result<Option<Subject>, DbError> {
        log::trace!("PgStore::get_subject( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM subjects WHERE id = $1", &[&id]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(subject_from_row(&row)?)),
        }
    }

    async fn get_subject_by_code(&self, code: &str) -> Result<Option<Subject>, DbError> {
        log::trace!("PgStore::get_subject_by_code( {:?} ) called.", code);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM subjects WHERE code = $1", &[&code]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(subject_from_row(&row)?)),
        }
    }

    async fn get_subjects_by_teacher(&self, teacher_id: i64) -> Result<Vec<Subject>, DbError> {
        log::trace!("PgStore::get_subjects_by_teacher( {} ) called.", &teacher_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM subjects WHERE teacher_id = $1 ORDER BY id",
            &[&teacher_id]
        ).await?;
        rows_into(&rows, subject_from_row)
    }

    async fn insert_grade(&self, new: &NewGrade) -> Result<Grade, DbError> {
        log::trace!("PgStore::insert_grade( {:?} ) called.", new);

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO grades (value, max_value, student_id, subject_id, teacher_id)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *",
            &[
                &new.value,
                &new.max_value,
                &new.student_id,
                &new.subject_id,
                &new.teacher_id,
            ]
        ).await.map_err(|e| DbError::from(e).annotate("Error inserting grade"))?;

        grade_from_row(&row)
    }

    async fn get_grade(&self, id: i64) -> Result<Option<Grade>, DbError> {
        log::trace!("PgStore::get_grade( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM grades WHERE id = $1", &[&id]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(grade_from_row(&row)?)),
        }
    }

    async fn get_grades_by_student(&self, student_id: i64) -> Result<Vec<Grade>, DbError> {
        log::trace!("PgStore::get_grades_by_student( {} ) called.", &student_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM grades WHERE student_id = $1 ORDER BY id",
            &[&student_id]
        ).await?;
        rows_into(&rows, grade_from_row)
    }

    async fn get_grades_by_teacher(&self, teacher_id: i64) -> Result<Vec<Grade>, DbError> {
        log::trace!("PgStore::get_grades_by_teacher( {} ) called.", &teacher_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM grades WHERE teacher_id = $1 ORDER BY id",
            &[&teacher_id]
        ).await?;
        rows_into(&rows, grade_from_row)
    }

    async fn get_grades_by_subject(&self, subject_id: i64) -> Result<Vec<Grade>, DbError> {
        log::trace!("PgStore::get_grades_by_subject( {} ) called.", &subject_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM grades WHERE subject_id = $1 ORDER BY id",
            &[&subject_id]
        ).await?;
        rows_into(&rows, grade_from_row)
    }

    async fn update_grade(&self, id: i64, value: f64, max_value: f64) -> Result<Grade, DbError> {
        log::trace!(
            "PgStore::update_grade( {}, {}, {} ) called.",
            &id, &value, &max_value
        );

        let client = self.connect().await?;
        match client.query_opt(
            "UPDATE grades SET value = $1, max_value = $2
                WHERE id = $3
                RETURNING *",
            &[&value, &max_value, &id]
        ).await? {
            None => Err(DbError::Missing(format!("There is no grade with id {}.", &id))),
            Some(row) => grade_from_row(&row),
        }
    }

    async fn delete_grade(&self, id: i64) -> Result<(), DbError> {
        log::trace!("PgStore::delete_grade( {} ) called.", &id);

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM grades WHERE id = $1", &[&id]).await?;

        match n {
            0 => Err(DbError::Missing(format!("There is no grade with id {}.", &id))),
            1 => Ok(()),
            n => {
                log::warn!("Deleting single grade {} affected {} rows.", &id, &n);
                Ok(())
            },
        }
    }

    async fn insert_note(&self, new: &NewNote) -> Result<Note, DbError> {
        log::trace!(
            "PgStore::insert_note( [ {} chars ], {} ) called.",
            new.data.chars().count(), &new.user_id
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO notes (data, user_id)
                VALUES ($1, $2)
                RETURNING *",
            &[&new.data, &new.user_id]
        ).await.map_err(|e| DbError::from(e).annotate("Error inserting note"))?;

        note_from_row(&row)
    }

    async fn get_note(&self, id: i64) -> Result<Option<Note>, DbError> {
        log::trace!("PgStore::get_note( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt("SELECT * FROM notes WHERE id = $1", &[&id]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(note_from_row(&row)?)),
        }
    }

    async fn get_notes_by_user(&self, user_id: i64) -> Result<Vec<Note>, DbError> {
        log::trace!("PgStore::get_notes_by_user( {} ) called.", &user_id);

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM notes WHERE user_id = $1 ORDER BY id",
            &[&user_id]
        ).await?;
        rows_into(&rows, note_from_row)
    }

    async fn delete_note(&self, id: i64) -> Result<(), DbError> {
        log::trace!("PgStore::delete_note( {} ) called.", &id);

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM notes WHERE id = $1", &[&id]).await?;

        match n {
            0 => Err(DbError::Missing(format!("There is no note with id {}.", &id))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: gradebook_test
    password: gradebook_test

    with write access to:

    database: gradebook_test
    ```

    They're ignored by default; run them with

    ```bash
    cargo test pg -- --ignored
    ```
    */
    use super::*;
    use crate::tests::ensure_logging;

    use float_cmp::approx_eq;
    use serial_test::serial;

    pub static TEST_CONNECTION: &str = "host=localhost user=gradebook_test password='gradebook_test' dbname=gradebook_test";

    fn new_user(email: &str, role: Role) -> NewUser {
        NewUser {
            email: email.to_owned(),
            first_name: "Test".to_owned(),
            role,
            salt: "abcd".to_owned(),
            password_hash: "0123".to_owned(),
        }
    }

    /**
    This function is for getting the database back in a blank slate state if
    a test panics partway through and leaves it munged.
    */
    #[tokio::test]
    #[ignore]
    #[serial]
    async fn reset_pg_store() {
        ensure_logging();
        let db = PgStore::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn pg_constraints() {
        ensure_logging();

        let db = PgStore::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let t = db.insert_user(&new_user("t@school.edu", Role::Teacher)).await.unwrap();
        let s = db.insert_user(&new_user("s@school.edu", Role::Student)).await.unwrap();
        assert!(matches!(
            db.insert_user(&new_user("t@school.edu", Role::Student)).await,
            Err(DbError::Conflict(_))
        ));

        let subj = db.insert_subject(&NewSubject {
            name: "Math".to_owned(),
            code: "MATH-101".to_owned(),
            teacher_id: t.id,
        }).await.unwrap();
        assert_eq!(db.get_subject(subj.id).await.unwrap(), Some(subj.clone()));
        assert!(matches!(
            db.insert_subject(&NewSubject {
                name: "Other".to_owned(),
                code: "MATH-101".to_owned(),
                teacher_id: t.id,
            }).await,
            Err(DbError::Conflict(_))
        ));

        let g = db.insert_grade(&NewGrade {
            value: 85.0,
            max_value: 100.0,
            student_id: s.id,
            subject_id: subj.id,
            teacher_id: t.id,
        }).await.unwrap();
        let g = db.update_grade(g.id, 90.0, 100.0).await.unwrap();
        assert!(approx_eq!(f64, g.value, 90.0));
        assert!(matches!(
            db.insert_grade(&NewGrade {
                value: 1.0,
                max_value: 20.0,
                student_id: s.id,
                subject_id: subj.id + 1000,
                teacher_id: t.id,
            }).await,
            Err(DbError::Missing(_))
        ));
        db.delete_grade(g.id).await.unwrap();
        assert!(db.get_grade(g.id).await.unwrap().is_none());

        db.nuke_database().await.unwrap();
    }
}
