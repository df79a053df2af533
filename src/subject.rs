/*!
Subjects and the grades recorded in them.

A `Subject` belongs to the teacher who created it; a `Grade` records which
teacher entered it. Neither ownership field is re-derived from anybody's
current role.
*/
use serde::Serialize;
use time::OffsetDateTime;

/// Maximum points of a grade when the form leaves it blank.
pub const DEFAULT_MAX_VALUE: f64 = 20.0;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    /// Always stored uppercase.
    pub code: String,
    pub teacher_id: i64,
}

#[derive(Clone, Debug)]
pub struct NewSubject {
    pub name: String,
    pub code: String,
    pub teacher_id: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Grade {
    pub id: i64,
    pub value: f64,
    pub max_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub student_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
}

#[derive(Clone, Debug)]
pub struct NewGrade {
    pub value: f64,
    pub max_value: f64,
    pub student_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
}
