/*!
Free-text notes kept per user.
*/
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Note {
    pub id: i64,
    pub data: String,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub user_id: i64,
}

#[derive(Clone, Debug)]
pub struct NewNote {
    pub data: String,
    pub user_id: i64,
}
