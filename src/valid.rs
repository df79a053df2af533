/*!
Field-level checks on incoming form payloads.

Each `...Form` struct holds its fields exactly as they arrived (absent, or
as text), and its `validate()` method returns either the normalized payload
or a `Rejection` naming every offending field. Nothing here touches the
store; uniqueness of emails and subject codes is the caller's business.
*/
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::subject::DEFAULT_MAX_VALUE;
use crate::user::Role;

pub const EMAIL_MAX: usize = 150;
pub const FIRST_NAME_MIN: usize = 2;
pub const FIRST_NAME_MAX: usize = 150;
pub const LOGIN_PASSWORD_MIN: usize = 6;
pub const SIGNUP_PASSWORD_MIN: usize = 8;
pub const SUBJECT_NAME_MIN: usize = 2;
pub const SUBJECT_NAME_MAX: usize = 100;
pub const SUBJECT_CODE_MIN: usize = 2;
pub const SUBJECT_CODE_MAX: usize = 20;
pub const NOTE_MAX: usize = 1000;

pub const GRADE_MIN: f64 = 0.0;
pub const GRADE_MAX: f64 = 100.0;
/// Exclusive lower bound on a grade's maximum points.
pub const MAX_VALUE_FLOOR: f64 = 0.1;
pub const MAX_VALUE_CEILING: f64 = 100.0;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(
    r#"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}$"#
).unwrap());
static FIRST_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z\s\-'.]+$").unwrap());
static SUBJECT_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z\s\-&]+$").unwrap());
static SUBJECT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9\-]+$").unwrap());

/// One field that failed, and why.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

/// Every field problem found in a single payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Rejection(Vec<FieldError>);

impl Rejection {
    pub fn new() -> Self { Self::default() }

    /// A rejection citing a single field.
    pub fn single(field: &'static str, reason: &str) -> Self {
        let mut r = Self::new();
        r.push(field, reason);
        r
    }

    pub fn push(&mut self, field: &'static str, reason: &str) {
        self.0.push(FieldError { field, reason: reason.to_owned() });
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Whether `field` is among the failures.
    pub fn cites(&self, field: &str) -> bool {
        self.0.iter().any(|fe| fe.field == field)
    }

    pub fn reason(&self, field: &str) -> Option<&str> {
        self.0.iter()
            .find(|fe| fe.field == field)
            .map(|fe| fe.reason.as_str())
    }

    fn finish<T, F: FnOnce() -> T>(self, f: F) -> Result<T, Rejection> {
        if self.is_empty() {
            Ok(f())
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (n, fe) in self.0.iter().enumerate() {
            if n > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}.", &fe.reason)?;
        }
        Ok(())
    }
}

/// Accept a form field as either a string or a bare JSON scalar, so the
/// same structs read url-encoded forms and JSON bodies.
fn lenient<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    use serde_json::Value;

    let v: Option<Value> = Option::deserialize(d)?;
    Ok(match v {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// The trimmed contents of a field, unless it's missing or blank.
fn present(raw: &Option<String>) -> Option<&str> {
    match raw.as_deref().map(str::trim) {
        Some("") | None => None,
        Some(s) => Some(s),
    }
}

fn char_len(s: &str) -> usize { s.chars().count() }

fn check_email(rej: &mut Rejection, raw: &Option<String>) -> Option<String> {
    let s = match present(raw) {
        Some(s) => s,
        None => {
            rej.push("email", "Email is required");
            return None;
        },
    };

    if char_len(s) > EMAIL_MAX {
        rej.push("email", "Email too long");
        None
    } else if !EMAIL_RE.is_match(s) {
        rej.push("email", "Invalid email format");
        None
    } else {
        Some(s.to_lowercase())
    }
}

fn check_password(
    rej: &mut Rejection,
    raw: &Option<String>,
    min: usize,
    short_msg: &str,
) -> Option<String> {
    // Whitespace counts toward length; a blank password is still missing.
    let s = match (present(raw), raw) {
        (Some(_), Some(s)) => s,
        _ => {
            rej.push("password", "Password is required");
            return None;
        },
    };

    if char_len(s) < min {
        rej.push("password", short_msg);
        None
    } else {
        Some(s.clone())
    }
}

fn check_text(
    rej: &mut Rejection,
    field: &'static str,
    raw: &Option<String>,
    (min, max): (usize, usize),
    pattern: &Regex,
    msgs: [&str; 3],
) -> Option<String> {
    let [missing, bad_len, bad_chars] = msgs;

    let s = match present(raw) {
        Some(s) => s,
        None => {
            rej.push(field, missing);
            return None;
        },
    };

    let n = char_len(s);
    if n < min || n > max {
        rej.push(field, bad_len);
        None
    } else if !pattern.is_match(s) {
        rej.push(field, bad_chars);
        None
    } else {
        Some(s.to_owned())
    }
}

fn parse_number(s: &str) -> Option<f64> {
    match s.parse::<f64>() {
        Ok(x) if x.is_finite() => Some(x),
        _ => None,
    }
}

fn check_value(rej: &mut Rejection, raw: &Option<String>) -> Option<f64> {
    let s = match present(raw) {
        Some(s) => s,
        None => {
            rej.push("value", "Grade value is required");
            return None;
        },
    };

    match parse_number(s) {
        None => {
            rej.push("value", "Grade value must be a number");
            None
        },
        Some(x) if !(GRADE_MIN..=GRADE_MAX).contains(&x) => {
            rej.push("value", "Grade must be between 0 and 100");
            None
        },
        Some(x) => Some(x),
    }
}

/// `default` stands in for a blank or absent value; without one the field
/// is required.
fn check_max_value(
    rej: &mut Rejection,
    raw: &Option<String>,
    default: Option<f64>,
) -> Option<f64> {
    let s = match (present(raw), default) {
        (Some(s), _) => s,
        (None, Some(x)) => { return Some(x); },
        (None, None) => {
            rej.push("max_value", "Maximum points is required");
            return None;
        },
    };

    match parse_number(s) {
        None => {
            rej.push("max_value", "Maximum points must be a number");
            None
        },
        Some(x) if x <= MAX_VALUE_FLOOR || x > MAX_VALUE_CEILING => {
            rej.push("max_value", "Maximum points must be above 0.1 and at most 100");
            None
        },
        Some(x) => Some(x),
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SignUpForm {
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SignUp {
    pub email: String,
    pub first_name: String,
    pub password: String,
    pub role: Role,
}

impl SignUpForm {
    pub fn validate(&self) -> Result<SignUp, Rejection> {
        log::trace!("SignUpForm::validate( {:?} ) called.", &self.email);

        let mut rej = Rejection::new();
        let email = check_email(&mut rej, &self.email);
        let first_name = check_text(
            &mut rej, "first_name", &self.first_name,
            (FIRST_NAME_MIN, FIRST_NAME_MAX),
            &FIRST_NAME_RE,
            [
                "First name is required",
                "First name must be 2-150 characters",
                "First name contains invalid characters",
            ]
        );
        let password = check_password(
            &mut rej, &self.password, SIGNUP_PASSWORD_MIN,
            "Password must be at least 8 characters"
        );
        let role = match present(&self.role).map(str::parse::<Role>) {
            None => {
                rej.push("role", "Role is required");
                None
            },
            Some(Err(_)) => {
                rej.push("role", "Role must be student or teacher");
                None
            },
            Some(Ok(r)) => Some(r),
        };

        match (email, first_name, password, role) {
            (Some(email), Some(first_name), Some(password), Some(role)) => {
                rej.finish(|| SignUp { email, first_name, password, role })
            },
            _ => Err(rej),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default, deserialize_with = "lenient")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub password: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Login {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<Login, Rejection> {
        log::trace!("LoginForm::validate( {:?} ) called.", &self.email);

        let mut rej = Rejection::new();
        let email = check_email(&mut rej, &self.email);
        let password = check_password(
            &mut rej, &self.password, LOGIN_PASSWORD_MIN,
            "Password must be at least 6 characters"
        );

        match (email, password) {
            (Some(email), Some(password)) => rej.finish(|| Login { email, password }),
            _ => Err(rej),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubjectForm {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub code: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubjectData {
    pub name: String,
    /// Uppercased.
    pub code: String,
}

impl SubjectForm {
    pub fn validate(&self) -> Result<SubjectData, Rejection> {
        log::trace!("SubjectForm::validate( {:?} ) called.", self);

        let mut rej = Rejection::new();
        let name = check_text(
            &mut rej, "name", &self.name,
            (SUBJECT_NAME_MIN, SUBJECT_NAME_MAX),
            &SUBJECT_NAME_RE,
            [
                "Subject name is required",
                "Subject name must be 2-100 characters",
                "Subject name contains invalid characters",
            ]
        );

        let upper = self.code.as_ref().map(|c| c.to_uppercase());
        let code = check_text(
            &mut rej, "code", &upper,
            (SUBJECT_CODE_MIN, SUBJECT_CODE_MAX),
            &SUBJECT_CODE_RE,
            [
                "Subject code is required",
                "Subject code must be 2-20 characters",
                "Subject code must contain only letters, numbers, and hyphens",
            ]
        );

        match (name, code) {
            (Some(name), Some(code)) => rej.finish(|| SubjectData { name, code }),
            _ => Err(rej),
        }
    }
}

/// The numeric part of a grade, shared by adding and editing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GradeValues {
    pub value: f64,
    pub max_value: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GradeForm {
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub max_value: Option<String>,
}

impl GradeForm {
    pub fn validate(&self) -> Result<GradeValues, Rejection> {
        log::trace!("GradeForm::validate( {:?} ) called.", self);

        let mut rej = Rejection::new();
        let value = check_value(&mut rej, &self.value);
        let max_value = check_max_value(&mut rej, &self.max_value, None);

        match (value, max_value) {
            (Some(value), Some(max_value)) => rej.finish(|| GradeValues { value, max_value }),
            _ => Err(rej),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddGradeForm {
    #[serde(default, deserialize_with = "lenient")]
    pub student_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub max_value: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AddGrade {
    pub student_id: i64,
    pub values: GradeValues,
}

impl AddGradeForm {
    pub fn validate(&self) -> Result<AddGrade, Rejection> {
        log::trace!("AddGradeForm::validate( {:?} ) called.", self);

        let mut rej = Rejection::new();
        let student_id = match present(&self.student_id).map(str::parse::<i64>) {
            None => {
                rej.push("student_id", "Student is required");
                None
            },
            Some(Err(_)) => {
                rej.push("student_id", "Invalid student");
                None
            },
            Some(Ok(n)) => Some(n),
        };
        let value = check_value(&mut rej, &self.value);
        let max_value = check_max_value(&mut rej, &self.max_value, Some(DEFAULT_MAX_VALUE));

        match (student_id, value, max_value) {
            (Some(student_id), Some(value), Some(max_value)) => rej.finish(|| AddGrade {
                student_id,
                values: GradeValues { value, max_value },
            }),
            _ => Err(rej),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NoteForm {
    #[serde(default, deserialize_with = "lenient")]
    pub note: Option<String>,
}

impl NoteForm {
    /// Returns the note text as entered.
    pub fn validate(&self) -> Result<String, Rejection> {
        log::trace!("NoteForm::validate( [ {:?} chars ] ) called.",
            self.note.as_deref().map(char_len)
        );

        let text = match (present(&self.note), &self.note) {
            (Some(_), Some(text)) => text,
            _ => { return Err(Rejection::single("note", "Note content is required")); },
        };

        if char_len(text) > NOTE_MAX {
            return Err(Rejection::single("note", "Note must be 1-1000 characters"));
        }

        let lower = text.to_lowercase();
        if lower.contains("<script") || lower.contains("</script>") {
            return Err(Rejection::single("note", "Invalid content detected"));
        }

        Ok(text.clone())
    }
}
