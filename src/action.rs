/*!
The operations a caller can perform.

Every function here takes the store and an explicit `Caller` (except
`sign_up()` and `login()`, which produce one), runs the permission check,
then validates the payload, and only then touches the store. Any failure
comes back as an `ActionError` carrying a user-safe message and a redirect;
nothing is mutated on the failure path.
*/
use std::collections::HashMap;

use serde::Serialize;

use crate::{
    auth::Auth,
    error::ActionError,
    note::{NewNote, Note},
    perm::{authorize, Action, Caller},
    store::{DbError, Store},
    subject::{Grade, NewGrade, NewSubject, Subject},
    user::{NewUser, Role, User},
    valid::{AddGradeForm, GradeForm, LoginForm, NoteForm, Rejection, SignUpForm, SubjectForm},
    view::View,
};

const BAD_LOGIN: &str = "Invalid email/password combination.";

/// What a successful action produces: where to go (or what was rendered),
/// an optional one-line message for the user, and the data involved.
#[derive(Debug, Serialize)]
pub struct Outcome<T> {
    #[serde(rename = "redirect")]
    pub view: View,
    pub flash: Option<&'static str>,
    pub data: T,
}

impl<T> Outcome<T> {
    fn redirect(view: View, flash: &'static str, data: T) -> Self {
        Self { view, flash: Some(flash), data }
    }

    fn render(view: View, data: T) -> Self {
        Self { view, flash: None, data }
    }
}

#[derive(Debug, Serialize)]
pub struct StudentGrade {
    #[serde(flatten)]
    pub grade: Grade,
    pub subject_name: String,
    pub subject_code: String,
}

#[derive(Debug, Serialize)]
pub struct AddGradePage {
    pub subject: Subject,
    pub students: Vec<User>,
}

#[derive(Debug, Serialize)]
pub struct ManageGradesPage {
    pub subject: Subject,
    pub grades: Vec<Grade>,
}

/// Turn a store-level uniqueness violation into the given conflict; pass
/// everything else through as a storage error.
fn conflict_or_store(e: DbError, message: &'static str, redirect: View) -> ActionError {
    match e {
        DbError::Conflict(s) => {
            log::debug!("Store reported conflict: {}", &s);
            ActionError::Conflict { message, redirect }
        },
        e => e.into(),
    }
}

/// A row that vanished between being loaded and being written is reported
/// the same as one that was never there.
fn missing_or_store(e: DbError, what: &'static str, id: i64, redirect: View) -> ActionError {
    match e {
        DbError::Missing(s) => {
            log::debug!("Store reported missing row: {}", &s);
            ActionError::NotFound { what, id, redirect }
        },
        e => e.into(),
    }
}

async fn load_subject(
    store: &dyn Store,
    caller: &Caller,
    id: i64
) -> Result<Subject, ActionError> {
    store.get_subject(id).await?.ok_or(ActionError::NotFound {
        what: "Subject",
        id,
        redirect: View::dashboard_for(caller.role),
    })
}

async fn load_grade(
    store: &dyn Store,
    caller: &Caller,
    id: i64
) -> Result<Grade, ActionError> {
    store.get_grade(id).await?.ok_or(ActionError::NotFound {
        what: "Grade",
        id,
        redirect: View::dashboard_for(caller.role),
    })
}

pub async fn sign_up(
    store: &dyn Store,
    auth: &Auth,
    form: &SignUpForm,
) -> Result<Outcome<User>, ActionError> {
    log::trace!("sign_up( {:?} ) called.", &form.email);

    const DUPLICATE: &str = "Email already exists. Choose a different one.";

    let su = form.validate()
        .map_err(|r| ActionError::validation(r, View::SignUp))?;

    if store.get_user_by_email(&su.email).await?.is_some() {
        return Err(ActionError::Conflict { message: DUPLICATE, redirect: View::SignUp });
    }

    let salt = auth.generate_salt();
    let new = NewUser {
        email: su.email,
        first_name: su.first_name,
        role: su.role,
        password_hash: Auth::hash_password(&salt, &su.password),
        salt,
    };
    let u = store.insert_user(&new).await
        .map_err(|e| conflict_or_store(e, DUPLICATE, View::SignUp))?;

    log::info!("New {} {:?} (id {}) signed up.", &u.role, &u.email, &u.id);
    Ok(Outcome::redirect(View::Home, "Account created!", u))
}

pub async fn login(
    store: &dyn Store,
    form: &LoginForm,
) -> Result<Outcome<User>, ActionError> {
    log::trace!("login( {:?} ) called.", &form.email);

    let l = form.validate()
        .map_err(|r| ActionError::validation(r, View::Login))?;

    let u = match store.get_user_by_email(&l.email).await? {
        Some(u) => u,
        None => {
            log::debug!("Login attempt for nonexistent user {:?}.", &l.email);
            return Err(ActionError::Unauthenticated(BAD_LOGIN));
        },
    };

    if !Auth::check_password(&u, &l.password) {
        log::debug!("Bad password for {:?}.", &l.email);
        return Err(ActionError::Unauthenticated(BAD_LOGIN));
    }

    Ok(Outcome::redirect(View::Home, "Logged in successfully!", u))
}

/// The landing page just forwards to the caller's dashboard.
pub fn home(caller: &Caller) -> Outcome<()> {
    Outcome::render(View::dashboard_for(caller.role), ())
}

pub async fn student_dashboard(
    store: &dyn Store,
    caller: &Caller,
) -> Result<Outcome<Vec<StudentGrade>>, ActionError> {
    log::trace!("student_dashboard( {:?} ) called.", caller);

    authorize(caller, &Action::ViewStudentDashboard)?;

    let grades = store.get_grades_by_student(caller.id).await?;
    let mut subjects: HashMap<i64, Subject> = HashMap::new();
    let mut rows: Vec<StudentGrade> = Vec::with_capacity(grades.len());

    for grade in grades.into_iter() {
        if !subjects.contains_key(&grade.subject_id) {
            match store.get_subject(grade.subject_id).await? {
                Some(s) => { subjects.insert(s.id, s); },
                None => {
                    log::warn!(
                        "Grade {} refers to nonexistent subject {}.",
                        &grade.id, &grade.subject_id
                    );
                    continue;
                },
            }
        }
        if let Some(s) = subjects.get(&grade.subject_id) {
            rows.push(StudentGrade {
                subject_name: s.name.clone(),
                subject_code: s.code.clone(),
                grade,
            });
        }
    }

    Ok(Outcome::render(View::StudentDashboard, rows))
}

pub async fn teacher_dashboard(
    store: &dyn Store,
    caller: &Caller,
) -> Result<Outcome<Vec<Subject>>, ActionError> {
    log::trace!("teacher_dashboard( {:?} ) called.", caller);

    authorize(caller, &Action::ViewTeacherDashboard)?;

    let subjects = store.get_subjects_by_teacher(caller.id).await?;
    Ok(Outcome::render(View::TeacherDashboard, subjects))
}

pub async fn create_subject(
    store: &dyn Store,
    caller: &Caller,
    form: &SubjectForm,
) -> Result<Outcome<Subject>, ActionError> {
    log::trace!("create_subject( {:?}, {:?} ) called.", caller, form);

    const DUPLICATE: &str = "Subject code already exists.";

    authorize(caller, &Action::CreateSubject)?;
    let data = form.validate()
        .map_err(|r| ActionError::validation(r, View::CreateSubject))?;

    if store.get_subject_by_code(&data.code).await?.is_some() {
        return Err(ActionError::Conflict { message: DUPLICATE, redirect: View::CreateSubject });
    }

    let new = NewSubject {
        name: data.name,
        code: data.code,
        teacher_id: caller.id,
    };
    let subj = store.insert_subject(&new).await
        .map_err(|e| conflict_or_store(e, DUPLICATE, View::CreateSubject))?;

    log::info!("Teacher {} created subject {:?} ({}).", &caller.id, &subj.code, &subj.id);
    Ok(Outcome::redirect(View::TeacherDashboard, "Subject created successfully!", subj))
}

/// The data behind the add-grade form: the subject and everyone who can
/// be graded in it.
pub async fn add_grade_page(
    store: &dyn Store,
    caller: &Caller,
    subject_id: i64,
) -> Result<Outcome<AddGradePage>, ActionError> {
    log::trace!("add_grade_page( {:?}, {} ) called.", caller, &subject_id);

    authorize(caller, &Action::TeacherArea)?;
    let subject = load_subject(store, caller, subject_id).await?;
    authorize(caller, &Action::AddGrade(&subject))?;

    let students = store.get_users_by_role(Role::Student).await?;
    Ok(Outcome::render(View::AddGrade(subject_id), AddGradePage { subject, students }))
}

pub async fn add_grade(
    store: &dyn Store,
    caller: &Caller,
    subject_id: i64,
    form: &AddGradeForm,
) -> Result<Outcome<Grade>, ActionError> {
    log::trace!("add_grade( {:?}, {}, {:?} ) called.", caller, &subject_id, form);

    authorize(caller, &Action::TeacherArea)?;
    let subject = load_subject(store, caller, subject_id).await?;
    authorize(caller, &Action::AddGrade(&subject))?;

    let back = View::AddGrade(subject_id);
    let ag = form.validate().map_err(|r| ActionError::validation(r, back))?;

    let student = store.get_user(ag.student_id).await?.ok_or(ActionError::NotFound {
        what: "Student",
        id: ag.student_id,
        redirect: back,
    })?;
    match student.role {
        Role::Student => {},
        Role::Teacher => {
            return Err(ActionError::validation(
                Rejection::single("student_id", "Selected user is not a student"),
                back
            ));
        },
    }

    let new = NewGrade {
        value: ag.values.value,
        max_value: ag.values.max_value,
        student_id: student.id,
        subject_id: subject.id,
        // Equal to `caller.id`, as authorized above.
        teacher_id: subject.teacher_id,
    };
    let grade = store.insert_grade(&new).await?;

    log::info!(
        "Teacher {} graded student {} in subject {}: {}/{}.",
        &caller.id, &student.id, &subject.id, &grade.value, &grade.max_value
    );
    Ok(Outcome::redirect(View::TeacherDashboard, "Grade added successfully!", grade))
}

pub async fn manage_grades(
    store: &dyn Store,
    caller: &Caller,
    subject_id: i64,
) -> Result<Outcome<ManageGradesPage>, ActionError> {
    log::trace!("manage_grades( {:?}, {} ) called.", caller, &subject_id);

    authorize(caller, &Action::TeacherArea)?;
    let subject = load_subject(store, caller, subject_id).await?;
    authorize(caller, &Action::ManageGrades(&subject))?;

    let grades: Vec<Grade> = store.get_grades_by_subject(subject_id).await?
        .into_iter()
        .filter(|g| g.teacher_id == caller.id)
        .collect();

    Ok(Outcome::render(View::ManageGrades(subject_id), ManageGradesPage { subject, grades }))
}

/// The grade to pre-fill the edit form with.
pub async fn edit_grade_page(
    store: &dyn Store,
    caller: &Caller,
    grade_id: i64,
) -> Result<Outcome<Grade>, ActionError> {
    log::trace!("edit_grade_page( {:?}, {} ) called.", caller, &grade_id);

    authorize(caller, &Action::TeacherArea)?;
    let grade = load_grade(store, caller, grade_id).await?;
    authorize(caller, &Action::EditGrade(&grade))?;

    Ok(Outcome::render(View::EditGrade(grade_id), grade))
}

pub async fn edit_grade(
    store: &dyn Store,
    caller: &Caller,
    grade_id: i64,
    form: &GradeForm,
) -> Result<Outcome<Grade>, ActionError> {
    log::trace!("edit_grade( {:?}, {}, {:?} ) called.", caller, &grade_id, form);

    authorize(caller, &Action::TeacherArea)?;
    let grade = load_grade(store, caller, grade_id).await?;
    authorize(caller, &Action::EditGrade(&grade))?;

    let vals = form.validate()
        .map_err(|r| ActionError::validation(r, View::EditGrade(grade_id)))?;

    let grade = store.update_grade(grade_id, vals.value, vals.max_value).await
        .map_err(|e| missing_or_store(e, "Grade", grade_id, View::dashboard_for(caller.role)))?;
    Ok(Outcome::redirect(
        View::ManageGrades(grade.subject_id),
        "Grade updated successfully!",
        grade
    ))
}

/// Returns the grade as it was before deletion.
pub async fn delete_grade(
    store: &dyn Store,
    caller: &Caller,
    grade_id: i64,
) -> Result<Outcome<Grade>, ActionError> {
    log::trace!("delete_grade( {:?}, {} ) called.", caller, &grade_id);

    authorize(caller, &Action::TeacherArea)?;
    let grade = load_grade(store, caller, grade_id).await?;
    authorize(caller, &Action::DeleteGrade(&grade))?;

    store.delete_grade(grade_id).await
        .map_err(|e| missing_or_store(e, "Grade", grade_id, View::dashboard_for(caller.role)))?;
    Ok(Outcome::redirect(
        View::ManageGrades(grade.subject_id),
        "Grade deleted successfully!",
        grade
    ))
}

pub async fn list_notes(
    store: &dyn Store,
    caller: &Caller,
) -> Result<Outcome<Vec<Note>>, ActionError> {
    log::trace!("list_notes( {:?} ) called.", caller);

    let notes = store.get_notes_by_user(caller.id).await?;
    Ok(Outcome::render(View::Home, notes))
}

pub async fn add_note(
    store: &dyn Store,
    caller: &Caller,
    form: &NoteForm,
) -> Result<Outcome<Note>, ActionError> {
    log::trace!("add_note( {:?}, ... ) called.", caller);

    authorize(caller, &Action::AddNote)?;
    let data = form.validate()
        .map_err(|r| ActionError::validation(r, View::Home))?;

    let note = store.insert_note(&NewNote { data, user_id: caller.id }).await?;
    Ok(Outcome::redirect(View::Home, "Note added!", note))
}

pub async fn delete_note(
    store: &dyn Store,
    caller: &Caller,
    note_id: i64,
) -> Result<Outcome<Note>, ActionError> {
    log::trace!("delete_note( {:?}, {} ) called.", caller, &note_id);

    let note = store.get_note(note_id).await?.ok_or(ActionError::NotFound {
        what: "Note",
        id: note_id,
        redirect: View::Home,
    })?;
    authorize(caller, &Action::DeleteNote(&note))?;

    store.delete_note(note_id).await
        .map_err(|e| missing_or_store(e, "Note", note_id, View::Home))?;
    Ok(Outcome::redirect(View::Home, "Note deleted.", note))
}

/// Toggle the caller between student and teacher. Returns the caller as
/// they are after the switch.
pub async fn switch_role(
    store: &dyn Store,
    caller: &Caller,
) -> Result<Outcome<Caller>, ActionError> {
    log::trace!("switch_role( {:?} ) called.", caller);

    authorize(caller, &Action::SwitchRole)?;

    let role = caller.role.switched();
    store.set_user_role(caller.id, role).await?;

    let flash = match role {
        Role::Teacher => "Switched to Teacher role!",
        Role::Student => "Switched to Student role!",
    };
    Ok(Outcome::redirect(View::Home, flash, Caller { id: caller.id, role }))
}
