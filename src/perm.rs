/*!
Who may do what.

`authorize()` is a pure function of the caller's role and the ownership
fields of the target; there's no session lookup and no store access in
here, so every rule can be exercised without a server.
*/
use serde::Serialize;

use crate::{
    note::Note,
    subject::{Grade, Subject},
    user::Role,
    view::View,
};

/// The identity and role executing an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

/// Actions that need permission, along with their targets.
#[derive(Clone, Copy, Debug)]
pub enum Action<'a> {
    /// Any subject or grade action, checked before the target is looked up
    /// so that the wrong role learns nothing about which ids exist.
    TeacherArea,
    CreateSubject,
    AddGrade(&'a Subject),
    ManageGrades(&'a Subject),
    EditGrade(&'a Grade),
    DeleteGrade(&'a Grade),
    ViewStudentDashboard,
    ViewTeacherDashboard,
    AddNote,
    DeleteNote(&'a Note),
    SwitchRole,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct Denial {
    pub reason: &'static str,
    /// Where the denied caller should be sent instead.
    pub redirect: View,
}

fn teachers_only(caller: &Caller) -> Result<(), Denial> {
    match caller.role {
        Role::Teacher => Ok(()),
        Role::Student => Err(Denial {
            reason: "Access denied. Teachers only.",
            redirect: View::dashboard_for(caller.role),
        }),
    }
}

fn students_only(caller: &Caller) -> Result<(), Denial> {
    match caller.role {
        Role::Student => Ok(()),
        Role::Teacher => Err(Denial {
            reason: "Access denied. Students only.",
            redirect: View::dashboard_for(caller.role),
        }),
    }
}

fn owned_by(caller: &Caller, owner_id: i64, reason: &'static str) -> Result<(), Denial> {
    if caller.id == owner_id {
        Ok(())
    } else {
        Err(Denial { reason, redirect: View::TeacherDashboard })
    }
}

pub fn authorize(caller: &Caller, action: &Action) -> Result<(), Denial> {
    log::trace!("authorize( {:?}, {:?} ) called.", caller, action);

    let res = match action {
        Action::TeacherArea => teachers_only(caller),
        Action::CreateSubject => teachers_only(caller),
        Action::AddGrade(subj) => teachers_only(caller).and_then(|_| owned_by(
            caller, subj.teacher_id,
            "You can only add grades to your own subjects."
        )),
        Action::ManageGrades(subj) => teachers_only(caller).and_then(|_| owned_by(
            caller, subj.teacher_id,
            "You can only manage grades for your own subjects."
        )),
        Action::EditGrade(grade) => teachers_only(caller).and_then(|_| owned_by(
            caller, grade.teacher_id,
            "You can only edit your own grades."
        )),
        Action::DeleteGrade(grade) => teachers_only(caller).and_then(|_| owned_by(
            caller, grade.teacher_id,
            "You can only delete your own grades."
        )),
        Action::ViewStudentDashboard => students_only(caller),
        Action::ViewTeacherDashboard => teachers_only(caller),
        Action::AddNote => Ok(()),
        Action::DeleteNote(note) => {
            if note.user_id == caller.id {
                Ok(())
            } else {
                Err(Denial {
                    reason: "You can only delete your own notes.",
                    redirect: View::Home,
                })
            }
        },
        Action::SwitchRole => Ok(()),
    };

    if let Err(d) = &res {
        log::debug!("{:?} denied {:?}: {}", caller, action, d.reason);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    use time::OffsetDateTime;

    const T1: Caller = Caller { id: 1, role: Role::Teacher };
    const T2: Caller = Caller { id: 2, role: Role::Teacher };
    const S3: Caller = Caller { id: 3, role: Role::Student };

    fn subject(teacher_id: i64) -> Subject {
        Subject { id: 10, name: "Math".to_owned(), code: "MATH-101".to_owned(), teacher_id }
    }

    fn grade(teacher_id: i64) -> Grade {
        Grade {
            id: 20,
            value: 85.0,
            max_value: 100.0,
            date: OffsetDateTime::now_utc(),
            student_id: 3,
            subject_id: 10,
            teacher_id,
        }
    }

    fn note(user_id: i64) -> Note {
        Note { id: 30, data: "hi".to_owned(), date: OffsetDateTime::now_utc(), user_id }
    }

    #[test]
    fn role_gates() {
        ensure_logging();

        assert!(authorize(&T1, &Action::CreateSubject).is_ok());
        let d = authorize(&S3, &Action::CreateSubject).unwrap_err();
        assert_eq!(d.redirect, View::StudentDashboard);

        assert!(authorize(&S3, &Action::ViewStudentDashboard).is_ok());
        let d = authorize(&T1, &Action::ViewStudentDashboard).unwrap_err();
        assert_eq!(d.redirect, View::TeacherDashboard);

        assert!(authorize(&T1, &Action::ViewTeacherDashboard).is_ok());
        assert!(authorize(&S3, &Action::ViewTeacherDashboard).is_err());

        assert!(authorize(&T2, &Action::TeacherArea).is_ok());
        let d = authorize(&S3, &Action::TeacherArea).unwrap_err();
        assert_eq!(d.redirect, View::StudentDashboard);
    }

    #[test]
    fn subject_ownership() {
        ensure_logging();
        let s = subject(1);

        for action in [Action::AddGrade(&s), Action::ManageGrades(&s)] {
            assert!(authorize(&T1, &action).is_ok());
            let d = authorize(&T2, &action).unwrap_err();
            assert_eq!(d.redirect, View::TeacherDashboard);
            // A student is turned away for the role before ownership matters.
            let d = authorize(&S3, &action).unwrap_err();
            assert_eq!(d.reason, "Access denied. Teachers only.");
        }
    }

    #[test]
    fn grade_ownership() {
        ensure_logging();
        let g = grade(1);

        for action in [Action::EditGrade(&g), Action::DeleteGrade(&g)] {
            assert!(authorize(&T1, &action).is_ok());
            assert!(authorize(&T2, &action).is_err());
            assert!(authorize(&S3, &action).is_err());
        }

        // Ownership recorded at creation survives a role switch.
        let switched = Caller { id: 1, role: Role::Student };
        assert!(authorize(&switched, &Action::EditGrade(&g)).is_err());
        assert!(authorize(&T1, &Action::EditGrade(&g)).is_ok());
    }

    #[test]
    fn notes_and_switching() {
        ensure_logging();
        let n = note(3);

        assert!(authorize(&S3, &Action::DeleteNote(&n)).is_ok());
        assert!(authorize(&T1, &Action::DeleteNote(&n)).is_err());

        for c in [T1, T2, S3] {
            assert!(authorize(&c, &Action::AddNote).is_ok());
            assert!(authorize(&c, &Action::SwitchRole).is_ok());
        }
    }
}
