/*!
Subcrate for interoperation with Teacher users.

These are routed to `/teacher`; the role check itself happens in
`perm::authorize()`, so a Student who posts here is refused with a redirect
to their own dashboard like anywhere else.
*/
use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::Response,
};

use crate::valid::{AddGradeForm, GradeForm, SubjectForm};
use super::*;

pub async fn api(
    Extension(glob): Extension<Arc<Glob>>,
    headers: HeaderMap,
    body: Option<String>,
) -> Response {
    let call = match authenticate(&glob, &headers).await {
        Ok(call) => call,
        Err(r) => { return r; },
    };
    log::trace!("teacher::api( {:?} ) called by {:?}.", &call.name, &call.caller);

    let store = glob.store();
    let caller = &call.caller;
    let hdr = &call.action;

    match call.name.as_str() {
        "teacher-dashboard" => respond(hdr, action::teacher_dashboard(store, caller).await),

        "create-subject" => {
            let form: SubjectForm = match parse_body(&body) {
                Ok(f) => f,
                Err(r) => { return r; },
            };
            respond(hdr, action::create_subject(store, caller, &form).await)
        },

        "add-grade-page" => {
            let t: SubjectTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            respond(hdr, action::add_grade_page(store, caller, t.subject_id).await)
        },

        "add-grade" => {
            let t: SubjectTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            let form: AddGradeForm = match parse_body(&body) {
                Ok(f) => f,
                Err(r) => { return r; },
            };
            respond(hdr, action::add_grade(store, caller, t.subject_id, &form).await)
        },

        "manage-grades" => {
            let t: SubjectTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            respond(hdr, action::manage_grades(store, caller, t.subject_id).await)
        },

        "edit-grade-page" => {
            let t: GradeTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            respond(hdr, action::edit_grade_page(store, caller, t.grade_id).await)
        },

        "edit-grade" => {
            let t: GradeTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            let form: GradeForm = match parse_body(&body) {
                Ok(f) => f,
                Err(r) => { return r; },
            };
            respond(hdr, action::edit_grade(store, caller, t.grade_id, &form).await)
        },

        "delete-grade" => {
            let t: GradeTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            respond(hdr, action::delete_grade(store, caller, t.grade_id).await)
        },

        x => respond_bad_request(
            format!("{:?} is not a recognized {} value.", x, ACTION_HEADER)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::tests::{headers, key_for, memory_glob};
    use crate::tests::ensure_logging;

    async fn post(glob: &Arc<Glob>, key: &str, action: &str, body: &str) -> Response {
        api(
            Extension(glob.clone()),
            headers(Some(key), action),
            Some(body.to_owned())
        ).await
    }

    #[tokio::test]
    async fn grading_over_the_api() {
        ensure_logging();
        let glob = memory_glob().await;
        let t = key_for(&glob, "t1@school.edu", "teacher").await;
        let other = key_for(&glob, "t2@school.edu", "teacher").await;
        let s = key_for(&glob, "s1@school.edu", "student").await;

        let r = post(&glob, &t, "create-subject", r#"{"name": "Math", "code": "math-101"}"#).await;
        assert_eq!(r.status(), StatusCode::OK);
        let subj = glob.store().get_subject_by_code("MATH-101").await.unwrap().unwrap();
        let student = glob.store().get_user_by_email("s1@school.edu").await.unwrap().unwrap();

        let r = post(&glob, &t, "create-subject", r#"{"name": "Maths", "code": "MATH-101"}"#).await;
        assert_eq!(r.status(), StatusCode::CONFLICT);

        let body = format!(
            r#"{{"subject_id": {}, "student_id": {}, "value": 85, "max_value": 100}}"#,
            subj.id, student.id
        );
        let r = post(&glob, &other, "add-grade", &body).await;
        assert_eq!(r.status(), StatusCode::FORBIDDEN);
        let r = post(&glob, &s, "add-grade", &body).await;
        assert_eq!(r.status(), StatusCode::FORBIDDEN);
        let r = post(&glob, &t, "add-grade", &body).await;
        assert_eq!(r.status(), StatusCode::OK);

        let grades = glob.store().get_grades_by_student(student.id).await.unwrap();
        let grade = &grades[0];
        let r = post(
            &glob, &t, "edit-grade",
            &format!(r#"{{"grade_id": {}, "value": 150}}"#, grade.id)
        ).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let r = post(&glob, &t, "delete-grade", r#"{"grade_id": 9999}"#).await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);
        let r = post(
            &glob, &t, "delete-grade",
            &format!(r#"{{"grade_id": {}}}"#, grade.id)
        ).await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = post(&glob, &t, "manage-grades", "not json").await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }
}
