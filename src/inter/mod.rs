/*!
Interoperation between the client (user) and server.

(Not the application and the database; that's covered by `action` and
`store`.)

Logging in and signing up are plain form posts answered with rendered
templates. Everything after that is a POST to one of the API endpoints
carrying two headers:

  * `x-gradebook-key`: the key issued at login
  * `x-gradebook-action`: which action to perform

and, where the action needs one, a JSON body. API responses are JSON
of the form `{ "redirect": ..., "flash": ..., "data": ... }` on success and
`{ "error": ..., "redirect": ..., "fields": ... }` on failure.
*/
use std::{
    fmt::Debug,
    path::Path,
    sync::Arc,
};

use axum::{
    extract::{Extension, Form},
    http::{Request, StatusCode},
    http::header::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use handlebars::Handlebars;
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{
    action::{self, Outcome},
    config::Glob,
    error::ActionError,
    perm::Caller,
    user::User,
    valid::{self, LoginForm, NoteForm, SignUpForm},
    view::View,
};

pub mod student;
pub mod teacher;

pub const KEY_HEADER: &str = "x-gradebook-key";
pub const ACTION_HEADER: &str = "x-gradebook-action";
pub const REQUEST_ID_HEADER: &str = "x-gradebook-request-id";

static TEMPLATES: OnceCell<Handlebars> = OnceCell::new();

static HTML_500: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>gradebook | Error</title>
<link rel="stylesheet" href="/static/gradebook.css">
</head>
<body>
<h1>Internal Server Error</h1>
<p>(Error 500)</p>
<p>Something went wrong on our end. No further or more
helpful information is available about the problem.</p>
</body>
</html>"#;

static TEXT_500: &str = "An internal error occurred; an appropriate response was inconstructable.";

/**
Initializes the resources used in this module. This function should be called
before any functionality of this module or any of its submodules is used.

Currently the only thing that happens here is loading the templates used by
`serve_template()`, which will respond with a 500 until `init()` has been
called.

The argument is the path to the directory where the templates used by
`serve_template()` can be found.
*/
pub fn init<P: AsRef<Path>>(template_dir: P) -> Result<(), String> {
    if TEMPLATES.get().is_some() {
        log::warn!("Templates directory already initialized; ignoring.");
        return Ok(())
    }

    let template_dir = template_dir.as_ref();

    let mut h = Handlebars::new();
    #[cfg(debug_assertions)]
    h.set_dev_mode(true);
    h.register_templates_directory(".html", template_dir)
        .map_err(|e| format!(
            "Error registering templates directory {}: {}",
            template_dir.display(), &e
        ))?;

    TEMPLATES.set(h)
        .map_err(|old_h| {
            let mut estr = String::from("Templates directory already registered w/templates:");
            for template_name in old_h.get_templates().keys() {
                estr.push('\n');
                estr.push_str(template_name.as_str());
            }
            estr
        })?;

    Ok(())
}

/**
Return an HTML response in the case of an unrecoverable* error.

(*"Unrecoverable" from the perspective of fielding the current request,
not from the perspective of the program crashing.)
*/
pub fn html_500() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(HTML_500)
    ).into_response()
}

pub fn text_500(text: Option<String>) -> Response {
    match text {
        Some(text) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            text
        ).into_response(),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            TEXT_500.to_owned()
        ).into_response()
    }
}

pub fn serve_template<S>(
    code: StatusCode,
    template_name: &str,
    data: &S,
) -> Response
where
    S: Serialize + Debug
{
    log::trace!("serve_template( {}, {:?}, ... ) called.", &code, template_name);

    let templates = match TEMPLATES.get() {
        Some(t) => t,
        None => {
            log::error!("serve_template() called before inter::init().");
            return html_500();
        },
    };

    match templates.render(template_name, data) {
        Ok(response_body) => (
            code,
            Html(response_body)
        ).into_response(),
        Err(e) => {
            log::error!(
                "Error rendering template {:?} with data {:?}:\n{}",
                template_name, data, &e
            );
            html_500()
        },
    }
}

pub fn respond_bad_request(msg: String) -> Response {
    log::trace!("respond_bad_request( {:?} ) called.", &msg);

    (
        StatusCode::BAD_REQUEST,
        msg
    ).into_response()
}

pub fn error_status(e: &ActionError) -> StatusCode {
    match e {
        ActionError::Validation { .. } => StatusCode::BAD_REQUEST,
        ActionError::Authorization(_) => StatusCode::FORBIDDEN,
        ActionError::NotFound { .. } => StatusCode::NOT_FOUND,
        ActionError::Conflict { .. } => StatusCode::CONFLICT,
        ActionError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        ActionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(e: &ActionError) -> serde_json::Value {
    match e {
        ActionError::Validation { rejection, redirect } => json!({
            "error": e.to_string(),
            "redirect": redirect,
            "fields": rejection,
        }),
        _ => json!({
            "error": e.to_string(),
            "redirect": e.redirect(),
        }),
    }
}

/// Turn the result of an action into a JSON response, echoing the
/// `x-gradebook-action` header.
pub fn respond<T>(action: &HeaderValue, res: Result<Outcome<T>, ActionError>) -> Response
where
    T: Serialize
{
    let (code, body) = match res {
        Ok(out) => match serde_json::to_value(&out) {
            Ok(v) => (StatusCode::OK, v),
            Err(e) => {
                log::error!("Error serializing response to {:?}: {}", action, &e);
                return text_500(None);
            },
        },
        Err(e) => {
            log::debug!("Action {:?} failed: {}", action, &e);
            (error_status(&e), error_body(&e))
        },
    };

    (
        code,
        [(HeaderName::from_static(ACTION_HEADER), action.clone())],
        Json(body)
    ).into_response()
}

/// Parse an action's JSON payload; a missing body reads as `{}`.
pub fn parse_body<T: DeserializeOwned>(body: &Option<String>) -> Result<T, Response> {
    let text = match body.as_deref().map(str::trim) {
        None | Some("") => "{}",
        Some(s) => s,
    };

    serde_json::from_str(text).map_err(|e| {
        log::debug!("Unable to deserialize request body {:?}: {}", text, &e);
        respond_bad_request(format!("Unable to deserialize request body: {}", &e))
    })
}

#[derive(Debug, Deserialize)]
pub struct SubjectTarget {
    pub subject_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GradeTarget {
    pub grade_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct NoteTarget {
    pub note_id: i64,
}

/// An authenticated API request.
pub struct ApiCall {
    pub caller: Caller,
    pub action: HeaderValue,
    /// `action` as text.
    pub name: String,
    pub key: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, Response> {
    match headers.get(name) {
        None => Ok(None),
        Some(v) => match v.to_str() {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                log::error!("Failed converting {} value {:?} to &str: {}", name, v, &e);
                Err(respond_bad_request(format!("{} value unrecognizable.", name)))
            },
        },
    }
}

/// Read the action and key headers and resolve the caller.
pub async fn authenticate(glob: &Glob, headers: &HeaderMap) -> Result<ApiCall, Response> {
    let name = match header_str(headers, ACTION_HEADER)? {
        Some(s) => s.to_owned(),
        None => {
            return Err(respond_bad_request(format!(
                "Request must have an {} header.", ACTION_HEADER
            )));
        },
    };
    let action = match headers.get(ACTION_HEADER) {
        Some(v) => v.clone(),
        None => { return Err(text_500(None)); },
    };

    let key = match header_str(headers, KEY_HEADER)? {
        Some(k) => k.to_owned(),
        None => {
            let e = ActionError::Unauthenticated("Please log in to access this page.");
            return Err(respond::<()>(&action, Err(e)));
        },
    };

    match glob.auth.identify(glob.store(), &key).await {
        Ok(caller) => Ok(ApiCall { caller, action, name, key }),
        Err(e) => Err(respond::<()>(&action, Err(e))),
    }
}

/// Middleware function to ensure `x-gradebook-request-id` header, if
/// present, is maintained between request and response.
pub async fn request_identity<B>(
    req: Request<B>,
    next: Next<B>
) -> Response {
    let id_header = req.headers().get(REQUEST_ID_HEADER).cloned();

    let mut response = next.run(req).await;
    if let Some(id) = id_header {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

/// Field limits for the login and sign-up forms, kept in step with `valid`.
fn front_page_data() -> serde_json::Value {
    json!({
        "email_max": valid::EMAIL_MAX,
        "first_name_min": valid::FIRST_NAME_MIN,
        "first_name_max": valid::FIRST_NAME_MAX,
        "login_password_min": valid::LOGIN_PASSWORD_MIN,
        "signup_password_min": valid::SIGNUP_PASSWORD_MIN,
    })
}

pub async fn front_page() -> Response {
    serve_template(StatusCode::OK, "index", &front_page_data())
}

fn respond_login_error(e: ActionError) -> Response {
    let data = json!({
        "error_message": e.to_string(),
        "redirect": e.redirect(),
    });

    serve_template(error_status(&e), "login_error", &data)
}

async fn serve_home(glob: &Glob, out: Outcome<User>) -> Response {
    let key = glob.auth.issue_key(out.data.id).await;
    let data = json!({
        "user": &out.data,
        "key": &key,
        "flash": out.flash,
        "dashboard": View::dashboard_for(out.data.role),
    });

    serve_template(StatusCode::OK, "home", &data)
}

pub async fn login(
    Extension(glob): Extension<Arc<Glob>>,
    Form(form): Form<LoginForm>,
) -> Response {
    log::trace!("inter::login( {:?} ) called.", &form.email);

    match action::login(glob.store(), &form).await {
        Ok(out) => serve_home(&glob, out).await,
        Err(e) => respond_login_error(e),
    }
}

pub async fn sign_up(
    Extension(glob): Extension<Arc<Glob>>,
    Form(form): Form<SignUpForm>,
) -> Response {
    log::trace!("inter::sign_up( {:?} ) called.", &form.email);

    match action::sign_up(glob.store(), &glob.auth, &form).await {
        Ok(out) => serve_home(&glob, out).await,
        Err(e) => respond_login_error(e),
    }
}

/// Actions available to every authenticated caller, whatever their role.
pub async fn api(
    Extension(glob): Extension<Arc<Glob>>,
    headers: HeaderMap,
    body: Option<String>,
) -> Response {
    let call = match authenticate(&glob, &headers).await {
        Ok(call) => call,
        Err(r) => { return r; },
    };
    let store = glob.store();
    let caller = &call.caller;

    match call.name.as_str() {
        "home" => respond(&call.action, Ok(action::home(caller))),
        "logout" => {
            glob.auth.revoke_key(&call.key).await;
            log::info!("User {} logged out.", &caller.id);
            let out = Outcome { view: View::Login, flash: Some("Logged out."), data: () };
            respond(&call.action, Ok(out))
        },
        "switch-role" => respond(&call.action, action::switch_role(store, caller).await),
        "list-notes" => respond(&call.action, action::list_notes(store, caller).await),
        "add-note" => {
            let form: NoteForm = match parse_body(&body) {
                Ok(f) => f,
                Err(r) => { return r; },
            };
            respond(&call.action, action::add_note(store, caller, &form).await)
        },
        "delete-note" => {
            let t: NoteTarget = match parse_body(&body) {
                Ok(t) => t,
                Err(r) => { return r; },
            };
            respond(&call.action, action::delete_note(store, caller, t.note_id).await)
        },
        x => respond_bad_request(
            format!("{:?} is not a recognized {} value.", x, ACTION_HEADER)
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        config::{load_configuration, Cfg},
        tests::ensure_logging,
        valid::Rejection,
    };

    pub async fn memory_glob() -> Arc<Glob> {
        let cfg = Cfg::from_toml("backend = \"memory\"").unwrap();
        Arc::new(load_configuration(&cfg).await.unwrap())
    }

    /// Sign someone up directly and return their login key.
    pub async fn key_for(glob: &Glob, email: &str, role: &str) -> String {
        let form = SignUpForm {
            email: Some(email.to_owned()),
            first_name: Some("Pat".to_owned()),
            password: Some("password123".to_owned()),
            role: Some(role.to_owned()),
        };
        let u = action::sign_up(glob.store(), &glob.auth, &form).await.unwrap().data;
        glob.auth.issue_key(u.id).await
    }

    pub fn headers(key: Option<&str>, action: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(ACTION_HEADER, HeaderValue::from_str(action).unwrap());
        if let Some(k) = key {
            h.insert(KEY_HEADER, HeaderValue::from_str(k).unwrap());
        }
        h
    }

    #[test]
    fn status_codes() {
        let v = ActionError::validation(Rejection::single("note", "x"), View::Home);
        assert_eq!(error_status(&v), StatusCode::BAD_REQUEST);
        let c = ActionError::Conflict { message: "dup", redirect: View::SignUp };
        assert_eq!(error_status(&c), StatusCode::CONFLICT);
        let u = ActionError::Unauthenticated("who?");
        assert_eq!(error_status(&u), StatusCode::UNAUTHORIZED);

        let body = error_body(&v);
        assert_eq!(body["fields"][0]["field"], "note");
        assert_eq!(body["redirect"]["action"], "home");
    }

    #[test]
    fn empty_bodies_parse_as_empty_objects() {
        let f: NoteForm = parse_body(&None).ok().unwrap();
        assert!(f.note.is_none());
        assert!(parse_body::<NoteTarget>(&Some("{}".to_owned())).is_err());
        let t: NoteTarget = parse_body(&Some(r#"{"note_id": 3}"#.to_owned())).ok().unwrap();
        assert_eq!(t.note_id, 3);
    }

    #[test]
    fn front_page_limits_match_validation() {
        ensure_logging();
        init("templates/").unwrap();
        let page = TEMPLATES.get().unwrap()
            .render("index", &front_page_data())
            .unwrap();

        assert!(page.contains(&format!(r#"maxlength="{}""#, valid::EMAIL_MAX)));
        assert!(page.contains(&format!(r#"maxlength="{}""#, valid::FIRST_NAME_MAX)));
        assert!(page.contains(&format!(r#"minlength="{}""#, valid::SIGNUP_PASSWORD_MIN)));
        assert!(page.contains(&format!(r#"minlength="{}""#, valid::LOGIN_PASSWORD_MIN)));
    }

    /// Request whatever `view` directs the client to.
    async fn follow(glob: &Arc<Glob>, key: &str, view: View) -> Response {
        let (endpoint, action) = view.endpoint();
        let action = action.unwrap();
        let h = headers(Some(key), action);
        let body = Some(serde_json::to_string(&view).unwrap());

        match endpoint {
            crate::view::API => api(Extension(glob.clone()), h, body).await,
            crate::view::TEACHER => teacher::api(Extension(glob.clone()), h, body).await,
            crate::view::STUDENT => student::api(Extension(glob.clone()), h, body).await,
            x => panic!("{:?} directs to unmounted endpoint {:?}", view, x),
        }
    }

    #[tokio::test]
    async fn every_view_leads_somewhere() {
        ensure_logging();
        let glob = memory_glob().await;
        let t_key = key_for(&glob, "t1@school.edu", "teacher").await;
        let s_key = key_for(&glob, "s1@school.edu", "student").await;
        let t = glob.auth.identify(glob.store(), &t_key).await.unwrap();
        let s = glob.auth.identify(glob.store(), &s_key).await.unwrap();

        let subj = action::create_subject(glob.store(), &t, &crate::valid::SubjectForm {
            name: Some("Math".to_owned()),
            code: Some("MATH-101".to_owned()),
        }).await.unwrap().data;
        let grade = action::add_grade(glob.store(), &t, subj.id, &crate::valid::AddGradeForm {
            student_id: Some(s.id.to_string()),
            value: Some("85".to_owned()),
            max_value: None,
        }).await.unwrap().data;

        for view in [View::Login, View::SignUp] {
            assert_eq!(view.endpoint(), (crate::view::FRONT_PAGE, None));
        }

        let teacher_views = [
            View::Home,
            View::TeacherDashboard,
            View::CreateSubject,
            View::AddGrade(subj.id),
            View::ManageGrades(subj.id),
            View::EditGrade(grade.id),
        ];
        for view in teacher_views {
            let r = follow(&glob, &t_key, view).await;
            assert_eq!(r.status(), StatusCode::OK, "{:?}", view);
        }
        for view in [View::Home, View::StudentDashboard] {
            let r = follow(&glob, &s_key, view).await;
            assert_eq!(r.status(), StatusCode::OK, "{:?}", view);
        }
    }

    #[tokio::test]
    async fn api_requires_a_key() {
        ensure_logging();
        let glob = memory_glob().await;

        let r = api(Extension(glob.clone()), headers(None, "home"), None).await;
        assert_eq!(r.status(), StatusCode::UNAUTHORIZED);
        let r = api(Extension(glob.clone()), headers(Some("bogus"), "home"), None).await;
        assert_eq!(r.status(), StatusCode::UNAUTHORIZED);

        let mut h = HeaderMap::new();
        h.insert(KEY_HEADER, HeaderValue::from_static("bogus"));
        let r = api(Extension(glob), h, None).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notes_over_the_api() {
        ensure_logging();
        let glob = memory_glob().await;
        let key = key_for(&glob, "ann@school.edu", "student").await;

        let r = api(
            Extension(glob.clone()),
            headers(Some(&key), "add-note"),
            Some(r#"{ "note": "<script>alert(1)</script>" }"#.to_owned()),
        ).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        assert_eq!(r.headers().get(ACTION_HEADER).unwrap(), "add-note");

        let r = api(
            Extension(glob.clone()),
            headers(Some(&key), "add-note"),
            Some(r#"{ "note": "Bring a calculator." }"#.to_owned()),
        ).await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = api(Extension(glob.clone()), headers(Some(&key), "frobnicate"), None).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);

        let r = api(Extension(glob.clone()), headers(Some(&key), "logout"), None).await;
        assert_eq!(r.status(), StatusCode::OK);
        let r = api(Extension(glob), headers(Some(&key), "list-notes"), None).await;
        assert_eq!(r.status(), StatusCode::UNAUTHORIZED);
    }
}
