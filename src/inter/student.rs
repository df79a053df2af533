/*!
Subcrate for interoperation with Student users.
*/
use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::Response,
};

use super::*;

pub async fn api(
    Extension(glob): Extension<Arc<Glob>>,
    headers: HeaderMap,
    _body: Option<String>,
) -> Response {
    let call = match authenticate(&glob, &headers).await {
        Ok(call) => call,
        Err(r) => { return r; },
    };
    log::trace!("student::api( {:?} ) called by {:?}.", &call.name, &call.caller);

    match call.name.as_str() {
        "student-dashboard" => respond(
            &call.action,
            action::student_dashboard(glob.store(), &call.caller).await
        ),
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

    #[tokio::test]
    async fn dashboard_follows_role() {
        ensure_logging();
        let glob = memory_glob().await;
        let s = key_for(&glob, "s1@school.edu", "student").await;

        let r = api(Extension(glob.clone()), headers(Some(&s), "student-dashboard"), None).await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = super::super::api(Extension(glob.clone()), headers(Some(&s), "switch-role"), None).await;
        assert_eq!(r.status(), StatusCode::OK);

        let r = api(Extension(glob), headers(Some(&s), "student-dashboard"), None).await;
        assert_eq!(r.status(), StatusCode::FORBIDDEN);
    }
}
