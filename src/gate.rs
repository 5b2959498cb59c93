use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http::header, Error, HttpResponse};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::auth::{session_token, verify_token};

pub const ADMIN_PREFIX: &str = "/admin";
pub const LOGIN_PATH: &str = "/admin/login";
pub const DASHBOARD_PATH: &str = "/admin/dashboard";
pub const PUBLIC_ROOT: &str = "/";

/// Who is asking, as far as the session token says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    Anonymous,
    Member,
    Admin,
}

impl Session {
    /// Missing, malformed and expired tokens all count as anonymous.
    pub fn from_token(token: Option<&str>) -> Self {
        match token.map(verify_token) {
            Some(Ok(claims)) if claims.is_admin() => Session::Admin,
            Some(Ok(_)) => Session::Member,
            _ => Session::Anonymous,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Redirect(&'static str),
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// `/admin` and anything below it, but not `/administrator`.
pub fn is_protected(path: &str) -> bool {
    let path = normalize(path);
    path == ADMIN_PREFIX || path.strip_prefix(ADMIN_PREFIX).is_some_and(|rest| rest.starts_with('/'))
}

/// Pure routing decision; no store access, the role comes from the token.
pub fn decide(path: &str, session: Session) -> GateDecision {
    if !is_protected(path) {
        return GateDecision::Pass;
    }
    if normalize(path) == LOGIN_PATH {
        return match session {
            Session::Anonymous => GateDecision::Pass,
            Session::Member | Session::Admin => GateDecision::Redirect(DASHBOARD_PATH),
        };
    }
    match session {
        Session::Anonymous => GateDecision::Redirect(LOGIN_PATH),
        Session::Member => GateDecision::Redirect(PUBLIC_ROOT),
        Session::Admin => GateDecision::Pass,
    }
}

/// Middleware applying [`decide`] to every request before routing.
#[derive(Clone, Default)]
pub struct AdminGate;

impl<S, B> Transform<S, ServiceRequest> for AdminGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AdminGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AdminGateMiddleware { service: Rc::new(service) }))
    }
}

pub struct AdminGateMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AdminGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // the router matches on the percent-decoded path, so decide on that too
        let path = req.match_info().as_str().to_owned();
        let session = if is_protected(&path) {
            Session::from_token(session_token(req.request()).as_deref())
        } else {
            Session::Anonymous
        };
        match decide(&path, session) {
            GateDecision::Pass => {
                let svc = self.service.clone();
                Box::pin(async move { Ok(svc.call(req).await?.map_into_left_body()) })
            }
            GateDecision::Redirect(to) => {
                tracing::debug!(path = %path, ?session, to, "admin gate redirect");
                let res = HttpResponse::Found().insert_header((header::LOCATION, to)).finish();
                Box::pin(async move { Ok(req.into_response(res).map_into_right_body()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_always_pass() {
        for path in ["/", "/api/blog", "/administrator", "/blog/admin"] {
            for s in [Session::Anonymous, Session::Member, Session::Admin] {
                assert_eq!(decide(path, s), GateDecision::Pass, "{path} {s:?}");
            }
        }
    }

    #[test]
    fn protected_paths_by_session() {
        assert_eq!(decide("/admin/dashboard", Session::Anonymous), GateDecision::Redirect(LOGIN_PATH));
        assert_eq!(decide("/admin/sheets/new", Session::Member), GateDecision::Redirect(PUBLIC_ROOT));
        assert_eq!(decide("/admin", Session::Admin), GateDecision::Pass);
        assert_eq!(decide("/admin/blog/", Session::Admin), GateDecision::Pass);
    }

    #[test]
    fn login_path() {
        assert_eq!(decide("/admin/login", Session::Anonymous), GateDecision::Pass);
        assert_eq!(decide("/admin/login/", Session::Anonymous), GateDecision::Pass);
        assert_eq!(decide("/admin/login", Session::Admin), GateDecision::Redirect(DASHBOARD_PATH));
        assert_eq!(decide("/admin/login", Session::Member), GateDecision::Redirect(DASHBOARD_PATH));
    }

    #[test]
    fn garbage_token_is_anonymous() {
        assert_eq!(Session::from_token(None), Session::Anonymous);
        assert_eq!(Session::from_token(Some("not.a.jwt")), Session::Anonymous);
    }
}
