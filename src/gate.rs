use actix_web::body::EitherBody;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{web, Error, HttpMessage};
use futures_util::future::{LocalBoxFuture, ready, Ready};
use std::rc::Rc;

use crate::auth::{authenticate, bearer_token, ensure_role, CurrentUser};
use crate::error::ApiError;
use crate::models::Role;
use crate::routes::AppState;

/// Role gate: wrap a scope or resource with `restrict_to(&[Role::Admin])` and
/// callers outside the allowed set get 403 before the handler runs.
pub fn restrict_to(roles: &[Role]) -> RoleGate {
    RoleGate { allowed: Rc::from(roles) }
}

#[derive(Clone)]
pub struct RoleGate {
    allowed: Rc<[Role]>,
}

impl<S, B> Transform<S, ServiceRequest> for RoleGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RoleGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RoleGateMiddleware {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        }))
    }
}

pub struct RoleGateMiddleware<S> {
    service: Rc<S>,
    allowed: Rc<[Role]>,
}

impl<S, B> Service<ServiceRequest> for RoleGateMiddleware<S>
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
        let svc = self.service.clone();
        let allowed = self.allowed.clone();
        Box::pin(async move {
            let cached = req.extensions().get::<CurrentUser>().cloned();
            let user = match cached {
                Some(CurrentUser(user)) => user,
                None => {
                    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
                        return Ok(req.error_response(ApiError::Internal).map_into_right_body());
                    };
                    let token = bearer_token(req.request());
                    match authenticate(&state, token.as_deref()).await {
                        Ok(user) => {
                            req.extensions_mut().insert(CurrentUser(user.clone()));
                            user
                        }
                        Err(e) => return Ok(req.error_response(e).map_into_right_body()),
                    }
                }
            };
            if let Err(e) = ensure_role(&user, &allowed) {
                return Ok(req.error_response(e).map_into_right_body());
            }
            svc.call(req).await.map(ServiceResponse::map_into_left_body)
        })
    }
}
