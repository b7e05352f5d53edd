//! Bearer-token authentication for the protected scope.

use std::future::{ready, Ready};
use std::rc::Rc;

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http, web, Error, FromRequest, HttpMessage, HttpRequest, ResponseError};
use futures_util::future::LocalBoxFuture;
use log::warn;
use mongodb::bson::doc;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::{Role, User};
use crate::security::validate_jwt;

/// Identity resolved from a verified token and the stored account.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub tenant_id: String,
    pub role: Role,
    pub email: String,
    pub name: String,
}

impl AuthUser {
    /// Owners act on their own content; moderators and admins on anyone's.
    pub fn can_modify(&self, owner_id: &str) -> bool {
        self.user_id == owner_id || self.role.can_moderate()
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            tenant_id: user.tenant_id,
            role: user.role,
            email: user.email,
            name: user.name,
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or(ApiError::Unauthorized("Unauthorized")),
        )
    }
}

pub struct Authentication;

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            match authenticate(&req).await {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(err) => {
                    let response = err.error_response();
                    Ok(req.into_response(response).map_into_right_body())
                }
            }
        })
    }
}

/// Extracts `Bearer <token>` from the Authorization header.
pub fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn authenticate(req: &ServiceRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::internal("application state is not configured"))?;

    let token = bearer_token(req).ok_or(ApiError::Unauthorized("Missing bearer token"))?;

    let claims = validate_jwt(token, &state.config.jwt_secret).map_err(|e| {
        warn!("Rejected token on {}: {}", req.path(), e);
        ApiError::Unauthorized("Invalid token")
    })?;

    let user = state
        .mongodb
        .coll::<User>()
        .find_one(doc! { "tenantId": &claims.tenant_id, "userId": &claims.sub })
        .await?
        .ok_or_else(|| {
            warn!("Token for missing user {} in tenant {}", claims.sub, claims.tenant_id);
            ApiError::Unauthorized("Invalid token")
        })?;

    Ok(AuthUser::from(user))
}
