//! OpenAPI document for the auth API.

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use super::handlers::auth::types::{
    ForgotPasswordRequest, LoginRequest, NewEmailRequest, OkResponse, OtpRequest, OtpSentResponse,
    PasswordChangeRequest, PasswordResetRequest, PublicUser, SessionResponse, SignupResendRequest,
    SignupStartRequest, SignupVerifyRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        super::handlers::health::health,
        super::handlers::auth::signup::start,
        super::handlers::auth::signup::resend,
        super::handlers::auth::signup::verify,
        super::handlers::auth::login::login,
        super::handlers::auth::password_change::send_otp,
        super::handlers::auth::password_change::change,
        super::handlers::auth::password_change::forgot,
        super::handlers::auth::password_change::reset,
        super::handlers::auth::email_change::start,
        super::handlers::auth::email_change::verify_old,
        super::handlers::auth::email_change::submit_new,
        super::handlers::auth::email_change::confirm,
    ),
    components(schemas(
        SignupStartRequest,
        SignupResendRequest,
        SignupVerifyRequest,
        LoginRequest,
        PasswordChangeRequest,
        ForgotPasswordRequest,
        PasswordResetRequest,
        OtpRequest,
        NewEmailRequest,
        PublicUser,
        OtpSentResponse,
        SessionResponse,
        OkResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "OTP-gated identity and credential flows"),
        (name = "health", description = "Service health")
    )
)]
pub(super) struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
