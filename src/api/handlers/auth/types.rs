//! Request/response types for the auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::storage::UserRecord;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupStartRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupResendRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupVerifyRequest {
    pub email: String,
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordChangeRequest {
    pub otp: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetRequest {
    pub email: String,
    pub otp: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequest {
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NewEmailRequest {
    pub new_email: String,
}

/// User fields safe to return to the frontend.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
}

impl From<&UserRecord> for PublicUser {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
            role: record.role.clone(),
        }
    }
}

/// Response for the "code sent" half of every OTP flow.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpSentResponse {
    pub success: bool,
    pub resend_after_seconds: i64,
    pub expires_in_minutes: i64,
}

/// Response for operations that establish a session.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
    pub redirect_to: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OkResponse {
    pub success: bool,
}

impl OkResponse {
    pub(super) fn ok() -> Self {
        Self { success: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn signup_start_request_round_trips() -> Result<()> {
        let request = SignupStartRequest {
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "Password1!".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: SignupStartRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "alice@example.com");
        Ok(())
    }

    #[test]
    fn public_user_hides_password_hash() -> Result<()> {
        let record = UserRecord {
            id: Uuid::nil(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: "viewer".to_string(),
            status: "active".to_string(),
        };
        let public = PublicUser::from(&record);
        let value = serde_json::to_value(&public)?;
        assert!(value.get("password_hash").is_none());
        assert_eq!(value["role"], "viewer");
        Ok(())
    }

    #[test]
    fn otp_sent_response_shape() -> Result<()> {
        let response = OtpSentResponse {
            success: true,
            resend_after_seconds: 60,
            expires_in_minutes: 10,
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(value["resend_after_seconds"], 60);
        assert_eq!(value["expires_in_minutes"], 10);
        Ok(())
    }
}
