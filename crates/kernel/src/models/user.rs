//! User (identity) model.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::auth::password::{self, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN};
use crate::error::{AppResult, FieldError};
use crate::resource::fields::char_len;
use crate::resource::{Fields, Resource};
use crate::state::AppState;
use crate::store::Collection;

pub const DEFAULT_PHOTO: &str = "default.jpg";

#[allow(clippy::expect_used)]
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex literal"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    #[default]
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default = "default_photo")]
    pub photo: String,
    #[serde(default)]
    pub role: Role,
    /// Argon2 hash once stored.
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[serde(default = "active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_photo() -> String {
    DEFAULT_PHOTO.to_string()
}

fn active() -> bool {
    true
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// True when the password changed after a token issued at
    /// `issued_at_ms` (milliseconds since the epoch).
    pub fn changed_password_after(&self, issued_at_ms: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed| changed.timestamp_millis() > issued_at_ms)
    }

    pub async fn correct_password(&self, candidate: &str) -> AppResult<bool> {
        password::verify(candidate.to_string(), self.password.clone()).await
    }
}

/// Lowercase and check an email address.
pub fn normalize_email(fields: &mut Fields<'_>, email: Option<String>) -> Option<String> {
    let email = email?.trim().to_lowercase();
    fields.check(
        "email",
        EMAIL_RE.is_match(&email),
        "Please provide a valid email",
    );
    Some(email)
}

fn check_name(fields: &mut Fields<'_>, name: &Option<String>) {
    if let Some(name) = name {
        let len = char_len(name);
        fields.check(
            "name",
            (2..=35).contains(&len),
            "A name must have between 2 and 35 characters",
        );
    }
}

/// Check a new password and its confirmation.
pub fn check_new_password(
    fields: &mut Fields<'_>,
    password_field: &str,
    confirm_field: &str,
) -> Option<String> {
    let password: Option<String> = fields.required(password_field, "Please provide a password");
    let confirm: Option<String> = fields.required(confirm_field, "Please confirm your password");
    let password = password?;
    let len = char_len(&password);
    fields.check(
        password_field,
        len >= MIN_PASSWORD_LEN,
        format!("Password must have at least {MIN_PASSWORD_LEN} characters"),
    );
    fields.check(
        password_field,
        len <= MAX_PASSWORD_LEN,
        format!("Password must have at most {MAX_PASSWORD_LEN} characters"),
    );
    if let Some(confirm) = confirm {
        fields.check(confirm_field, confirm == password, "Passwords are not the same!");
    }
    Some(password)
}

#[async_trait]
impl Resource for User {
    const NAME: &'static str = "user";
    const PLURAL: &'static str = "users";
    const COLLECTION: Collection = Collection::Users;
    const QUERY_FIELDS: &'static [&'static str] = &["name", "email", "photo", "role"];
    const HIDDEN_FIELDS: &'static [&'static str] = &[
        "password",
        "password_changed_at",
        "password_reset_token",
        "password_reset_expires",
        "active",
    ];
    const SOFT_DELETE_FIELD: Option<&'static str> = Some("active");

    fn id(&self) -> Uuid {
        self.id
    }

    fn validate_create(input: &Map<String, Value>) -> Result<Self, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        let name = fields
            .required::<String>("name", "Please tell us your name!")
            .map(|n| n.trim().to_string());
        check_name(&mut fields, &name);
        let email = fields.required::<String>("email", "Please provide your email");
        let email = normalize_email(&mut fields, email);
        let photo = fields.optional::<String>("photo");
        let role = fields.choice::<Role>(
            "role",
            false,
            "",
            "Role is either: user, guide, lead-guide, admin",
        );
        let password = check_new_password(&mut fields, "password", "password_confirm");

        let (Some(name), Some(email), Some(password)) = (name, email, password) else {
            return Err(fields.into_errors());
        };
        fields.finish(User {
            id: Uuid::now_v7(),
            name,
            email,
            photo: photo.unwrap_or_else(default_photo),
            role: role.unwrap_or_default(),
            password,
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
        })
    }

    fn validate_update(
        input: &Map<String, Value>,
        _current: &Self,
    ) -> Result<Map<String, Value>, Vec<FieldError>> {
        let mut fields = Fields::new(input);
        for key in ["password", "password_confirm", "password_current"] {
            if input.contains_key(key) {
                fields.error(
                    key,
                    "This route is not for password updates. Please use /update-my-password.",
                );
            }
        }
        let name = fields.optional::<String>("name").map(|n| n.trim().to_string());
        check_name(&mut fields, &name);
        let email = fields.optional::<String>("email");
        let email = normalize_email(&mut fields, email);
        let photo = fields.optional::<String>("photo");
        let role = fields.choice::<Role>(
            "role",
            false,
            "",
            "Role is either: user, guide, lead-guide, admin",
        );

        let mut patch = Map::new();
        if let Some(name) = name {
            patch.insert("name".to_string(), name.into());
        }
        if let Some(email) = email {
            patch.insert("email".to_string(), email.into());
        }
        if let Some(photo) = photo {
            patch.insert("photo".to_string(), photo.into());
        }
        if let Some(role) = role {
            patch.insert("role".to_string(), role.as_str().into());
        }
        fields.finish(patch)
    }

    async fn prepare_create(mut self, _state: &AppState) -> AppResult<Self> {
        self.password = password::hash(self.password).await?;
        Ok(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signup() -> Value {
        json!({
            "name": "Laura Wilson",
            "email": " Laura@Example.com ",
            "password": "pass1234",
            "password_confirm": "pass1234",
        })
    }

    #[test]
    fn create_normalizes_and_defaults() {
        let user = User::validate_create(signup().as_object().unwrap()).unwrap();
        assert_eq!(user.email, "laura@example.com");
        assert_eq!(user.photo, DEFAULT_PHOTO);
        assert_eq!(user.role, Role::User);
        assert!(user.active);
        assert!(user.password_changed_at.is_none());
    }

    #[test]
    fn create_rejects_mismatched_confirmation_and_bad_email() {
        let mut input = signup();
        input["password_confirm"] = json!("pass12345");
        input["email"] = json!("not-an-email");
        let errors = User::validate_create(input.as_object().unwrap()).unwrap_err();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Please provide a valid email", "Passwords are not the same!"]
        );
    }

    #[test]
    fn short_password_is_rejected() {
        let mut input = signup();
        input["password"] = json!("short");
        input["password_confirm"] = json!("short");
        let errors = User::validate_create(input.as_object().unwrap()).unwrap_err();
        assert_eq!(errors[0].message, "Password must have at least 8 characters");
    }

    #[test]
    fn update_refuses_password_fields() {
        let user = User::validate_create(signup().as_object().unwrap()).unwrap();
        let errors = User::validate_update(
            json!({"name": "Laura", "password": "newpass123"}).as_object().unwrap(),
            &user,
        )
        .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "password");
    }

    #[test]
    fn roles_use_kebab_case() {
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), json!("lead-guide"));
        let role: Role = serde_json::from_value(json!("admin")).unwrap();
        assert_eq!(role, Role::Admin);
    }

    #[test]
    fn password_change_after_token_issue_is_detected() {
        let mut user = User::validate_create(signup().as_object().unwrap()).unwrap();
        let issued = Utc::now();
        assert!(!user.changed_password_after(issued.timestamp_millis()));

        user.password_changed_at = Some(issued);
        assert!(!user.changed_password_after(issued.timestamp_millis()));

        user.password_changed_at = Some(issued + chrono::Duration::milliseconds(5));
        assert!(user.changed_password_after(issued.timestamp_millis()));
    }
}
