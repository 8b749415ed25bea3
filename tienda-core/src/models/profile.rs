use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PROFILES_TABLE: &str = "perfiles";
pub const CREATE_PROFILE_PROCEDURE: &str = "crear_perfil_usuario";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "asesor_comercial")]
    Advisor,
    #[serde(rename = "usuario_registrado")]
    Customer,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Advisor => "asesor_comercial",
            UserRole::Customer => "usuario_registrado",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "rol")]
    pub role: UserRole,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_advisor(&self) -> bool {
        self.role == UserRole::Advisor
    }
}
