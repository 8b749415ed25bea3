//! Profiles, the advisor guard and the conversation list

use std::sync::Arc;

use serde_json::json;
use tienda_core::backend::{decode, Backend, Query};
use tienda_core::models::message::CONVERSATIONS_VIEW;
use tienda_core::models::profile::{CREATE_PROFILE_PROCEDURE, PROFILES_TABLE};
use tienda_core::models::{ConversationSummary, Profile, UserRole};
use uuid::Uuid;

use super::live;

#[derive(Clone)]
pub struct ProfileService {
    backend: Arc<dyn Backend>,
}

impl ProfileService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub async fn load(&self, user_id: Uuid) -> Option<Profile> {
        let query = Query::table(PROFILES_TABLE).eq("user_id", user_id).limit(1);
        match live::load::<Profile>(self.backend.as_ref(), &query).await {
            Ok(profiles) => profiles.into_iter().next(),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load profile");
                None
            }
        }
    }

    /// Create (or refresh) a registered-user profile through the store's
    /// profile procedure.
    pub async fn register(
        &self,
        user_id: Uuid,
        full_name: &str,
        phone: Option<&str>,
    ) -> Option<Profile> {
        let args = json!({
            "p_user_id": user_id,
            "p_full_name": full_name,
            "p_phone": phone,
            "p_rol": UserRole::Customer.as_str(),
        });
        let result = self
            .backend
            .rpc(CREATE_PROFILE_PROCEDURE, args)
            .await
            .and_then(decode::<Profile>);
        match result {
            Ok(profile) => {
                tracing::info!(user_id = %user_id, "Profile registered");
                Some(profile)
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to register profile");
                None
            }
        }
    }

    /// The profile, only if it belongs to an advisor.
    pub async fn require_advisor(&self, user_id: Uuid) -> Option<Profile> {
        let profile = self.load(user_id).await?;
        if profile.is_advisor() {
            Some(profile)
        } else {
            tracing::warn!(user_id = %user_id, role = profile.role.as_str(), "Advisor role required");
            None
        }
    }

    /// Conversations a user takes part in, most recent activity first.
    pub async fn list_conversations(&self, user_id: Uuid, is_advisor: bool) -> Vec<ConversationSummary> {
        let column = if is_advisor { "asesor_id" } else { "usuario_id" };
        let query = Query::table(CONVERSATIONS_VIEW)
            .eq(column, user_id)
            .order("timestamp_ultimo", false);
        match live::load(self.backend.as_ref(), &query).await {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to list conversations");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tienda_core::MemoryBackend;

    fn service() -> (Arc<MemoryBackend>, ProfileService) {
        let memory = Arc::new(MemoryBackend::default());
        let profiles = ProfileService::new(memory.clone());
        (memory, profiles)
    }

    #[tokio::test]
    async fn test_register_then_load() {
        let (_memory, profiles) = service();
        let user = Uuid::new_v4();

        let created = profiles.register(user, "Ana Pérez", Some("+34 600 000 000")).await.unwrap();
        assert_eq!(created.role, UserRole::Customer);

        let loaded = profiles.load(user).await.unwrap();
        assert_eq!(loaded.full_name, "Ana Pérez");
        assert!(profiles.require_advisor(user).await.is_none());
    }

    #[tokio::test]
    async fn test_register_twice_updates_in_place() {
        let (memory, profiles) = service();
        let user = Uuid::new_v4();
        profiles.register(user, "Ana", None).await.unwrap();
        profiles.register(user, "Ana María", None).await.unwrap();

        assert_eq!(memory.rows(PROFILES_TABLE).len(), 1);
        assert_eq!(profiles.load(user).await.unwrap().full_name, "Ana María");
    }

    #[tokio::test]
    async fn test_require_advisor_accepts_advisors() {
        let (memory, profiles) = service();
        let advisor = Uuid::new_v4();
        memory
            .insert_row(
                PROFILES_TABLE,
                json!({"user_id": advisor, "full_name": "Luis", "rol": "asesor_comercial"}),
            )
            .unwrap();
        assert!(profiles.require_advisor(advisor).await.is_some());
        assert!(profiles.require_advisor(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_failures_collapse_to_none() {
        let (memory, profiles) = service();
        memory.fail_table(PROFILES_TABLE);
        assert!(profiles.load(Uuid::new_v4()).await.is_none());
        assert!(profiles.register(Uuid::new_v4(), "x", None).await.is_none());
    }
}
