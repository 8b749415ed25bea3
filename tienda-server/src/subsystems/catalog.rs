//! Plan catalog
//!
//! `PlanCatalog` is a live view of the active plans, cheapest first, refreshed
//! on any change to the plans table. `PlanService` holds the one-shot reads
//! and the advisor-side writes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tienda_core::backend::{decode, encode, Backend, ChangeFilter, Filter, Query};
use tienda_core::error::Result;
use tienda_core::models::plan::PLANS_TABLE;
use tienda_core::models::{NewPlan, Plan, PlanPatch, Segment};
use tokio::sync::watch;
use uuid::Uuid;

use super::live::{self, LiveView};
use super::profiles::ProfileService;

fn active_plans_query() -> Query {
    Query::table(PLANS_TABLE)
        .eq("activo", true)
        .order("precio", true)
}

pub struct PlanCatalog {
    view: LiveView<Plan>,
}

impl PlanCatalog {
    pub fn start(backend: Arc<dyn Backend>) -> Self {
        Self {
            view: LiveView::start(backend, active_plans_query(), ChangeFilter::table(PLANS_TABLE)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Plan>> {
        self.view.subscribe()
    }

    pub fn plans(&self) -> Vec<Plan> {
        self.view.current()
    }

    pub fn by_segment(&self, segment: Segment) -> Vec<Plan> {
        filter_segment(self.plans(), segment)
    }
}

pub fn filter_segment(plans: Vec<Plan>, segment: Segment) -> Vec<Plan> {
    plans.into_iter().filter(|p| p.segment == segment).collect()
}

#[derive(Clone)]
pub struct PlanService {
    backend: Arc<dyn Backend>,
    profiles: ProfileService,
}

impl PlanService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let profiles = ProfileService::new(backend.clone());
        Self { backend, profiles }
    }

    pub async fn list_active(&self) -> Vec<Plan> {
        match live::load(self.backend.as_ref(), &active_plans_query()).await {
            Ok(plans) => plans,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list plans");
                Vec::new()
            }
        }
    }

    pub async fn get(&self, plan_id: Uuid) -> Option<Plan> {
        let query = Query::table(PLANS_TABLE).eq("id", plan_id).limit(1);
        match live::load::<Plan>(self.backend.as_ref(), &query).await {
            Ok(plans) => plans.into_iter().next(),
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Failed to load plan");
                None
            }
        }
    }

    /// Publish a new plan owned by `actor_id`. Advisors only.
    pub async fn create(&self, actor_id: Uuid, plan: &NewPlan) -> Option<Plan> {
        if self.profiles.require_advisor(actor_id).await.is_none() {
            tracing::warn!(actor_id = %actor_id, "Plan creation refused");
            return None;
        }
        let stored = match new_plan_row(actor_id, plan) {
            Ok(row) => self.backend.insert(PLANS_TABLE, row).await,
            Err(e) => Err(e),
        };
        match stored.and_then(decode::<Plan>) {
            Ok(plan) => {
                tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");
                Some(plan)
            }
            Err(e) => {
                tracing::error!(actor_id = %actor_id, error = %e, "Failed to create plan");
                None
            }
        }
    }

    pub async fn update(&self, plan_id: Uuid, patch: &PlanPatch) -> Option<Plan> {
        let row = match encode(patch) {
            Ok(Value::Object(mut map)) if !map.is_empty() => {
                map.insert("updated_at".to_string(), json!(Utc::now()));
                Value::Object(map)
            }
            Ok(_) => {
                tracing::debug!(plan_id = %plan_id, "Empty plan patch");
                return self.get(plan_id).await;
            }
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Invalid plan patch");
                return None;
            }
        };
        let updated = self
            .backend
            .update(PLANS_TABLE, &[Filter::eq("id", plan_id)], row)
            .await;
        match updated {
            Ok(rows) => match rows.into_iter().next().map(decode::<Plan>) {
                Some(Ok(plan)) => Some(plan),
                Some(Err(e)) => {
                    tracing::error!(plan_id = %plan_id, error = %e, "Updated plan did not decode");
                    None
                }
                None => None,
            },
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Failed to update plan");
                None
            }
        }
    }

    pub async fn delete(&self, plan_id: Uuid) -> bool {
        match self
            .backend
            .delete(PLANS_TABLE, &[Filter::eq("id", plan_id)])
            .await
        {
            Ok(rows) => !rows.is_empty(),
            Err(e) => {
                tracing::error!(plan_id = %plan_id, error = %e, "Failed to delete plan");
                false
            }
        }
    }

    /// Hide a plan from the catalog without deleting it.
    pub async fn deactivate(&self, plan_id: Uuid) -> bool {
        let patch = PlanPatch {
            active: Some(false),
            ..PlanPatch::default()
        };
        self.update(plan_id, &patch).await.is_some()
    }
}

fn new_plan_row(actor_id: Uuid, plan: &NewPlan) -> Result<Value> {
    let mut row = encode(plan)?;
    if let Value::Object(map) = &mut row {
        map.insert("created_by".to_string(), json!(actor_id));
        map.insert("activo".to_string(), Value::Bool(true));
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tienda_core::models::profile::PROFILES_TABLE;
    use tienda_core::MemoryBackend;

    fn sample_plan(name: &str, price: f64, segment: Segment) -> NewPlan {
        NewPlan {
            name: name.to_string(),
            description: format!("Plan {}", name),
            price,
            segment,
            mobile_data: "10 GB".to_string(),
            voice_minutes: "Ilimitados".to_string(),
            sms: "100".to_string(),
            speed_4g: "50 Mbps".to_string(),
            speed_5g: None,
            social_networks: "Incluidas".to_string(),
            whatsapp: "Ilimitado".to_string(),
            international_calls: "No".to_string(),
            roaming: "No".to_string(),
            image_url: None,
        }
    }

    fn setup() -> (Arc<MemoryBackend>, PlanService, Uuid) {
        let memory = Arc::new(MemoryBackend::default());
        let advisor = Uuid::new_v4();
        memory
            .insert_row(
                PROFILES_TABLE,
                json!({"user_id": advisor, "full_name": "Asesor", "rol": "asesor_comercial"}),
            )
            .unwrap();
        let service = PlanService::new(memory.clone());
        (memory, service, advisor)
    }

    #[tokio::test]
    async fn test_create_requires_advisor() {
        let (_memory, service, advisor) = setup();
        let plan = service
            .create(advisor, &sample_plan("Base", 9.9, Segment::Basic))
            .await
            .unwrap();
        assert!(plan.active);
        assert_eq!(plan.created_by, advisor);

        assert!(service
            .create(Uuid::new_v4(), &sample_plan("Otro", 9.9, Segment::Basic))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_list_active_cheapest_first() {
        let (_memory, service, advisor) = setup();
        let premium = service.create(advisor, &sample_plan("Top", 49.0, Segment::Premium)).await.unwrap();
        service.create(advisor, &sample_plan("Base", 9.0, Segment::Basic)).await.unwrap();
        service.create(advisor, &sample_plan("Medio", 19.0, Segment::Medium)).await.unwrap();

        let names: Vec<_> = service.list_active().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Base", "Medio", "Top"]);

        assert!(service.deactivate(premium.id).await);
        assert_eq!(service.list_active().await.len(), 2);
        assert!(service.get(premium.id).await.is_some());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (_memory, service, advisor) = setup();
        let plan = service.create(advisor, &sample_plan("Base", 9.0, Segment::Basic)).await.unwrap();

        let patch = PlanPatch {
            price: Some(7.5),
            ..PlanPatch::default()
        };
        let updated = service.update(plan.id, &patch).await.unwrap();
        assert_eq!(updated.price, 7.5);
        assert_eq!(updated.name, "Base");

        assert!(service.delete(plan.id).await);
        assert!(!service.delete(plan.id).await);
        assert!(service.update(plan.id, &patch).await.is_none());
    }

    #[tokio::test]
    async fn test_catalog_follows_changes() {
        let (memory, service, advisor) = setup();
        let catalog = PlanCatalog::start(memory.clone());
        let mut rx = catalog.subscribe();

        service.create(advisor, &sample_plan("Top", 49.0, Segment::Premium)).await.unwrap();
        service.create(advisor, &sample_plan("Base", 9.0, Segment::Basic)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|plans| plans.len() == 2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(catalog.plans()[0].name, "Base");
        assert_eq!(catalog.by_segment(Segment::Premium).len(), 1);
        assert!(catalog.by_segment(Segment::Medium).is_empty());
    }
}
