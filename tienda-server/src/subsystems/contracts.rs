//! Contracting flow and the advisor dashboard
//!
//! Contracts start `pendiente`; an advisor moves them to `activa` (approve)
//! or `cancelada` (reject) with a single write. There is no transition graph
//! beyond that.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tienda_core::backend::{decode, encode, Backend, Filter, Query};
use tienda_core::models::contract::{CONTRACTS_DETAIL_VIEW, CONTRACTS_TABLE};
use tienda_core::models::plan::PLANS_TABLE;
use tienda_core::models::{Contract, ContractDetail, ContractStatus, NewContract};
use uuid::Uuid;

use super::live;
use super::profiles::ProfileService;

/// Counters shown on the advisor dashboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdvisorStats {
    pub active_plans: usize,
    pub pending_contracts: usize,
    pub active_contracts: usize,
}

#[derive(Clone)]
pub struct ContractService {
    backend: Arc<dyn Backend>,
    profiles: ProfileService,
}

impl ContractService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let profiles = ProfileService::new(backend.clone());
        Self { backend, profiles }
    }

    pub async fn create(&self, customer_id: Uuid, plan_id: Uuid, monthly_price: f64) -> Option<Contract> {
        let new = NewContract::pending(customer_id, plan_id, monthly_price);
        let stored = match encode(&new) {
            Ok(row) => self.backend.insert(CONTRACTS_TABLE, row).await,
            Err(e) => Err(e),
        };
        match stored.and_then(decode::<Contract>) {
            Ok(contract) => {
                tracing::info!(contract_id = %contract.id, customer_id = %customer_id, plan_id = %plan_id, "Contract created");
                Some(contract)
            }
            Err(e) => {
                tracing::error!(customer_id = %customer_id, plan_id = %plan_id, error = %e, "Failed to create contract");
                None
            }
        }
    }

    pub async fn list_by_user(&self, customer_id: Uuid) -> Vec<ContractDetail> {
        let query = Query::table(CONTRACTS_DETAIL_VIEW)
            .eq("usuario_id", customer_id)
            .order("created_at", false);
        self.list(query).await
    }

    pub async fn list_pending(&self) -> Vec<ContractDetail> {
        let query = Query::table(CONTRACTS_DETAIL_VIEW)
            .eq("estado", ContractStatus::Pending)
            .order("created_at", false);
        self.list(query).await
    }

    pub async fn get(&self, contract_id: Uuid) -> Option<Contract> {
        let query = Query::table(CONTRACTS_TABLE).eq("id", contract_id).limit(1);
        match live::load::<Contract>(self.backend.as_ref(), &query).await {
            Ok(contracts) => contracts.into_iter().next(),
            Err(e) => {
                tracing::error!(contract_id = %contract_id, error = %e, "Failed to load contract");
                None
            }
        }
    }

    /// Set `estado` and bump `updated_at`. False when nothing matched.
    pub async fn update_status(&self, contract_id: Uuid, status: ContractStatus) -> bool {
        let patch = json!({
            "estado": status,
            "updated_at": Utc::now(),
        });
        match self
            .backend
            .update(CONTRACTS_TABLE, &[Filter::eq("id", contract_id)], patch)
            .await
        {
            Ok(rows) if rows.is_empty() => {
                tracing::warn!(contract_id = %contract_id, "Contract not found");
                false
            }
            Ok(_) => {
                tracing::info!(contract_id = %contract_id, status = %status, "Contract status updated");
                true
            }
            Err(e) => {
                tracing::error!(contract_id = %contract_id, error = %e, "Failed to update contract status");
                false
            }
        }
    }

    pub async fn approve(&self, actor_id: Uuid, contract_id: Uuid) -> bool {
        self.advisor_transition(actor_id, contract_id, ContractStatus::Active).await
    }

    pub async fn reject(&self, actor_id: Uuid, contract_id: Uuid) -> bool {
        self.advisor_transition(actor_id, contract_id, ContractStatus::Cancelled).await
    }

    pub async fn advisor_stats(&self) -> AdvisorStats {
        let active_plans = self
            .count(Query::table(PLANS_TABLE).eq("activo", true))
            .await;
        let pending_contracts = self
            .count(Query::table(CONTRACTS_TABLE).eq("estado", ContractStatus::Pending))
            .await;
        let active_contracts = self
            .count(Query::table(CONTRACTS_TABLE).eq("estado", ContractStatus::Active))
            .await;
        AdvisorStats {
            active_plans,
            pending_contracts,
            active_contracts,
        }
    }

    async fn advisor_transition(&self, actor_id: Uuid, contract_id: Uuid, status: ContractStatus) -> bool {
        if self.profiles.require_advisor(actor_id).await.is_none() {
            tracing::warn!(actor_id = %actor_id, contract_id = %contract_id, "Contract transition refused");
            return false;
        }
        self.update_status(contract_id, status).await
    }

    async fn list(&self, query: Query) -> Vec<ContractDetail> {
        match live::load(self.backend.as_ref(), &query).await {
            Ok(contracts) => contracts,
            Err(e) => {
                tracing::error!(view = %query.table, error = %e, "Failed to list contracts");
                Vec::new()
            }
        }
    }

    async fn count(&self, query: Query) -> usize {
        match self.backend.select(&query).await {
            Ok(rows) => rows.len(),
            Err(e) => {
                tracing::warn!(table = %query.table, error = %e, "Dashboard count failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tienda_core::models::profile::PROFILES_TABLE;
    use tienda_core::MemoryBackend;

    fn setup() -> (Arc<MemoryBackend>, ContractService, Uuid) {
        let memory = Arc::new(MemoryBackend::default());
        let advisor = Uuid::new_v4();
        memory
            .insert_row(
                PROFILES_TABLE,
                json!({"user_id": advisor, "full_name": "Asesor", "rol": "asesor_comercial"}),
            )
            .unwrap();
        let service = ContractService::new(memory.clone());
        (memory, service, advisor)
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let (_memory, service, _) = setup();
        let customer = Uuid::new_v4();
        let contract = service.create(customer, Uuid::new_v4(), 19.99).await.unwrap();
        assert_eq!(contract.status, ContractStatus::Pending);
        assert_eq!(contract.customer_id, customer);

        let fetched = service.get(contract.id).await.unwrap();
        assert_eq!(fetched.id, contract.id);
        assert_eq!(service.list_pending().await.len(), 1);
        assert_eq!(service.list_by_user(customer).await.len(), 1);
        assert!(service.list_by_user(Uuid::new_v4()).await.is_empty());
    }

    #[tokio::test]
    async fn test_approve_and_reject() {
        let (_memory, service, advisor) = setup();
        let a = service.create(Uuid::new_v4(), Uuid::new_v4(), 10.0).await.unwrap();
        let b = service.create(Uuid::new_v4(), Uuid::new_v4(), 12.0).await.unwrap();

        assert!(service.approve(advisor, a.id).await);
        assert!(service.reject(advisor, b.id).await);

        let a2 = service.get(a.id).await.unwrap();
        assert_eq!(a2.status, ContractStatus::Active);
        assert!(a2.updated_at >= a.updated_at);
        assert_eq!(service.get(b.id).await.unwrap().status, ContractStatus::Cancelled);
        assert!(service.list_pending().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_advisor_cannot_approve() {
        let (_memory, service, _) = setup();
        let customer = Uuid::new_v4();
        let contract = service.create(customer, Uuid::new_v4(), 10.0).await.unwrap();

        assert!(!service.approve(customer, contract.id).await);
        assert_eq!(service.get(contract.id).await.unwrap().status, ContractStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_status_unknown_contract() {
        let (_memory, service, _) = setup();
        assert!(!service.update_status(Uuid::new_v4(), ContractStatus::Active).await);
    }

    #[tokio::test]
    async fn test_advisor_stats_counts() {
        let (memory, service, advisor) = setup();
        memory.insert_row(PLANS_TABLE, json!({"activo": true})).unwrap();
        memory.insert_row(PLANS_TABLE, json!({"activo": false})).unwrap();
        let a = service.create(Uuid::new_v4(), Uuid::new_v4(), 10.0).await.unwrap();
        service.create(Uuid::new_v4(), Uuid::new_v4(), 10.0).await.unwrap();
        service.approve(advisor, a.id).await;

        let stats = service.advisor_stats().await;
        assert_eq!(
            stats,
            AdvisorStats {
                active_plans: 1,
                pending_contracts: 1,
                active_contracts: 1,
            }
        );
    }
}
