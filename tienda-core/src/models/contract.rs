use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CONTRACTS_TABLE: &str = "contrataciones";
pub const CONTRACTS_DETAIL_VIEW: &str = "vw_contrataciones_detalle";

/// Contract lifecycle label. The client enforces no transition graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractStatus {
    #[serde(rename = "pendiente")]
    Pending,
    #[serde(rename = "activa")]
    Active,
    #[serde(rename = "cancelada")]
    Cancelled,
    #[serde(rename = "renovacion")]
    Renewal,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Pending => "pendiente",
            ContractStatus::Active => "activa",
            ContractStatus::Cancelled => "cancelada",
            ContractStatus::Renewal => "renovacion",
        }
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendiente" => Ok(ContractStatus::Pending),
            "activa" => Ok(ContractStatus::Active),
            "cancelada" => Ok(ContractStatus::Cancelled),
            "renovacion" => Ok(ContractStatus::Renewal),
            other => Err(format!("unknown contract status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: Uuid,
    #[serde(rename = "usuario_id")]
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    #[serde(rename = "estado")]
    pub status: ContractStatus,
    #[serde(rename = "fecha_inicio")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "fecha_fin", default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(rename = "precio_mensual")]
    pub monthly_price: f64,
    #[serde(rename = "numero_linea", default)]
    pub line_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Contract joined with customer and plan display names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDetail {
    #[serde(flatten)]
    pub contract: Contract,
    #[serde(rename = "usuario_nombre", default)]
    pub customer_name: Option<String>,
    #[serde(rename = "plan_nombre", default)]
    pub plan_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewContract {
    #[serde(rename = "usuario_id")]
    pub customer_id: Uuid,
    pub plan_id: Uuid,
    #[serde(rename = "estado")]
    pub status: ContractStatus,
    #[serde(rename = "fecha_inicio")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "precio_mensual")]
    pub monthly_price: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewContract {
    pub fn pending(customer_id: Uuid, plan_id: Uuid, monthly_price: f64) -> Self {
        let now = Utc::now();
        Self {
            customer_id,
            plan_id,
            status: ContractStatus::Pending,
            starts_at: now,
            monthly_price,
            created_at: now,
            updated_at: now,
        }
    }
}
