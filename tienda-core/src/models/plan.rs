use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub const PLANS_TABLE: &str = "planes_moviles";

/// Market segment a plan is sold under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    #[serde(rename = "Básico", alias = "Basico")]
    Basic,
    #[serde(rename = "Medio")]
    Medium,
    #[serde(rename = "Premium")]
    Premium,
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "básico" | "basico" | "basic" => Ok(Segment::Basic),
            "medio" | "medium" => Ok(Segment::Medium),
            "premium" => Ok(Segment::Premium),
            other => Err(format!("unknown segment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "precio")]
    pub price: f64,
    #[serde(rename = "segmento")]
    pub segment: Segment,
    #[serde(rename = "datos_moviles")]
    pub mobile_data: String,
    #[serde(rename = "minutos_voz")]
    pub voice_minutes: String,
    pub sms: String,
    #[serde(rename = "velocidad_4g")]
    pub speed_4g: String,
    #[serde(rename = "velocidad_5g", default)]
    pub speed_5g: Option<String>,
    #[serde(rename = "redes_sociales")]
    pub social_networks: String,
    pub whatsapp: String,
    #[serde(rename = "llamadas_internacionales")]
    pub international_calls: String,
    pub roaming: String,
    #[serde(rename = "imagen_url", default)]
    pub image_url: Option<String>,
    #[serde(rename = "activo")]
    pub active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Advisor-supplied fields of a new plan; ownership and timestamps are
/// stamped on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlan {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: String,
    #[serde(rename = "precio")]
    pub price: f64,
    #[serde(rename = "segmento")]
    pub segment: Segment,
    #[serde(rename = "datos_moviles")]
    pub mobile_data: String,
    #[serde(rename = "minutos_voz")]
    pub voice_minutes: String,
    pub sms: String,
    #[serde(rename = "velocidad_4g")]
    pub speed_4g: String,
    #[serde(rename = "velocidad_5g", default)]
    pub speed_5g: Option<String>,
    #[serde(rename = "redes_sociales")]
    pub social_networks: String,
    pub whatsapp: String,
    #[serde(rename = "llamadas_internacionales")]
    pub international_calls: String,
    pub roaming: String,
    #[serde(rename = "imagen_url", default)]
    pub image_url: Option<String>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanPatch {
    #[serde(rename = "nombre", skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    #[serde(rename = "descripcion", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(rename = "precio", skip_serializing_if = "Option::is_none", default)]
    pub price: Option<f64>,
    #[serde(rename = "segmento", skip_serializing_if = "Option::is_none", default)]
    pub segment: Option<Segment>,
    #[serde(rename = "datos_moviles", skip_serializing_if = "Option::is_none", default)]
    pub mobile_data: Option<String>,
    #[serde(rename = "minutos_voz", skip_serializing_if = "Option::is_none", default)]
    pub voice_minutes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sms: Option<String>,
    #[serde(rename = "velocidad_4g", skip_serializing_if = "Option::is_none", default)]
    pub speed_4g: Option<String>,
    #[serde(rename = "velocidad_5g", skip_serializing_if = "Option::is_none", default)]
    pub speed_5g: Option<String>,
    #[serde(rename = "redes_sociales", skip_serializing_if = "Option::is_none", default)]
    pub social_networks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub whatsapp: Option<String>,
    #[serde(rename = "llamadas_internacionales", skip_serializing_if = "Option::is_none", default)]
    pub international_calls: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub roaming: Option<String>,
    #[serde(rename = "imagen_url", skip_serializing_if = "Option::is_none", default)]
    pub image_url: Option<String>,
    #[serde(rename = "activo", skip_serializing_if = "Option::is_none", default)]
    pub active: Option<bool>,
}
