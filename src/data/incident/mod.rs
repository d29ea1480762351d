use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::user::UserSummary;
use crate::data::Populated;

pub static INCIDENT_COLLECTION_NAME: &str = "incidents";

string_enum! {
    pub enum IncidentType {
        Bullying => "bullying",
        Violence => "violence",
        PropertyDamage => "property_damage",
        Misconduct => "misconduct",
        Accident => "accident",
        Other => "other",
    }
}

string_enum! {
    pub enum IncidentStatus {
        Open => "open",
        InProgress => "in_progress",
        Closed => "closed",
    }
}

impl Default for IncidentStatus {
    fn default() -> Self {
        IncidentStatus::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Incident {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub incident_type: IncidentType,
    pub date: NaiveDate,
    pub reporter: String,
    #[serde(default, with = "crate::util::optional_uuid_as_binary")]
    pub victim: Option<Uuid>,
    #[serde(default, with = "crate::util::optional_uuid_as_binary")]
    pub aggressor: Option<Uuid>,
    #[serde(default)]
    pub is_violent: bool,
    pub description: String,
    pub location: String,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub registered_by: Uuid,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::util::optional_uuid_as_binary")]
    pub closed_by: Option<Uuid>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    pub fn is_closed(&self) -> bool {
        self.status == IncidentStatus::Closed
    }

    fn involved(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.victim
            .iter()
            .chain(self.aggressor.iter())
            .chain(self.closed_by.iter())
            .copied()
            .chain(std::iter::once(self.registered_by))
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncidentView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub incident_type: IncidentType,
    pub date: NaiveDate,
    pub reporter: String,
    #[schema(value_type = Option<Object>)]
    pub victim: Option<Populated<UserSummary>>,
    #[schema(value_type = Option<Object>)]
    pub aggressor: Option<Populated<UserSummary>>,
    pub is_violent: bool,
    pub description: String,
    pub location: String,
    pub status: IncidentStatus,
    #[schema(value_type = Object)]
    pub registered_by: Populated<UserSummary>,
    pub closed_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<Object>)]
    pub closed_by: Option<Populated<UserSummary>>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
