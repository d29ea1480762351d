use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::RecordStatus;

pub static STAFF_COLLECTION_NAME: &str = "staff";

string_enum! {
    pub enum StaffRole {
        Director => "director",
        Subdirector => "subdirector",
        Teacher => "teacher",
        Auxiliary => "auxiliary",
        Administrative => "administrative",
        Psychologist => "psychologist",
    }
}

string_enum! {
    /// Level a staff member works at.
    pub enum StaffLevel {
        Primary => "primary",
        Secondary => "secondary",
        All => "all",
    }
}

/// Personnel record, optionally linked to a login account.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Staff {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub document_number: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: StaffRole,
    pub level: StaffLevel,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default, with = "crate::util::optional_uuid_as_binary")]
    pub user: Option<Uuid>,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Staff {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
