use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

pub static SCHOOL_YEAR_COLLECTION_NAME: &str = "school_years";

string_enum! {
    pub enum SchoolYearStatus {
        Planning => "planning",
        Active => "active",
        Closed => "closed",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchoolYear {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: SchoolYearStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl SchoolYear {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}
