use chrono::{DateTime, NaiveDate, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::section::SectionSummary;
use crate::data::user::UserSummary;
use crate::data::Populated;

pub static ENROLLMENT_COLLECTION_NAME: &str = "enrollments";

string_enum! {
    pub enum EnrollmentStatus {
        Active => "active",
        Withdrawn => "withdrawn",
        Transferred => "transferred",
    }
}

impl Default for EnrollmentStatus {
    fn default() -> Self {
        EnrollmentStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub student: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub section: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub school_year: Uuid,
    pub enrollment_date: NaiveDate,
    #[serde(default)]
    pub status: EnrollmentStatus,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Enrollment {
    /// Only active enrollments hold a seat in their section.
    pub fn holds_seat(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EnrollmentView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub student: Populated<UserSummary>,
    #[schema(value_type = Object)]
    pub section: Populated<SectionSummary>,
    pub school_year: Uuid,
    pub enrollment_date: NaiveDate,
    pub status: EnrollmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}
