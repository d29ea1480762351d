use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::{Level, RecordStatus};

pub static COURSE_COLLECTION_NAME: &str = "courses";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Course {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub level: Level,
    pub grade: u32,
    pub credits: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CourseSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub code: String,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        CourseSummary {
            id: course.id,
            name: course.name.clone(),
            code: course.code.clone(),
        }
    }
}
