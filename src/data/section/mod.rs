use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::{Level, RecordStatus};

pub static SECTION_COLLECTION_NAME: &str = "sections";

/// A class grouping of students for a grade and level within a school year.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Section {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub grade: u32,
    pub level: Level,
    pub letter: String,
    pub capacity: u32,
    #[serde(default)]
    pub current_students: u32,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub school_year: Uuid,
    #[serde(default, with = "crate::util::optional_uuid_as_binary")]
    pub tutor: Option<Uuid>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Section {
    /// Display name such as `3A secondary`.
    pub fn label(&self) -> String {
        format!("{}{} {}", self.grade, self.letter, self.level)
    }
}

/// Minimal section reference embedded in populated views.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SectionSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub label: String,
    pub grade: u32,
    pub level: Level,
    pub letter: String,
}

impl From<&Section> for SectionSummary {
    fn from(section: &Section) -> Self {
        SectionSummary {
            id: section.id,
            label: section.label(),
            grade: section.grade,
            level: section.level,
            letter: section.letter.clone(),
        }
    }
}
