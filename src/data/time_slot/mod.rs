use chrono::{DateTime, Utc};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::RecordStatus;

pub static TIME_SLOT_COLLECTION_NAME: &str = "time_slots";

string_enum! {
    pub enum SlotType {
        Class => "class",
        Break => "break",
        Lunch => "lunch",
    }
}

impl Default for SlotType {
    fn default() -> Self {
        SlotType::Class
    }
}

/// A named `[start_time, end_time)` interval of the school day.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TimeSlot {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    pub name: String,
    #[schema(example = "08:00")]
    pub start_time: String,
    #[schema(example = "08:45")]
    pub end_time: String,
    #[serde(default)]
    pub slot_type: SlotType,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}
