use std::collections::HashMap;

use bson::{doc, Document};
use chrono::Utc;
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::validation::Validator;
use crate::data::{count, filter, find_all, find_page, schedule, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::util::bson_uuids;

use super::{SlotType, TimeSlot, TIME_SLOT_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Time slot", id)
    }

    pub fn overlapping(other: &super::TimeSlot) -> Problem {
        problems::bad_request("Time slot overlaps an existing time slot.")
            .insert_str("conflict", format!("{} ({}-{})", other.name, other.start_time, other.end_time))
            .insert("conflict_id", other.id)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TimeSlotInput {
    pub name: String,
    #[schema(example = "08:00")]
    pub start_time: String,
    #[schema(example = "08:45")]
    pub end_time: String,
    #[serde(default)]
    pub slot_type: Option<SlotType>,
    #[serde(default)]
    pub status: Option<RecordStatus>,
}

impl TimeSlotInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.length("name", &self.name, 1, 50)
            .clock_time("start_time", &self.start_time)
            .clock_time("end_time", &self.end_time);
        if v.is_valid() {
            v.check(self.end_time > self.start_time, "end_time", "must be after start_time");
        }
        v.finish()
    }

    fn into_time_slot(self, existing: Option<&TimeSlot>) -> TimeSlot {
        let now = Utc::now();
        TimeSlot {
            id: existing.map(|t| t.id).unwrap_or_else(Uuid::new_v4),
            name: self.name.trim().to_string(),
            start_time: self.start_time,
            end_time: self.end_time,
            slot_type: self.slot_type.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            created_at: existing.map(|t| t.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

/// Slots whose `[start_time, end_time)` intersects `[start, end)`.
pub fn overlap_filter(start: &str, end: &str, except: Option<Uuid>) -> Document {
    filter::excluding(
        doc! {
            "start_time": { "$lt": end },
            "end_time": { "$gt": start },
        },
        except,
    )
}

#[derive(Debug, Clone, Default)]
pub struct TimeSlotFilter {
    pub slot_type: Option<SlotType>,
    pub status: Option<RecordStatus>,
}

impl TimeSlotFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(slot_type) = self.slot_type {
            filter.insert("slot_type", slot_type);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        filter
    }
}

pub trait TimeSlotDbExt {
    fn time_slots(&self) -> Collection<TimeSlot>;

    async fn list_time_slots(&self, filter: &TimeSlotFilter, page: &PageState) -> Result<(Vec<TimeSlot>, u64), Problem>;
    async fn get_time_slot(&self, id: Uuid) -> Result<Option<TimeSlot>, Problem>;
    async fn require_time_slot(&self, id: Uuid, field: &str) -> Result<TimeSlot, Problem>;
    async fn create_time_slot(&self, input: TimeSlotInput) -> Result<TimeSlot, Problem>;
    async fn update_time_slot(&self, id: Uuid, input: TimeSlotInput) -> Result<TimeSlot, Problem>;
    async fn delete_time_slot(&self, id: Uuid) -> Result<TimeSlot, Problem>;

    /// Ids of every slot intersecting `slot`, the slot itself included.
    async fn overlapping_slot_ids(&self, slot: &TimeSlot) -> Result<Vec<Uuid>, Problem>;
    async fn time_slots_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, TimeSlot>, Problem>;
}

impl TimeSlotDbExt for Database {
    fn time_slots(&self) -> Collection<TimeSlot> {
        self.collection(TIME_SLOT_COLLECTION_NAME)
    }

    async fn list_time_slots(&self, filter: &TimeSlotFilter, page: &PageState) -> Result<(Vec<TimeSlot>, u64), Problem> {
        find_page(&self.time_slots(), filter.document(), page, doc! { "start_time": 1 }).await
    }

    async fn get_time_slot(&self, id: Uuid) -> Result<Option<TimeSlot>, Problem> {
        Ok(self.time_slots().find_one(filter::by_id(id), None).await?)
    }

    async fn require_time_slot(&self, id: Uuid, field: &str) -> Result<TimeSlot, Problem> {
        self.get_time_slot(id).await?.ok_or_else(|| {
            problems::bad_request("Referenced time slot doesn't exist.")
                .field(field, "must reference an existing time slot")
        })
    }

    async fn create_time_slot(&self, input: TimeSlotInput) -> Result<TimeSlot, Problem> {
        let slot = input.into_time_slot(None);
        check_overlap(self, &slot, None).await?;

        self.time_slots().insert_one(&slot, None).await?;
        tracing::info!("Created time slot {} {}-{}", slot.name, slot.start_time, slot.end_time);

        Ok(slot)
    }

    async fn update_time_slot(&self, id: Uuid, input: TimeSlotInput) -> Result<TimeSlot, Problem> {
        let existing = self.get_time_slot(id).await?.ok_or_else(|| problem::not_found(id))?;
        let slot = input.into_time_slot(Some(&existing));
        check_overlap(self, &slot, Some(id)).await?;

        self.time_slots().replace_one(filter::by_id(id), &slot, None).await?;
        Ok(slot)
    }

    async fn delete_time_slot(&self, id: Uuid) -> Result<TimeSlot, Problem> {
        let schedules = count(self, schedule::SCHEDULE_COLLECTION_NAME, filter::by_ref("time_slot", id)).await?;
        if schedules > 0 {
            return Err(problems::in_use("Time slot", "course schedules", schedules));
        }

        self.time_slots()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn overlapping_slot_ids(&self, slot: &TimeSlot) -> Result<Vec<Uuid>, Problem> {
        let slots = find_all(
            &self.time_slots(),
            overlap_filter(&slot.start_time, &slot.end_time, None),
            doc! {},
        )
        .await?;
        let mut ids: Vec<Uuid> = slots.into_iter().map(|s| s.id).collect();
        if !ids.contains(&slot.id) {
            ids.push(slot.id);
        }
        Ok(ids)
    }

    async fn time_slots_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, TimeSlot>, Problem> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let slots = find_all(&self.time_slots(), doc! { "_id": { "$in": bson_uuids(ids) } }, doc! {}).await?;
        Ok(slots.into_iter().map(|s| (s.id, s)).collect())
    }
}

async fn check_overlap(db: &Database, slot: &TimeSlot, id: Option<Uuid>) -> Result<(), Problem> {
    let conflict = db
        .time_slots()
        .find_one(overlap_filter(&slot.start_time, &slot.end_time, id), None)
        .await?;
    match conflict {
        Some(other) => Err(problem::overlapping(&other)),
        None => Ok(()),
    }
}
