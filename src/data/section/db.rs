use std::collections::HashMap;

use bson::{doc, Document};
use chrono::Utc;
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::school_year::db::SchoolYearDbExt;
use crate::data::user::db::UserDbExt;
use crate::data::validation::{Validator, SECTION_LETTER};
use crate::data::{count, enrollment, filter, find_all, find_page, schedule, Level, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util::{bson_uuid, bson_uuids};

use super::{Section, SECTION_COLLECTION_NAME};

pub const MAX_GRADE: u32 = 6;
pub const MAX_CAPACITY: u32 = 60;

pub mod problem {
    use crate::data::section::Section;
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Section", id)
    }

    #[inline]
    pub fn full(section: &Section) -> Problem {
        problems::bad_request("Section is full.")
            .insert_str("section", section.id)
            .insert("capacity", section.capacity)
    }

    #[inline]
    pub fn missing_reference(field: &str) -> Problem {
        problems::bad_request("Referenced section doesn't exist.")
            .field(field, "must reference an existing section")
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SectionInput {
    pub grade: u32,
    pub level: Level,
    pub letter: String,
    pub capacity: u32,
    pub school_year: Uuid,
    #[serde(default)]
    pub tutor: Option<Uuid>,
    #[serde(default)]
    pub status: Option<RecordStatus>,
}

impl SectionInput {
    pub fn validate(&self) -> Result<(), Problem> {
        Validator::new()
            .range("grade", self.grade, 1, MAX_GRADE)
            .pattern(
                "letter",
                self.letter.trim(),
                &SECTION_LETTER,
                "must be a single upper case letter",
            )
            .range("capacity", self.capacity, 1, MAX_CAPACITY)
            .finish()
    }

    fn into_section(self, existing: Option<&Section>) -> Section {
        let now = Utc::now();
        Section {
            id: existing.map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            grade: self.grade,
            level: self.level,
            letter: self.letter.trim().to_string(),
            capacity: self.capacity,
            current_students: existing.map(|s| s.current_students).unwrap_or(0),
            school_year: self.school_year,
            tutor: self.tutor,
            status: self.status.unwrap_or_default(),
            created_at: existing.map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SectionFilter {
    pub school_year: Option<Uuid>,
    pub level: Option<Level>,
    pub grade: Option<u32>,
    pub status: Option<RecordStatus>,
}

impl SectionFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(year) = self.school_year {
            filter.insert("school_year", bson_uuid(year));
        }
        if let Some(level) = self.level {
            filter.insert("level", level);
        }
        if let Some(grade) = self.grade {
            filter.insert("grade", grade as i64);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        filter
    }
}

/// Conditional increment that only matches while a seat is free.
pub fn take_seat_filter(id: Uuid) -> Document {
    doc! {
        "_id": bson_uuid(id),
        "$expr": { "$lt": ["$current_students", "$capacity"] },
    }
}

/// Conditional decrement that never goes below zero.
pub fn release_seat_filter(id: Uuid) -> Document {
    doc! {
        "_id": bson_uuid(id),
        "current_students": { "$gt": 0 },
    }
}

pub trait SectionDbExt {
    fn sections(&self) -> Collection<Section>;

    async fn list_sections(&self, filter: &SectionFilter, page: &PageState) -> Result<(Vec<Section>, u64), Problem>;
    async fn get_section(&self, id: Uuid) -> Result<Option<Section>, Problem>;
    async fn require_section(&self, id: Uuid, field: &str) -> Result<Section, Problem>;
    async fn create_section(&self, input: SectionInput) -> Result<Section, Problem>;
    async fn update_section(&self, id: Uuid, input: SectionInput) -> Result<Section, Problem>;
    async fn delete_section(&self, id: Uuid) -> Result<Section, Problem>;

    /// Atomically takes one seat; fails when the section is full.
    async fn take_seat(&self, id: Uuid) -> Result<Section, Problem>;
    async fn release_seat(&self, id: Uuid) -> Result<(), Problem>;
    async fn sections_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, Section>, Problem>;
}

impl SectionDbExt for Database {
    fn sections(&self) -> Collection<Section> {
        self.collection(SECTION_COLLECTION_NAME)
    }

    async fn list_sections(&self, filter: &SectionFilter, page: &PageState) -> Result<(Vec<Section>, u64), Problem> {
        find_page(
            &self.sections(),
            filter.document(),
            page,
            doc! { "level": 1, "grade": 1, "letter": 1 },
        )
        .await
    }

    async fn get_section(&self, id: Uuid) -> Result<Option<Section>, Problem> {
        Ok(self.sections().find_one(filter::by_id(id), None).await?)
    }

    async fn require_section(&self, id: Uuid, field: &str) -> Result<Section, Problem> {
        self.get_section(id)
            .await?
            .ok_or_else(|| problem::missing_reference(field))
    }

    async fn create_section(&self, input: SectionInput) -> Result<Section, Problem> {
        check_references(self, &input, None).await?;
        let section = input.into_section(None);

        self.sections().insert_one(&section, None).await?;
        tracing::info!("Created section {} ({})", section.label(), section.id);

        Ok(section)
    }

    async fn update_section(&self, id: Uuid, input: SectionInput) -> Result<Section, Problem> {
        let existing = self.get_section(id).await?.ok_or_else(|| problem::not_found(id))?;

        if input.capacity < existing.current_students {
            return Err(problems::bad_request("Capacity is below the number of enrolled students.")
                .field(
                    "capacity",
                    format!("must be at least {}", existing.current_students),
                ));
        }
        check_references(self, &input, Some(id)).await?;

        let section = input.into_section(Some(&existing));
        self.sections().replace_one(filter::by_id(id), &section, None).await?;

        Ok(section)
    }

    async fn delete_section(&self, id: Uuid) -> Result<Section, Problem> {
        let mut active_enrollments = filter::by_ref("section", id);
        active_enrollments.insert("status", enrollment::EnrollmentStatus::Active);
        let enrolled = count(self, enrollment::ENROLLMENT_COLLECTION_NAME, active_enrollments).await?;
        if enrolled > 0 {
            return Err(problems::in_use("Section", "active enrollments", enrolled));
        }

        let schedules = count(self, schedule::SCHEDULE_COLLECTION_NAME, filter::by_ref("section", id)).await?;
        if schedules > 0 {
            return Err(problems::in_use("Section", "course schedules", schedules));
        }

        self.sections()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn take_seat(&self, id: Uuid) -> Result<Section, Problem> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .sections()
            .find_one_and_update(
                take_seat_filter(id),
                doc! { "$inc": { "current_students": 1 } },
                options,
            )
            .await?;

        match updated {
            Some(section) => Ok(section),
            None => match self.get_section(id).await? {
                Some(section) => Err(problem::full(&section)),
                None => Err(problem::not_found(id)),
            },
        }
    }

    async fn release_seat(&self, id: Uuid) -> Result<(), Problem> {
        self.sections()
            .update_one(
                release_seat_filter(id),
                doc! { "$inc": { "current_students": -1 } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn sections_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, Section>, Problem> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sections = find_all(
            &self.sections(),
            doc! { "_id": { "$in": bson_uuids(ids) } },
            doc! {},
        )
        .await?;
        Ok(sections.into_iter().map(|s| (s.id, s)).collect())
    }
}

async fn check_references(db: &Database, input: &SectionInput, id: Option<Uuid>) -> Result<(), Problem> {
    db.require_school_year(input.school_year, "school_year").await?;
    if let Some(tutor) = input.tutor {
        db.require_user_with_role(tutor, Role::Teacher, "tutor").await?;
    }

    let duplicate = filter::excluding(
        doc! {
            "school_year": bson_uuid(input.school_year),
            "level": input.level,
            "grade": input.grade as i64,
            "letter": input.letter.trim(),
        },
        id,
    );
    let taken = db.sections().count_documents(duplicate, None).await?;
    Validator::new()
        .check(taken == 0, "letter", "is already used by another section of this grade")
        .finish()
}
