use bson::{doc, Document};
use chrono::{NaiveDate, Utc};
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::validation::Validator;
use crate::data::{count, enrollment, filter, find_page, schedule, section};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};

use super::{SchoolYear, SchoolYearStatus, SCHOOL_YEAR_COLLECTION_NAME};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SchoolYearInput {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub status: Option<SchoolYearStatus>,
}

impl SchoolYearInput {
    pub fn validate(&self) -> Result<(), Problem> {
        Validator::new()
            .length("name", &self.name, 4, 40)
            .check(
                self.end_date > self.start_date,
                "end_date",
                "must be after start_date",
            )
            .finish()
    }

    fn into_school_year(self, id: Uuid, created_at: chrono::DateTime<Utc>) -> SchoolYear {
        SchoolYear {
            id,
            name: self.name.trim().to_string(),
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status.unwrap_or(SchoolYearStatus::Planning),
            created_at,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchoolYearFilter {
    pub status: Option<SchoolYearStatus>,
}

impl SchoolYearFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        filter
    }
}

pub trait SchoolYearDbExt {
    fn school_years(&self) -> Collection<SchoolYear>;

    async fn list_school_years(&self, filter: &SchoolYearFilter, page: &PageState) -> Result<(Vec<SchoolYear>, u64), Problem>;
    async fn get_school_year(&self, id: Uuid) -> Result<Option<SchoolYear>, Problem>;
    async fn require_school_year(&self, id: Uuid, field: &str) -> Result<SchoolYear, Problem>;
    async fn active_school_year(&self) -> Result<Option<SchoolYear>, Problem>;
    async fn create_school_year(&self, input: SchoolYearInput) -> Result<SchoolYear, Problem>;
    async fn update_school_year(&self, id: Uuid, input: SchoolYearInput) -> Result<SchoolYear, Problem>;
    async fn delete_school_year(&self, id: Uuid) -> Result<SchoolYear, Problem>;
}

impl SchoolYearDbExt for Database {
    fn school_years(&self) -> Collection<SchoolYear> {
        self.collection(SCHOOL_YEAR_COLLECTION_NAME)
    }

    async fn list_school_years(&self, filter: &SchoolYearFilter, page: &PageState) -> Result<(Vec<SchoolYear>, u64), Problem> {
        find_page(&self.school_years(), filter.document(), page, doc! { "start_date": -1 }).await
    }

    async fn get_school_year(&self, id: Uuid) -> Result<Option<SchoolYear>, Problem> {
        Ok(self.school_years().find_one(filter::by_id(id), None).await?)
    }

    async fn require_school_year(&self, id: Uuid, field: &str) -> Result<SchoolYear, Problem> {
        self.get_school_year(id).await?.ok_or_else(|| {
            problems::bad_request("Referenced school year doesn't exist.")
                .field(field, "must reference an existing school year")
        })
    }

    async fn active_school_year(&self) -> Result<Option<SchoolYear>, Problem> {
        Ok(self
            .school_years()
            .find_one(doc! { "status": SchoolYearStatus::Active }, None)
            .await?)
    }

    async fn create_school_year(&self, input: SchoolYearInput) -> Result<SchoolYear, Problem> {
        check_unique_name(self, &input.name, None).await?;
        let year = input.into_school_year(Uuid::new_v4(), Utc::now());

        if year.status == SchoolYearStatus::Active {
            close_active_years(self, year.id).await?;
        }
        self.school_years().insert_one(&year, None).await?;
        tracing::info!("Created school year '{}'", year.name);

        Ok(year)
    }

    async fn update_school_year(&self, id: Uuid, input: SchoolYearInput) -> Result<SchoolYear, Problem> {
        let existing = self
            .get_school_year(id)
            .await?
            .ok_or_else(|| problems::not_found("School year", id))?;

        check_unique_name(self, &input.name, Some(id)).await?;
        // An update without `status` keeps the stored one.
        let keep_status = input.status.is_none();
        let mut year = input.into_school_year(id, existing.created_at);
        if keep_status {
            year.status = existing.status;
        }

        if year.status == SchoolYearStatus::Active && existing.status != SchoolYearStatus::Active {
            close_active_years(self, id).await?;
        }
        self.school_years().replace_one(filter::by_id(id), &year, None).await?;

        Ok(year)
    }

    async fn delete_school_year(&self, id: Uuid) -> Result<SchoolYear, Problem> {
        let references = [
            (section::SECTION_COLLECTION_NAME, "sections"),
            (schedule::SCHEDULE_COLLECTION_NAME, "course schedules"),
            (enrollment::ENROLLMENT_COLLECTION_NAME, "enrollments"),
        ];
        for (collection, label) in references {
            let n = count(self, collection, filter::by_ref("school_year", id)).await?;
            if n > 0 {
                return Err(problems::in_use("School year", label, n));
            }
        }

        self.school_years()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problems::not_found("School year", id))
    }
}

async fn check_unique_name(db: &Database, name: &str, id: Option<Uuid>) -> Result<(), Problem> {
    let taken = db
        .school_years()
        .count_documents(filter::excluding(doc! { "name": name.trim() }, id), None)
        .await?;
    Validator::new()
        .check(taken == 0, "name", "is already used by another school year")
        .finish()
}

/// Only one school year may be active at a time.
async fn close_active_years(db: &Database, except: Uuid) -> Result<(), Problem> {
    let closed = db
        .school_years()
        .update_many(
            filter::excluding(doc! { "status": SchoolYearStatus::Active }, Some(except)),
            doc! { "$set": { "status": SchoolYearStatus::Closed } },
            None,
        )
        .await?;
    if closed.modified_count > 0 {
        tracing::info!("Closed {} previously active school year(s)", closed.modified_count);
    }
    Ok(())
}
