use std::collections::HashMap;

use bson::{doc, Document};
use chrono::Utc;
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::validation::{Validator, COURSE_CODE};
use crate::data::{count, filter, find_all, find_page, schedule, Level, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::util::{bson_uuids, contains_ci};

use super::{Course, COURSE_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Course", id)
    }

    #[inline]
    pub fn code_taken(code: &str) -> Problem {
        problems::bad_request("Course code is already in use.").field("code", format!("'{}' is already in use", code))
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CourseInput {
    pub name: String,
    pub code: String,
    pub level: Level,
    pub grade: u32,
    pub credits: u32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<RecordStatus>,
}

impl CourseInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let code = self.code.trim().to_uppercase();
        let mut v = Validator::new();
        v.length("name", &self.name, 2, 100)
            .pattern("code", &code, &COURSE_CODE, "must be 2 to 12 upper case letters, digits or dashes")
            .range("grade", self.grade, 1, 6)
            .range("credits", self.credits, 1, 10);
        if let Some(description) = &self.description {
            v.check(description.chars().count() <= 500, "description", "must be at most 500 characters long");
        }
        v.finish()
    }

    fn into_course(self, existing: Option<&Course>) -> Course {
        let now = Utc::now();
        Course {
            id: existing.map(|c| c.id).unwrap_or_else(Uuid::new_v4),
            name: self.name.trim().to_string(),
            code: self.code.trim().to_uppercase(),
            level: self.level,
            grade: self.grade,
            credits: self.credits,
            description: self.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            status: self.status.unwrap_or_default(),
            created_at: existing.map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CourseFilter {
    pub level: Option<Level>,
    pub grade: Option<u32>,
    pub status: Option<RecordStatus>,
    pub search: Option<String>,
}

impl CourseFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(level) = self.level {
            filter.insert("level", level);
        }
        if let Some(grade) = self.grade {
            filter.insert("grade", grade as i64);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        if let Some(search) = &self.search {
            filter.insert(
                "$or",
                vec![
                    doc! { "name": contains_ci(search) },
                    doc! { "code": contains_ci(search) },
                ],
            );
        }
        filter
    }
}

pub trait CourseDbExt {
    fn courses(&self) -> Collection<Course>;

    async fn list_courses(&self, filter: &CourseFilter, page: &PageState) -> Result<(Vec<Course>, u64), Problem>;
    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem>;
    async fn require_course(&self, id: Uuid, field: &str) -> Result<Course, Problem>;
    async fn create_course(&self, input: CourseInput) -> Result<Course, Problem>;
    async fn update_course(&self, id: Uuid, input: CourseInput) -> Result<Course, Problem>;
    async fn delete_course(&self, id: Uuid) -> Result<Course, Problem>;
    async fn courses_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, Course>, Problem>;
}

impl CourseDbExt for Database {
    fn courses(&self) -> Collection<Course> {
        self.collection(COURSE_COLLECTION_NAME)
    }

    async fn list_courses(&self, filter: &CourseFilter, page: &PageState) -> Result<(Vec<Course>, u64), Problem> {
        find_page(&self.courses(), filter.document(), page, doc! { "level": 1, "grade": 1, "name": 1 }).await
    }

    async fn get_course(&self, id: Uuid) -> Result<Option<Course>, Problem> {
        Ok(self.courses().find_one(filter::by_id(id), None).await?)
    }

    async fn require_course(&self, id: Uuid, field: &str) -> Result<Course, Problem> {
        self.get_course(id).await?.ok_or_else(|| {
            problems::bad_request("Referenced course doesn't exist.").field(field, "must reference an existing course")
        })
    }

    async fn create_course(&self, input: CourseInput) -> Result<Course, Problem> {
        let course = input.into_course(None);
        check_unique_code(self, &course.code, None).await?;

        self.courses().insert_one(&course, None).await?;
        tracing::info!("Created course {} ({})", course.code, course.id);

        Ok(course)
    }

    async fn update_course(&self, id: Uuid, input: CourseInput) -> Result<Course, Problem> {
        let existing = self.get_course(id).await?.ok_or_else(|| problem::not_found(id))?;
        let course = input.into_course(Some(&existing));
        check_unique_code(self, &course.code, Some(id)).await?;

        self.courses().replace_one(filter::by_id(id), &course, None).await?;
        Ok(course)
    }

    async fn delete_course(&self, id: Uuid) -> Result<Course, Problem> {
        let schedules = count(self, schedule::SCHEDULE_COLLECTION_NAME, filter::by_ref("course", id)).await?;
        if schedules > 0 {
            return Err(problems::in_use("Course", "course schedules", schedules));
        }

        self.courses()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn courses_by_ids(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, Course>, Problem> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let courses = find_all(&self.courses(), doc! { "_id": { "$in": bson_uuids(ids) } }, doc! {}).await?;
        Ok(courses.into_iter().map(|c| (c.id, c)).collect())
    }
}

async fn check_unique_code(db: &Database, code: &str, id: Option<Uuid>) -> Result<(), Problem> {
    let taken = db
        .courses()
        .count_documents(filter::excluding(doc! { "code": code }, id), None)
        .await?;
    if taken > 0 {
        return Err(problem::code_taken(code));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> CourseInput {
        CourseInput {
            name: "Mathematics".into(),
            code: " mat-101 ".into(),
            level: Level::Primary,
            grade: 2,
            credits: 4,
            description: Some("  ".into()),
            status: None,
        }
    }

    #[test]
    fn codes_are_normalized_before_validation() {
        assert!(input().validate().is_ok());

        let course = input().into_course(None);
        assert_eq!(course.code, "MAT-101");
        assert_eq!(course.description, None);
        assert_eq!(course.status, RecordStatus::Active);
    }

    #[test]
    fn credits_and_grade_are_bounded() {
        let mut bad = input();
        bad.credits = 11;
        bad.grade = 0;
        bad.code = "M".into();

        let problem = bad.validate().unwrap_err();
        let fields: Vec<_> = problem.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["code", "grade", "credits"]);
    }

    #[test]
    fn search_matches_name_or_code() {
        let filter = CourseFilter {
            search: Some("mat".into()),
            grade: Some(2),
            ..Default::default()
        }
        .document();
        assert_eq!(filter.get_array("$or").unwrap().len(), 2);
        assert_eq!(filter.get_i64("grade").unwrap(), 2);
    }
}
