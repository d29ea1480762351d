use std::collections::HashSet;

use bson::{doc, Document};
use chrono::{NaiveDate, Utc};
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::section::db::SectionDbExt;
use crate::data::section::SectionSummary;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserSummary;
use crate::data::validation::Validator;
use crate::data::{filter, find_all, find_page, Populated};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util::bson_uuid;

use super::{Enrollment, EnrollmentStatus, EnrollmentView, ENROLLMENT_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Enrollment", id)
    }

    #[inline]
    pub fn already_enrolled() -> Problem {
        problems::bad_request("Student is already enrolled in this section for the school year.")
            .field("student", "is already enrolled")
    }

    #[inline]
    pub fn enrolled_elsewhere(section: Uuid) -> Problem {
        problems::bad_request("Student already has an active enrollment in this school year.")
            .field("student", "has an active enrollment in another section")
            .insert("section", section)
    }

    #[inline]
    pub fn wrong_year() -> Problem {
        problems::bad_request("Section doesn't belong to the given school year.")
            .field("school_year", "must match the school year of the section")
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnrollmentInput {
    pub student: Uuid,
    pub section: Uuid,
    /// Defaults to the school year of the section.
    #[serde(default)]
    pub school_year: Option<Uuid>,
    /// Defaults to today.
    #[serde(default)]
    pub enrollment_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl EnrollmentInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        if let Some(notes) = &self.notes {
            v.check(notes.chars().count() <= 500, "notes", "must be at most 500 characters long");
        }
        v.finish()
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnrollmentStatusInput {
    pub status: EnrollmentStatus,
}

/// Seat bookkeeping implied by a status change.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SeatChange {
    Take,
    Release,
    Keep,
}

impl SeatChange {
    pub fn between(from: EnrollmentStatus, to: EnrollmentStatus) -> SeatChange {
        let was_active = from == EnrollmentStatus::Active;
        let is_active = to == EnrollmentStatus::Active;
        match (was_active, is_active) {
            (false, true) => SeatChange::Take,
            (true, false) => SeatChange::Release,
            _ => SeatChange::Keep,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrollmentFilter {
    pub student: Option<Uuid>,
    pub section: Option<Uuid>,
    pub school_year: Option<Uuid>,
    pub status: Option<EnrollmentStatus>,
}

impl EnrollmentFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        for (field, id) in [
            ("student", self.student),
            ("section", self.section),
            ("school_year", self.school_year),
        ] {
            if let Some(id) = id {
                filter.insert(field, bson_uuid(id));
            }
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        filter
    }
}

pub trait EnrollmentDbExt {
    fn enrollments(&self) -> Collection<Enrollment>;

    async fn list_enrollments(&self, filter: &EnrollmentFilter, page: &PageState) -> Result<(Vec<Enrollment>, u64), Problem>;
    async fn get_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, Problem>;
    async fn enroll(&self, input: EnrollmentInput) -> Result<Enrollment, Problem>;
    async fn set_enrollment_status(&self, id: Uuid, status: EnrollmentStatus) -> Result<Enrollment, Problem>;
    async fn delete_enrollment(&self, id: Uuid) -> Result<Enrollment, Problem>;

    async fn populate_enrollments(&self, enrollments: Vec<Enrollment>) -> Result<Vec<EnrollmentView>, Problem>;
    /// Active enrollments of a section with their students, by name.
    async fn section_students(&self, section: Uuid) -> Result<Vec<EnrollmentView>, Problem>;
    async fn enrolled_students(&self, section: Uuid) -> Result<HashSet<Uuid>, Problem>;
}

impl EnrollmentDbExt for Database {
    fn enrollments(&self) -> Collection<Enrollment> {
        self.collection(ENROLLMENT_COLLECTION_NAME)
    }

    async fn list_enrollments(&self, filter: &EnrollmentFilter, page: &PageState) -> Result<(Vec<Enrollment>, u64), Problem> {
        find_page(&self.enrollments(), filter.document(), page, doc! { "enrollment_date": -1 }).await
    }

    async fn get_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>, Problem> {
        Ok(self.enrollments().find_one(filter::by_id(id), None).await?)
    }

    async fn enroll(&self, input: EnrollmentInput) -> Result<Enrollment, Problem> {
        self.require_user_with_role(input.student, Role::Student, "student").await?;
        let section = self.require_section(input.section, "section").await?;
        let school_year = input.school_year.unwrap_or(section.school_year);
        if school_year != section.school_year {
            return Err(problem::wrong_year());
        }

        let duplicate = doc! {
            "student": bson_uuid(input.student),
            "school_year": bson_uuid(school_year),
            "section": bson_uuid(section.id),
        };
        if self.enrollments().count_documents(duplicate, None).await? > 0 {
            return Err(problem::already_enrolled());
        }
        check_active_elsewhere(self, input.student, school_year, None).await?;

        self.take_seat(section.id).await?;

        let now = Utc::now();
        let enrollment = Enrollment {
            id: Uuid::new_v4(),
            student: input.student,
            section: section.id,
            school_year,
            enrollment_date: input.enrollment_date.unwrap_or_else(|| now.date_naive()),
            status: EnrollmentStatus::Active,
            notes: input.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.enrollments().insert_one(&enrollment, None).await {
            tracing::warn!("Enrollment insert failed, releasing seat in section {}", section.id);
            self.release_seat(section.id).await?;
            return Err(e.into());
        }
        tracing::info!("Enrolled student {} into section {}", enrollment.student, section.label());

        Ok(enrollment)
    }

    async fn set_enrollment_status(&self, id: Uuid, status: EnrollmentStatus) -> Result<Enrollment, Problem> {
        let mut enrollment = self.get_enrollment(id).await?.ok_or_else(|| problem::not_found(id))?;
        check_status_change(enrollment.status, status)?;

        match SeatChange::between(enrollment.status, status) {
            SeatChange::Take => {
                check_active_elsewhere(self, enrollment.student, enrollment.school_year, Some(id)).await?;
                self.take_seat(enrollment.section).await?;
            }
            SeatChange::Release => self.release_seat(enrollment.section).await?,
            SeatChange::Keep => {}
        }

        enrollment.status = status;
        enrollment.updated_at = Utc::now();
        self.enrollments()
            .update_one(
                filter::by_id(id),
                doc! { "$set": {
                    "status": status,
                    "updated_at": bson::to_bson(&enrollment.updated_at)?,
                } },
                None,
            )
            .await?;

        Ok(enrollment)
    }

    async fn delete_enrollment(&self, id: Uuid) -> Result<Enrollment, Problem> {
        let enrollment = self
            .enrollments()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))?;

        if enrollment.holds_seat() {
            self.release_seat(enrollment.section).await?;
        }
        Ok(enrollment)
    }

    async fn populate_enrollments(&self, enrollments: Vec<Enrollment>) -> Result<Vec<EnrollmentView>, Problem> {
        let students = self.users_by_ids(enrollments.iter().map(|e| e.student).collect()).await?;
        let sections = self.sections_by_ids(enrollments.iter().map(|e| e.section).collect()).await?;

        Ok(enrollments
            .into_iter()
            .map(|e| EnrollmentView {
                id: e.id,
                student: Populated::lookup(e.student, &students, |u| UserSummary::from(u)),
                section: Populated::lookup(e.section, &sections, |s| SectionSummary::from(s)),
                school_year: e.school_year,
                enrollment_date: e.enrollment_date,
                status: e.status,
                notes: e.notes,
                created_at: e.created_at,
            })
            .collect())
    }

    async fn section_students(&self, section: Uuid) -> Result<Vec<EnrollmentView>, Problem> {
        let mut active = filter::by_ref("section", section);
        active.insert("status", EnrollmentStatus::Active);

        let enrollments = find_all(&self.enrollments(), active, doc! { "enrollment_date": 1 }).await?;
        let mut views = self.populate_enrollments(enrollments).await?;
        views.sort_by_key(|v| match &v.student {
            Populated::Doc(student) => student.name.to_lowercase(),
            Populated::Id(id) => id.to_string(),
        });
        Ok(views)
    }

    async fn enrolled_students(&self, section: Uuid) -> Result<HashSet<Uuid>, Problem> {
        let mut active = filter::by_ref("section", section);
        active.insert("status", EnrollmentStatus::Active);

        let enrollments = find_all(&self.enrollments(), active, doc! {}).await?;
        Ok(enrollments.into_iter().map(|e| e.student).collect())
    }
}

/// Active enrollments of `student` in `school_year`, other than `except`.
pub fn active_elsewhere_filter(student: Uuid, school_year: Uuid, except: Option<Uuid>) -> Document {
    filter::excluding(
        doc! {
            "student": bson_uuid(student),
            "school_year": bson_uuid(school_year),
            "status": EnrollmentStatus::Active,
        },
        except,
    )
}

async fn check_active_elsewhere(db: &Database, student: Uuid, school_year: Uuid, except: Option<Uuid>) -> Result<(), Problem> {
    let filter = active_elsewhere_filter(student, school_year, except);
    match db.enrollments().find_one(filter, None).await? {
        Some(other) => Err(problem::enrolled_elsewhere(other.section)),
        None => Ok(()),
    }
}

/// Rejects a status the enrollment already has.
pub fn check_status_change(current: EnrollmentStatus, requested: EnrollmentStatus) -> Result<(), Problem> {
    if current == requested {
        return Err(problems::bad_request(format!("Enrollment is already {}.", current)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seats_follow_the_active_status() {
        use EnrollmentStatus::*;

        assert_eq!(SeatChange::between(Active, Withdrawn), SeatChange::Release);
        assert_eq!(SeatChange::between(Active, Transferred), SeatChange::Release);
        assert_eq!(SeatChange::between(Withdrawn, Active), SeatChange::Take);
        assert_eq!(SeatChange::between(Withdrawn, Transferred), SeatChange::Keep);
        assert_eq!(SeatChange::between(Active, Active), SeatChange::Keep);
    }

    #[test]
    fn repeating_a_status_is_rejected() {
        let problem = check_status_change(EnrollmentStatus::Withdrawn, EnrollmentStatus::Withdrawn).unwrap_err();
        assert_eq!(problem.message, "Enrollment is already withdrawn.");
        assert!(check_status_change(EnrollmentStatus::Active, EnrollmentStatus::Withdrawn).is_ok());
    }

    #[test]
    fn reactivation_looks_past_the_enrollment_itself() {
        let (student, year, id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let filter = active_elsewhere_filter(student, year, Some(id));
        assert_eq!(filter.get("student"), Some(&bson_uuid(student)));
        assert_eq!(filter.get("school_year"), Some(&bson_uuid(year)));
        assert_eq!(filter.get_str("status").unwrap(), "active");
        assert_eq!(filter.get_document("_id").unwrap(), &doc! { "$ne": bson_uuid(id) });

        assert!(!active_elsewhere_filter(student, year, None).contains_key("_id"));
    }

    #[test]
    fn filter_matches_references() {
        let section = Uuid::new_v4();
        let filter = EnrollmentFilter {
            section: Some(section),
            status: Some(EnrollmentStatus::Active),
            ..Default::default()
        }
        .document();
        assert_eq!(filter.get("section"), Some(&bson_uuid(section)));
        assert_eq!(filter.get_str("status").unwrap(), "active");
        assert!(!filter.contains_key("student"));
    }

    #[test]
    fn long_notes_are_rejected() {
        let input = EnrollmentInput {
            student: Uuid::new_v4(),
            section: Uuid::new_v4(),
            school_year: None,
            enrollment_date: None,
            notes: Some("n".repeat(501)),
        };
        assert_eq!(input.validate().unwrap_err().errors[0].field, "notes");
    }
}
