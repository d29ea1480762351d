use std::collections::HashSet;

use bson::{doc, Document};
use chrono::{DateTime, NaiveDate, Utc};
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::enrollment::db::EnrollmentDbExt;
use crate::data::schedule::db::ScheduleDbExt;
use crate::data::schedule::{CourseSchedule, DayOfWeek};
use crate::data::section::db::{self as section_db, SectionDbExt};
use crate::data::section::SectionSummary;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserSummary;
use crate::data::validation::Validator;
use crate::data::{filter, find_page, Populated};
use crate::middleware::paging::PageState;
use crate::resp::jwt::auth_problem;
use crate::resp::problem::{is_duplicate_key, problems, FieldError, Problem};
use crate::util::{bson_uuid, date_key};

use super::{
    Attendance, AttendanceDetail, AttendanceStatus, AttendanceView, DetailChange, DetailView,
    ATTENDANCE_COLLECTION_NAME,
};

pub const NOT_ENROLLED: &str = "Student is not actively enrolled in the section.";
pub const NO_SCHEDULE: &str = "No course schedule found for the section on this date.";

/// Writes attempted before a contended attendance document gives up.
const WRITE_ATTEMPTS: usize = 3;

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Attendance", id)
    }

    #[inline]
    pub fn contended() -> Problem {
        Problem::new(
            rocket::http::Status::Conflict,
            "Attendance was changed by another request, try again.",
        )
    }

    #[inline]
    pub fn foreign_schedule() -> Problem {
        problems::bad_request("Course schedule doesn't belong to the section or is inactive.")
            .field("course_schedule", "must be an active schedule of the section")
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AttendanceRecordInput {
    pub student: Uuid,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AttendanceRecordInput {
    fn into_detail(self) -> AttendanceDetail {
        AttendanceDetail {
            student: self.student,
            status: self.status,
            notes: self.notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        }
    }
}

/// Attendance for many students of one section on one date.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkAttendanceInput {
    pub date: NaiveDate,
    pub section: Uuid,
    /// Defaults to the section's first class of that weekday.
    #[serde(default)]
    pub course_schedule: Option<Uuid>,
    pub records: Vec<AttendanceRecordInput>,
}

impl BulkAttendanceInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.check(!self.records.is_empty(), "records", "must contain at least one record");
        for (i, record) in self.records.iter().enumerate() {
            if let Some(notes) = &record.notes {
                v.check(
                    notes.chars().count() <= 300,
                    &format!("records[{}].notes", i),
                    "must be at most 300 characters long",
                );
            }
        }
        v.finish()
    }
}

/// Attendance of a single student.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AttendanceInput {
    pub date: NaiveDate,
    pub section: Uuid,
    #[serde(default)]
    pub course_schedule: Option<Uuid>,
    pub student: Uuid,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

impl From<AttendanceInput> for BulkAttendanceInput {
    fn from(input: AttendanceInput) -> Self {
        BulkAttendanceInput {
            date: input.date,
            section: input.section,
            course_schedule: input.course_schedule,
            records: vec![AttendanceRecordInput {
                student: input.student,
                status: input.status,
                notes: input.notes,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AttendanceUpdateInput {
    pub details: Vec<AttendanceRecordInput>,
}

impl AttendanceUpdateInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.check(!self.details.is_empty(), "details", "must contain at least one record");
        for (i, record) in self.details.iter().enumerate() {
            if let Some(notes) = &record.notes {
                v.check(
                    notes.chars().count() <= 300,
                    &format!("details[{}].notes", i),
                    "must be at most 300 characters long",
                );
            }
        }
        v.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RecordOutcome {
    pub student: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<DetailChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    fn done(student: Uuid, action: DetailChange) -> RecordOutcome {
        RecordOutcome {
            student,
            success: true,
            action: Some(action),
            error: None,
        }
    }

    fn failed(student: Uuid, error: &str) -> RecordOutcome {
        RecordOutcome {
            student,
            success: false,
            action: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkAttendanceResult {
    pub attendance: Option<Uuid>,
    pub course_schedule: Option<Uuid>,
    pub date: NaiveDate,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<RecordOutcome>,
}

/// Merges `records` into `existing`, or into a new document when there is
/// none. Returns the document to write (if any detail was accepted) and one
/// outcome per record, in input order.
pub fn merge_records(
    existing: Option<Attendance>,
    seed: Option<Attendance>,
    records: Vec<AttendanceRecordInput>,
    enrolled: &HashSet<Uuid>,
) -> (Option<Attendance>, Vec<RecordOutcome>) {
    let mut created = existing.is_none();
    let mut target = existing.or(seed);
    let mut outcomes = Vec::with_capacity(records.len());
    let mut accepted = false;

    for record in records {
        let student = record.student;
        let attendance = match target.as_mut() {
            Some(it) => it,
            None => {
                outcomes.push(RecordOutcome::failed(student, NO_SCHEDULE));
                continue;
            }
        };
        if !enrolled.contains(&student) {
            outcomes.push(RecordOutcome::failed(student, NOT_ENROLLED));
            continue;
        }

        let change = attendance.upsert_detail(record.into_detail());
        let action = if created {
            created = false;
            DetailChange::Created
        } else {
            change
        };
        accepted = true;
        outcomes.push(RecordOutcome::done(student, action));
    }

    (target.filter(|_| accepted), outcomes)
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub section: Option<Uuid>,
    pub teacher: Option<Uuid>,
    pub course_schedule: Option<Uuid>,
    pub student: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl AttendanceFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        for (field, id) in [
            ("section", self.section),
            ("teacher", self.teacher),
            ("course_schedule", self.course_schedule),
            ("details.student", self.student),
        ] {
            if let Some(id) = id {
                filter.insert(field, bson_uuid(id));
            }
        }
        match self.date {
            Some(date) => {
                filter.insert("date", date_key(date));
            }
            None => {
                if let Some(range) = filter::string_range(self.from.map(date_key), self.to.map(date_key), true) {
                    filter.insert("date", range);
                }
            }
        }
        filter
    }
}

pub trait AttendanceDbExt {
    fn attendance(&self) -> Collection<Attendance>;

    async fn list_attendance(&self, filter: &AttendanceFilter, page: &PageState) -> Result<(Vec<Attendance>, u64), Problem>;
    async fn get_attendance(&self, id: Uuid) -> Result<Option<Attendance>, Problem>;

    /// Records many students at once; per-record failures don't abort the
    /// batch. `teacher` restricts the caller to their own schedules.
    async fn record_attendance(&self, input: BulkAttendanceInput, teacher: Option<Uuid>) -> Result<BulkAttendanceResult, Problem>;
    async fn update_attendance(&self, id: Uuid, input: AttendanceUpdateInput, teacher: Option<Uuid>) -> Result<Attendance, Problem>;
    async fn delete_attendance(&self, id: Uuid) -> Result<Attendance, Problem>;

    async fn populate_attendance(&self, records: Vec<Attendance>) -> Result<Vec<AttendanceView>, Problem>;
}

impl AttendanceDbExt for Database {
    fn attendance(&self) -> Collection<Attendance> {
        self.collection(ATTENDANCE_COLLECTION_NAME)
    }

    async fn list_attendance(&self, filter: &AttendanceFilter, page: &PageState) -> Result<(Vec<Attendance>, u64), Problem> {
        find_page(&self.attendance(), filter.document(), page, doc! { "date": -1, "created_at": -1 }).await
    }

    async fn get_attendance(&self, id: Uuid) -> Result<Option<Attendance>, Problem> {
        Ok(self.attendance().find_one(filter::by_id(id), None).await?)
    }

    async fn record_attendance(&self, input: BulkAttendanceInput, teacher: Option<Uuid>) -> Result<BulkAttendanceResult, Problem> {
        let section = self
            .get_section(input.section)
            .await?
            .ok_or_else(|| section_db::problem::not_found(input.section))?;

        let schedule = resolve_schedule(self, section.id, input.course_schedule, input.date).await?;
        if let (Some(schedule), Some(teacher)) = (&schedule, teacher) {
            require_own_schedule(schedule, teacher)?;
        }

        let enrolled = self.enrolled_students(section.id).await?;

        let mut attempt = 0;
        let (merged, results) = loop {
            attempt += 1;
            let (existing, seed) = match &schedule {
                Some(schedule) => {
                    let existing = self
                        .attendance()
                        .find_one(
                            doc! {
                                "course_schedule": bson_uuid(schedule.id),
                                "date": date_key(input.date),
                            },
                            None,
                        )
                        .await?;
                    let seed = Attendance::new(input.date, section.id, schedule.id, schedule.teacher);
                    (existing, Some(seed))
                }
                None => (None, None),
            };
            let previous = existing.as_ref().map(|a| a.updated_at);

            let (merged, results) = merge_records(existing, seed, input.records.clone(), &enrolled);
            let saved = match &merged {
                Some(attendance) => save_attendance(self, attendance, previous).await?,
                None => true,
            };
            if saved {
                break (merged, results);
            }
            if attempt == WRITE_ATTEMPTS {
                return Err(problem::contended());
            }
            tracing::debug!("Attendance for section {} on {} changed concurrently, merging again", section.id, input.date);
        };

        let succeeded = results.iter().filter(|r| r.success).count();
        tracing::info!(
            "Recorded attendance for section {} on {}: {} ok, {} failed",
            section.label(),
            input.date,
            succeeded,
            results.len() - succeeded
        );

        Ok(BulkAttendanceResult {
            attendance: merged.map(|a| a.id),
            course_schedule: schedule.map(|s| s.id),
            date: input.date,
            succeeded,
            failed: results.len() - succeeded,
            results,
        })
    }

    async fn update_attendance(&self, id: Uuid, input: AttendanceUpdateInput, teacher: Option<Uuid>) -> Result<Attendance, Problem> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut attendance = self.get_attendance(id).await?.ok_or_else(|| problem::not_found(id))?;
            if let Some(teacher) = teacher {
                if attendance.teacher != teacher {
                    return Err(auth_problem("Teachers can only edit attendance of their own classes."));
                }
            }

            let enrolled = self.enrolled_students(attendance.section).await?;
            let rejected: Vec<FieldError> = input
                .details
                .iter()
                .enumerate()
                .filter(|(_, r)| !enrolled.contains(&r.student) && attendance.detail_of(r.student).is_none())
                .map(|(i, _)| FieldError::new(format!("details[{}].student", i), NOT_ENROLLED))
                .collect();
            if !rejected.is_empty() {
                return Err(problems::validation(rejected));
            }

            let previous = attendance.updated_at;
            for record in input.details.iter().cloned() {
                attendance.upsert_detail(record.into_detail());
            }
            if save_attendance(self, &attendance, Some(previous)).await? {
                return Ok(attendance);
            }
            if attempt == WRITE_ATTEMPTS {
                return Err(problem::contended());
            }
        }
    }

    async fn delete_attendance(&self, id: Uuid) -> Result<Attendance, Problem> {
        self.attendance()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn populate_attendance(&self, records: Vec<Attendance>) -> Result<Vec<AttendanceView>, Problem> {
        let sections = self.sections_by_ids(records.iter().map(|a| a.section).collect()).await?;
        let mut user_ids: Vec<Uuid> = records.iter().map(|a| a.teacher).collect();
        user_ids.extend(records.iter().flat_map(|a| a.details.iter().map(|d| d.student)));
        user_ids.sort();
        user_ids.dedup();
        let users = self.users_by_ids(user_ids).await?;

        Ok(records
            .into_iter()
            .map(|a| AttendanceView {
                id: a.id,
                date: a.date,
                section: Populated::lookup(a.section, &sections, |s| SectionSummary::from(s)),
                course_schedule: a.course_schedule,
                teacher: Populated::lookup(a.teacher, &users, |u| UserSummary::from(u)),
                details: a
                    .details
                    .into_iter()
                    .map(|d| DetailView {
                        student: Populated::lookup(d.student, &users, |u| UserSummary::from(u)),
                        status: d.status,
                        notes: d.notes,
                    })
                    .collect(),
                created_at: a.created_at,
                updated_at: a.updated_at,
            })
            .collect())
    }
}

/// Matches `id` only while it still carries the `updated_at` it was read with.
pub fn unchanged_since(id: Uuid, previous: DateTime<Utc>) -> Result<Document, Problem> {
    let mut filter = filter::by_id(id);
    filter.insert("updated_at", bson::to_bson(&previous)?);
    Ok(filter)
}

/// Inserts a new document, or replaces one read at `previous`. `Ok(false)`
/// means another request got there first and the caller should merge again.
async fn save_attendance(db: &Database, attendance: &Attendance, previous: Option<DateTime<Utc>>) -> Result<bool, Problem> {
    match previous {
        None => match db.attendance().insert_one(attendance, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        },
        Some(previous) => {
            let result = db
                .attendance()
                .replace_one(unchanged_since(attendance.id, previous)?, attendance, None)
                .await?;
            Ok(result.matched_count == 1)
        }
    }
}

async fn resolve_schedule(
    db: &Database,
    section: Uuid,
    given: Option<Uuid>,
    date: NaiveDate,
) -> Result<Option<CourseSchedule>, Problem> {
    match given {
        Some(id) => match db.get_schedule(id).await? {
            Some(schedule) if schedule.section == section && schedule.is_active() => Ok(Some(schedule)),
            _ => Err(problem::foreign_schedule()),
        },
        None => match DayOfWeek::from_date(date) {
            Some(day) => db.first_schedule_of_day(section, day).await,
            None => Ok(None),
        },
    }
}

fn require_own_schedule(schedule: &CourseSchedule, teacher: Uuid) -> Result<(), Problem> {
    if schedule.teacher == teacher {
        Ok(())
    } else {
        Err(auth_problem("Teachers can only record attendance for their own classes."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(student: Uuid, status: AttendanceStatus) -> AttendanceRecordInput {
        AttendanceRecordInput {
            student,
            status,
            notes: None,
        }
    }

    fn seed() -> Attendance {
        let date = NaiveDate::from_ymd_opt(2024, 4, 8).unwrap();
        Attendance::new(date, Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn first_accepted_record_creates_the_document() {
        let (ana, luis, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let enrolled: HashSet<Uuid> = [ana, luis].into_iter().collect();

        let (merged, results) = merge_records(
            None,
            Some(seed()),
            vec![
                record(stranger, AttendanceStatus::Present),
                record(ana, AttendanceStatus::Present),
                record(luis, AttendanceStatus::Absent),
            ],
            &enrolled,
        );

        let actions: Vec<_> = results.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![None, Some(DetailChange::Created), Some(DetailChange::Added)]);
        assert_eq!(results[0].error.as_deref(), Some(NOT_ENROLLED));
        assert_eq!(merged.unwrap().details.len(), 2);
    }

    #[test]
    fn existing_document_is_updated_not_duplicated() {
        let ana = Uuid::new_v4();
        let enrolled: HashSet<Uuid> = [ana].into_iter().collect();
        let mut existing = seed();
        existing.upsert_detail(AttendanceDetail {
            student: ana,
            status: AttendanceStatus::Absent,
            notes: None,
        });
        let id = existing.id;

        let (merged, results) = merge_records(
            Some(existing),
            Some(seed()),
            vec![record(ana, AttendanceStatus::Late)],
            &enrolled,
        );

        let merged = merged.unwrap();
        assert_eq!(merged.id, id);
        assert_eq!(merged.details.len(), 1);
        assert_eq!(merged.details[0].status, AttendanceStatus::Late);
        assert_eq!(results[0].action, Some(DetailChange::Updated));
    }

    #[test]
    fn losing_a_first_insert_merges_onto_the_winner() {
        let (ana, luis) = (Uuid::new_v4(), Uuid::new_v4());
        let enrolled: HashSet<Uuid> = [ana, luis].into_iter().collect();
        let batch = vec![record(luis, AttendanceStatus::Absent)];

        let (ours, results) = merge_records(None, Some(seed()), batch.clone(), &enrolled);
        assert_eq!(results[0].action, Some(DetailChange::Created));

        // a concurrent request stored ana first; the retry reads it back
        let mut winner = ours.unwrap();
        winner.details.clear();
        winner.upsert_detail(AttendanceDetail {
            student: ana,
            status: AttendanceStatus::Present,
            notes: None,
        });
        let winner_id = winner.id;

        let (merged, results) = merge_records(Some(winner), Some(seed()), batch, &enrolled);
        let merged = merged.unwrap();
        assert_eq!(merged.id, winner_id);
        assert_eq!(merged.details.len(), 2);
        assert_eq!(results[0].action, Some(DetailChange::Added));
    }

    #[test]
    fn replacements_require_the_version_that_was_read() {
        let attendance = seed();
        let filter = unchanged_since(attendance.id, attendance.updated_at).unwrap();

        assert_eq!(filter.get("_id"), Some(&bson_uuid(attendance.id)));
        assert_eq!(filter.get("updated_at"), Some(&bson::to_bson(&attendance.updated_at).unwrap()));
    }

    #[test]
    fn missing_schedule_fails_every_record() {
        let ana = Uuid::new_v4();
        let enrolled: HashSet<Uuid> = [ana].into_iter().collect();

        let (merged, results) = merge_records(None, None, vec![record(ana, AttendanceStatus::Present)], &enrolled);

        assert!(merged.is_none());
        assert_eq!(results[0].error.as_deref(), Some(NO_SCHEDULE));
    }

    #[test]
    fn nothing_is_written_when_every_record_fails() {
        let (merged, results) = merge_records(
            None,
            Some(seed()),
            vec![record(Uuid::new_v4(), AttendanceStatus::Present)],
            &HashSet::new(),
        );
        assert!(merged.is_none());
        assert!(!results[0].success);
    }

    #[test]
    fn single_date_wins_over_range() {
        let date = NaiveDate::from_ymd_opt(2024, 4, 8).unwrap();
        let filter = AttendanceFilter {
            date: Some(date),
            from: Some(date),
            ..Default::default()
        }
        .document();
        assert_eq!(filter.get_str("date").unwrap(), "2024-04-08");

        let ranged = AttendanceFilter {
            from: Some(date),
            ..Default::default()
        }
        .document();
        assert_eq!(ranged.get_document("date").unwrap(), &doc! { "$gte": "2024-04-08" });
    }

    #[test]
    fn bulk_requires_records() {
        let input = BulkAttendanceInput {
            date: NaiveDate::from_ymd_opt(2024, 4, 8).unwrap(),
            section: Uuid::new_v4(),
            course_schedule: None,
            records: vec![],
        };
        assert_eq!(input.validate().unwrap_err().errors[0].field, "records");
    }
}
