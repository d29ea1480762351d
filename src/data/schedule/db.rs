use bson::{doc, Document};
use chrono::Utc;
use mongodb::{Collection, Database};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::course::db::CourseDbExt;
use crate::data::course::CourseSummary;
use crate::data::section::db::SectionDbExt;
use crate::data::section::SectionSummary;
use crate::data::time_slot::db::TimeSlotDbExt;
use crate::data::user::db::UserDbExt;
use crate::data::user::UserSummary;
use crate::data::validation::Validator;
use crate::data::{attendance, count, filter, find_all, find_page, Populated, RecordStatus};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::util::{bson_uuid, bson_uuids};

use super::{CourseSchedule, DayOfWeek, ScheduleView, SCHEDULE_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Course schedule", id)
    }

    #[inline]
    pub fn teacher_busy(conflict: Uuid) -> Problem {
        problems::bad_request("Teacher already has a class in an overlapping time slot.")
            .field("teacher", "is already scheduled at this time")
            .insert("conflict_id", conflict)
    }

    #[inline]
    pub fn section_busy(conflict: Uuid) -> Problem {
        problems::bad_request("Section already has a class in an overlapping time slot.")
            .field("section", "is already scheduled at this time")
            .insert("conflict_id", conflict)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleInput {
    pub course: Uuid,
    pub section: Uuid,
    pub teacher: Uuid,
    pub time_slot: Uuid,
    /// Defaults to the school year of the section.
    #[serde(default)]
    pub school_year: Option<Uuid>,
    pub day_of_week: DayOfWeek,
    #[serde(default)]
    pub classroom: Option<String>,
    #[serde(default)]
    pub status: Option<RecordStatus>,
}

impl ScheduleInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        if let Some(classroom) = &self.classroom {
            v.length("classroom", classroom, 1, 30);
        }
        v.finish()
    }

    fn into_schedule(self, school_year: Uuid, existing: Option<&CourseSchedule>) -> CourseSchedule {
        let now = Utc::now();
        CourseSchedule {
            id: existing.map(|s| s.id).unwrap_or_else(Uuid::new_v4),
            course: self.course,
            section: self.section,
            teacher: self.teacher,
            time_slot: self.time_slot,
            school_year,
            day_of_week: self.day_of_week,
            classroom: self.classroom.map(|c| c.trim().to_string()),
            status: self.status.unwrap_or_default(),
            created_at: existing.map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub section: Option<Uuid>,
    pub teacher: Option<Uuid>,
    pub course: Option<Uuid>,
    pub school_year: Option<Uuid>,
    pub day_of_week: Option<DayOfWeek>,
    pub status: Option<RecordStatus>,
}

impl ScheduleFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        for (field, id) in [
            ("section", self.section),
            ("teacher", self.teacher),
            ("course", self.course),
            ("school_year", self.school_year),
        ] {
            if let Some(id) = id {
                filter.insert(field, bson_uuid(id));
            }
        }
        if let Some(day) = self.day_of_week {
            filter.insert("day_of_week", day);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        filter
    }
}

/// Active schedules on the same day and year occupying one of `slots`.
pub fn collision_filter(schedule: &CourseSchedule, slots: &[Uuid], owner: &str, owner_id: Uuid) -> Document {
    let mut filter = filter::excluding(
        doc! {
            "day_of_week": schedule.day_of_week,
            "school_year": bson_uuid(schedule.school_year),
            "status": RecordStatus::Active,
            "time_slot": { "$in": bson_uuids(slots.iter().copied()) },
        },
        Some(schedule.id),
    );
    filter.insert(owner, bson_uuid(owner_id));
    filter
}

pub trait ScheduleDbExt {
    fn schedules(&self) -> Collection<CourseSchedule>;

    async fn list_schedules(&self, filter: &ScheduleFilter, page: &PageState) -> Result<(Vec<CourseSchedule>, u64), Problem>;
    async fn get_schedule(&self, id: Uuid) -> Result<Option<CourseSchedule>, Problem>;
    async fn create_schedule(&self, input: ScheduleInput) -> Result<CourseSchedule, Problem>;
    async fn update_schedule(&self, id: Uuid, input: ScheduleInput) -> Result<CourseSchedule, Problem>;
    async fn delete_schedule(&self, id: Uuid) -> Result<CourseSchedule, Problem>;

    /// Full weekly timetable, ordered by day and slot start.
    async fn timetable(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleView>, Problem>;
    async fn populate_schedules(&self, schedules: Vec<CourseSchedule>) -> Result<Vec<ScheduleView>, Problem>;

    /// First active schedule of a section on a weekday, by slot start.
    async fn first_schedule_of_day(&self, section: Uuid, day: DayOfWeek) -> Result<Option<CourseSchedule>, Problem>;
}

impl ScheduleDbExt for Database {
    fn schedules(&self) -> Collection<CourseSchedule> {
        self.collection(SCHEDULE_COLLECTION_NAME)
    }

    async fn list_schedules(&self, filter: &ScheduleFilter, page: &PageState) -> Result<(Vec<CourseSchedule>, u64), Problem> {
        find_page(&self.schedules(), filter.document(), page, doc! { "day_of_week": 1, "created_at": 1 }).await
    }

    async fn get_schedule(&self, id: Uuid) -> Result<Option<CourseSchedule>, Problem> {
        Ok(self.schedules().find_one(filter::by_id(id), None).await?)
    }

    async fn create_schedule(&self, input: ScheduleInput) -> Result<CourseSchedule, Problem> {
        let schedule = checked_schedule(self, input, None).await?;

        self.schedules().insert_one(&schedule, None).await?;
        tracing::info!(
            "Scheduled course {} for section {} on {}",
            schedule.course,
            schedule.section,
            schedule.day_of_week
        );

        Ok(schedule)
    }

    async fn update_schedule(&self, id: Uuid, input: ScheduleInput) -> Result<CourseSchedule, Problem> {
        let existing = self.get_schedule(id).await?.ok_or_else(|| problem::not_found(id))?;
        let schedule = checked_schedule(self, input, Some(&existing)).await?;

        self.schedules().replace_one(filter::by_id(id), &schedule, None).await?;
        Ok(schedule)
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<CourseSchedule, Problem> {
        let records = count(
            self,
            attendance::ATTENDANCE_COLLECTION_NAME,
            filter::by_ref("course_schedule", id),
        )
        .await?;
        if records > 0 {
            return Err(problems::in_use("Course schedule", "attendance records", records));
        }

        self.schedules()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn timetable(&self, filter: &ScheduleFilter) -> Result<Vec<ScheduleView>, Problem> {
        let schedules = find_all(&self.schedules(), filter.document(), doc! {}).await?;
        let mut views = self.populate_schedules(schedules).await?;
        views.sort_by_key(ScheduleView::timetable_key);
        Ok(views)
    }

    async fn populate_schedules(&self, schedules: Vec<CourseSchedule>) -> Result<Vec<ScheduleView>, Problem> {
        let courses = self.courses_by_ids(schedules.iter().map(|s| s.course).collect()).await?;
        let sections = self.sections_by_ids(schedules.iter().map(|s| s.section).collect()).await?;
        let teachers = self.users_by_ids(schedules.iter().map(|s| s.teacher).collect()).await?;
        let slots = self.time_slots_by_ids(schedules.iter().map(|s| s.time_slot).collect()).await?;

        Ok(schedules
            .into_iter()
            .map(|s| ScheduleView {
                id: s.id,
                course: Populated::lookup(s.course, &courses, |c| CourseSummary::from(c)),
                section: Populated::lookup(s.section, &sections, |c| SectionSummary::from(c)),
                teacher: Populated::lookup(s.teacher, &teachers, |u| UserSummary::from(u)),
                time_slot: Populated::lookup(s.time_slot, &slots, |t| t.clone()),
                school_year: s.school_year,
                day_of_week: s.day_of_week,
                classroom: s.classroom,
                status: s.status,
                created_at: s.created_at,
                updated_at: s.updated_at,
            })
            .collect())
    }

    async fn first_schedule_of_day(&self, section: Uuid, day: DayOfWeek) -> Result<Option<CourseSchedule>, Problem> {
        let candidates = doc! {
            "section": bson_uuid(section),
            "day_of_week": day,
            "status": RecordStatus::Active,
        };
        let schedules = find_all(&self.schedules(), candidates, doc! {}).await?;
        let slots = self
            .time_slots_by_ids(schedules.iter().map(|s| s.time_slot).collect())
            .await?;

        Ok(schedules.into_iter().min_by_key(|s| {
            slots
                .get(&s.time_slot)
                .map(|slot| slot.start_time.clone())
                .unwrap_or_else(|| "99:99".to_string())
        }))
    }
}

/// Resolves references and rejects teacher or section double booking.
async fn checked_schedule(
    db: &Database,
    input: ScheduleInput,
    existing: Option<&CourseSchedule>,
) -> Result<CourseSchedule, Problem> {
    db.require_course(input.course, "course").await?;
    let section = db.require_section(input.section, "section").await?;
    db.require_user_with_role(input.teacher, Role::Teacher, "teacher").await?;
    let slot = db.require_time_slot(input.time_slot, "time_slot").await?;

    let school_year = input.school_year.unwrap_or(section.school_year);
    let schedule = input.into_schedule(school_year, existing);
    if !schedule.is_active() {
        return Ok(schedule);
    }

    let slots = db.overlapping_slot_ids(&slot).await?;

    let teacher_conflict = db
        .schedules()
        .find_one(collision_filter(&schedule, &slots, "teacher", schedule.teacher), None)
        .await?;
    if let Some(conflict) = teacher_conflict {
        return Err(problem::teacher_busy(conflict.id));
    }

    let section_conflict = db
        .schedules()
        .find_one(collision_filter(&schedule, &slots, "section", schedule.section), None)
        .await?;
    if let Some(conflict) = section_conflict {
        return Err(problem::section_busy(conflict.id));
    }

    Ok(schedule)
}
