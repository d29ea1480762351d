use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use utoipa::ToSchema;
use uuid::Uuid;

pub mod db;

use crate::data::course::CourseSummary;
use crate::data::section::SectionSummary;
use crate::data::time_slot::TimeSlot;
use crate::data::user::UserSummary;
use crate::data::{Populated, RecordStatus};

pub static SCHEDULE_COLLECTION_NAME: &str = "course_schedules";

string_enum! {
    pub enum DayOfWeek {
        Monday => "monday",
        Tuesday => "tuesday",
        Wednesday => "wednesday",
        Thursday => "thursday",
        Friday => "friday",
        Saturday => "saturday",
    }
}

impl DayOfWeek {
    /// School day a calendar date falls on; Sundays have no classes.
    pub fn from_date(date: NaiveDate) -> Option<DayOfWeek> {
        match date.weekday() {
            Weekday::Mon => Some(DayOfWeek::Monday),
            Weekday::Tue => Some(DayOfWeek::Tuesday),
            Weekday::Wed => Some(DayOfWeek::Wednesday),
            Weekday::Thu => Some(DayOfWeek::Thursday),
            Weekday::Fri => Some(DayOfWeek::Friday),
            Weekday::Sat => Some(DayOfWeek::Saturday),
            Weekday::Sun => None,
        }
    }

    pub fn index(self) -> usize {
        DayOfWeek::ALL.iter().position(|d| *d == self).unwrap_or(0)
    }
}

/// Assignment of a course to a section, teacher and time slot on a weekday.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseSchedule {
    #[serde(rename = "_id", with = "bson::serde_helpers::uuid_1_as_binary")]
    pub id: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub course: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub section: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub teacher: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub time_slot: Uuid,
    #[serde(with = "bson::serde_helpers::uuid_1_as_binary")]
    pub school_year: Uuid,
    pub day_of_week: DayOfWeek,
    #[serde(default)]
    pub classroom: Option<String>,
    #[serde(default)]
    pub status: RecordStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CourseSchedule {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}

/// Schedule with its references loaded.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[schema(value_type = Object)]
    pub course: Populated<CourseSummary>,
    #[schema(value_type = Object)]
    pub section: Populated<SectionSummary>,
    #[schema(value_type = Object)]
    pub teacher: Populated<UserSummary>,
    #[schema(value_type = Object)]
    pub time_slot: Populated<TimeSlot>,
    pub school_year: Uuid,
    pub day_of_week: DayOfWeek,
    pub classroom: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleView {
    /// Sort key placing schedules by weekday then slot start.
    pub fn timetable_key(&self) -> (usize, String) {
        let start = match &self.time_slot {
            Populated::Doc(slot) => slot.start_time.clone(),
            Populated::Id(_) => String::new(),
        };
        (self.day_of_week.index(), start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekdays_map_to_school_days() {
        let monday = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(DayOfWeek::from_date(monday), Some(DayOfWeek::Monday));
        assert_eq!(
            DayOfWeek::from_date(monday + chrono::Duration::days(5)),
            Some(DayOfWeek::Saturday)
        );
        assert_eq!(DayOfWeek::from_date(monday + chrono::Duration::days(6)), None);
    }

    #[test]
    fn days_are_ordered() {
        assert_eq!(DayOfWeek::Monday.index(), 0);
        assert_eq!(DayOfWeek::Saturday.index(), 5);
        assert_eq!(DayOfWeek::Wednesday.to_string(), "wednesday");
    }
}
