use std::collections::BTreeMap;

use rocket::{Build, Rocket, Route};

pub mod attendance;
pub mod auth;
pub mod courses;
pub mod dashboard;
pub mod enrollments;
pub mod files;
pub mod incidents;
pub mod schedules;
pub mod school_years;
pub mod sections;
pub mod staff;
pub mod time_slots;
pub mod users;

use attendance::*;
use auth::*;
use courses::*;
use dashboard::*;
use enrollments::*;
use files::*;
use incidents::*;
use schedules::*;
use school_years::*;
use sections::*;
use staff::*;
use time_slots::*;
use users::*;

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::data::attendance::{self as ad, db as adb, report as ar};
use crate::data::course::{self as cd, db as cdb};
use crate::data::dashboard::DashboardStats;
use crate::data::enrollment::{self as ed, db as edb};
use crate::data::incident::{self as ind, db as indb};
use crate::data::schedule::{self as scd, db as scdb};
use crate::data::school_year::{self as syd, db as sydb};
use crate::data::section::{self as sd, db as sdb};
use crate::data::staff::{self as sfd, db as sfdb};
use crate::data::time_slot::{self as td, db as tdb};
use crate::data::user::{self as ud, db as udb};
use crate::data::{Level, RecordStatus};
use crate::resp::envelope::Pagination;
use crate::resp::jwt::doc::JWTAuth;
use crate::resp::problem::{FieldError, Problem};
use crate::role::Role;

#[derive(OpenApi)]
#[openapi(
    paths(
        register, login, me, logout,
        user_list, user_get, user_create, user_update, user_password, user_delete,
        staff_list, staff_get, staff_create, staff_update, staff_delete,
        school_year_list, school_year_active, school_year_get, school_year_create, school_year_update,
        school_year_delete,
        section_list, section_get, section_students, section_create, section_update, section_delete,
        course_list, course_get, course_create, course_update, course_delete,
        time_slot_list, time_slot_get, time_slot_create, time_slot_update, time_slot_delete,
        schedule_list, schedule_get, schedule_by_section, schedule_by_teacher, schedule_create,
        schedule_update, schedule_delete,
        enrollment_list, enrollment_get, enrollment_create, enrollment_status, enrollment_delete,
        attendance_list, attendance_get, attendance_create, attendance_bulk, attendance_update,
        attendance_delete, attendance_monthly, attendance_student,
        incident_list, incident_stats, incident_get, incident_create, incident_update, incident_close,
        incident_delete,
        dashboard_get
    ),
    components(schemas(
        Role,
        RecordStatus,
        Level,
        Pagination,
        FieldError,
        Problem,
        AuthResponse,
        ud::UserResponse,
        ud::UserSummary,
        udb::SignupData,
        udb::LoginData,
        udb::UserCreateData,
        udb::UserUpdateData,
        udb::PasswordChangeData,
        sfd::Staff,
        sfd::StaffRole,
        sfd::StaffLevel,
        sfdb::StaffInput,
        syd::SchoolYear,
        syd::SchoolYearStatus,
        sydb::SchoolYearInput,
        sd::Section,
        sd::SectionSummary,
        sdb::SectionInput,
        cd::Course,
        cd::CourseSummary,
        cdb::CourseInput,
        td::TimeSlot,
        td::SlotType,
        tdb::TimeSlotInput,
        scd::CourseSchedule,
        scd::ScheduleView,
        scd::DayOfWeek,
        scdb::ScheduleInput,
        ed::Enrollment,
        ed::EnrollmentView,
        ed::EnrollmentStatus,
        edb::EnrollmentInput,
        edb::EnrollmentStatusInput,
        ad::Attendance,
        ad::AttendanceDetail,
        ad::AttendanceStatus,
        ad::AttendanceView,
        ad::DetailView,
        ad::DetailChange,
        adb::AttendanceInput,
        adb::AttendanceRecordInput,
        adb::BulkAttendanceInput,
        adb::AttendanceUpdateInput,
        adb::RecordOutcome,
        adb::BulkAttendanceResult,
        ar::StatusCounts,
        ar::DayReport,
        ar::MonthlyReport,
        ar::StudentRecord,
        ar::StudentSummary,
        ind::Incident,
        ind::IncidentView,
        ind::IncidentType,
        ind::IncidentStatus,
        indb::IncidentInput,
        indb::CloseIncidentInput,
        indb::IncidentStats,
        DashboardStats
    )),
    modifiers(&JWTAuth, &API_PREFIX)
)]
pub struct ApiDoc;

pub struct PathPrefix(pub &'static str);
static API_PREFIX: PathPrefix = PathPrefix("/api");

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api() -> Vec<Route> {
    routes![
        register,
        login,
        me,
        logout,
        user_list,
        user_get,
        user_create,
        user_update,
        user_password,
        user_delete,
        staff_list,
        staff_get,
        staff_create,
        staff_update,
        staff_delete,
        school_year_list,
        school_year_active,
        school_year_get,
        school_year_create,
        school_year_update,
        school_year_delete,
        section_list,
        section_get,
        section_students,
        section_create,
        section_update,
        section_delete,
        course_list,
        course_get,
        course_create,
        course_update,
        course_delete,
        time_slot_list,
        time_slot_get,
        time_slot_create,
        time_slot_update,
        time_slot_delete,
        schedule_list,
        schedule_get,
        schedule_by_section,
        schedule_by_teacher,
        schedule_create,
        schedule_update,
        schedule_delete,
        enrollment_list,
        enrollment_get,
        enrollment_create,
        enrollment_status,
        enrollment_delete,
        attendance_list,
        attendance_get,
        attendance_create,
        attendance_bulk,
        attendance_update,
        attendance_delete,
        attendance_monthly,
        attendance_student,
        incident_list,
        incident_stats,
        incident_get,
        incident_create,
        incident_update,
        incident_close,
        incident_delete,
        dashboard_get
    ]
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount("/api", api())
        .mount(
            "/",
            SwaggerUi::new("/swagger/<_..>").url("/api/openapi.json", ApiDoc::openapi()),
        )
        .mount("/", routes![app, app_path])
}

#[cfg(test)]
mod scenarios;

#[cfg(test)]
pub mod test_util {
    use chrono::Duration;
    use mongodb::Database;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::resp::jwt::UserRoleToken;
    use crate::role::Role;
    use crate::security::Security;

    const TEST_SECRET: &[u8] = b"route-tests-signing-secret-0123456789abcdef";

    /// Local client against a lazily connecting MongoDB client; requests
    /// rejected before any query never touch the server.
    pub async fn client() -> Client {
        let security = Security::with_secret(TEST_SECRET).unwrap();
        let db = mongodb::Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap()
            .database("school_admin_test");

        let rocket = crate::build(Config::default(), security, db).unwrap();
        Client::tracked(rocket).await.unwrap()
    }

    /// Client against a fresh database on a running MongoDB server.
    pub async fn live_client() -> (Client, Database) {
        let security = Security::with_secret(TEST_SECRET).unwrap();
        let db = mongodb::Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap()
            .database(&format!("school_admin_test_{}", Uuid::new_v4().simple()));
        crate::data::ensure_indexes(&db).await.unwrap();

        let rocket = crate::build(Config::default(), security, db.clone()).unwrap();
        (Client::tracked(rocket).await.unwrap(), db)
    }

    pub fn token_header_for(user: Uuid, role: Role) -> Header<'static> {
        let token = UserRoleToken::issue(user, role, Duration::hours(1))
            .encode_jwt(TEST_SECRET)
            .unwrap();
        Header::new("Authorization", format!("Bearer {}", token))
    }

    pub fn token_header(role: Role) -> Header<'static> {
        token_header_for(Uuid::new_v4(), role)
    }
}
