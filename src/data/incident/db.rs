use std::collections::BTreeMap;

use bson::{doc, Document};
use chrono::{NaiveDate, Utc};
use mongodb::{Collection, Database};
use rocket::futures::TryStreamExt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::user::db::UserDbExt;
use crate::data::user::UserSummary;
use crate::data::validation::Validator;
use crate::data::{filter, find_page, Populated};
use crate::middleware::paging::PageState;
use crate::resp::problem::{problems, Problem};
use crate::util::{contains_ci, date_key};

use super::{Incident, IncidentStatus, IncidentType, IncidentView, INCIDENT_COLLECTION_NAME};

pub mod problem {
    use crate::resp::problem::{problems, Problem};
    use uuid::Uuid;

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        problems::not_found("Incident", id)
    }

    #[inline]
    pub fn closed(id: Uuid) -> Problem {
        problems::bad_request("Incident is already closed.").insert("id", id)
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IncidentInput {
    pub incident_type: IncidentType,
    pub date: NaiveDate,
    pub reporter: String,
    #[serde(default)]
    pub victim: Option<Uuid>,
    #[serde(default)]
    pub aggressor: Option<Uuid>,
    #[serde(default)]
    pub is_violent: bool,
    pub description: String,
    pub location: String,
    /// `closed` is only reachable through the close operation.
    #[serde(default)]
    pub status: Option<IncidentStatus>,
}

impl IncidentInput {
    pub fn validate(&self) -> Result<(), Problem> {
        let mut v = Validator::new();
        v.length("reporter", &self.reporter, 2, 100)
            .length("description", &self.description, 10, 2000)
            .length("location", &self.location, 2, 200)
            .check(self.date <= Utc::now().date_naive(), "date", "can't be in the future")
            .check(
                self.status != Some(IncidentStatus::Closed),
                "status",
                "use the close operation to close an incident",
            );
        if let (Some(victim), Some(aggressor)) = (self.victim, self.aggressor) {
            v.check(victim != aggressor, "aggressor", "can't be the same person as the victim");
        }
        v.finish()
    }

    fn into_incident(self, registered_by: Uuid, existing: Option<&Incident>) -> Incident {
        let now = Utc::now();
        Incident {
            id: existing.map(|i| i.id).unwrap_or_else(Uuid::new_v4),
            incident_type: self.incident_type,
            date: self.date,
            reporter: self.reporter.trim().to_string(),
            victim: self.victim,
            aggressor: self.aggressor,
            // violence is violent by definition
            is_violent: self.is_violent || self.incident_type == IncidentType::Violence,
            description: self.description.trim().to_string(),
            location: self.location.trim().to_string(),
            status: self
                .status
                .or(existing.map(|i| i.status))
                .unwrap_or_default(),
            registered_by: existing.map(|i| i.registered_by).unwrap_or(registered_by),
            closed_at: None,
            closed_by: None,
            resolution: None,
            created_at: existing.map(|i| i.created_at).unwrap_or(now),
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CloseIncidentInput {
    pub resolution: String,
}

impl CloseIncidentInput {
    pub fn validate(&self) -> Result<(), Problem> {
        Validator::new()
            .length("resolution", &self.resolution, 5, 2000)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub incident_type: Option<IncidentType>,
    pub status: Option<IncidentStatus>,
    pub is_violent: Option<bool>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
}

impl IncidentFilter {
    pub fn document(&self) -> Document {
        let mut filter = Document::new();
        if let Some(incident_type) = self.incident_type {
            filter.insert("incident_type", incident_type);
        }
        if let Some(status) = self.status {
            filter.insert("status", status);
        }
        if let Some(is_violent) = self.is_violent {
            filter.insert("is_violent", is_violent);
        }
        if let Some(range) = filter::string_range(self.from.map(date_key), self.to.map(date_key), true) {
            filter.insert("date", range);
        }
        if let Some(search) = &self.search {
            filter.insert(
                "$or",
                vec![
                    doc! { "description": contains_ci(search) },
                    doc! { "location": contains_ci(search) },
                    doc! { "reporter": contains_ci(search) },
                ],
            );
        }
        filter
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct IncidentStats {
    pub total: u64,
    pub violent: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct GroupCount {
    #[serde(rename = "_id")]
    key: String,
    count: i64,
}

pub fn stats_pipeline(filter: Document) -> Vec<Document> {
    vec![
        doc! { "$match": filter },
        doc! { "$facet": {
            "by_type": [ { "$group": { "_id": "$incident_type", "count": { "$sum": 1 } } } ],
            "by_status": [ { "$group": { "_id": "$status", "count": { "$sum": 1 } } } ],
            "violent": [ { "$match": { "is_violent": true } }, { "$count": "count" } ],
        } },
    ]
}

/// Reads the single `$facet` output document. Every known type and status is
/// listed, with zero when absent.
pub fn fold_stats(facets: &Document) -> Result<IncidentStats, Problem> {
    let mut stats = IncidentStats::default();
    for t in IncidentType::ALL {
        stats.by_type.insert(t.to_string(), 0);
    }
    for s in IncidentStatus::ALL {
        stats.by_status.insert(s.to_string(), 0);
    }

    let groups = |name: &str| -> Result<Vec<GroupCount>, Problem> {
        match facets.get_array(name) {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| row.as_document().cloned())
                .map(|row| bson::from_document::<GroupCount>(row).map_err(Problem::from))
                .collect(),
            Err(_) => Ok(Vec::new()),
        }
    };

    for group in groups("by_type")? {
        let n = group.count.max(0) as u64;
        stats.total += n;
        *stats.by_type.entry(group.key).or_insert(0) += n;
    }
    for group in groups("by_status")? {
        *stats.by_status.entry(group.key).or_insert(0) += group.count.max(0) as u64;
    }
    stats.violent = facets
        .get_array("violent")
        .ok()
        .and_then(|rows| rows.first())
        .and_then(|row| row.as_document())
        .and_then(|row| row.get("count"))
        .and_then(|count| count.as_i32().map(i64::from).or_else(|| count.as_i64()))
        .unwrap_or(0)
        .max(0) as u64;

    Ok(stats)
}

pub trait IncidentDbExt {
    fn incidents(&self) -> Collection<Incident>;

    async fn list_incidents(&self, filter: &IncidentFilter, page: &PageState) -> Result<(Vec<Incident>, u64), Problem>;
    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, Problem>;
    async fn create_incident(&self, input: IncidentInput, registered_by: Uuid) -> Result<Incident, Problem>;
    async fn update_incident(&self, id: Uuid, input: IncidentInput) -> Result<Incident, Problem>;
    async fn close_incident(&self, id: Uuid, input: CloseIncidentInput, closed_by: Uuid) -> Result<Incident, Problem>;
    async fn delete_incident(&self, id: Uuid) -> Result<Incident, Problem>;
    async fn incident_stats(&self, filter: &IncidentFilter) -> Result<IncidentStats, Problem>;
    async fn populate_incidents(&self, incidents: Vec<Incident>) -> Result<Vec<IncidentView>, Problem>;
}

impl IncidentDbExt for Database {
    fn incidents(&self) -> Collection<Incident> {
        self.collection(INCIDENT_COLLECTION_NAME)
    }

    async fn list_incidents(&self, filter: &IncidentFilter, page: &PageState) -> Result<(Vec<Incident>, u64), Problem> {
        find_page(&self.incidents(), filter.document(), page, doc! { "date": -1, "created_at": -1 }).await
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>, Problem> {
        Ok(self.incidents().find_one(filter::by_id(id), None).await?)
    }

    async fn create_incident(&self, input: IncidentInput, registered_by: Uuid) -> Result<Incident, Problem> {
        check_people(self, &input).await?;
        let incident = input.into_incident(registered_by, None);

        self.incidents().insert_one(&incident, None).await?;
        tracing::info!("Registered {} incident {}", incident.incident_type, incident.id);

        Ok(incident)
    }

    async fn update_incident(&self, id: Uuid, input: IncidentInput) -> Result<Incident, Problem> {
        let existing = self.get_incident(id).await?.ok_or_else(|| problem::not_found(id))?;
        if existing.is_closed() {
            return Err(problem::closed(id));
        }
        check_people(self, &input).await?;

        let incident = input.into_incident(existing.registered_by, Some(&existing));
        self.incidents().replace_one(filter::by_id(id), &incident, None).await?;

        Ok(incident)
    }

    async fn close_incident(&self, id: Uuid, input: CloseIncidentInput, closed_by: Uuid) -> Result<Incident, Problem> {
        let mut incident = self.get_incident(id).await?.ok_or_else(|| problem::not_found(id))?;
        if incident.is_closed() {
            return Err(problem::closed(id));
        }

        let now = Utc::now();
        incident.status = IncidentStatus::Closed;
        incident.closed_at = Some(now);
        incident.closed_by = Some(closed_by);
        incident.resolution = Some(input.resolution.trim().to_string());
        incident.updated_at = now;

        self.incidents().replace_one(filter::by_id(id), &incident, None).await?;
        tracing::info!("Closed incident {}", id);

        Ok(incident)
    }

    async fn delete_incident(&self, id: Uuid) -> Result<Incident, Problem> {
        self.incidents()
            .find_one_and_delete(filter::by_id(id), None)
            .await?
            .ok_or_else(|| problem::not_found(id))
    }

    async fn incident_stats(&self, filter: &IncidentFilter) -> Result<IncidentStats, Problem> {
        let mut results: Vec<Document> = self
            .incidents()
            .aggregate(stats_pipeline(filter.document()), None)
            .await?
            .try_collect()
            .await?;

        match results.pop() {
            Some(facets) => fold_stats(&facets),
            None => fold_stats(&Document::new()),
        }
    }

    async fn populate_incidents(&self, incidents: Vec<Incident>) -> Result<Vec<IncidentView>, Problem> {
        let mut ids: Vec<Uuid> = incidents.iter().flat_map(|i| i.involved()).collect();
        ids.sort();
        ids.dedup();
        let users = self.users_by_ids(ids).await?;
        let summary = |id: Uuid| Populated::lookup(id, &users, |u| UserSummary::from(u));

        Ok(incidents
            .into_iter()
            .map(|i| IncidentView {
                id: i.id,
                incident_type: i.incident_type,
                date: i.date,
                reporter: i.reporter,
                victim: i.victim.map(summary),
                aggressor: i.aggressor.map(summary),
                is_violent: i.is_violent,
                description: i.description,
                location: i.location,
                status: i.status,
                registered_by: summary(i.registered_by),
                closed_at: i.closed_at,
                closed_by: i.closed_by.map(summary),
                resolution: i.resolution,
                created_at: i.created_at,
                updated_at: i.updated_at,
            })
            .collect())
    }
}

async fn check_people(db: &Database, input: &IncidentInput) -> Result<(), Problem> {
    for (field, id) in [("victim", input.victim), ("aggressor", input.aggressor)] {
        if let Some(id) = id {
            if db.get_user(id).await?.is_none() {
                return Err(problems::bad_request("Referenced user doesn't exist.")
                    .field(field, "must reference an existing user"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    fn input() -> IncidentInput {
        IncidentInput {
            incident_type: IncidentType::Misconduct,
            date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            reporter: "Prof. Rojas".into(),
            victim: None,
            aggressor: None,
            is_violent: false,
            description: "Student left the classroom without permission.".into(),
            location: "Room 2B".into(),
            status: None,
        }
    }

    #[test]
    fn closing_through_update_is_rejected() {
        assert!(input().validate().is_ok());

        let mut bad = input();
        bad.status = Some(IncidentStatus::Closed);
        bad.description = "short".into();
        let fields: Vec<_> = bad.validate().unwrap_err().errors.into_iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["description", "status"]);
    }

    #[test]
    fn victim_and_aggressor_differ() {
        let same = Uuid::new_v4();
        let mut bad = input();
        bad.victim = Some(same);
        bad.aggressor = Some(same);
        assert_eq!(bad.validate().unwrap_err().errors[0].field, "aggressor");
    }

    #[test]
    fn update_keeps_registration_and_status() {
        let registrar = Uuid::new_v4();
        let mut existing = input().into_incident(registrar, None);
        existing.status = IncidentStatus::InProgress;

        let mut changed = input();
        changed.incident_type = IncidentType::Violence;
        let updated = changed.into_incident(Uuid::new_v4(), Some(&existing));

        assert_eq!(updated.id, existing.id);
        assert_eq!(updated.registered_by, registrar);
        assert_eq!(updated.status, IncidentStatus::InProgress);
        assert!(updated.is_violent);
    }

    #[test]
    fn stats_fill_in_missing_groups() {
        let facets = doc! {
            "by_type": [ { "_id": "bullying", "count": 2 }, { "_id": "accident", "count": 1 } ],
            "by_status": [ { "_id": "open", "count": 3 } ],
            "violent": [ { "count": 1 } ],
        };
        let stats = fold_stats(&facets).unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!(stats.violent, 1);
        assert_eq!(stats.by_type["bullying"], 2);
        assert_eq!(stats.by_type["violence"], 0);
        assert_eq!(stats.by_type.len(), IncidentType::ALL.len());
        assert_eq!(stats.by_status["closed"], 0);
    }

    #[test]
    fn empty_collection_yields_zero_stats() {
        let stats = fold_stats(&Document::new()).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.by_status.values().sum::<u64>(), 0);
    }

    #[test]
    fn filter_combines_range_and_flags() {
        let filter = IncidentFilter {
            is_violent: Some(true),
            from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        }
        .document();
        assert_eq!(filter.get("is_violent"), Some(&Bson::Boolean(true)));
        assert_eq!(filter.get_document("date").unwrap(), &doc! { "$gte": "2024-01-01" });
    }
}
