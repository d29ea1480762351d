use std::collections::HashMap;

use bson::{doc, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use rocket::futures::TryStreamExt;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::middleware::paging::PageState;
use crate::resp::problem::Problem;

/// Declares a string-valued enum stored and served under its lowercase name.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
        pub enum $name {
            $(#[serde(rename = $value)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for bson::Bson {
            fn from(value: $name) -> Self {
                bson::Bson::String(value.as_str().to_string())
            }
        }
    };
}

pub mod attendance;
pub mod course;
pub mod dashboard;
pub mod enrollment;
pub mod incident;
pub mod schedule;
pub mod school_year;
pub mod section;
pub mod staff;
pub mod time_slot;
pub mod user;
pub mod validation;

string_enum! {
    /// Soft on/off state shared by most records.
    pub enum RecordStatus {
        Active => "active",
        Inactive => "inactive",
    }
}

impl Default for RecordStatus {
    fn default() -> Self {
        RecordStatus::Active
    }
}

string_enum! {
    /// Education level a section or course belongs to.
    pub enum Level {
        Primary => "primary",
        Secondary => "secondary",
    }
}

/// A reference served as the referenced document when it could be loaded,
/// or as the bare id otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Populated<T> {
    Doc(T),
    Id(Uuid),
}

impl<T> Populated<T> {
    pub fn lookup<D>(id: Uuid, loaded: &HashMap<Uuid, D>, view: impl FnOnce(&D) -> T) -> Populated<T> {
        match loaded.get(&id) {
            Some(doc) => Populated::Doc(view(doc)),
            None => Populated::Id(id),
        }
    }
}

pub mod filter {
    use bson::{doc, Bson, Document};
    use uuid::Uuid;

    use crate::util::bson_uuid;

    #[inline]
    pub fn by_id(id: Uuid) -> Document {
        doc! { "_id": bson_uuid(id) }
    }

    /// Matches `field == id`.
    #[inline]
    pub fn by_ref(field: &str, id: Uuid) -> Document {
        let mut filter = Document::new();
        filter.insert(field, bson_uuid(id));
        filter
    }

    /// Excludes the document being updated from uniqueness checks.
    pub fn excluding(mut filter: Document, id: Option<Uuid>) -> Document {
        if let Some(id) = id {
            filter.insert("_id", doc! { "$ne": bson_uuid(id) });
        }
        filter
    }

    /// Inclusive/exclusive range over `YYYY-MM-DD` or `HH:MM` strings.
    pub fn string_range(from: Option<String>, until: Option<String>, inclusive_until: bool) -> Option<Bson> {
        if from.is_none() && until.is_none() {
            return None;
        }
        let mut range = Document::new();
        if let Some(from) = from {
            range.insert("$gte", from);
        }
        if let Some(until) = until {
            range.insert(if inclusive_until { "$lte" } else { "$lt" }, until);
        }
        Some(Bson::Document(range))
    }
}

pub async fn find_page<T>(
    collection: &Collection<T>,
    filter: Document,
    page: &PageState,
    sort: Document,
) -> Result<(Vec<T>, u64), Problem>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let total = collection.count_documents(filter.clone(), None).await?;
    let items = collection
        .find(filter, page.find_options(sort))
        .await?
        .try_collect()
        .await?;

    Ok((items, total))
}

pub async fn find_all<T>(collection: &Collection<T>, filter: Document, sort: Document) -> Result<Vec<T>, Problem>
where
    T: DeserializeOwned + Unpin + Send + Sync,
{
    let options = FindOptions::builder().sort(sort).build();
    Ok(collection.find(filter, options).await?.try_collect().await?)
}

pub async fn count(db: &Database, collection: &str, filter: Document) -> Result<u64, Problem> {
    Ok(db
        .collection::<Document>(collection)
        .count_documents(filter, None)
        .await?)
}

fn unique(keys: Document, name: &str) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .unique(true)
                .name(name.to_string())
                .build(),
        )
        .build()
}

fn plain(keys: Document) -> IndexModel {
    IndexModel::builder().keys(keys).build()
}

/// Creates the indexes backing uniqueness invariants.
pub async fn ensure_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let indexes: Vec<(&str, Vec<IndexModel>)> = vec![
        (
            user::USER_COLLECTION_NAME,
            vec![unique(doc! { "email": 1 }, "email_unique"), plain(doc! { "role": 1 })],
        ),
        (
            staff::STAFF_COLLECTION_NAME,
            vec![
                unique(doc! { "email": 1 }, "email_unique"),
                unique(doc! { "document_number": 1 }, "document_number_unique"),
            ],
        ),
        (
            school_year::SCHOOL_YEAR_COLLECTION_NAME,
            vec![unique(doc! { "name": 1 }, "name_unique")],
        ),
        (
            section::SECTION_COLLECTION_NAME,
            vec![unique(
                doc! { "school_year": 1, "level": 1, "grade": 1, "letter": 1 },
                "section_unique",
            )],
        ),
        (
            course::COURSE_COLLECTION_NAME,
            vec![unique(doc! { "code": 1 }, "code_unique")],
        ),
        (
            time_slot::TIME_SLOT_COLLECTION_NAME,
            vec![plain(doc! { "start_time": 1, "end_time": 1 })],
        ),
        (
            schedule::SCHEDULE_COLLECTION_NAME,
            vec![
                plain(doc! { "teacher": 1, "day_of_week": 1, "school_year": 1 }),
                plain(doc! { "section": 1, "day_of_week": 1, "school_year": 1 }),
            ],
        ),
        (
            enrollment::ENROLLMENT_COLLECTION_NAME,
            vec![unique(
                doc! { "student": 1, "section": 1, "school_year": 1 },
                "enrollment_unique",
            )],
        ),
        (
            attendance::ATTENDANCE_COLLECTION_NAME,
            vec![
                unique(doc! { "course_schedule": 1, "date": 1 }, "schedule_date_unique"),
                plain(doc! { "section": 1, "date": 1 }),
            ],
        ),
        (
            incident::INCIDENT_COLLECTION_NAME,
            vec![plain(doc! { "status": 1, "date": -1 })],
        ),
    ];

    for (collection, models) in indexes {
        tracing::debug!("Ensuring indexes on '{}'", collection);
        db.collection::<Document>(collection)
            .create_indexes(models, None)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::Bson;

    #[test]
    fn excluding_adds_not_equal_id() {
        let id = Uuid::new_v4();
        let filter = filter::excluding(doc! { "name": "x" }, Some(id));
        let ne = filter.get_document("_id").unwrap();
        assert_eq!(ne.get("$ne"), Some(&crate::util::bson_uuid(id)));
        assert_eq!(filter::excluding(doc! {}, None), doc! {});
    }

    #[test]
    fn string_range_bounds() {
        assert_eq!(filter::string_range(None, None, true), None);
        assert_eq!(
            filter::string_range(Some("2024-01-01".into()), Some("2024-02-01".into()), false),
            Some(Bson::Document(doc! { "$gte": "2024-01-01", "$lt": "2024-02-01" }))
        );
    }

    #[test]
    fn enums_serialize_to_their_names() {
        assert_eq!(Bson::from(RecordStatus::Inactive), Bson::String("inactive".into()));
        assert_eq!(serde_json::to_string(&Level::Primary).unwrap(), "\"primary\"");
        assert_eq!(Level::ALL.len(), 2);
    }

    #[test]
    fn missing_references_fall_back_to_ids() {
        let known = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let loaded: HashMap<Uuid, String> = [(known, "Ana".to_string())].into_iter().collect();

        let found = Populated::lookup(known, &loaded, |name| name.to_uppercase());
        assert_eq!(serde_json::to_value(&found).unwrap(), "ANA");

        let fallback = Populated::lookup(missing, &loaded, |name| name.clone());
        assert_eq!(fallback, Populated::Id(missing));
        assert_eq!(serde_json::to_value(&fallback).unwrap(), missing.to_string());
    }
}
