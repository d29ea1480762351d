use std::iter::repeat;
use std::path::{Path, PathBuf};

use base64::engine::GeneralPurpose;
use bson::Bson;
use chrono::NaiveDate;
use uuid::Uuid;

pub fn find_first_subpath<P: AsRef<Path>, F: Fn(&Path) -> bool>(
    root: impl AsRef<Path>,
    subpaths: &[P],
    search: F,
) -> Option<PathBuf> {
    subpaths
        .iter()
        .zip(repeat(root.as_ref()))
        .map(|(b, a)| a.join(b))
        .find(|it: &PathBuf| search(it))
}

pub fn base64_engine() -> GeneralPurpose {
    base64::engine::GeneralPurpose::new(
        &base64::alphabet::URL_SAFE,
        base64::engine::GeneralPurposeConfig::new(),
    )
}

/// BSON form of a document id or reference (binary subtype 4).
#[inline]
pub fn bson_uuid(id: Uuid) -> Bson {
    Bson::from(bson::Uuid::from_uuid_1(id))
}

pub fn bson_uuids(ids: impl IntoIterator<Item = Uuid>) -> Vec<Bson> {
    ids.into_iter().map(bson_uuid).collect()
}

/// Calendar dates are stored as `YYYY-MM-DD` strings.
#[inline]
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Case-insensitive substring match for free-text search filters.
pub fn contains_ci(text: &str) -> Bson {
    Bson::Document(bson::doc! {
        "$regex": regex::escape(text.trim()),
        "$options": "i",
    })
}

pub mod optional_uuid_as_binary {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(value: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        value.map(bson::Uuid::from_uuid_1).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
        Ok(Option::<bson::Uuid>::deserialize(deserializer)?.map(|it| it.to_uuid_1()))
    }
}

pub mod date_time_as_unix_seconds {
    //! JWT "NumericDate" (RFC 7519 section 2).
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(date.timestamp())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Utc.timestamp_opt(i64::deserialize(deserializer)?, 0)
            .single()
            .ok_or_else(|| serde::de::Error::custom("Invalid Unix timestamp value."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_key_is_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(date_key(date), "2024-03-05");
    }

    #[test]
    fn uuid_is_stored_as_uuid_binary() {
        let id = Uuid::new_v4();
        match bson_uuid(id) {
            Bson::Binary(bin) => {
                assert_eq!(bin.subtype, bson::spec::BinarySubtype::Uuid);
                assert_eq!(bin.bytes, id.as_bytes().to_vec());
            }
            other => panic!("unexpected bson: {:?}", other),
        }
    }

    #[test]
    fn search_escapes_regex_characters() {
        let filter = contains_ci(" 1.A+ ");
        let doc = filter.as_document().unwrap();
        assert_eq!(doc.get_str("$regex").unwrap(), r"1\.A\+");
        assert_eq!(doc.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn first_existing_subpath_is_found() {
        let root = std::env::temp_dir();
        let found = find_first_subpath(&root, &["missing.yml", ""], Path::exists);
        assert_eq!(found, Some(root.join("")));
    }
}
