//! Records returned by the Compass API.
//!
//! Only the fields the crawler reads are typed. Everything else is carried in
//! a flattened map so output files keep the full record as Compass sent it.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// An academic term, as listed by `getTerms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub code: String,
    pub description: String,
}

/// A subject (department) offered in a term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub code: String,
    pub description: String,
}

/// One page of a paginated Compass search.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub total_count: u64,
    /// `null` here means the search state on the server was lost.
    pub data: Option<Vec<T>>,
}

fn default_success() -> bool {
    true
}

/// Lightweight instructor reference embedded in a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyRef {
    pub display_name: String,
    pub banner_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full instructor profile from the contact card endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyProfile {
    pub display_name: String,
    pub banner_id: String,
    #[serde(default)]
    pub cv_exists: bool,
    #[serde(default)]
    pub cv_url: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl FacultyProfile {
    /// Build a profile from a `personData` object.
    ///
    /// Returns `None` for an empty object, which is how Compass reports an
    /// instructor without a contact card. A relative `cvUrl` is made absolute
    /// against `host` when `cvExists` is set.
    pub fn from_person_data(person: Value, host: &str) -> Result<Option<Self>, serde_json::Error> {
        match &person {
            Value::Null => return Ok(None),
            Value::Object(map) if map.is_empty() => return Ok(None),
            _ => {}
        }

        let mut profile: FacultyProfile = serde_json::from_value(person)?;
        if profile.cv_exists {
            profile.cv_url = profile.cv_url.take().map(|path| absolutize(host, &path));
        } else {
            profile.cv_url = None;
        }
        Ok(Some(profile))
    }
}

fn absolutize(host: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let host = host.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{host}{path}")
    } else {
        format!("{host}/{path}")
    }
}

/// An instructor on a section: a bare reference until hydrated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Faculty {
    Profile(FacultyProfile),
    Reference(FacultyRef),
}

impl Faculty {
    pub fn display_name(&self) -> &str {
        match self {
            Faculty::Profile(p) => &p.display_name,
            Faculty::Reference(r) => &r.display_name,
        }
    }

    pub fn banner_id(&self) -> &str {
        match self {
            Faculty::Profile(p) => &p.banner_id,
            Faculty::Reference(r) => &r.banner_id,
        }
    }
}

// Sections always arrive with references; profiles only exist after hydration.
impl<'de> Deserialize<'de> for Faculty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        FacultyRef::deserialize(deserializer).map(Faculty::Reference)
    }
}

/// One offered instance of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: u64,
    pub course_reference_number: String,
    pub subject: String,
    pub course_number: String,
    pub subject_course: String,
    #[serde(default)]
    pub course_title: Option<String>,
    #[serde(default)]
    pub faculty: Vec<Faculty>,
    #[serde(default)]
    pub meetings_faculty: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A catalog course with its sections for one term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub subject: String,
    pub course_number: String,
    #[serde(default)]
    pub course_title: Option<String>,
    #[serde(default)]
    pub course_description: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Course {
    /// Minimal course record for a section whose course was not listed.
    pub fn from_section(section: &Section) -> Self {
        Self {
            subject: section.subject.clone(),
            course_number: section.course_number.clone(),
            course_title: section.course_title.clone(),
            course_description: None,
            sections: Vec::new(),
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HOST: &str = "https://compassxe-ssb.tamu.edu";

    #[test]
    fn cv_url_is_absolutized_when_cv_exists() {
        let person = json!({
            "displayName": "Doe, Jane",
            "bannerId": "123",
            "cvExists": true,
            "cvUrl": "/StudentRegistrationSsb/ssb/cv/123",
            "tamuDirTitle": "Professor"
        });
        let profile = FacultyProfile::from_person_data(person, HOST).unwrap().unwrap();
        assert_eq!(
            profile.cv_url.as_deref(),
            Some("https://compassxe-ssb.tamu.edu/StudentRegistrationSsb/ssb/cv/123")
        );
        assert_eq!(profile.fields["tamuDirTitle"], "Professor");
    }

    #[test]
    fn cv_url_is_dropped_without_cv() {
        let person = json!({
            "displayName": "Doe, Jane",
            "bannerId": "123",
            "cvExists": false,
            "cvUrl": "/ignored"
        });
        let profile = FacultyProfile::from_person_data(person, HOST).unwrap().unwrap();
        assert_eq!(profile.cv_url, None);
    }

    #[test]
    fn empty_person_data_has_no_profile() {
        assert!(FacultyProfile::from_person_data(json!({}), HOST).unwrap().is_none());
        assert!(FacultyProfile::from_person_data(Value::Null, HOST).unwrap().is_none());
    }

    #[test]
    fn section_keeps_unknown_fields() {
        let raw = json!({
            "id": 7,
            "courseReferenceNumber": "10001",
            "subject": "CSCE",
            "courseNumber": "121",
            "subjectCourse": "CSCE121",
            "faculty": [{"displayName": "Doe, Jane", "bannerId": "123", "primaryIndicator": true}],
            "openSection": true
        });
        let section: Section = serde_json::from_value(raw).unwrap();
        assert_eq!(section.faculty.len(), 1);
        assert!(matches!(section.faculty[0], Faculty::Reference(_)));
        assert_eq!(section.extra["openSection"], true);

        let back = serde_json::to_value(&section).unwrap();
        assert_eq!(back["faculty"][0]["primaryIndicator"], true);
        assert_eq!(back["openSection"], true);
    }

    #[test]
    fn hydrated_faculty_serializes_as_profile() {
        let profile = FacultyProfile {
            display_name: "Doe, Jane".into(),
            banner_id: "123".into(),
            cv_exists: false,
            cv_url: None,
            fields: Map::new(),
        };
        let value = serde_json::to_value(Faculty::Profile(profile)).unwrap();
        assert_eq!(value["displayName"], "Doe, Jane");
        assert_eq!(value["cvExists"], false);
    }
}
