//! Term-scoped output of a crawl.

use crate::compass::Course;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;
use tracing::warn;

/// Dataset key of a course: department code and course number.
pub fn course_key(dept: &str, course_number: &str) -> String {
    format!("{dept} {course_number}")
}

/// Every course of a term, keyed by [`course_key`]. Serializes as the bare map.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TermDataset {
    #[serde(skip)]
    pub term: String,
    pub courses: BTreeMap<String, Course>,
}

impl TermDataset {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            courses: BTreeMap::new(),
        }
    }

    /// Merge one department's courses.
    ///
    /// Departments partition the key space, so a collision means the same
    /// department was merged twice; the first copy is kept.
    pub fn merge_department(&mut self, dept: &str, courses: BTreeMap<String, Course>) -> usize {
        let mut added = 0;
        for (key, course) in courses {
            match self.courses.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(course);
                    added += 1;
                }
                Entry::Occupied(slot) => {
                    warn!(
                        term = self.term.as_str(),
                        dept,
                        key = slot.key().as_str(),
                        "Duplicate course key, keeping first"
                    );
                }
            }
        }
        added
    }

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }

    pub fn section_count(&self) -> usize {
        self.courses.values().map(|c| c.sections.len()).sum()
    }
}

/// Summary of one term's crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub term: String,
    pub departments: usize,
    pub merged: usize,
    pub abandoned: Vec<String>,
    pub courses: usize,
    pub sections: usize,
    pub elapsed: Duration,
}

impl CrawlReport {
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compass::Course;
    use serde_json::Map;

    fn course(subject: &str, number: &str) -> Course {
        Course {
            subject: subject.into(),
            course_number: number.into(),
            course_title: Some(format!("{subject} {number}")),
            course_description: None,
            sections: Vec::new(),
            extra: Map::new(),
        }
    }

    #[test]
    fn serializes_as_bare_map() {
        let mut dataset = TermDataset::new("202531");
        dataset.merge_department(
            "CSCE",
            BTreeMap::from([(course_key("CSCE", "121"), course("CSCE", "121"))]),
        );
        let value = serde_json::to_value(&dataset).unwrap();
        assert!(value.get("term").is_none());
        assert_eq!(value["CSCE 121"]["courseNumber"], "121");
    }

    #[test]
    fn duplicate_keys_keep_first() {
        let mut dataset = TermDataset::new("202531");
        let key = course_key("MATH", "151");
        let first = BTreeMap::from([(key.clone(), course("MATH", "151"))]);
        assert_eq!(dataset.merge_department("MATH", first), 1);

        let mut other = course("MATH", "151");
        other.course_title = Some("Replacement".into());
        assert_eq!(
            dataset.merge_department("MATH", BTreeMap::from([(key.clone(), other)])),
            0
        );
        assert_eq!(dataset.courses[&key].course_title.as_deref(), Some("MATH 151"));
    }
}
