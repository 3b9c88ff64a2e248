//! One attempt at crawling a single department.

use crate::cache::DedupCache;
use crate::compass::{
    CompassApi, CompassError, Course, Department, Faculty, FacultyProfile, Section, TermSession,
};
use crate::scraper::dataset::course_key;
use crate::scraper::{CrawlOptions, DepartmentState};
use futures::{StreamExt, stream};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Courses of one department with their sections and hydrated faculty.
#[derive(Debug, Default)]
pub struct DepartmentOutput {
    pub code: String,
    pub courses: BTreeMap<String, Course>,
    pub sections: usize,
    pub faculty_resolved: usize,
    pub faculty_dropped: usize,
}

/// Borrowed context for crawling departments of one term.
pub struct DepartmentCrawl<'a> {
    api: &'a CompassApi,
    session: &'a TermSession,
    faculty: &'a DedupCache<FacultyProfile>,
    options: &'a CrawlOptions,
}

impl<'a> DepartmentCrawl<'a> {
    pub fn new(
        api: &'a CompassApi,
        session: &'a TermSession,
        faculty: &'a DedupCache<FacultyProfile>,
        options: &'a CrawlOptions,
    ) -> Self {
        Self {
            api,
            session,
            faculty,
            options,
        }
    }

    /// Fetch sections, hydrate faculty, group sections under courses.
    ///
    /// Only the section fetch can fail the attempt; partial results are
    /// discarded. The course listing and descriptions only enrich what the
    /// sections produced.
    pub async fn run(&self, dept: &Department) -> Result<DepartmentOutput, CompassError> {
        let code = dept.code.as_str();
        trace!(dept = code, state = %DepartmentState::Fetching, "Department state");

        let mut sections = self.api.sections(self.session, code).await?;
        if sections.is_empty() {
            debug!(dept = code, "Department has no sections this term");
            return Ok(DepartmentOutput {
                code: code.to_owned(),
                ..Default::default()
            });
        }
        let listed = self.listed_courses(code, &sections).await;

        trace!(
            dept = code,
            state = %DepartmentState::Hydrating,
            courses = listed.len(),
            sections = sections.len(),
            "Department state"
        );
        let profiles = self.hydrate(&sections).await;
        let (faculty_resolved, faculty_dropped) = attach_profiles(&mut sections, &profiles);

        let section_count = sections.len();
        let mut courses = group_sections(code, listed, sections);
        if self.options.fetch_course_descriptions {
            self.describe(code, &mut courses).await;
        }

        Ok(DepartmentOutput {
            code: code.to_owned(),
            courses,
            sections: section_count,
            faculty_resolved,
            faculty_dropped,
        })
    }

    /// Catalog entries for the course numbers `sections` reference.
    ///
    /// A failed listing yields no entries, so every course is built from its
    /// sections instead.
    async fn listed_courses(&self, dept: &str, sections: &[Section]) -> Vec<Course> {
        let offered: HashSet<&str> = sections
            .iter()
            .map(|s| s.course_number.as_str())
            .collect();
        match self.api.courses(self.session, dept).await {
            Ok(mut courses) => {
                courses.retain(|c| offered.contains(c.course_number.as_str()));
                courses
            }
            Err(e) => {
                warn!(dept, error = ?e, "Failed to list courses, using section fields");
                Vec::new()
            }
        }
    }

    /// Fill in course descriptions. A failed lookup leaves the description empty.
    async fn describe(&self, dept: &str, courses: &mut BTreeMap<String, Course>) {
        let wanted: Vec<(String, String, String)> = courses
            .iter()
            .map(|(key, c)| (key.clone(), c.subject.clone(), c.course_number.clone()))
            .collect();

        let fetched: Vec<(String, Result<String, CompassError>)> = stream::iter(wanted)
            .map(|(key, subject, number)| async move {
                let result = self
                    .api
                    .course_description(self.session, &subject, &number)
                    .await;
                (key, result)
            })
            .buffer_unordered(self.options.faculty_concurrency.max(1))
            .collect()
            .await;

        for (key, result) in fetched {
            match result {
                Ok(text) if !text.is_empty() => {
                    if let Some(course) = courses.get_mut(&key) {
                        course.course_description = Some(text);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(
                    dept,
                    course = key.as_str(),
                    error = ?e,
                    "Failed to fetch course description"
                ),
            }
        }
    }

    /// Resolve every distinct instructor of `sections` through the shared cache.
    async fn hydrate(&self, sections: &[Section]) -> HashMap<String, FacultyProfile> {
        let mut wanted: BTreeMap<&str, &str> = BTreeMap::new();
        for faculty in sections.iter().flat_map(|s| &s.faculty) {
            if !faculty.display_name().is_empty() {
                wanted
                    .entry(faculty.display_name())
                    .or_insert(faculty.banner_id());
            }
        }

        stream::iter(wanted)
            .map(|(name, banner_id)| async move {
                let result = self
                    .faculty
                    .get_or_compute(name, || {
                        self.api.faculty_profile(self.session, banner_id, name)
                    })
                    .await;
                (name, result)
            })
            .buffer_unordered(self.options.faculty_concurrency.max(1))
            .filter_map(|(name, result)| async move {
                match result {
                    Ok(profile) => Some((name.to_owned(), profile)),
                    Err(e) => {
                        if let CompassError::ProfileMissing(_) = e.root() {
                            debug!(faculty = name, "No profile, dropping from sections");
                        } else {
                            warn!(faculty = name, error = ?e, "Failed to fetch faculty profile");
                        }
                        None
                    }
                }
            })
            .collect()
            .await
    }
}

/// Swap faculty references for resolved profiles; unresolved ones are dropped.
///
/// Returns the number of references resolved and dropped.
fn attach_profiles(
    sections: &mut [Section],
    profiles: &HashMap<String, FacultyProfile>,
) -> (usize, usize) {
    let mut resolved = 0;
    let mut dropped = 0;
    for section in sections.iter_mut() {
        let before = section.faculty.len();
        section.faculty = std::mem::take(&mut section.faculty)
            .into_iter()
            .filter_map(|faculty| profiles.get(faculty.display_name()).cloned())
            .map(Faculty::Profile)
            .collect();
        resolved += section.faculty.len();
        dropped += before - section.faculty.len();
    }
    (resolved, dropped)
}

/// Key courses by `"<dept> <courseNumber>"` and append each section to its course.
///
/// Only course numbers some section carries become keys. A listed course
/// supplies the entry's fields; a section whose course was not listed gets a
/// course built from the section.
fn group_sections(
    dept: &str,
    listed: Vec<Course>,
    sections: Vec<Section>,
) -> BTreeMap<String, Course> {
    let mut listed: HashMap<String, Course> = listed
        .into_iter()
        .map(|course| (course.course_number.clone(), course))
        .collect();

    let mut grouped: BTreeMap<String, Course> = BTreeMap::new();
    for section in sections {
        let key = course_key(dept, &section.course_number);
        grouped
            .entry(key)
            .or_insert_with(|| match listed.remove(&section.course_number) {
                Some(course) => course,
                None => {
                    trace!(
                        dept,
                        course = section.course_number.as_str(),
                        "Section without listed course"
                    );
                    Course::from_section(&section)
                }
            })
            .sections
            .push(section);
    }
    grouped
}
