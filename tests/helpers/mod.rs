//! Shared fixtures: a fake Compass on a wiremock server and fast-retry config.
#![allow(dead_code)]

use compass::compass::{CompassApi, RetryingClient};
use compass::config::Config;
use figment::Figment;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockBuilder, MockServer, Request, Respond, ResponseTemplate};

pub const TERM: &str = "202531";
pub const SESSION_COOKIE: &str = "JSESSIONID=test-session";

pub const TERMS: &str = "/StudentRegistrationSsb/ssb/courseSearch/getTerms";
pub const TERM_SEARCH: &str = "/StudentRegistrationSsb/ssb/term/search";
pub const SUBJECTS: &str = "/StudentRegistrationSsb/ssb/classSearch/get_subject";
pub const COURSES: &str = "/StudentRegistrationSsb/ssb/courseSearchResults/courseSearchResults";
pub const SECTIONS: &str = "/StudentRegistrationSsb/ssb/searchResults/searchResults";
pub const CONTACT_CARD: &str = "/StudentRegistrationSsb/ssb/contactCard/retrieveData";

/// Defaults pointed at `server`, with tiny backoff so retries finish quickly.
pub fn test_config(server: &MockServer, data_dir: &Path) -> Config {
    let mut config = Config::from_figment(Figment::new()).expect("default config");
    config.base_url = server.uri();
    config.data_dir = data_dir.to_path_buf();
    config.max_retries = 3;
    config.department_retries = 2;
    config.retry_base_interval = Duration::from_millis(1);
    config.retry_max_interval = Duration::from_millis(5);
    config.request_timeout = Duration::from_secs(5);
    config
}

pub fn api(config: &Config) -> CompassApi {
    let client = RetryingClient::new(config.retry_policy(), config.request_timeout, None)
        .expect("http client");
    CompassApi::new(&config.base_url, client, config.page_size).expect("api")
}

/// Term handshake answering with [`SESSION_COOKIE`], expected `times` times.
pub async fn mount_handshake(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path(TERM_SEARCH))
        .and(query_param("mode", "courseSearch"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "set-cookie",
                    format!("{SESSION_COOKIE}; Path=/StudentRegistrationSsb; HttpOnly").as_str(),
                )
                .set_body_json(json!({
                    "fwdURL": "/StudentRegistrationSsb/ssb/classSearch/classSearch"
                })),
        )
        .expect(times)
        .mount(server)
        .await;
}

pub async fn mount_departments(server: &MockServer, codes: &[&str]) {
    let body: Vec<Value> = codes
        .iter()
        .map(|code| json!({ "code": code, "description": format!("{code} Department") }))
        .collect();
    Mock::given(method("GET"))
        .and(path(SUBJECTS))
        .and(query_param("term", TERM))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Matcher for one page of a paginated endpoint.
pub fn page_mock(endpoint: &str, dept: &str, offset: u64) -> MockBuilder {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .and(query_param("txt_subject", dept))
        .and(query_param("txt_term", TERM))
        .and(query_param("pageOffset", offset.to_string()))
}

/// A department with one course page and one section page.
pub async fn mount_department(
    server: &MockServer,
    dept: &str,
    courses: Vec<Value>,
    sections: Vec<Value>,
) {
    page_mock(COURSES, dept, 0)
        .respond_with(json_page(courses.len() as u64, courses))
        .mount(server)
        .await;
    page_mock(SECTIONS, dept, 0)
        .respond_with(json_page(sections.len() as u64, sections))
        .mount(server)
        .await;
}

pub async fn mount_contact_card(server: &MockServer, banner_id: &str, person: Value, times: u64) {
    Mock::given(method("GET"))
        .and(path(CONTACT_CARD))
        .and(query_param("bannerId", banner_id))
        .and(query_param("termCode", TERM))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "data": { "personData": person } })),
        )
        .expect(times)
        .mount(server)
        .await;
}

pub fn page(total: u64, data: Vec<Value>) -> Value {
    json!({ "success": true, "totalCount": total, "data": data })
}

pub fn json_page(total: u64, data: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(page(total, data))
}

/// A page Compass flags as unsuccessful, as it does for a stale session.
pub fn refused_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": false,
        "totalCount": 0,
        "data": []
    }))
}

pub fn course(dept: &str, number: &str, title: &str) -> Value {
    json!({
        "subject": dept,
        "courseNumber": number,
        "courseTitle": title,
        "creditHourLow": 3,
        "termEffective": "201931"
    })
}

pub fn section(crn: &str, dept: &str, number: &str, faculty: &[(&str, &str)]) -> Value {
    let faculty: Vec<Value> = faculty
        .iter()
        .map(|(name, id)| json!({ "displayName": name, "bannerId": id, "primaryIndicator": true }))
        .collect();
    json!({
        "id": crn.parse::<u64>().expect("numeric crn"),
        "term": TERM,
        "courseReferenceNumber": crn,
        "subject": dept,
        "courseNumber": number,
        "subjectCourse": format!("{dept}{number}"),
        "courseTitle": format!("{dept} {number}"),
        "openSection": true,
        "faculty": faculty,
        "meetingsFaculty": []
    })
}

pub fn person(name: &str, banner_id: &str) -> Value {
    json!({
        "displayName": name,
        "bannerId": banner_id,
        "cvExists": true,
        "cvUrl": format!("/StudentRegistrationSsb/ssb/contactCard/cv/{banner_id}"),
        "emailAddress": "instructor@example.edu"
    })
}

/// Answers with each template in turn, repeating the last one.
pub struct Sequence {
    responses: Vec<ResponseTemplate>,
    calls: AtomicUsize,
}

impl Sequence {
    pub fn new(responses: Vec<ResponseTemplate>) -> Self {
        assert!(!responses.is_empty());
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

/// Answers every request with `response` and records when each one arrived.
#[derive(Clone)]
pub struct Arrivals {
    times: Arc<Mutex<Vec<Instant>>>,
    response: ResponseTemplate,
}

impl Arrivals {
    pub fn new(response: ResponseTemplate) -> Self {
        Self {
            times: Arc::new(Mutex::new(Vec::new())),
            response,
        }
    }

    pub fn count(&self) -> usize {
        self.times.lock().unwrap().len()
    }

    /// Most requests that arrived within any span shorter than `window`.
    pub fn peak_within(&self, window: Duration) -> usize {
        let mut times = self.times.lock().unwrap().clone();
        times.sort();
        let mut peak = 0;
        let mut first = 0;
        for last in 0..times.len() {
            while times[last].duration_since(times[first]) >= window {
                first += 1;
            }
            peak = peak.max(last - first + 1);
        }
        peak
    }
}

impl Respond for Arrivals {
    fn respond(&self, _: &Request) -> ResponseTemplate {
        self.times.lock().unwrap().push(Instant::now());
        self.response.clone()
    }
}
