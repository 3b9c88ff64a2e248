//! Endpoints of the Compass (Banner `StudentRegistrationSsb`) catalog API.

use crate::compass::CompassError;
use crate::compass::client::{RawResponse, RetryingClient};
use crate::compass::json::decode_json;
use crate::compass::models::{Course, Department, FacultyProfile, Section, Term};
use crate::compass::paginate::Paginator;
use crate::compass::session::{TermSession, cookie_header};
use anyhow::Context;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

const TERMS_PATH: &str = "/StudentRegistrationSsb/ssb/courseSearch/getTerms";
const TERM_SEARCH_PATH: &str = "/StudentRegistrationSsb/ssb/term/search";
const SUBJECTS_PATH: &str = "/StudentRegistrationSsb/ssb/classSearch/get_subject";
const COURSES_PATH: &str = "/StudentRegistrationSsb/ssb/courseSearchResults/courseSearchResults";
const COURSE_DESCRIPTION_PATH: &str =
    "/StudentRegistrationSsb/ssb/courseSearchResults/getCourseDescription";
const SECTIONS_PATH: &str = "/StudentRegistrationSsb/ssb/searchResults/searchResults";
const CONTACT_CARD_PATH: &str = "/StudentRegistrationSsb/ssb/contactCard/retrieveData";

/// Upper bound passed as `max` to the unpaginated listing endpoints.
const LISTING_MAX: u32 = 1728;

/// Typed access to the Compass endpoints, sharing one [`RetryingClient`].
pub struct CompassApi {
    client: RetryingClient,
    base_url: Url,
    page_size: u32,
}

impl CompassApi {
    pub fn new(base_url: &str, client: RetryingClient, page_size: u32) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Compass base URL: {base_url}"))?;
        Ok(Self {
            client,
            base_url,
            page_size,
        })
    }

    pub fn client(&self) -> &RetryingClient {
        &self.client
    }

    /// Scheme and host that relative links (CV URLs) resolve against.
    pub fn host(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        url.set_path(path);
        url.set_query(None);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    /// Every term Compass knows about, newest first.
    pub async fn terms(&self) -> Result<Vec<Term>, CompassError> {
        let max = LISTING_MAX.to_string();
        let url = self.endpoint(
            TERMS_PATH,
            &[("searchTerm", ""), ("dataType", "json"), ("offset", "1"), ("max", &max)],
        );
        self.client
            .send(|http| http.get(url.clone()), decode_body::<Vec<Term>>)
            .await
    }

    /// Run the term handshake and return a session holding its cookie.
    pub async fn acquire_session(&self, term_code: &str) -> Result<TermSession, CompassError> {
        let cookie = self.handshake(term_code).await?;
        info!(term = term_code, "Session acquired");
        Ok(TermSession::new(term_code, cookie))
    }

    /// Replace an expired session cookie; see [`TermSession::renew_with`].
    pub async fn renew_session(
        &self,
        session: &TermSession,
        observed_generation: u64,
    ) -> Result<u64, CompassError> {
        session
            .renew_with(observed_generation, || self.handshake(session.term_code()))
            .await
    }

    async fn handshake(&self, term_code: &str) -> Result<String, CompassError> {
        let url = self.endpoint(TERM_SEARCH_PATH, &[("mode", "courseSearch")]);
        let form = [("dataType", "json"), ("term", term_code)];
        self.client
            .send(
                |http| http.post(url.clone()).form(&form),
                |raw| {
                    let set_cookies = raw
                        .headers
                        .get_all(SET_COOKIE)
                        .iter()
                        .filter_map(|v| v.to_str().ok());
                    cookie_header(set_cookies).ok_or_else(|| {
                        CompassError::InvalidSession(format!(
                            "handshake for term {term_code} set no cookie"
                        ))
                    })
                },
            )
            .await
    }

    /// Subjects offered in the session's term.
    pub async fn departments(
        &self,
        session: &TermSession,
    ) -> Result<Vec<Department>, CompassError> {
        let max = LISTING_MAX.to_string();
        let url = self.endpoint(
            SUBJECTS_PATH,
            &[
                ("searchTerm", ""),
                ("term", session.term_code()),
                ("offset", "1"),
                ("max", &max),
            ],
        );
        let cookie = session.cookie().await;
        self.client
            .send(
                |http| http.get(url.clone()).header(COOKIE, cookie.header.as_str()),
                decode_body::<Vec<Department>>,
            )
            .await
    }

    /// All catalog courses of a department, across every page.
    pub async fn courses(
        &self,
        session: &TermSession,
        dept: &str,
    ) -> Result<Vec<Course>, CompassError> {
        let url = self.endpoint(
            COURSES_PATH,
            &[("txt_subject", dept), ("txt_term", session.term_code())],
        );
        Paginator::new(self, session, self.page_size).fetch_all(url).await
    }

    /// All sections of a department, across every page.
    pub async fn sections(
        &self,
        session: &TermSession,
        dept: &str,
    ) -> Result<Vec<Section>, CompassError> {
        let url = self.endpoint(
            SECTIONS_PATH,
            &[("txt_subject", dept), ("txt_term", session.term_code())],
        );
        Paginator::new(self, session, self.page_size).fetch_all(url).await
    }

    /// Full catalog description of a course, as plain text.
    pub async fn course_description(
        &self,
        session: &TermSession,
        subject: &str,
        course_number: &str,
    ) -> Result<String, CompassError> {
        let url = self.endpoint(COURSE_DESCRIPTION_PATH, &[]);
        let form = [
            ("term", session.term_code()),
            ("subjectCode", subject),
            ("courseNumber", course_number),
        ];
        let cookie = session.cookie().await;
        self.client
            .send(
                |http| {
                    http.post(url.clone())
                        .header(COOKIE, cookie.header.as_str())
                        .form(&form)
                },
                |raw| Ok(htmlize::unescape(raw.body.trim()).into_owned()),
            )
            .await
    }

    /// Contact card of one instructor.
    ///
    /// An instructor without a card yields [`CompassError::ProfileMissing`].
    pub async fn faculty_profile(
        &self,
        session: &TermSession,
        banner_id: &str,
        display_name: &str,
    ) -> Result<FacultyProfile, CompassError> {
        let url = self.endpoint(
            CONTACT_CARD_PATH,
            &[("bannerId", banner_id), ("termCode", session.term_code())],
        );
        let cookie = session.cookie().await;
        let person = self
            .client
            .send(
                |http| http.get(url.clone()).header(COOKIE, cookie.header.as_str()),
                decode_body::<ContactCard>,
            )
            .await?
            .data
            .person_data;

        let host = self.host();
        match FacultyProfile::from_person_data(person, &host) {
            Ok(Some(profile)) => {
                debug!(faculty = display_name, "Fetched faculty profile");
                Ok(profile)
            }
            Ok(None) => Err(CompassError::ProfileMissing(display_name.to_owned())),
            Err(e) => Err(CompassError::ParseFailed {
                status: 200,
                url: url.to_string(),
                source: e.into(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct ContactCard {
    data: ContactCardData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactCardData {
    #[serde(default)]
    person_data: Value,
}

fn decode_body<T: DeserializeOwned>(raw: RawResponse) -> Result<T, CompassError> {
    decode_json(&raw.body).map_err(|source| CompassError::ParseFailed {
        status: raw.status.as_u16(),
        url: raw.url.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compass::retry::RetryPolicy;
    use std::time::Duration;

    fn api(base: &str) -> CompassApi {
        let client =
            RetryingClient::new(RetryPolicy::default(), Duration::from_secs(5), None).unwrap();
        CompassApi::new(base, client, 500).unwrap()
    }

    #[test]
    fn endpoint_replaces_path_and_query() {
        let api = api("https://compassxe-ssb.tamu.edu/ignored?x=1");
        let url = api.endpoint(SECTIONS_PATH, &[("txt_subject", "CSCE"), ("txt_term", "202531")]);
        assert_eq!(
            url.as_str(),
            "https://compassxe-ssb.tamu.edu/StudentRegistrationSsb/ssb/searchResults/searchResults?txt_subject=CSCE&txt_term=202531"
        );
    }

    #[test]
    fn host_drops_path() {
        let api = api("http://127.0.0.1:8080/some/prefix");
        assert_eq!(api.host(), "http://127.0.0.1:8080");
    }
}
