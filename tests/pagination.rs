//! Paging behaviour of the section and course endpoints.

mod helpers;

use compass::compass::{CompassApi, TermSession};
use helpers::*;
use serde_json::json;
use wiremock::matchers::query_param;
use wiremock::{MockServer, ResponseTemplate};

async fn connect(
    server: &MockServer,
    page_size: u32,
    handshakes: u64,
) -> (CompassApi, TermSession) {
    mount_handshake(server, handshakes).await;
    let dir = std::env::temp_dir();
    let mut config = test_config(server, &dir);
    config.page_size = page_size;
    let api = api(&config);
    let session = api.acquire_session(TERM).await.unwrap();
    (api, session)
}

fn crns(sections: &[compass::compass::Section]) -> Vec<&str> {
    sections
        .iter()
        .map(|s| s.course_reference_number.as_str())
        .collect()
}

#[tokio::test]
async fn each_offset_is_requested_once() {
    let server = MockServer::start().await;
    let pages = [
        (0, vec!["10001", "10002"]),
        (2, vec!["10003", "10004"]),
        (4, vec!["10005"]),
    ];
    for (offset, page_crns) in pages {
        let items = page_crns
            .iter()
            .map(|crn| section(crn, "CSCE", "121", &[]))
            .collect();
        page_mock(SECTIONS, "CSCE", offset)
            .and(query_param("pageMaxSize", "2"))
            .respond_with(json_page(5, items))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (api, session) = connect(&server, 2, 1).await;
    let sections = api.sections(&session, "CSCE").await.unwrap();
    assert_eq!(crns(&sections), vec!["10001", "10002", "10003", "10004", "10005"]);
}

#[tokio::test]
async fn malformed_page_is_requested_again_at_same_offset() {
    let server = MockServer::start().await;
    page_mock(SECTIONS, "CSCE", 0)
        .respond_with(Sequence::new(vec![
            ResponseTemplate::new(200).set_body_string("<html>Service Unavailable</html>"),
            ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "totalCount": 1,
                "data": null
            })),
            json_page(1, vec![section("10001", "CSCE", "121", &[])]),
        ]))
        .expect(3)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 500, 1).await;
    let sections = api.sections(&session, "CSCE").await.unwrap();
    assert_eq!(crns(&sections), vec!["10001"]);
}

#[tokio::test]
async fn unsuccessful_page_renews_session_and_retries_offset() {
    let server = MockServer::start().await;
    page_mock(COURSES, "MATH", 0)
        .respond_with(Sequence::new(vec![
            refused_page(),
            json_page(1, vec![course("MATH", "151", "Engineering Mathematics I")]),
        ]))
        .expect(2)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 500, 2).await;
    let courses = api.courses(&session, "MATH").await.unwrap();
    assert_eq!(courses.len(), 1);
    assert_eq!(courses[0].course_number, "151");
    assert_eq!(session.generation().await, 1);
}

#[tokio::test]
async fn repeated_empty_page_ends_pagination_after_one_renewal() {
    let server = MockServer::start().await;
    page_mock(SECTIONS, "CSCE", 0)
        .respond_with(json_page(
            4,
            vec![
                section("10001", "CSCE", "121", &[]),
                section("10002", "CSCE", "121", &[]),
            ],
        ))
        .expect(1)
        .mount(&server)
        .await;
    page_mock(SECTIONS, "CSCE", 2)
        .respond_with(json_page(4, vec![]))
        .expect(2)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 2, 2).await;
    let sections = api.sections(&session, "CSCE").await.unwrap();
    assert_eq!(crns(&sections), vec!["10001", "10002"]);
}

#[tokio::test]
async fn latest_total_count_is_trusted() {
    let server = MockServer::start().await;
    page_mock(SECTIONS, "CSCE", 0)
        .respond_with(json_page(
            4,
            vec![
                section("10001", "CSCE", "121", &[]),
                section("10002", "CSCE", "121", &[]),
            ],
        ))
        .expect(1)
        .mount(&server)
        .await;
    page_mock(SECTIONS, "CSCE", 2)
        .respond_with(json_page(3, vec![section("10003", "CSCE", "121", &[])]))
        .expect(1)
        .mount(&server)
        .await;
    page_mock(SECTIONS, "CSCE", 3)
        .respond_with(json_page(3, vec![]))
        .expect(0)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 2, 1).await;
    let sections = api.sections(&session, "CSCE").await.unwrap();
    assert_eq!(sections.len(), 3);
}

#[tokio::test]
async fn oversized_page_size_is_clamped() {
    let server = MockServer::start().await;
    page_mock(SECTIONS, "CSCE", 0)
        .and(query_param("pageMaxSize", "500"))
        .respond_with(json_page(1, vec![section("10001", "CSCE", "121", &[])]))
        .expect(1)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 10_000, 1).await;
    let sections = api.sections(&session, "CSCE").await.unwrap();
    assert_eq!(sections.len(), 1);
}

#[tokio::test]
async fn persistent_server_errors_exhaust_the_budget() {
    let server = MockServer::start().await;
    page_mock(SECTIONS, "CSCE", 0)
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (api, session) = connect(&server, 500, 1).await;
    let err = api.sections(&session, "CSCE").await.unwrap_err();
    assert!(matches!(
        err,
        compass::compass::CompassError::RetriesExhausted { attempts: 3, .. }
    ));
}
