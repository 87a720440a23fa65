use std::time::Duration;

use anyhow::Result;
use fatura_fetch::accounts::{AccountSource, PostgrestAccountSource};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> Result<PostgrestAccountSource> {
    PostgrestAccountSource::new(
        server.uri(),
        SecretString::from("service-key".to_string()),
        "contas_portal",
        "contas_portal_ucs",
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn loads_active_accounts_with_their_targets() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/contas_portal"))
        .and(query_param("select", "*"))
        .and(query_param("active", "eq.true"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "name": "Loja A", "document": "12.345.678/0001-90", "password": "pw-a"},
            {"id": 8, "name": "Loja B", "document": "98765432100", "password": "pw-b"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/contas_portal_ucs"))
        .and(query_param("active", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"accountId": 7, "ucCode": "0700.123-4", "dayOfMonth": 10},
            {"accountId": 7, "ucCode": "7001234"},
            {"account_id": 8, "uc_code": "555", "tolerance_days": 5}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let accounts = source(&server)?.load().await?;
    assert_eq!(accounts.len(), 2);

    let a = &accounts[0];
    assert_eq!(a.name, "Loja A");
    assert_eq!(a.document_digits(), "12345678000190");
    assert_eq!(a.password.expose_secret(), "pw-a");
    let codes: Vec<&str> = a.targets().iter().map(|t| t.uc.as_str()).collect();
    assert_eq!(codes, vec!["07001234", "7001234"]);
    assert_eq!(a.targets()[0].day, Some(10));

    let b = &accounts[1];
    assert_eq!(b.targets()[0].tolerance_days, 5);
    assert_eq!(b.targets()[0].day, None);
    Ok(())
}

#[tokio::test]
async fn unreachable_table_is_an_error() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/contas_portal"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Invalid API key"
        })))
        .mount(&server)
        .await;

    let err = source(&server)?.load().await.expect_err("401 must fail");
    let message = format!("{err:#}");
    assert!(message.contains("contas_portal"));
    assert!(message.contains("401"));
    Ok(())
}

#[tokio::test]
async fn active_filter_column_is_configurable() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/contas_portal"))
        .and(query_param("ativo", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "Loja C", "document": "111", "password": "pw", "ativo": true}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/contas_portal_ucs"))
        .and(query_param("ativo", "eq.true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"account_id": 1, "uc_code": "900", "ativo": true}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let accounts = source(&server)?.with_active_column("ativo").load().await?;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].targets()[0].uc.as_str(), "900");

    let received = server.received_requests().await.unwrap_or_default();
    assert!(received.iter().all(|r| !r.url.query().unwrap_or("").contains("active=")));
    Ok(())
}
