use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use fatura_fetch::models::UcCode;
use fatura_fetch::storage::{BlobStore, DedupStore, SupabaseStorage};
use fatura_fetch::Error;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn storage(server: &MockServer) -> Result<SupabaseStorage> {
    Ok(SupabaseStorage::new(
        server.uri(),
        "faturas",
        SecretString::from("service-key".to_string()),
        Duration::from_secs(5),
    )?)
}

fn pdf() -> Vec<u8> {
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(1024, b'0');
    bytes
}

#[tokio::test]
async fn exists_lists_the_account_folder() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/list/faturas"))
        .and(header("apikey", "service-key"))
        .and(header("authorization", "Bearer service-key"))
        .and(body_partial_json(json!({
            "prefix": "2025-11/Condominio_Azul",
            "offset": 0,
            "sortBy": {"column": "name", "order": "asc"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "700123.pdf", "id": "a"},
            {"name": "700999.pdf", "id": "b"}
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let store = DedupStore::new(Arc::new(storage(&server)?));
    let month = "2025-11";
    assert!(store.exists(month, "Condominio Azul", &UcCode::parse("700-123")?).await?);
    assert!(!store.exists(month, "Condominio Azul", &UcCode::parse("700124")?).await?);
    Ok(())
}

#[tokio::test]
async fn put_upserts_pdf_at_the_invoice_key() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/faturas/2025-11/Loja_A/700123.pdf"))
        .and(header("x-upsert", "true"))
        .and(header("content-type", "application/pdf"))
        .and(header("authorization", "Bearer service-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Key": "faturas/2025-11/Loja_A/700123.pdf"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = DedupStore::new(Arc::new(storage(&server)?));
    let key = store
        .put(pdf(), "2025-11", "Loja A", &UcCode::parse("700123")?)
        .await?;
    assert_eq!(key.as_str(), "2025-11/Loja_A/700123.pdf");

    let received = server.received_requests().await.unwrap_or_default();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, pdf());
    Ok(())
}

#[tokio::test]
async fn list_pages_until_a_short_page() -> Result<()> {
    let server = MockServer::start().await;

    let full_page: Vec<_> = (0..1000).map(|i| json!({"name": format!("{i}.pdf")})).collect();
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/list/faturas"))
        .and(body_partial_json(json!({"offset": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(full_page))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/storage/v1/object/list/faturas"))
        .and(body_partial_json(json!({"offset": 1000})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"name": "last.pdf"}])))
        .mount(&server)
        .await;

    let names = storage(&server)?.list("2025-11/A").await?;
    assert_eq!(names.len(), 1001);
    assert_eq!(names.last().map(String::as_str), Some("last.pdf"));
    Ok(())
}

#[tokio::test]
async fn http_errors_become_storage_errors() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/storage/v1/object/faturas/2025-11/A/1.pdf"))
        .respond_with(ResponseTemplate::new(403).set_body_string("x".repeat(2000)))
        .mount(&server)
        .await;

    let err = storage(&server)?
        .upload("2025-11/A/1.pdf", pdf(), "application/pdf")
        .await
        .expect_err("403 must fail");
    match err {
        Error::Storage(message) => {
            assert!(message.contains("403"));
            assert!(message.len() < 500);
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
