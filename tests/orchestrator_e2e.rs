mod support;

use std::sync::Arc;

use anyhow::Result;
use fatura_fetch::clock::FixedClock;
use fatura_fetch::debug::DebugRecorder;
use fatura_fetch::orchestrator::Orchestrator;
use fatura_fetch::portal::NavState;
use fatura_fetch::storage::{DedupStore, MemoryBlobStore};
use support::{account, noon_utc, pdf_bytes, uc, FailAt, MockPortal, UcScript};
use tempfile::TempDir;

fn orchestrator(portal: &MockPortal, blobs: &Arc<MemoryBlobStore>, debug_dir: &TempDir) -> Orchestrator {
    Orchestrator::new(
        Arc::new(portal.clone()),
        DedupStore::new(blobs.clone()),
        DebugRecorder::new(debug_dir.path()).with_mirror(blobs.clone()),
        chrono_tz::America::Sao_Paulo,
    )
    .with_clock(Arc::new(FixedClock::new(noon_utc())))
}

#[tokio::test]
async fn mixed_account_stores_new_skips_existing_and_survives_failures() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    blobs.insert("2025-11/A/111.pdf", pdf_bytes("old")).await;

    let portal = MockPortal::new(&[&["111", "222", "333", "444", "999"]])
        .with_uc("222", UcScript::Invoice(pdf_bytes("222")))
        .with_uc("333", UcScript::Fail(FailAt::InvoiceMenu));
    let orch = orchestrator(&portal, &blobs, &dir);

    let accounts = [account("A", &["111", "222", "333", "444"])];
    let report = orch.run(&accounts).await;

    assert_eq!(report.month, "2025-11");
    let a = &report.accounts[0];
    // 111 was stored before the run: the session skips it without opening anything.
    assert_eq!(a.already_stored, vec!["111"]);
    // 333 fails in the invoice menu and the session carries on to 444.
    assert_eq!(a.uploaded, vec!["2025-11/A/222.pdf", "2025-11/A/444.pdf"]);
    assert_eq!(a.failed.len(), 1);
    assert_eq!(a.failed[0].uc, "333");
    assert_eq!(a.failed[0].kind, "structural");
    assert!(!a.failed[0].debug.is_empty());
    assert_eq!(a.unresolved, vec!["333"]);
    assert!(a.fatal.is_none());
    assert_eq!(a.end_state, Some(NavState::PagesExhausted));

    let log = portal.log();
    assert_eq!(log.projects_opened, vec![uc("222"), uc("333"), uc("444")]);
    assert_eq!(log.extractions, vec![uc("222"), uc("444")]);
    // Back to the list after every opened UC, success or not.
    assert_eq!(log.returns_to_list, vec![0, 0, 0]);
    assert_eq!(log.sessions_closed, 1);
    drop(log);

    assert_eq!(blobs.get("2025-11/A/222.pdf").await, Some(pdf_bytes("222")));
    assert_eq!(blobs.get("2025-11/A/444.pdf").await, Some(pdf_bytes("444")));
    assert_eq!(blobs.get("2025-11/A/111.pdf").await, Some(pdf_bytes("old")));
    // Two invoices plus the png/html pair of the 333 dump.
    assert_eq!(blobs.upload_count(), 4);
    let keys = blobs.keys().await;
    assert!(keys
        .iter()
        .any(|k| k.starts_with("debug/2025-11/A/uc_333_structural_") && k.ends_with(".png")));
    Ok(())
}

#[tokio::test]
async fn every_target_stored_means_no_browser() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    blobs.insert("2025-11/A/111.pdf", pdf_bytes("111")).await;
    blobs.insert("2025-11/A/222.pdf", pdf_bytes("222")).await;

    let portal = MockPortal::new(&[&["111", "222"]]);
    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["111", "222"])])
        .await;

    let a = &report.accounts[0];
    assert_eq!(a.already_stored, vec!["111", "222"]);
    assert_eq!(a.end_state, Some(NavState::AllTargetsDone));
    assert!(portal.log().sessions_opened.is_empty());
    assert_eq!(blobs.upload_count(), 0);
    Ok(())
}

#[tokio::test]
async fn stops_as_soon_as_every_target_is_done() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100", "200"], &["300", "400"], &["500"]]);

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["200", "300"])])
        .await;

    let a = &report.accounts[0];
    assert_eq!(a.uploaded, vec!["2025-11/A/200.pdf", "2025-11/A/300.pdf"]);
    assert_eq!(a.end_state, Some(NavState::AllTargetsDone));
    assert_eq!(a.pages_visited, 2);

    let log = portal.log();
    assert_eq!(log.projects_opened, vec![uc("200"), uc("300")]);
    assert_eq!(log.page_advances, 1);
    // The page index comes back with each return so the list can be restored.
    assert_eq!(log.returns_to_list, vec![0, 1]);
    Ok(())
}

#[tokio::test]
async fn missing_targets_end_with_exhausted_pages() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100"], &["200"]]);

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["200", "777"])])
        .await;

    let a = &report.accounts[0];
    assert_eq!(a.uploaded, vec!["2025-11/A/200.pdf"]);
    assert_eq!(a.unresolved, vec!["777"]);
    assert_eq!(a.end_state, Some(NavState::PagesExhausted));
    assert_eq!(a.pages_visited, 2);
    assert!(a.failed.is_empty());
    Ok(())
}

#[tokio::test]
async fn no_invoice_resolves_without_upload() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100", "200"]]).with_uc("100", UcScript::NoInvoice);

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["100", "200"])])
        .await;

    let a = &report.accounts[0];
    assert_eq!(a.no_invoice, vec!["100"]);
    assert_eq!(a.uploaded, vec!["2025-11/A/200.pdf"]);
    assert!(a.unresolved.is_empty());
    assert_eq!(a.end_state, Some(NavState::AllTargetsDone));
    assert_eq!(portal.log().extractions, vec![uc("200")]);
    Ok(())
}

#[tokio::test]
async fn failed_login_only_abandons_that_account() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100", "200"]]).with_failing_login("Broken");

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("Broken", &["100"]), account("Fine", &["200"])])
        .await;

    let broken = &report.accounts[0];
    assert!(broken.fatal.as_deref().is_some_and(|e| e.contains("login failed")));
    assert_eq!(broken.unresolved, vec!["100"]);
    assert!(broken.uploaded.is_empty());

    let fine = &report.accounts[1];
    assert!(fine.fatal.is_none());
    assert_eq!(fine.uploaded, vec!["2025-11/Fine/200.pdf"]);

    let log = portal.log();
    assert_eq!(log.logins, vec!["Broken", "Fine"]);
    assert_eq!(log.projects_opened, vec![uc("200")]);
    assert_eq!(log.sessions_closed, 2);
    drop(log);

    assert!(blobs
        .keys()
        .await
        .iter()
        .any(|k| k.starts_with("debug/2025-11/Broken/login_auth_")));
    assert_eq!(report.fatal_count(), 1);
    Ok(())
}

#[tokio::test]
async fn login_timeout_is_dumped_as_a_login_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100"]]).with_stalled_login("Slow");

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("Slow", &["100"])])
        .await;

    let slow = &report.accounts[0];
    assert!(slow.fatal.is_some());
    assert_eq!(slow.unresolved, vec!["100"]);
    assert!(portal.log().projects_opened.is_empty());

    let keys = blobs.keys().await;
    assert!(keys.iter().any(|k| k.starts_with("debug/2025-11/Slow/login_timeout_")));
    assert!(!keys.iter().any(|k| k.contains("session_")));
    Ok(())
}

#[tokio::test]
async fn extraction_failure_leaves_nothing_in_storage() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100", "200"]])
        .with_uc("100", UcScript::Fail(FailAt::Extract))
        .with_uc("200", UcScript::Invoice(b"<html>session expired</html>".to_vec()));

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["100", "200"])])
        .await;

    let a = &report.accounts[0];
    let kinds: Vec<_> = a.failed.iter().map(|f| (f.uc.as_str(), f.kind)).collect();
    assert_eq!(kinds, vec![("100", "extraction"), ("200", "storage")]);
    assert!(a.uploaded.is_empty());
    assert!(blobs.keys().await.iter().all(|k| k.starts_with("debug/")));
    Ok(())
}

#[tokio::test]
async fn broken_pagination_stops_the_account_with_a_dump() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100"], &["200"]]).with_broken_pagination();

    let report = orchestrator(&portal, &blobs, &dir)
        .run(&[account("A", &["100", "200"])])
        .await;

    let a = &report.accounts[0];
    assert_eq!(a.uploaded, vec!["2025-11/A/100.pdf"]);
    assert_eq!(a.unresolved, vec!["200"]);
    assert_eq!(a.end_state, Some(NavState::PagesExhausted));
    assert!(a.fatal.is_none());
    assert!(blobs
        .keys()
        .await
        .iter()
        .any(|k| k.starts_with("debug/2025-11/A/pagination_timeout_")));
    Ok(())
}

#[tokio::test]
async fn account_without_eligible_targets_is_skipped() -> Result<()> {
    let dir = TempDir::new()?;
    let blobs = Arc::new(MemoryBlobStore::new("faturas"));
    let portal = MockPortal::new(&[&["100"]]);
    let mut idle = account("Idle", &[]);
    // Day 5 with tolerance 2 is outside the window on the 20th.
    idle.add_target(fatura_fetch::models::Target::new(uc("100")).with_day(Some(5)));

    let report = orchestrator(&portal, &blobs, &dir).run(&[idle]).await;

    let a = &report.accounts[0];
    assert!(a.eligible.is_empty());
    assert!(a.end_state.is_none());
    assert!(portal.log().sessions_opened.is_empty());
    Ok(())
}
