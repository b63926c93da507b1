//! Renewal scheduler on a paused clock

mod common;

use std::time::Duration;

use common::{domains, Harness, Response, ScriptedClient, EMAIL};
use hop_ssl::{CertificateStatus, RenewalScheduler, SweepSummary};

const HOUR: Duration = Duration::from_secs(3600);

fn harness() -> Harness {
    Harness::with_client(ScriptedClient::new().with_default(Response::no_renewal("example.com")))
}

fn renew_calls(h: &Harness) -> Vec<common::Call> {
    h.client
        .calls()
        .into_iter()
        .filter(|c| c.args.contains(&"renew".to_string()))
        .collect()
}

#[tokio::test]
async fn test_sweep_isolates_failures() {
    let h = harness();
    let provider = h.cloudflare_provider();

    h.client.push(Response::Deposit { days: 5 });
    let failing = h
        .issuer
        .issue(&domains(&["a.example.com"]), &provider, EMAIL)
        .await
        .unwrap();
    h.client.push(Response::Deposit { days: 10 });
    h.issuer
        .issue(&domains(&["b.example.com"]), &provider, EMAIL)
        .await
        .unwrap();
    h.client.push(Response::Deposit { days: 90 });
    h.issuer
        .issue(&domains(&["c.example.com"]), &provider, EMAIL)
        .await
        .unwrap();

    // Candidates are renewed soonest-expiring first
    h.client.push(Response::fail("cloudflare: Authentication error"));
    let scheduler = RenewalScheduler::new(h.issuer.clone(), EMAIL, 30);

    let summary = scheduler.sweep().await;
    assert_eq!(
        summary,
        SweepSummary {
            candidates: 2,
            renewed: 0,
            not_due: 1,
            failed: 1,
        }
    );
    assert_eq!(
        h.service.get_certificate(&failing.id).unwrap().status,
        CertificateStatus::Error
    );

    // Failed records drop out of the candidate set
    let summary = scheduler.sweep().await;
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.not_due, 1);
}

#[tokio::test]
async fn test_sweep_retries_conflicts_but_not_throttling() {
    let h = harness();
    let provider = h.cloudflare_provider();

    h.client.push(Response::Deposit { days: 5 });
    let conflicted = h
        .issuer
        .issue(&domains(&["a.example.com"]), &provider, EMAIL)
        .await
        .unwrap();
    h.client.push(Response::Deposit { days: 10 });
    let throttled = h
        .issuer
        .issue(&domains(&["b.example.com"]), &provider, EMAIL)
        .await
        .unwrap();

    h.client
        .push(Response::fail("cloudflare: TXT record already exists"));
    h.client.push(Response::fail(
        "acme: error: 429 :: urn:ietf:params:acme:error:rateLimited: too many certificates",
    ));
    let scheduler = RenewalScheduler::new(h.issuer.clone(), EMAIL, 30);

    let summary = scheduler.sweep().await;
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.failed, 2);

    assert_eq!(
        h.service.get_certificate(&conflicted.id).unwrap().status,
        CertificateStatus::Active
    );
    let stored = h.service.get_certificate(&throttled.id).unwrap();
    assert_eq!(stored.status, CertificateStatus::Error);
    assert!(stored.error_message.is_some());

    // Only the conflicted record is picked up again
    let summary = scheduler.sweep().await;
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.not_due, 1);
}

#[tokio::test]
async fn test_sweep_skipped_without_email() {
    let h = harness();
    let provider = h.cloudflare_provider();
    h.client.push(Response::Deposit { days: 5 });
    h.issuer
        .issue(&domains(&["example.com"]), &provider, EMAIL)
        .await
        .unwrap();

    let scheduler = RenewalScheduler::new(h.issuer.clone(), "", 30);
    assert_eq!(scheduler.sweep().await, SweepSummary::default());
    assert!(renew_calls(&h).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_sweeps_each_interval_until_stopped() {
    let h = harness();
    let provider = h.cloudflare_provider();
    h.client.push(Response::Deposit { days: 10 });
    h.issuer
        .issue(&domains(&["example.com"]), &provider, EMAIL)
        .await
        .unwrap();

    let handle = RenewalScheduler::new(h.issuer.clone(), EMAIL, 30)
        .with_interval(HOUR)
        .start();
    assert!(handle.is_running());

    // First sweep runs immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(renew_calls(&h).len(), 1);

    tokio::time::sleep(HOUR).await;
    assert_eq!(renew_calls(&h).len(), 2);

    handle.set_email("certs@example.com");
    assert_eq!(handle.email(), "certs@example.com");
    tokio::time::sleep(HOUR).await;

    let calls = renew_calls(&h);
    assert_eq!(calls.len(), 3);
    assert!(calls[2].has_arg_pair("--email", "certs@example.com"));

    handle.stop().await;
    tokio::time::sleep(HOUR * 3).await;
    assert_eq!(renew_calls(&h).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_scheduler() {
    let h = harness();

    let handle = RenewalScheduler::new(h.issuer.clone(), EMAIL, 30)
        .with_interval(HOUR)
        .start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(handle);

    let provider = h.cloudflare_provider();
    h.client.push(Response::Deposit { days: 10 });
    h.issuer
        .issue(&domains(&["example.com"]), &provider, EMAIL)
        .await
        .unwrap();

    tokio::time::sleep(HOUR * 2).await;
    assert!(renew_calls(&h).is_empty());
}
