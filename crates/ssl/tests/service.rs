//! Service facade: providers, queries, cleanup and client probing

mod common;

use common::{domains, Harness, Response, ScriptedClient, EMAIL};
use hop_common::CertificateId;
use hop_ssl::{AcmeError, CertificateStore, DnsProviderUpdate, JsonStore, LogAction, ProviderKind};

#[test]
fn test_create_provider_validates_credentials() {
    let h = Harness::new();

    let err = h
        .service
        .create_dns_provider("dnspod", ProviderKind::TencentCloud, r#"{"secretId": "id"}"#)
        .unwrap_err();
    assert!(matches!(err, AcmeError::Decode(_)));

    let err = h
        .service
        .create_dns_provider("  ", ProviderKind::Cloudflare, r#"{"apiToken": "t"}"#)
        .unwrap_err();
    assert!(matches!(err, AcmeError::InvalidRequest(_)));

    assert!(h.service.list_dns_providers().unwrap().is_empty());
}

#[test]
fn test_provider_listing_hides_credentials() {
    let h = Harness::new();
    let id = h.cloudflare_provider();

    let listed = h.service.list_dns_providers().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
    assert_eq!(listed[0].kind, ProviderKind::Cloudflare);

    let json = serde_json::to_string(&listed).unwrap();
    assert!(!json.contains("cf-token"));
    assert!(json.contains("\"kind\":\"cloudflare\""));
}

#[test]
fn test_update_provider_revalidates() {
    let h = Harness::new();
    let id = h.cloudflare_provider();

    // The Cloudflare blob does not decode as AliDNS credentials
    let err = h
        .service
        .update_dns_provider(
            &id,
            DnsProviderUpdate {
                kind: Some(ProviderKind::AliDns),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, AcmeError::Decode(_)));
    assert_eq!(
        h.service.list_dns_providers().unwrap()[0].kind,
        ProviderKind::Cloudflare
    );

    let updated = h
        .service
        .update_dns_provider(
            &id,
            DnsProviderUpdate {
                name: Some("aliyun".into()),
                kind: Some(ProviderKind::AliDns),
                credential_blob: Some(
                    r#"{"accessKeyId": "ak", "accessKeySecret": "sk"}"#.into(),
                ),
            },
        )
        .unwrap();
    assert_eq!(updated.name, "aliyun");
    assert_eq!(updated.kind, ProviderKind::AliDns);

    let renamed = h
        .service
        .update_dns_provider(
            &id,
            DnsProviderUpdate {
                name: Some("aliyun-prod".into()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "aliyun-prod");
    assert_eq!(renamed.created_at, updated.created_at);
}

#[tokio::test]
async fn test_delete_provider_keeps_certificates() {
    let h = Harness::new();
    let id = h.cloudflare_provider();
    let cert = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap();

    h.service.delete_dns_provider(&id).unwrap();
    assert!(h.service.list_dns_providers().unwrap().is_empty());
    assert_eq!(h.service.get_certificate(&cert.id).unwrap().dns_provider_id, id);

    let err = h.service.renew(&cert.id, EMAIL).await.unwrap_err();
    assert!(matches!(err, AcmeError::ProviderNotFound(_)));

    assert!(matches!(
        h.service.delete_dns_provider(&id),
        Err(AcmeError::ProviderNotFound(_))
    ));
}

#[tokio::test]
async fn test_issue_refused_when_client_missing() {
    let h = Harness::with_client(ScriptedClient::new().not_installed());
    let id = h.cloudflare_provider();

    let err = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap_err();

    assert!(matches!(err, AcmeError::ClientUnavailable { .. }));
    assert!(h.client.calls().is_empty());
    assert!(!h.service.check_client_installed());
    assert_eq!(h.service.client_version().await, "");
}

#[tokio::test]
async fn test_client_version_first_line() {
    let h = Harness::new();
    assert!(h.service.check_client_installed());
    assert_eq!(
        h.service.client_version().await,
        "lego version 4.17.4 linux/amd64"
    );
}

#[tokio::test]
async fn test_cleanup_appends_log() {
    let h = Harness::new();
    let id = h.cloudflare_provider();
    let cert = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap();

    assert_eq!(h.service.cleanup(&cert.id).unwrap(), 4);
    assert_eq!(h.service.cleanup(&cert.id).unwrap(), 0);

    let logs = h.service.get_logs(&cert.id, None).unwrap();
    let actions: Vec<LogAction> = logs.iter().map(|l| l.action).collect();
    assert_eq!(
        actions,
        vec![LogAction::Cleanup, LogAction::Cleanup, LogAction::Create]
    );
    assert_eq!(h.service.get_logs(&cert.id, Some(1)).unwrap().len(), 1);

    assert!(matches!(
        h.service.cleanup(&CertificateId::new("missing")),
        Err(AcmeError::CertificateNotFound(_))
    ));
}

#[tokio::test]
async fn test_cleanup_domain_without_record() {
    let h = Harness::new();
    common::deposit(
        &h.layout.work_dir,
        "orphan.example.com",
        &domains(&["orphan.example.com"]),
        90,
    );

    assert_eq!(h.service.cleanup_domain("orphan.example.com").unwrap(), 4);
    assert_eq!(h.service.cleanup_domain("orphan.example.com").unwrap(), 0);
}

#[tokio::test]
async fn test_delete_removes_record_and_logs() {
    let h = Harness::new();
    let id = h.cloudflare_provider();
    let cert = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap();

    h.service.delete(&cert.id).unwrap();

    assert!(matches!(
        h.service.get_certificate(&cert.id),
        Err(AcmeError::CertificateNotFound(_))
    ));
    assert!(h.service.get_logs(&cert.id, None).unwrap().is_empty());
    assert!(matches!(
        h.service.delete(&cert.id),
        Err(AcmeError::CertificateNotFound(_))
    ));
    // Installed files are left for the nginx layer
    assert!(h.token_path("example.com.crt").is_file());
}

#[tokio::test]
async fn test_list_expiring_soon_uses_window() {
    let h = Harness::new();
    let id = h.cloudflare_provider();

    h.client.push(Response::Deposit { days: 10 });
    let soon = h
        .service
        .issue(&domains(&["soon.example.com"]), &id, EMAIL)
        .await
        .unwrap();
    h.client.push(Response::Deposit { days: 90 });
    h.service
        .issue(&domains(&["later.example.com"]), &id, EMAIL)
        .await
        .unwrap();

    let expiring = h.service.list_expiring_soon(30).unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].id, soon.id);

    assert_eq!(h.service.list_expiring_soon(120).unwrap().len(), 2);
    assert_eq!(h.service.list_certificates().unwrap().len(), 2);
}

#[tokio::test]
async fn test_active_certificate_paths() {
    let h = Harness::new();
    let id = h.cloudflare_provider();
    let cert = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap();

    let paths = h
        .service
        .active_certificate_paths("example.com")
        .unwrap()
        .unwrap();
    assert_eq!(paths.cert, h.token_path("example.com.crt"));
    assert_eq!(paths.key, h.token_path("example.com.key"));
    assert!(h.service.active_certificate_paths("other.com").unwrap().is_none());

    h.client.push(Response::fail("cloudflare: Authentication error"));
    assert!(h.service.renew(&cert.id, EMAIL).await.is_err());
    assert!(h
        .service
        .active_certificate_paths("example.com")
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let h = Harness::new();
    let id = h.cloudflare_provider();
    let cert = h
        .service
        .issue(&domains(&["example.com"]), &id, EMAIL)
        .await
        .unwrap();

    let reopened = JsonStore::open(&h.layout.store_file).unwrap();
    assert_eq!(reopened.get_certificate(&cert.id).unwrap(), cert);
    assert_eq!(reopened.list_dns_providers().unwrap().len(), 1);
    assert_eq!(reopened.get_certificate_logs(&cert.id, 10).unwrap().len(), 1);
}
