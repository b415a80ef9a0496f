use openssl::asn1::Asn1Time;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Ref, X509StoreContext};
use pki_ledger::serial_counter::serial_from_hex;
use pki_ledger::{
    initialize, issue_certificate, load_ca, load_certificate, read_records, revoke,
    CertificateData, PkiError, PkiRoot, RecordStatus, CA_NAME,
};
use std::fs;
use tempfile::TempDir;

fn bootstrapped_root() -> (TempDir, PkiRoot) {
    let dir = TempDir::new().unwrap();
    let root = initialize(dir.path().join("pki")).unwrap();
    issue_certificate(
        &root,
        CA_NAME,
        &CertificateData::certificate_authority("Integration Root CA", 3650),
    )
    .unwrap();
    (dir, root)
}

fn common_name(cert: &X509Ref) -> String {
    let entry = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_slice()
        .to_vec();
    String::from_utf8(entry).unwrap()
}

#[test]
fn issue_then_revoke_round_trip() {
    let (_dir, root) = bootstrapped_root();

    let issued = issue_certificate(&root, "server", &CertificateData::leaf("server.example", 365))
        .unwrap();
    assert_eq!(issued.serial, "01");
    assert_eq!(fs::read_to_string(root.serial_path()).unwrap(), "02\n");

    let ledger = fs::read_to_string(root.index_path()).unwrap();
    let fields: Vec<&str> = ledger.trim_end_matches('\n').split('\t').collect();
    assert_eq!(fields.len(), 6);
    assert_eq!(fields[0], "V");
    assert_eq!(fields[1].len(), 13);
    assert!(fields[1].ends_with('Z'));
    assert_eq!(fields[2], "");
    assert_eq!(&fields[3..], ["01", "server.crt", "/CN=server.example"]);

    let record = revoke(&root, &serial_from_hex("01").unwrap()).unwrap();
    assert_eq!(record.status, RecordStatus::Revoked);
    assert!(record.revoked_at.is_some());

    let revoked_ledger = fs::read_to_string(root.index_path()).unwrap();
    assert!(revoked_ledger.starts_with("R\t"));
    assert!(revoked_ledger.ends_with("\t01\tserver.crt\t/CN=server.example\n"));
    assert_eq!(revoked_ledger.lines().count(), 1);

    let err = revoke(&root, &serial_from_hex("01").unwrap()).unwrap_err();
    assert!(matches!(err, PkiError::AlreadyRevoked { .. }));
    assert_eq!(fs::read_to_string(root.index_path()).unwrap(), revoked_ledger);
}

#[test]
fn ledger_expiry_matches_certificate_not_after() {
    let (_dir, root) = bootstrapped_root();
    let issued = issue_certificate(&root, "server", &CertificateData::leaf("server.example", 365))
        .unwrap();

    let records = read_records(&root).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(Some(&records[0]), issued.ledger_record.as_ref());

    let recorded = Asn1Time::from_unix(records[0].expires_at.timestamp()).unwrap();
    let diff = recorded.diff(issued.certificate.not_after()).unwrap();
    assert_eq!((diff.days, diff.secs), (0, 0));
}

#[test]
fn leaf_outliving_the_ledger_window_is_refused() {
    let (_dir, root) = bootstrapped_root();
    let err = issue_certificate(&root, "far", &CertificateData::leaf("far.example", 10_000))
        .unwrap_err();
    assert!(matches!(err, PkiError::ExpiryOutOfRange { .. }));
    assert!(read_records(&root).unwrap().is_empty());
    assert!(!root.private_key_path("far").exists());
}

#[test]
fn leaf_serials_increase_and_ledger_follows_issuance_order() {
    let (_dir, root) = bootstrapped_root();

    let names = ["alpha", "bravo", "charlie", "delta", "echo"];
    for (n, name) in names.iter().enumerate() {
        let issued = issue_certificate(
            &root,
            name,
            &CertificateData::leaf(format!("{name}.example"), 30),
        )
        .unwrap();
        assert_eq!(issued.serial, format!("{:02X}", n + 1));
    }

    let records = read_records(&root).unwrap();
    assert_eq!(records.len(), names.len());
    for (n, (record, name)) in records.iter().zip(names).enumerate() {
        assert_eq!(record.serial, format!("{:02X}", n + 1));
        assert_eq!(record.filename, format!("{name}.crt"));
        assert_eq!(record.common_name(), Some(format!("{name}.example").as_str()));
        assert_eq!(record.status, RecordStatus::Valid);
    }
    assert_eq!(fs::read_to_string(root.serial_path()).unwrap(), "06\n");
}

#[test]
fn issued_leaf_verifies_against_the_ca() {
    let (_dir, root) = bootstrapped_root();
    let issued = issue_certificate(
        &root,
        "web",
        &CertificateData::leaf("web.example", 90).with_dns_names(["web.example", "www.example"]),
    )
    .unwrap();

    let (ca_certificate, _ca_key) = load_ca(&root).unwrap();
    let leaf = load_certificate(root.issued_certificate_path("web")).unwrap();
    assert_eq!(leaf.to_der().unwrap(), issued.certificate.to_der().unwrap());
    assert_eq!(common_name(&leaf), "web.example");
    assert_eq!(
        leaf.issuer_name().to_der().unwrap(),
        ca_certificate.subject_name().to_der().unwrap()
    );

    let mut store = X509StoreBuilder::new().unwrap();
    store.add_cert(ca_certificate).unwrap();
    let store = store.build();
    let chain = Stack::new().unwrap();
    let mut context = X509StoreContext::new().unwrap();
    let verified = context
        .init(&store, &leaf, &chain, |ctx| ctx.verify_cert())
        .unwrap();
    assert!(verified);
}

#[test]
fn reissuing_a_name_leaves_existing_artifacts_alone() {
    let (_dir, root) = bootstrapped_root();
    issue_certificate(&root, "server", &CertificateData::leaf("server.example", 365)).unwrap();

    let key_before = fs::read(root.private_key_path("server")).unwrap();
    let cert_before = fs::read(root.issued_certificate_path("server")).unwrap();
    let ledger_before = fs::read(root.index_path()).unwrap();
    let serial_before = fs::read(root.serial_path()).unwrap();

    let err = issue_certificate(&root, "server", &CertificateData::leaf("other.example", 365))
        .unwrap_err();
    assert!(matches!(err, PkiError::AlreadyExists { .. }));

    assert_eq!(fs::read(root.private_key_path("server")).unwrap(), key_before);
    assert_eq!(fs::read(root.issued_certificate_path("server")).unwrap(), cert_before);
    assert_eq!(fs::read(root.index_path()).unwrap(), ledger_before);
    assert_eq!(fs::read(root.serial_path()).unwrap(), serial_before);
}

#[test]
fn reopened_root_continues_where_it_left_off() {
    let (dir, root) = bootstrapped_root();
    issue_certificate(&root, "first", &CertificateData::leaf("first.example", 30)).unwrap();
    drop(root);

    let reopened = PkiRoot::open(dir.path().join("pki")).unwrap();
    let issued =
        issue_certificate(&reopened, "second", &CertificateData::leaf("second.example", 30))
            .unwrap();
    assert_eq!(issued.serial, "02");
    assert_eq!(read_records(&reopened).unwrap().len(), 2);
}

#[test]
fn initializing_twice_is_refused() {
    let (dir, _root) = bootstrapped_root();
    let err = initialize(dir.path().join("pki")).unwrap_err();
    assert!(matches!(err, PkiError::AlreadyExists { .. }));
}
