use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::tempdir;

use assert_cmd::prelude::*;
use predicates::prelude::*;

const UUID: &str = "0706000000000000000000000000001a";

/// An MCLF v2.5 trustlet with a 0x100 byte text segment.
fn trustlet(service_version: u32) -> Vec<u8> {
    let mut image = vec![0u8; 0x100];
    image[..4].copy_from_slice(b"MCLF");
    let words: [(usize, u32); 8] = [
        (0x04, 0x2_0005),
        (0x08, 0b1001),
        (0x10, 3),
        (0x14, 1),
        (0x30, 0x1000),
        (0x34, 0x100),
        (0x38, 0x1100),
        (0x48, service_version),
    ];
    for (offset, value) in words.iter() {
        image[*offset..*offset + 4].copy_from_slice(&value.to_le_bytes());
    }
    image[0x18..0x28].copy_from_slice(&hex::decode(UUID).unwrap());
    image
}

fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

#[test]
fn parse_kinibi_trustlet() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(format!("{}.tlbin", UUID));
    write(&path, &trustlet(3));

    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("parse").arg(&path).args(["-f", "json"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"tee-format\":\"kinibi\""))
        .stdout(predicate::str::contains(format!("\"identity\":\"{}\"", UUID)))
        .stdout(predicate::str::contains("\"rollback-counter\":3"));
}

#[test]
fn parse_unknown_container_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("random.bin");
    write(&path, b"definitely not a trusted application");

    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("parse").arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Error: Failed to parse"));
}

#[test]
fn scan_reports_diagnostics() {
    let dir = tempdir().unwrap();
    write(&dir.path().join("mcRegistry").join(format!("{}.tlbin", UUID)), &trustlet(5));
    let mut truncated = trustlet(5);
    truncated.truncate(0x40);
    write(&dir.path().join("broken.tlbin"), &truncated);
    write(&dir.path().join("README"), b"nothing to see");

    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("scan").arg(dir.path()).args(["--format", "toml"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("rollback-counter = 5"))
        .stdout(predicate::str::contains("[[diagnostics]]"))
        .stdout(predicate::str::contains("broken.tlbin"))
        .stdout(predicate::str::contains("README").not());
}

#[test]
fn carve_sboot() {
    let dir = tempdir().unwrap();
    let sboot = dir.path().join("sboot.bin");
    let mut image = b"BOOTLOADER".to_vec();
    image.extend_from_slice(&trustlet(2));
    image.extend_from_slice(&[0xff; 64]);
    write(&sboot, &image);

    let out = dir.path().join("out");
    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("carve").arg(&sboot).arg(&out);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(format!("{}.tlbin", UUID)));

    let carved = fs::read(out.join(format!("{}.tlbin", UUID))).unwrap();
    assert_eq!(carved, trustlet(2));
}

#[test]
fn unify_copies_whole_images() {
    let dir = tempdir().unwrap();
    let chunks = dir.path().join("chunks");
    let mut elf = vec![0u8; 0x34];
    elf[..6].copy_from_slice(b"\x7fELF\x01\x01");
    elf[0x12] = 40;
    write(&chunks.join("cmnlib.mbn"), &elf);
    write(&chunks.join("notes.txt"), b"ignored");

    let out = dir.path().join("unified");
    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("unify").arg(&chunks).arg(&out);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("copied"));
    assert_eq!(fs::read(out.join("cmnlib.mbn")).unwrap(), elf);
    assert!(!out.join("notes.txt").exists());
}

#[test]
fn verify_rejects_garbage() {
    let dir = tempdir().unwrap();
    let message = dir.path().join("message");
    let signature = dir.path().join("signature");
    write(&message, b"message");
    write(&signature, &[0u8; 256]);

    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("verify")
        .arg("--message").arg(&message)
        .arg("--certificate").arg("tests/data/ta-signer.der")
        .arg("--signature").arg(&signature)
        .arg("--exhaustive");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("signature does not verify"));
}

#[test]
fn analyze_dataset() {
    let dir = tempdir().unwrap();
    let releases = [("210101", 3), ("210501", 3), ("210901", 4)];
    for (version, counter) in releases.iter() {
        let path = dir.path()
            .join("firmware/oppo/a73")
            .join(version)
            .join("vendor/app/mcRegistry")
            .join(format!("{}.tlbin", UUID));
        write(&path, &trustlet(*counter));
    }

    write(&dir.path().join("vulnerabilities.toml"), format!(r#"
[[vulnerability]]
key = "{}"

[[vulnerability.disclosures]]
disclosure-start = "6/2021"
patch = "8/2021"
id = "CVE-2021-0001"
source = "public"
class = "buffer-overflow"
"#, UUID).as_bytes());

    let config = dir.path().join("config.toml");
    write(&config, br#"
firmware-root = "firmware"
vulnerability-databases = ["vulnerabilities.toml"]

[vendors.oppo]
build-date = "directory-name"

[vendors.oppo.devices]
a73 = "kinibi"
"#);

    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("analyze").arg(&config).args(["--exposures", "--no-progress"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"neutralized\": 1"))
        .stdout(predicate::str::contains("\"rollback-exposed\": 0"))
        .stdout(predicate::str::contains("\"public-vulnerabilities\": 1"))
        .stdout(predicate::str::contains("\"neutralizing-version\": \"210901\""));
}

#[test]
fn analyze_missing_config_fails() {
    let dir = tempdir().unwrap();
    let mut cmd = Command::cargo_bin("ta-rollback").unwrap();
    cmd.arg("analyze").arg(dir.path().join("missing.toml"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config"));
}
