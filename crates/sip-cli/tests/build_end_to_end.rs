use assert_cmd::Command;
use std::io::Write;

#[test]
fn build_writes_a_package_with_a_single_asset() {
    let dir = tempfile::tempdir().unwrap();
    let asset = dir.path().join("a.tif");
    std::fs::File::create(&asset).unwrap().write_all(b"0123456789").unwrap();
    let output = dir.path().join("out.zip");

    Command::cargo_bin("sip")
        .unwrap()
        .args([
            "build",
            "--output",
            output.to_str().unwrap(),
            "--parent-ref",
            "dest-folder",
            "--title",
            "a",
        ])
        .arg(&asset)
        .assert()
        .success();

    assert!(output.exists());
    let zip_file = std::fs::File::open(&output).unwrap();
    let mut archive = zip::ZipArchive::new(zip_file).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.iter().any(|n| n.ends_with("/content/a.tif")));
    assert!(names.iter().any(|n| n.ends_with("/metadata.xml")));
    assert!(names.iter().any(|n| n.ends_with(".protocol")));
}

#[test]
fn build_requires_at_least_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.zip");

    Command::cargo_bin("sip")
        .unwrap()
        .args([
            "build",
            "--output",
            output.to_str().unwrap(),
            "--parent-ref",
            "dest-folder",
            "--title",
            "a",
        ])
        .assert()
        .failure();
}
