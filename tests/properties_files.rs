use std::fs;

use ipaas_deployer::properties;

#[test]
fn replace_write_sorts_and_escapes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("String.properties");
    let entries = vec![
        ("k2".to_string(), "a\\b".to_string()),
        ("k1".to_string(), "line1\nline2".to_string()),
    ];
    properties::write(&path, &entries, true).expect("write");

    let on_disk = fs::read_to_string(&path).expect("read file");
    assert_eq!(on_disk, "k1=line1\\nline2\nk2=a\\\\b\n");

    let mut read_back = properties::read(&path).expect("read");
    read_back.sort();
    assert_eq!(
        read_back,
        vec![
            ("k1".to_string(), "line1\nline2".to_string()),
            ("k2".to_string(), "a\\b".to_string()),
        ]
    );
}

#[test]
fn add_only_write_reports_new_key_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("String.properties");
    properties::write(&path, &[("a".to_string(), "1".to_string())], true).expect("seed");

    let added = properties::write(
        &path,
        &[
            ("a".to_string(), "ignored".to_string()),
            ("b".to_string(), "2".to_string()),
            ("c".to_string(), "3".to_string()),
        ],
        false,
    )
    .expect("merge");
    assert_eq!(added, 2);
    assert_eq!(
        fs::read_to_string(&path).expect("read"),
        "a=1\nb=2\nc=3\n"
    );
}

#[test]
fn merge_appends_final_newline_when_absent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("parameters.prop");
    let output = dir.path().join("parameters.modified.prop");
    fs::write(&input, "endpoint=old").expect("seed");
    properties::merge(
        &input,
        &[("endpoint".to_string(), "new".to_string())],
        &output,
    )
    .expect("merge");
    assert_eq!(fs::read_to_string(&output).expect("read"), "endpoint=new\n");
}
