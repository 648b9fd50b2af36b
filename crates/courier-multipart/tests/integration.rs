use std::fs;
use std::io::Cursor;

use courier_multipart::{Error, MultipartFormData};
use tempfile::tempdir;

#[test]
fn test_spooled_body_matches_in_memory_body() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    fs::write(&file, "line one\nline two\n").unwrap();

    let build = || {
        let mut form = MultipartFormData::with_boundary("courier.boundary.0000000100000002");
        form.append_data("plain value", "field");
        form.append_file(&file, "notes");
        form.append_reader(Cursor::new(vec![7u8; 64]), 64, "blob", "blob.bin", "application/octet-stream");
        form
    };

    let in_memory = build().encode().unwrap();

    let out = dir.path().join("spool").join("body");
    fs::create_dir_all(out.parent().unwrap()).unwrap();
    let mut spooled_form = build();
    spooled_form.write_encoded_data(&out).unwrap();

    assert_eq!(fs::read(&out).unwrap(), in_memory);
    assert_eq!(spooled_form.encoded_length(), in_memory.len() as u64);
}

#[test]
fn test_two_part_upload_layout_length() {
    let mut form = MultipartFormData::new();
    form.append_data(vec![b'a'; 1000], "first");
    form.append_data(vec![b'b'; 2000], "second");

    let boundary_len = form.boundary().len() as u64;
    let disposition = |name: &str| {
        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").len() as u64
    };

    let expected = (boundary_len + 4)
        + disposition("first")
        + 1000
        + (boundary_len + 6)
        + disposition("second")
        + 2000
        + (boundary_len + 8);

    assert_eq!(form.content_length(), 3000);
    assert_eq!(form.encoded_length(), expected);
    assert_eq!(form.encode().unwrap().len() as u64, expected);
}

#[test]
fn test_file_removed_after_append_fails_at_encode() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("gone.json");
    fs::write(&file, "{}").unwrap();

    let mut form = MultipartFormData::new();
    form.append_file(&file, "config");
    assert!(form.first_error().is_none());
    assert_eq!(form.parts()[0].headers()[1].1, "application/json");

    fs::remove_file(&file).unwrap();
    assert!(matches!(
        form.encode(),
        Err(Error::InputStreamCreationFailed { .. })
    ));
}

#[test]
fn test_output_path_without_file_name() {
    let mut form = MultipartFormData::new();
    form.append_data("x", "x");
    assert!(matches!(
        form.write_encoded_data("/"),
        Err(Error::OutputPathInvalid(_))
    ));
}
