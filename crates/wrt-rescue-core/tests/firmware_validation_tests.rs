//! Firmware validation against real files on disk

use std::io::Write;
use std::path::PathBuf;

use tempfile::TempDir;
use wrt_rescue_core::config::FirmwareLimits;
use wrt_rescue_core::firmware::{self, Finding, Verdict};
use wrt_rescue_core::{RescueError, ScriptedOperator, Signature};

const UIMAGE_MAGIC: [u8; 4] = [0x27, 0x05, 0x19, 0x56];

fn limits() -> FirmwareLimits {
    FirmwareLimits {
        min_size_bytes: 1024,
        max_size_bytes: 64 * 1024,
        sniff_window: 512,
    }
}

/// Binary image of `size` bytes starting with `header`
fn write_image(dir: &TempDir, name: &str, header: &[u8], size: usize) -> PathBuf {
    let path = dir.path().join(name);
    let mut data = vec![0u8; size];
    data[..header.len()].copy_from_slice(header);
    for (i, byte) in data.iter_mut().enumerate().skip(header.len()) {
        *byte = (i % 251) as u8;
    }
    let mut file = std::fs::File::create(&path).expect("create image");
    file.write_all(&data).expect("write image");
    path
}

#[tokio::test]
async fn in_band_signed_image_accepts_without_prompting() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let operator = ScriptedOperator::default();

    for size in [1025usize, 4096, 64 * 1024 - 1] {
        let path = write_image(&dir, "fw.bin", &UIMAGE_MAGIC, size);
        let verdict = firmware::validate(&path, &limits(), &operator)
            .await
            .expect("validate");
        match verdict {
            Verdict::Accepted(candidate) => {
                assert_eq!(candidate.size, size as u64);
                assert_eq!(candidate.signature, Some(Signature::UImage));
                assert!(candidate.looks_binary);
            }
            other => panic!("expected acceptance for size {size}, got {other:?}"),
        }
    }

    assert!(operator.questions().is_empty());
}

#[tokio::test]
async fn undersized_image_prompts_and_decline_rejects() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_image(&dir, "small.bin", b"HDR0", 512);
    let operator = ScriptedOperator::new(["n"]);

    let verdict = firmware::validate(&path, &limits(), &operator)
        .await
        .expect("validate");

    assert_eq!(
        verdict,
        Verdict::Rejected(Finding::SizeOutOfRange {
            size: 512,
            min: 1024,
            max: 64 * 1024
        })
    );
    assert_eq!(operator.questions().len(), 1);
    assert!(matches!(
        verdict.into_candidate(),
        Err(RescueError::FirmwareInvalid(_))
    ));
}

#[tokio::test]
async fn oversized_image_prompts_and_accept_proceeds() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_image(&dir, "large.bin", b"UBI#", 64 * 1024);
    let operator = ScriptedOperator::new(["y"]);

    let verdict = firmware::validate(&path, &limits(), &operator)
        .await
        .expect("validate");

    match verdict {
        Verdict::Overridden { candidate, waived } => {
            assert_eq!(candidate.signature, Some(Signature::Ubi));
            assert_eq!(waived.len(), 1);
        }
        other => panic!("expected override, got {other:?}"),
    }
    assert_eq!(operator.questions().len(), 1);
}

#[tokio::test]
async fn text_file_stops_at_first_declined_check() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "this is not firmware\n".repeat(200)).expect("write");
    // waive the text finding, decline the missing signature
    let operator = ScriptedOperator::new(["y", "n"]);

    let verdict = firmware::validate(&path, &limits(), &operator)
        .await
        .expect("validate");

    assert_eq!(verdict, Verdict::Rejected(Finding::NoSignature));
    assert_eq!(operator.questions().len(), 2);
}

#[tokio::test]
async fn missing_file_fails_without_prompts() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let operator = ScriptedOperator::new(["y", "y", "y"]);

    let result = firmware::validate(&dir.path().join("absent.bin"), &limits(), &operator).await;

    assert!(matches!(result, Err(RescueError::FirmwareInvalid(_))));
    assert!(operator.questions().is_empty());
}

#[tokio::test]
async fn directory_is_not_firmware() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let operator = ScriptedOperator::default();

    let result = firmware::validate(dir.path(), &limits(), &operator).await;

    match result {
        Err(RescueError::FirmwareInvalid(msg)) => assert!(msg.contains("not a regular file")),
        other => panic!("expected FirmwareInvalid, got {other:?}"),
    }
}

#[test]
fn signature_beyond_sniff_window_is_ignored() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("late.bin");
    let mut data = vec![0x01u8; 2048];
    data[1000..1004].copy_from_slice(b"hsqs");
    std::fs::write(&path, &data).expect("write");

    let candidate = firmware::inspect(&path, 512).expect("inspect");
    assert_eq!(candidate.signature, None);

    let candidate = firmware::inspect(&path, 2048).expect("inspect");
    assert_eq!(candidate.signature, Some(Signature::Squashfs));
}
