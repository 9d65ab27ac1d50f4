//! Integration tests for workspacefs-core.
//!
//! Tests that build real ext4 images need e2fsprogs and skip themselves when
//! it is not installed. Loop-mount tests need root and are ignored by
//! default.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tempfile::TempDir;
use workspacefs_core::CancelToken;
use workspacefs_core::ErrorKind;
use workspacefs_core::MaterializeConfig;
use workspacefs_core::MaterializeError;
use workspacefs_core::Strategy;
use workspacefs_core::extract::extract_image;
use workspacefs_core::materialize_image;
use workspacefs_core::materialize_image_with_cancel;

const DEBUGFS_CANDIDATES: &[&str] = &["/sbin/debugfs", "/usr/sbin/debugfs"];
const MKE2FS_CANDIDATES: &[&str] = &["/sbin/mke2fs", "/usr/sbin/mke2fs"];

fn find_tool(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
}

/// Builds an ext4 image from `content`, or returns `None` if e2fsprogs is
/// unavailable.
fn build_image(content: &Path, image: &Path) -> Option<()> {
    let mke2fs = find_tool(MKE2FS_CANDIDATES)?;
    let status = Command::new(mke2fs)
        .args(["-q", "-F", "-t", "ext4", "-d"])
        .arg(content)
        .arg(image)
        .arg("8M")
        .output()
        .ok()?
        .status;
    status.success().then_some(())
}

/// Creates an image holding `a/f.txt = "hello"` and a symlink `link -> a/f.txt`.
fn sample_image(temp: &TempDir) -> Option<(PathBuf, MaterializeConfig)> {
    let debugfs = find_tool(DEBUGFS_CANDIDATES)?;
    let content = temp.path().join("content");
    fs::create_dir_all(content.join("a")).unwrap();
    fs::write(content.join("a/f.txt"), "hello").unwrap();
    fs::set_permissions(content.join("a/f.txt"), fs::Permissions::from_mode(0o640)).unwrap();
    std::os::unix::fs::symlink("a/f.txt", content.join("link")).unwrap();

    let image = temp.path().join("image.ext4");
    build_image(&content, &image)?;

    let config = MaterializeConfig {
        debugfs_path: debugfs,
        ..MaterializeConfig::default()
    };
    Some((image, config))
}

fn output_dir(temp: &TempDir) -> PathBuf {
    let output = temp.path().join("output");
    fs::create_dir(&output).unwrap();
    output
}

#[test]
fn test_extract_into_non_empty_directory_is_rejected() {
    let temp = TempDir::new().unwrap();
    let output = output_dir(&temp);
    fs::write(output.join("only.txt"), "untouched").unwrap();

    let err = extract_image(
        &temp.path().join("image.ext4"),
        &output,
        &MaterializeConfig::default(),
        &CancelToken::new(),
    )
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PreconditionViolation);
    let names: Vec<_> = fs::read_dir(&output).unwrap().collect();
    assert_eq!(names.len(), 1);
    assert_eq!(fs::read_to_string(output.join("only.txt")).unwrap(), "untouched");
}

#[test]
fn test_materialize_into_missing_directory() {
    let temp = TempDir::new().unwrap();
    let err = materialize_image(
        temp.path().join("image.ext4"),
        temp.path().join("does-not-exist"),
        &MaterializeConfig::default(),
    )
    .unwrap_err();
    assert!(err.is_precondition_violation());
}

#[test]
fn test_materialize_with_missing_tool_leaves_output_unchanged() {
    let temp = TempDir::new().unwrap();
    let output = output_dir(&temp);
    fs::write(output.join("keep.txt"), "keep").unwrap();
    let config = MaterializeConfig {
        debugfs_path: PathBuf::from("/nonexistent/debugfs"),
        ..MaterializeConfig::default()
    };

    let err = materialize_image(temp.path().join("image.ext4"), &output, &config).unwrap_err();

    assert!(matches!(err, MaterializeError::Io(_)));
    let names: Vec<_> = fs::read_dir(&output)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("keep.txt")]);
}

#[test]
fn test_materialize_deadline_kills_slow_tool() {
    let temp = TempDir::new().unwrap();
    let output = output_dir(&temp);
    let script = temp.path().join("slow.sh");
    fs::write(&script, "sleep 10\n").unwrap();
    let config = MaterializeConfig {
        debugfs_path: PathBuf::from("sh"),
        ..MaterializeConfig::default()
    };

    let token = CancelToken::with_timeout(Duration::from_millis(100));
    let err = materialize_image_with_cancel(&script, &output, &config, &token).unwrap_err();

    assert!(matches!(err, MaterializeError::DeadlineExceeded));
    assert_eq!(fs::read_dir(&output).unwrap().count(), 0);
}

#[test]
fn test_extract_real_image_into_empty_directory() {
    let temp = TempDir::new().unwrap();
    let Some((image, config)) = sample_image(&temp) else {
        eprintln!("skipping: e2fsprogs not installed");
        return;
    };
    let output = output_dir(&temp);

    let report = materialize_image(&image, &output, &config).unwrap();

    assert_eq!(report.strategy, Strategy::Extract);
    assert_eq!(fs::read_to_string(output.join("a/f.txt")).unwrap(), "hello");
    assert_eq!(
        fs::read_link(output.join("link")).unwrap(),
        PathBuf::from("a/f.txt")
    );
    assert!(!output.join("lost+found").exists());
    assert_eq!(report.reserved_skipped, 1);
    // Only the materialized entries remain; staging is gone.
    let mut names: Vec<_> = fs::read_dir(&output)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "link".to_string()]);
}

#[test]
fn test_extract_real_image_keeps_existing_files() {
    let temp = TempDir::new().unwrap();
    let Some((image, config)) = sample_image(&temp) else {
        eprintln!("skipping: e2fsprogs not installed");
        return;
    };
    let output = output_dir(&temp);
    fs::create_dir(output.join("a")).unwrap();
    fs::write(output.join("a/f.txt"), "existing").unwrap();

    let report = materialize_image(&image, &output, &config).unwrap();

    assert_eq!(fs::read_to_string(output.join("a/f.txt")).unwrap(), "existing");
    assert!(output.join("link").is_symlink());
    assert!(report.entries_skipped >= 2);

    let rerun = materialize_image(&image, &output, &config).unwrap();
    assert!(rerun.is_noop());
}

#[test]
fn test_extract_corrupt_image_is_tool_failure() {
    let temp = TempDir::new().unwrap();
    let Some(debugfs) = find_tool(DEBUGFS_CANDIDATES) else {
        eprintln!("skipping: debugfs not installed");
        return;
    };
    let image = temp.path().join("corrupt.ext4");
    fs::write(&image, "not a filesystem").unwrap();
    let output = output_dir(&temp);
    let config = MaterializeConfig {
        debugfs_path: debugfs,
        ..MaterializeConfig::default()
    };

    let err = materialize_image(&image, &output, &config).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalTool);
    assert_eq!(fs::read_dir(&output).unwrap().count(), 0);
}

#[test]
#[ignore = "requires root and loop devices"]
fn test_mount_real_image_duplicates_content() {
    let temp = TempDir::new().unwrap();
    let Some((image, config)) = sample_image(&temp) else {
        eprintln!("skipping: e2fsprogs not installed");
        return;
    };
    let config = config.with_strategy(Strategy::Mount);
    let output = output_dir(&temp);
    fs::write(output.join("unrelated.txt"), "mine").unwrap();

    let report = materialize_image(&image, &output, &config).unwrap();

    assert_eq!(report.strategy, Strategy::Mount);
    assert_eq!(report.files_copied, 1);
    assert_eq!(report.symlinks_created, 1);
    assert_eq!(report.bytes_written, 5);
    assert_eq!(fs::read_to_string(output.join("a/f.txt")).unwrap(), "hello");
    let mode = fs::metadata(output.join("a/f.txt")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o640);
    assert_eq!(fs::read_to_string(output.join("unrelated.txt")).unwrap(), "mine");
    assert!(!output.join("lost+found").exists());
}

/// Names of loop devices whose backing file is `image`.
#[cfg(target_os = "linux")]
fn loops_backed_by(image: &Path) -> Vec<String> {
    let image = image.canonicalize().unwrap();
    let Ok(entries) = fs::read_dir("/sys/block") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("loop"))
        .filter(|name| {
            fs::read_to_string(format!("/sys/block/{name}/loop/backing_file"))
                .is_ok_and(|backing| Path::new(backing.trim()) == image)
        })
        .collect()
}

/// Waits for the kernel to finish detaching, since udev may hold a device
/// open briefly after the last release.
#[cfg(target_os = "linux")]
fn settled_loops_backed_by(image: &Path) -> Vec<String> {
    for _ in 0..50 {
        let backed = loops_backed_by(image);
        if backed.is_empty() {
            return backed;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    loops_backed_by(image)
}

#[test]
#[cfg(target_os = "linux")]
#[ignore = "requires root and loop devices"]
fn test_failed_mount_leaves_no_loop_device() {
    use workspacefs_core::LoopMount;
    use workspacefs_core::MountStep;

    let temp = TempDir::new().unwrap();
    let image = temp.path().join("garbage.img");
    fs::write(&image, vec![0_u8; 8 * 1024 * 1024]).unwrap();
    let target = temp.path().join("mnt");
    fs::create_dir(&target).unwrap();

    let err = LoopMount::mount(&image, &target, &MaterializeConfig::default()).unwrap_err();

    assert_eq!(err.mount_step(), Some(MountStep::Mount));
    assert_eq!(err.kind(), ErrorKind::ResourceAcquisition);
    assert!(settled_loops_backed_by(&image).is_empty());
    assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
}

#[test]
#[cfg(target_os = "linux")]
#[ignore = "requires root and loop devices"]
fn test_unmount_returns_loop_device() {
    use workspacefs_core::LoopMount;

    let temp = TempDir::new().unwrap();
    let Some((image, config)) = sample_image(&temp) else {
        eprintln!("skipping: e2fsprogs not installed");
        return;
    };
    let target = temp.path().join("mnt");
    fs::create_dir(&target).unwrap();

    let mut mount = LoopMount::mount(&image, &target, &config).unwrap();
    let device = mount.device_path().unwrap().to_path_buf();
    let name = device.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(loops_backed_by(&image), vec![name]);

    mount.unmount().unwrap();
    assert!(settled_loops_backed_by(&image).is_empty());
}

#[test]
#[cfg(target_os = "linux")]
#[ignore = "requires root and loop devices"]
fn test_concurrent_mounts_release_cleanly() {
    use workspacefs_core::LoopMount;

    const THREADS: usize = 8;
    const CYCLES: usize = 10;

    let temp = TempDir::new().unwrap();
    let Some((image, config)) = sample_image(&temp) else {
        eprintln!("skipping: e2fsprogs not installed");
        return;
    };

    let errors: Vec<MaterializeError> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|worker| {
                let target = temp.path().join(format!("mnt-{worker}"));
                fs::create_dir(&target).unwrap();
                let (image, config) = (&image, &config);
                scope.spawn(move || {
                    let mut errors = Vec::new();
                    for _ in 0..CYCLES {
                        match LoopMount::mount(image, &target, config) {
                            Ok(mut mount) => {
                                assert_eq!(
                                    fs::read_to_string(target.join("a/f.txt")).unwrap(),
                                    "hello"
                                );
                                mount.unmount().unwrap();
                            }
                            Err(err) => errors.push(err),
                        }
                    }
                    errors
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("worker panicked"))
            .collect()
    });

    for err in &errors {
        assert_eq!(err.kind(), ErrorKind::ResourceAcquisition, "{err}");
    }
    assert!(settled_loops_backed_by(&image).is_empty());
}
