//! Black-box end-to-end tests against the compiled binary - same shape as
//! the teacher's `tests/test_binary.rs`: spawn the server as a real
//! subprocess, talk to it over a raw socket, tear it down with SIGTERM via
//! `nix`. Exercises spec.md §8's S1-S4 scenarios.

use std::{
    io::{Read, Write},
    net::TcpStream,
    process::{Child, Command, Stdio},
    time::Duration,
};

fn spawn_server(media_dir: &std::path::Path, transcode_dir: &std::path::Path, ffmpeg_bin: &str, port: u16) -> Child {
    Command::new(env!("CARGO_BIN_EXE_musicd"))
        .arg(media_dir)
        .args(["--listen", &format!("127.0.0.1:{port}")])
        .args(["--transcode-dir", transcode_dir.to_str().unwrap()])
        .args(["--ffmpeg-bin", ffmpeg_bin])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn server binary")
}

fn wait_for_port(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("server never started listening on 127.0.0.1:{}", port);
}

fn raw_request(port: u16, request: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
    }
    let _ = child.wait();
}

/// A fake ffmpeg: writes a fixed payload to its last argument (the output
/// path) and exits immediately, standing in for a real transcode.
fn fake_ffmpeg_script(dir: &std::path::Path) -> std::path::PathBuf {
    let script_path = dir.join("fake-ffmpeg.sh");
    std::fs::write(
        &script_path,
        "#!/bin/sh\nfor a in \"$@\"; do out=\"$a\"; done\nprintf 'hello-transcoded-bytes' > \"$out\"\n",
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    script_path
}

#[test]
fn s1_direct_range_request_is_206() {
    let media = tempfile::tempdir().unwrap();
    let transcode = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("A.mp3"), vec![7u8; 10_000]).unwrap();

    let mut child = spawn_server(media.path(), transcode.path(), "true", 38111);
    wait_for_port(38111);

    let response = raw_request(
        38111,
        "GET /A.mp3 HTTP/1.1\r\nHost: localhost\r\nRange: bytes=0-499\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 206"));
    assert!(response.contains("Content-Range: bytes 0-499/10000"));
    assert!(response.contains("Content-Length: 500"));

    kill(&mut child);
}

#[test]
fn s2_unsatisfiable_range_is_416() {
    let media = tempfile::tempdir().unwrap();
    let transcode = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("A.mp3"), vec![7u8; 10_000]).unwrap();

    let mut child = spawn_server(media.path(), transcode.path(), "true", 38112);
    wait_for_port(38112);

    let response = raw_request(
        38112,
        "GET /A.mp3 HTTP/1.1\r\nHost: localhost\r\nRange: bytes=10000-10500\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 416"));

    kill(&mut child);
}

#[test]
fn s3_malformed_range_sends_full_body() {
    let media = tempfile::tempdir().unwrap();
    let transcode = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("A.mp3"), vec![7u8; 10_000]).unwrap();

    let mut child = spawn_server(media.path(), transcode.path(), "true", 38113);
    wait_for_port(38113);

    let response = raw_request(
        38113,
        "GET /A.mp3 HTTP/1.1\r\nHost: localhost\r\nRange: bananas\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("Content-Length: 10000"));

    kill(&mut child);
}

#[test]
fn unknown_path_is_404() {
    let media = tempfile::tempdir().unwrap();
    let transcode = tempfile::tempdir().unwrap();

    let mut child = spawn_server(media.path(), transcode.path(), "true", 38114);
    wait_for_port(38114);

    let response = raw_request(
        38114,
        "GET /NoSuchBand/track.mp3 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 404"));

    kill(&mut child);
}

#[test]
fn s4_transcode_cold_serves_the_fake_transcoded_bytes() {
    let media = tempfile::tempdir().unwrap();
    let transcode = tempfile::tempdir().unwrap();
    let scripts = tempfile::tempdir().unwrap();
    std::fs::write(media.path().join("B.flac"), vec![9u8; 500]).unwrap();
    let ffmpeg = fake_ffmpeg_script(scripts.path());

    let mut child = spawn_server(media.path(), transcode.path(), ffmpeg.to_str().unwrap(), 38115);
    wait_for_port(38115);

    let response = raw_request(
        38115,
        "GET /B.mp3 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("hello-transcoded-bytes"));

    kill(&mut child);
}
